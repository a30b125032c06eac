//! Provider Gateway — one capability interface over every model backend.
//!
//! Each backend implements [`ModelBackend`] once and is selected through the
//! identity-keyed [`ProviderRegistry`]; callers never inspect concrete types.
//! The gateway boundary turns every transport or provider fault into a
//! [`ProviderError`] value. Nothing here panics on a bad upstream.
//!
//! # Design
//!
//! ```text
//! invoker ──▶ ModelBackend::invoke ───────────▶ Completion
//!         ──▶ ModelBackend::invoke_streaming ─▶ deltas via channel, then Completion
//!                      │
//!                      └─ OpenRouterBackend (chat completions over reqwest)
//! ```

pub mod openrouter;
pub mod registry;

pub use openrouter::{OpenRouterBackend, OpenRouterClient};
pub use registry::{missing_models, ProviderRegistry, SharedBackend};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::ModelId;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message. `images` carries data URLs; when non-empty the message
/// is sent as multimodal content parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// Request for one completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the backend for image output alongside text (infographic call).
    pub image_output: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            image_output: false,
        }
    }

    /// Single user message convenience constructor.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(prompt)])
    }

    pub fn with_image_output(mut self) -> Self {
        self.image_output = true;
        self
    }
}

/// Normalized backend response.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    /// Reasoning trace when the backend exposes one.
    pub reasoning: Option<String>,
    /// Data URLs of generated images, usually empty.
    pub images: Vec<String>,
}

/// Faults at the gateway boundary. Absorbed into `ProviderResult` by the
/// invoker; they never propagate past it.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("OPENROUTER_API_KEY is not set")]
    MissingApiKey,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("model returned an empty completion")]
    EmptyCompletion,

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("no backend registered for {0}")]
    NotRegistered(ModelId),
}

impl ProviderError {
    /// Transient faults that a bounded gateway retry may recover from.
    /// Request-shaped 4xx faults are not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::MissingApiKey
            | Self::MalformedResponse(_)
            | Self::EmptyCompletion
            | Self::Timeout(_)
            | Self::NotRegistered(_) => false,
        }
    }
}

/// The single capability interface every provider implements.
///
/// Streaming pushes text deltas through the channel in order and still
/// returns the full `Completion`; the returned text equals the
/// concatenation of the pushed deltas.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Identity this backend answers for.
    fn model(&self) -> &ModelId;

    async fn invoke(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    async fn invoke_streaming(
        &self,
        request: CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<Completion, ProviderError>;
}
