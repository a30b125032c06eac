//! OpenRouter chat-completions adapter.
//!
//! One [`OpenRouterClient`] is shared by every backend instance; an
//! [`OpenRouterBackend`] binds it to a single model identity. Retries are
//! bounded exponential backoff on transient faults only, and the streaming
//! path never retries once a delta may have been observed.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ChatMessage, Completion, CompletionRequest, ModelBackend, ProviderError, Role};
use crate::types::ModelId;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Diagnostic error bodies are capped at this many bytes.
const ERROR_BODY_CAP: usize = 2048;

/// Shared HTTP client for the OpenRouter API.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl OpenRouterClient {
    pub fn new(api_key: &str) -> Result<Self, ProviderError> {
        Self::with_options(api_key, DEFAULT_BASE_URL, None, None)
    }

    /// Build from the environment: `OPENROUTER_API_KEY` (required),
    /// `OPENROUTER_BASE_URL`, `OPENROUTER_REFERER`, `OPENROUTER_TITLE`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key =
            std::env::var("OPENROUTER_API_KEY").map_err(|_| ProviderError::MissingApiKey)?;
        let base_url = std::env::var("OPENROUTER_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let referer = std::env::var("OPENROUTER_REFERER").ok();
        let title = std::env::var("OPENROUTER_TITLE").ok();
        Self::with_options(&api_key, &base_url, referer.as_deref(), title.as_deref())
    }

    pub fn with_options(
        api_key: &str,
        base_url: &str,
        referer: Option<&str>,
        title: Option<&str>,
    ) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::Transport("api key is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        if let Some(referer) = referer {
            if let Ok(value) = HeaderValue::from_str(referer) {
                headers.insert("HTTP-Referer", value);
            }
        }
        if let Some(title) = title {
            if let Ok(value) = HeaderValue::from_str(title) {
                headers.insert("X-Title", value);
            }
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        })
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Bind this client to one model identity.
    pub fn backend(&self, model: ModelId) -> OpenRouterBackend {
        OpenRouterBackend {
            client: self.clone(),
            model,
        }
    }

    /// One whole-response completion, with bounded retry on transient faults.
    pub async fn complete(
        &self,
        model: &ModelId,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.complete_once(model, request).await {
                Ok(completion) => return Ok(completion),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = backoff_delay(self.retry_base_delay, attempt);
                    warn!(
                        model = %model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying openrouter call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn complete_once(
        &self,
        model: &ModelId,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let body = chat_body(model, request, false);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_error_message(&body_text),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("no choices in response".into()))?;
        completion_from(choice.message)
    }

    /// Streamed completion: deltas are forwarded through `deltas` in order
    /// and the returned text is exactly their concatenation. A dropped
    /// receiver stops the forwarding, not the call.
    pub async fn complete_streaming(
        &self,
        model: &ModelId,
        request: &CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<Completion, ProviderError> {
        let body = chat_body(model, request, true);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_error_message(&body_text),
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut text = String::new();

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Transport(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    break 'read;
                }
                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(parsed) => {
                        let delta = parsed
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content)
                            .unwrap_or_default();
                        if !delta.is_empty() {
                            text.push_str(&delta);
                            let _ = deltas.send(delta).await;
                        }
                    }
                    Err(err) => debug!(error = %err, "skipping unparsable stream line"),
                }
            }
        }

        if text.is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }
        Ok(Completion {
            text,
            reasoning: None,
            images: Vec::new(),
        })
    }

    /// Model catalog listing, used by the roster availability check.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_error_message(&body_text),
            });
        }

        let parsed: ModelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}

/// One model identity bound to the shared client.
#[derive(Debug, Clone)]
pub struct OpenRouterBackend {
    client: OpenRouterClient,
    model: ModelId,
}

impl OpenRouterBackend {
    pub fn new(client: OpenRouterClient, model: ModelId) -> Self {
        Self { client, model }
    }
}

#[async_trait::async_trait]
impl ModelBackend for OpenRouterBackend {
    fn model(&self) -> &ModelId {
        &self.model
    }

    async fn invoke(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.client.complete(&self.model, &request).await
    }

    async fn invoke_streaming(
        &self,
        request: CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<Completion, ProviderError> {
        self.client
            .complete_streaming(&self.model, &request, deltas)
            .await
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.min(5))
}

/// Pull the `error.message` field out of an API error body, falling back to
/// the capped raw body.
fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    if let Ok(envelope) = serde_json::from_str::<Envelope>(body) {
        return envelope.error.message;
    }
    let mut message = body.trim().to_string();
    if message.len() > ERROR_BODY_CAP {
        message.truncate(ERROR_BODY_CAP);
    }
    if message.is_empty() {
        message.push_str("(empty error body)");
    }
    message
}

fn chat_body<'a>(model: &'a ModelId, request: &'a CompletionRequest, stream: bool) -> ChatBody<'a> {
    ChatBody {
        model: model.as_str(),
        messages: request.messages.iter().map(wire_message).collect(),
        stream: stream.then_some(true),
        modalities: request.image_output.then_some(vec!["image", "text"]),
    }
}

fn wire_message(message: &ChatMessage) -> WireMessage<'_> {
    if message.images.is_empty() {
        return WireMessage {
            role: message.role,
            content: WireContent::Text(&message.content),
        };
    }
    let mut parts = vec![WirePart::Text {
        text: &message.content,
    }];
    for url in &message.images {
        parts.push(WirePart::ImageUrl {
            image_url: WireImageUrl { url },
        });
    }
    WireMessage {
        role: message.role,
        content: WireContent::Parts(parts),
    }
}

fn completion_from(message: ChoiceMessage) -> Result<Completion, ProviderError> {
    let mut images: Vec<String> = message
        .images
        .into_iter()
        .map(|img| img.image_url.url)
        .collect();
    let text = message.content.unwrap_or_default();
    // Some image models hand the data URL back as plain content.
    if images.is_empty() && text.starts_with("data:image") {
        images.push(text.clone());
    }
    if text.is_empty() && images.is_empty() {
        return Err(ProviderError::EmptyCompletion);
    }
    Ok(Completion {
        text,
        reasoning: message.reasoning,
        images,
    })
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modalities: Option<Vec<&'static str>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: WireContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<WirePart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImageUrl<'a> },
}

#[derive(Serialize)]
struct WireImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Default)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    images: Vec<ChoiceImage>,
}

#[derive(Deserialize)]
struct ChoiceImage {
    image_url: ChoiceImageUrl,
}

#[derive(Deserialize)]
struct ChoiceImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 5), Duration::from_secs(32));
        assert_eq!(backoff_delay(base, 9), Duration::from_secs(32));
    }

    #[test]
    fn test_api_error_message_prefers_structured_body() {
        let body = r#"{"error": {"message": "model is overloaded", "code": 503}}"#;
        assert_eq!(api_error_message(body), "model is overloaded");
    }

    #[test]
    fn test_api_error_message_falls_back_to_raw() {
        assert_eq!(api_error_message("plain failure"), "plain failure");
        assert_eq!(api_error_message("  "), "(empty error body)");
    }

    #[test]
    fn test_chat_body_plain_text() {
        let model = ModelId::from("openai/gpt-5.1");
        let request = CompletionRequest::from_prompt("hello");
        let body = serde_json::to_value(chat_body(&model, &request, false)).unwrap();
        assert_eq!(body["model"], "openai/gpt-5.1");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert!(body.get("stream").is_none());
        assert!(body.get("modalities").is_none());
    }

    #[test]
    fn test_chat_body_streaming_flag() {
        let model = ModelId::from("openai/gpt-5.1");
        let request = CompletionRequest::from_prompt("hello");
        let body = serde_json::to_value(chat_body(&model, &request, true)).unwrap();
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_chat_body_multimodal_parts() {
        let model = ModelId::from("openai/gpt-5.1");
        let message =
            ChatMessage::user("describe this").with_images(vec!["data:image/png;base64,AA".into()]);
        let request = CompletionRequest::new(vec![message]);
        let body = serde_json::to_value(chat_body(&model, &request, false)).unwrap();
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "describe this");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AA");
    }

    #[test]
    fn test_chat_body_image_modalities() {
        let model = ModelId::from("google/gemini-3-pro-image-preview");
        let request = CompletionRequest::from_prompt("draw").with_image_output();
        let body = serde_json::to_value(chat_body(&model, &request, false)).unwrap();
        assert_eq!(body["modalities"][0], "image");
        assert_eq!(body["modalities"][1], "text");
    }

    #[test]
    fn test_completion_from_text() {
        let message = ChoiceMessage {
            content: Some("answer".into()),
            reasoning: Some("thought".into()),
            images: Vec::new(),
        };
        let completion = completion_from(message).unwrap();
        assert_eq!(completion.text, "answer");
        assert_eq!(completion.reasoning.as_deref(), Some("thought"));
        assert!(completion.images.is_empty());
    }

    #[test]
    fn test_completion_from_images_array() {
        let message = ChoiceMessage {
            content: Some(String::new()),
            reasoning: None,
            images: vec![ChoiceImage {
                image_url: ChoiceImageUrl {
                    url: "data:image/png;base64,XYZ".into(),
                },
            }],
        };
        let completion = completion_from(message).unwrap();
        assert_eq!(completion.images, vec!["data:image/png;base64,XYZ"]);
    }

    #[test]
    fn test_completion_from_data_url_content() {
        let message = ChoiceMessage {
            content: Some("data:image/png;base64,ABC".into()),
            reasoning: None,
            images: Vec::new(),
        };
        let completion = completion_from(message).unwrap();
        assert_eq!(completion.images, vec!["data:image/png;base64,ABC"]);
    }

    #[test]
    fn test_completion_from_empty_is_error() {
        let message = ChoiceMessage::default();
        assert!(matches!(
            completion_from(message),
            Err(ProviderError::EmptyCompletion)
        ));
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let payload = r#"{"choices": [{"delta": {"content": "hel"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(payload).unwrap();
        let delta = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content);
        assert_eq!(delta.as_deref(), Some("hel"));
    }

    #[test]
    fn test_missing_api_key_rejected() {
        assert!(matches!(
            OpenRouterClient::new(""),
            Err(ProviderError::MissingApiKey)
        ));
    }
}
