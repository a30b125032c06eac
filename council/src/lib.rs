//! Multi-Model Council Deliberation Library
//!
//! This library provides:
//! - A staged deliberation pipeline over a roster of LLM providers
//! - Anonymized peer review with Borda-count rank aggregation
//! - Streamed chairman synthesis with a broadcast event feed
//!
//! # Stages
//!
//! ## Gates (before the council convenes)
//! - Stage 0: a utility model decides whether a web search would help;
//!   if so, a search-capable model gathers findings once
//! - Clarity gate: ambiguous questions stop the turn with follow-up
//!   questions instead of wasting a full deliberation
//!
//! ## Deliberation
//! - Stage 1: every council member answers the question in parallel
//! - Stage 2: members rank each other's anonymized responses; ballots
//!   are aggregated into a single standing
//! - Stage 3: the chairman streams a synthesis informed by the
//!   responses, reviews, and aggregate ranking
//! - Stage 4: an image model renders an optional infographic
//!
//! # Usage
//!
//! ```bash
//! # One-shot question against the default roster
//! council ask "How do quorum leases interact with leader election?"
//!
//! # Stream the raw event feed as JSON lines
//! council ask --events "Compare LSM trees and B-trees for write-heavy loads"
//!
//! # Check which configured models the gateway actually serves
//! council models --check
//! ```

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod context;
pub mod events;
pub mod gates;
pub mod invoker;
pub mod knowledge;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod review;
pub mod store;
pub mod types;

// Re-export key pipeline types
pub use pipeline::{
    CouncilPipeline, PipelineError, Stage, StageTracker, TransitionError, TurnReport, TurnRequest,
};

// Re-export key provider types
pub use providers::{
    ChatMessage, Completion, CompletionRequest, ModelBackend, OpenRouterBackend, OpenRouterClient,
    ProviderError, ProviderRegistry, Role, SharedBackend,
};

// Re-export key event types
pub use events::{CouncilEvent, EventBus, EventPayload, SharedEventBus};

// Re-export key review types
pub use review::{
    aggregate_rankings, collect_rankings, AggregateEntry, AggregateRanking, AnonymizationMap,
    PeerRanking,
};

// Re-export key core types
pub use types::{
    CouncilSet, InfographicResult, ModelId, ProviderResult, ProviderStatus, SynthesisResult,
    TurnId,
};

// Re-export key collaborator seams
pub use context::{Attachment, AttachmentKind, AttachmentSource, FileAttachments};
pub use knowledge::KnowledgeSource;

// Re-export key config and store types
pub use config::CouncilConfig;
pub use invoker::Invoker;
pub use store::{
    Conversation, ConversationId, ConversationStore, MemoryStore, SharedStore, TurnOutcome,
    TurnRecord,
};
