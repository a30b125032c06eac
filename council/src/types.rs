//! Core data model for one deliberation turn.
//!
//! Everything here is created during a turn, populated stage by stage, and
//! frozen once its stage completes. Later stages read, never rewrite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one model, an OpenRouter-style `vendor/model` slug.
///
/// Ordering is plain string order, which doubles as the deterministic
/// tie-break key in ranking aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Vendor prefix, e.g. `"anthropic"` from `"anthropic/claude-opus-4.5"`.
    pub fn vendor(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Model part without the vendor prefix.
    pub fn short_name(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of a single deliberation turn.
///
/// The anonymization shuffle is seeded from this id, so pinning the id pins
/// the label assignment while freshly minted ids give fresh permutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Deterministic shuffle seed derived from the id bytes.
    pub fn seed(&self) -> u64 {
        let bytes = self.0.as_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(head)
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal status of one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Ok,
    Error,
    Timeout,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of one provider call, failure included. Never mutated after
/// creation; faults are data here, not exceptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub model: ModelId,
    pub status: ProviderStatus,
    /// Response text; empty unless status is `Ok`.
    pub text: String,
    /// Diagnostic detail when the call failed.
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ProviderResult {
    pub fn ok(model: ModelId, text: String, elapsed_ms: u64) -> Self {
        Self {
            model,
            status: ProviderStatus::Ok,
            text,
            error: None,
            elapsed_ms,
        }
    }

    pub fn error(model: ModelId, detail: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            model,
            status: ProviderStatus::Error,
            text: String::new(),
            error: Some(detail.into()),
            elapsed_ms,
        }
    }

    pub fn timeout(model: ModelId, elapsed_ms: u64) -> Self {
        Self {
            model,
            status: ProviderStatus::Timeout,
            text: String::new(),
            error: Some("call exceeded the provider timeout".to_string()),
            elapsed_ms,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ProviderStatus::Ok
    }
}

/// Stage 1 output: one result per dispatched provider, in arrival order.
/// Constructed once by the invoker join and frozen before peer review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilSet {
    results: Vec<ProviderResult>,
}

impl CouncilSet {
    pub fn new(results: Vec<ProviderResult>) -> Self {
        Self { results }
    }

    pub fn results(&self) -> &[ProviderResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, model: &ModelId) -> Option<&ProviderResult> {
        self.results.iter().find(|r| &r.model == model)
    }

    /// Successful results only, still in arrival order.
    pub fn ok_results(&self) -> impl Iterator<Item = &ProviderResult> {
        self.results.iter().filter(|r| r.is_ok())
    }

    pub fn ok_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }
}

/// Stage 3 output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub model: ModelId,
    pub text: String,
}

/// Stage 4 output. `generated = false` is a valid end state, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfographicResult {
    pub model: ModelId,
    pub generated: bool,
    /// Data URL of the rendered image when generation succeeded.
    pub image: Option<String>,
    /// The text the image was asked to summarize.
    pub source_text: String,
}

impl InfographicResult {
    pub fn generated(model: ModelId, image: String, source_text: String) -> Self {
        Self {
            model,
            generated: true,
            image: Some(image),
            source_text,
        }
    }

    pub fn skipped(model: ModelId, source_text: String) -> Self {
        Self {
            model,
            generated: false,
            image: None,
            source_text,
        }
    }
}

/// One clarifying question, optionally with fixed answer choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Raised instead of a CouncilSet when the query is too ambiguous to
/// deliberate on. The turn ends awaiting the user's follow-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub reasoning: String,
    pub questions: Vec<Question>,
}

/// Timestamp helper shared by events and turn records.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_vendor_split() {
        let id = ModelId::from("anthropic/claude-opus-4.5");
        assert_eq!(id.vendor(), "anthropic");
        assert_eq!(id.short_name(), "claude-opus-4.5");
    }

    #[test]
    fn test_model_id_without_vendor() {
        let id = ModelId::from("local-model");
        assert_eq!(id.vendor(), "local-model");
        assert_eq!(id.short_name(), "local-model");
    }

    #[test]
    fn test_model_id_ordering_is_string_order() {
        let mut ids = vec![
            ModelId::from("x-ai/grok-4.1-fast:free"),
            ModelId::from("anthropic/claude-opus-4.5"),
            ModelId::from("openai/gpt-5.1"),
        ];
        ids.sort();
        assert_eq!(ids[0].as_str(), "anthropic/claude-opus-4.5");
        assert_eq!(ids[2].as_str(), "x-ai/grok-4.1-fast:free");
    }

    #[test]
    fn test_turn_id_seed_is_stable() {
        let id = TurnId::new();
        assert_eq!(id.seed(), id.seed());
    }

    #[test]
    fn test_turn_id_pinned_seed() {
        let uuid = Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
        let a = TurnId::from_uuid(uuid);
        let b = TurnId::from_uuid(uuid);
        assert_eq!(a.seed(), b.seed());
        assert_ne!(a.seed(), 0);
    }

    #[test]
    fn test_provider_result_constructors() {
        let ok = ProviderResult::ok(ModelId::from("a/b"), "hi".to_string(), 12);
        assert!(ok.is_ok());
        assert!(ok.error.is_none());

        let err = ProviderResult::error(ModelId::from("a/b"), "boom", 5);
        assert_eq!(err.status, ProviderStatus::Error);
        assert!(!err.is_ok());
        assert!(err.text.is_empty());

        let to = ProviderResult::timeout(ModelId::from("a/b"), 1000);
        assert_eq!(to.status, ProviderStatus::Timeout);
        assert!(to.error.is_some());
    }

    #[test]
    fn test_council_set_ok_filtering() {
        let set = CouncilSet::new(vec![
            ProviderResult::ok(ModelId::from("a/one"), "x".into(), 1),
            ProviderResult::timeout(ModelId::from("b/two"), 2),
            ProviderResult::ok(ModelId::from("c/three"), "y".into(), 3),
        ]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.ok_count(), 2);
        let ok: Vec<_> = set.ok_results().map(|r| r.model.as_str()).collect();
        assert_eq!(ok, vec!["a/one", "c/three"]);
        assert!(set.get(&ModelId::from("b/two")).is_some());
        assert!(set.get(&ModelId::from("missing/model")).is_none());
    }

    #[test]
    fn test_provider_status_serializes_lowercase() {
        let json = serde_json::to_string(&ProviderStatus::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }
}
