//! Pre-council gates.
//!
//! Two short utility calls run before any council fan-out: the search gate
//! asks for a bare YES/NO on whether the question needs fresh information,
//! and the clarity gate asks for a JSON verdict on whether the question is
//! specific enough to deliberate. Both degrade to "proceed" on any fault;
//! a broken gate must never take the pipeline down.

use serde::Deserialize;
use tracing::warn;

use crate::invoker::Invoker;
use crate::prompts;
use crate::providers::{ChatMessage, CompletionRequest};
use crate::types::{ClarificationRequest, ModelId, Question};

/// The clarity gate reads at most this many trailing history messages.
pub const CLARIFIER_HISTORY_MESSAGES: usize = 5;

/// Verdict from the clarity gate, as the utility model reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClarityVerdict {
    pub sufficient: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub refined_topic: Option<String>,
}

impl ClarityVerdict {
    /// Fallback verdict when the gate itself fails: the turn proceeds with
    /// the question as its own refined topic.
    pub fn assume_sufficient(latest: &str) -> Self {
        Self {
            sufficient: true,
            reasoning: "clarity check unavailable, proceeding".to_string(),
            questions: Vec::new(),
            refined_topic: Some(latest.to_string()),
        }
    }

    /// An insufficient verdict with no questions cannot be asked back to
    /// the user, so it degrades to proceeding.
    pub fn into_clarification(self) -> Option<ClarificationRequest> {
        if self.sufficient || self.questions.is_empty() {
            return None;
        }
        Some(ClarificationRequest {
            reasoning: self.reasoning,
            questions: self.questions,
        })
    }
}

/// Ask the utility model whether the question needs a web search. Anything
/// other than a clean YES, including gate failure, means no search.
pub async fn needs_search(invoker: &Invoker, model: &ModelId, question: &str) -> bool {
    let request = CompletionRequest::from_prompt(prompts::search_gate_prompt(question));
    match invoker.invoke_utility(model, request).await {
        Ok(completion) => completion.text.trim().to_uppercase() == "YES",
        Err(err) => {
            warn!(model = %model, error = %err, "search gate failed, skipping search");
            false
        }
    }
}

/// Ask the utility model whether the question is specific enough for the
/// council. `history` must already end with the latest user message.
pub async fn assess_clarity(
    invoker: &Invoker,
    model: &ModelId,
    history: &[ChatMessage],
    latest: &str,
    force_followup: bool,
) -> ClarityVerdict {
    let mut messages = vec![ChatMessage::system(prompts::clarifier_system_prompt(
        force_followup,
    ))];
    let start = history.len().saturating_sub(CLARIFIER_HISTORY_MESSAGES);
    for message in &history[start..] {
        // The clarifier reads text only.
        let mut flattened = message.clone();
        flattened.images = Vec::new();
        messages.push(flattened);
    }

    match invoker
        .invoke_utility(model, CompletionRequest::new(messages))
        .await
    {
        Ok(completion) => match parse_verdict(&completion.text) {
            Some(verdict) => verdict,
            None => {
                warn!(model = %model, "unparsable clarity verdict, proceeding");
                ClarityVerdict::assume_sufficient(latest)
            }
        },
        Err(err) => {
            warn!(model = %model, error = %err, "clarity check failed, proceeding");
            ClarityVerdict::assume_sufficient(latest)
        }
    }
}

fn parse_verdict(text: &str) -> Option<ClarityVerdict> {
    serde_json::from_str(strip_code_fences(text)).ok()
}

/// Models often wrap JSON in a markdown code fence; peel it off.
fn strip_code_fences(text: &str) -> &str {
    let t = text.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    let t = t.strip_suffix("```").unwrap_or(t);
    t.trim()
}
