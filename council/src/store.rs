//! Conversation persistence seam.
//!
//! The pipeline only appends finalized turns and reads prior turns back as
//! chat history; listing, titles, and deletion exist for the transport.
//! `MemoryStore` is the shipped implementation; a durable store would
//! implement the same trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::providers::ChatMessage;
use crate::review::AggregateRanking;
use crate::types::{
    now, ClarificationRequest, InfographicResult, ProviderResult, SynthesisResult, TurnId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<TurnRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub turn_count: usize,
}

/// One finalized turn. Failed turns are never appended; a failed turn
/// leaves no trace in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: TurnId,
    pub question: String,
    pub completed_at: DateTime<Utc>,
    pub outcome: TurnOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed {
        council: Vec<ProviderResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aggregate: Option<AggregateRanking>,
        synthesis: SynthesisResult,
        #[serde(skip_serializing_if = "Option::is_none")]
        infographic: Option<InfographicResult>,
    },
    AwaitingClarification {
        request: ClarificationRequest,
    },
}

impl TurnRecord {
    /// The assistant-side text this turn contributes to later context.
    pub fn assistant_text(&self) -> String {
        match &self.outcome {
            TurnOutcome::Completed { synthesis, .. } => synthesis.text.clone(),
            TurnOutcome::AwaitingClarification { request } => clarification_text(request),
        }
    }
}

/// Render pending questions as plain assistant text so a follow-up turn
/// carries them in history.
fn clarification_text(request: &ClarificationRequest) -> String {
    let mut text = request.reasoning.clone();
    for (index, question) in request.questions.iter().enumerate() {
        text.push_str(&format!("\n{}. {}", index + 1, question.text));
        if !question.options.is_empty() {
            text.push_str(&format!(" ({})", question.options.join(" / ")));
        }
    }
    text
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation {0} not found")]
    NotFound(ConversationId),
}

pub type SharedStore = Arc<dyn ConversationStore>;

/// Create/read/append surface the transport drives.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self) -> Result<Conversation, StoreError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError>;

    async fn delete(&self, id: ConversationId) -> Result<bool, StoreError>;

    async fn set_title(&self, id: ConversationId, title: &str) -> Result<(), StoreError>;

    async fn append_turn(&self, id: ConversationId, record: TurnRecord) -> Result<(), StoreError>;

    /// Prior turns flattened to user/assistant pairs, oldest first.
    async fn history(&self, id: ConversationId) -> Result<Vec<ChatMessage>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<ConversationId, Conversation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create(&self) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: ConversationId::new(),
            title: crate::prompts::DEFAULT_TITLE.to_string(),
            created_at: now(),
            turns: Vec::new(),
        };
        self.inner
            .write()
            .await
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let guard = self.inner.read().await;
        let mut summaries: Vec<ConversationSummary> = guard
            .values()
            .map(|c| ConversationSummary {
                id: c.id,
                title: c.title.clone(),
                created_at: c.created_at,
                turn_count: c.turns.len(),
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn get(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.inner.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: ConversationId) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.remove(&id).is_some())
    }

    async fn set_title(&self, id: ConversationId, title: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let conversation = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        conversation.title = title.to_string();
        Ok(())
    }

    async fn append_turn(&self, id: ConversationId, record: TurnRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let conversation = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        conversation.turns.push(record);
        Ok(())
    }

    async fn history(&self, id: ConversationId) -> Result<Vec<ChatMessage>, StoreError> {
        let guard = self.inner.read().await;
        let Some(conversation) = guard.get(&id) else {
            return Ok(Vec::new());
        };
        let mut messages = Vec::with_capacity(conversation.turns.len() * 2);
        for turn in &conversation.turns {
            messages.push(ChatMessage::user(&turn.question));
            messages.push(ChatMessage::assistant(turn.assistant_text()));
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelId, Question};

    fn completed_record(question: &str, answer: &str) -> TurnRecord {
        TurnRecord {
            turn_id: TurnId::new(),
            question: question.to_string(),
            completed_at: now(),
            outcome: TurnOutcome::Completed {
                council: vec![ProviderResult::ok(
                    ModelId::from("m/one"),
                    answer.to_string(),
                    5,
                )],
                aggregate: None,
                synthesis: SynthesisResult {
                    model: ModelId::from("m/chair"),
                    text: answer.to_string(),
                },
                infographic: None,
            },
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = MemoryStore::new();
        let conversation = store.create().await.unwrap();
        assert_eq!(conversation.title, crate::prompts::DEFAULT_TITLE);

        let fetched = store.get(conversation.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, conversation.id);
        assert!(fetched.turns.is_empty());

        assert!(store.delete(conversation.id).await.unwrap());
        assert!(store.get(conversation.id).await.unwrap().is_none());
        assert!(!store.delete(conversation.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_counts_turns() {
        let store = MemoryStore::new();
        let a = store.create().await.unwrap();
        let _b = store.create().await.unwrap();
        store
            .append_turn(a.id, completed_record("q", "a"))
            .await
            .unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        let entry = listed.iter().find(|s| s.id == a.id).unwrap();
        assert_eq!(entry.turn_count, 1);
    }

    #[tokio::test]
    async fn test_history_flattens_turns() {
        let store = MemoryStore::new();
        let conversation = store.create().await.unwrap();
        store
            .append_turn(conversation.id, completed_record("first?", "one"))
            .await
            .unwrap();
        store
            .append_turn(
                conversation.id,
                TurnRecord {
                    turn_id: TurnId::new(),
                    question: "vague".into(),
                    completed_at: now(),
                    outcome: TurnOutcome::AwaitingClarification {
                        request: ClarificationRequest {
                            reasoning: "Need detail.".into(),
                            questions: vec![Question {
                                text: "Which one?".into(),
                                options: vec!["A".into(), "B".into()],
                            }],
                        },
                    },
                },
            )
            .await
            .unwrap();

        let history = store.history(conversation.id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "first?");
        assert_eq!(history[1].content, "one");
        assert!(history[3].content.contains("1. Which one? (A / B)"));
    }

    #[tokio::test]
    async fn test_set_title() {
        let store = MemoryStore::new();
        let conversation = store.create().await.unwrap();
        store
            .set_title(conversation.id, "Rust Memory Model")
            .await
            .unwrap();
        assert_eq!(
            store.get(conversation.id).await.unwrap().unwrap().title,
            "Rust Memory Model"
        );
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation() {
        let store = MemoryStore::new();
        let err = store
            .append_turn(ConversationId::new(), completed_record("q", "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
