//! Backend registry keyed by model identity.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::ModelBackend;
use crate::types::ModelId;

pub type SharedBackend = Arc<dyn ModelBackend>;

/// Lookup table from model identity to its backend. Dispatch never invents
/// a backend: a roster entry with no registration surfaces as an error
/// result, not a panic.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    backends: HashMap<ModelId, SharedBackend>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: SharedBackend) -> Self {
        self.register(backend);
        self
    }

    /// Registering the same identity twice replaces the earlier backend.
    pub fn register(&mut self, backend: SharedBackend) {
        self.backends.insert(backend.model().clone(), backend);
    }

    pub fn get(&self, model: &ModelId) -> Option<SharedBackend> {
        self.backends.get(model).cloned()
    }

    pub fn contains(&self, model: &ModelId) -> bool {
        self.backends.contains_key(model)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Registered identities in stable (string) order.
    pub fn models(&self) -> Vec<ModelId> {
        let mut models: Vec<ModelId> = self.backends.keys().cloned().collect();
        models.sort();
        models
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("models", &self.models())
            .finish()
    }
}

/// Roster entries absent from a provider catalog listing.
pub fn missing_models(roster: &[ModelId], catalog: &[String]) -> Vec<ModelId> {
    let available: HashSet<&str> = catalog.iter().map(|id| id.as_str()).collect();
    roster
        .iter()
        .filter(|model| !available.contains(model.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Completion, CompletionRequest, ProviderError};
    use tokio::sync::mpsc;

    struct FixedBackend {
        model: ModelId,
        text: &'static str,
    }

    #[async_trait::async_trait]
    impl ModelBackend for FixedBackend {
        fn model(&self) -> &ModelId {
            &self.model
        }

        async fn invoke(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
            Ok(Completion {
                text: self.text.to_string(),
                reasoning: None,
                images: Vec::new(),
            })
        }

        async fn invoke_streaming(
            &self,
            request: CompletionRequest,
            _deltas: mpsc::Sender<String>,
        ) -> Result<Completion, ProviderError> {
            self.invoke(request).await
        }
    }

    fn backend(model: &str, text: &'static str) -> SharedBackend {
        Arc::new(FixedBackend {
            model: ModelId::from(model),
            text,
        })
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ProviderRegistry::new()
            .with_backend(backend("openai/gpt-5.1", "a"))
            .with_backend(backend("google/gemini-3-pro", "b"));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&ModelId::from("openai/gpt-5.1")));
        assert!(!registry.contains(&ModelId::from("x-ai/grok-4")));

        let found = registry.get(&ModelId::from("google/gemini-3-pro")).unwrap();
        let completion = found.invoke(CompletionRequest::from_prompt("hi")).await.unwrap();
        assert_eq!(completion.text, "b");
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = ProviderRegistry::new();
        registry.register(backend("openai/gpt-5.1", "old"));
        registry.register(backend("openai/gpt-5.1", "new"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_models_sorted() {
        let registry = ProviderRegistry::new()
            .with_backend(backend("x-ai/grok-4", "a"))
            .with_backend(backend("anthropic/claude-sonnet-4.5", "b"));
        let models = registry.models();
        assert_eq!(models[0].as_str(), "anthropic/claude-sonnet-4.5");
        assert_eq!(models[1].as_str(), "x-ai/grok-4");
    }

    #[test]
    fn test_missing_models() {
        let roster = vec![
            ModelId::from("openai/gpt-5.1"),
            ModelId::from("x-ai/grok-4"),
        ];
        let catalog = vec!["openai/gpt-5.1".to_string(), "google/gemini-3-pro".to_string()];
        let missing = missing_models(&roster, &catalog);
        assert_eq!(missing, vec![ModelId::from("x-ai/grok-4")]);
    }

    #[test]
    fn test_missing_models_empty_when_all_present() {
        let roster = vec![ModelId::from("openai/gpt-5.1")];
        let catalog = vec!["openai/gpt-5.1".to_string()];
        assert!(missing_models(&roster, &catalog).is_empty());
    }
}
