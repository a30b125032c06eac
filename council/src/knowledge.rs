//! Optional retrieval augmentation ahead of the council.

use async_trait::async_trait;

/// External snippet source consulted once per turn when configured. A
/// failing source degrades to no augmentation.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn snippets(&self, query: &str, limit: usize) -> anyhow::Result<Vec<String>>;
}

pub const SNIPPET_LIMIT: usize = 5;

/// Fence retrieved snippets for the council prompt. `None` when there is
/// nothing to add.
pub fn render_snippets(snippets: &[String]) -> Option<String> {
    if snippets.is_empty() {
        return None;
    }
    let mut text = String::from("--- Knowledge Base Context ---\n");
    for snippet in snippets {
        text.push_str("- ");
        text.push_str(snippet);
        text.push('\n');
    }
    text.push_str("--- End of Knowledge Base Context ---");
    Some(text)
}

/// Fixed snippet list, for wiring and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticKnowledge {
    snippets: Vec<String>,
}

impl StaticKnowledge {
    pub fn new(snippets: Vec<String>) -> Self {
        Self { snippets }
    }
}

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn snippets(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<String>> {
        Ok(self.snippets.iter().take(limit).cloned().collect())
    }
}
