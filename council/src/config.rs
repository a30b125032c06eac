//! Runtime configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::ModelId;

/// Single-letter review labels bound the roster size.
pub const MAX_COUNCIL_SIZE: usize = 26;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Roster queried in parallel at stage 1; also the stage 2 reviewers.
    pub council_models: Vec<ModelId>,
    /// Synthesizes the final answer at stage 3.
    pub chairman_model: ModelId,
    /// Fast model for gates and title generation.
    pub utility_model: ModelId,
    /// Search-capable model for stage 0.
    pub search_model: ModelId,
    /// Image model for the stage 4 infographic.
    pub image_model: ModelId,
    pub enable_search: bool,
    pub enable_clarification: bool,
    pub enable_infographic: bool,
    pub council_timeout_secs: u64,
    pub utility_timeout_secs: u64,
    pub search_timeout_secs: u64,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            council_models: vec![
                ModelId::from("google/gemini-3-pro-preview"),
                ModelId::from("openai/gpt-5.1"),
                ModelId::from("anthropic/claude-opus-4.5"),
                ModelId::from("x-ai/grok-4.1-fast:free"),
            ],
            chairman_model: ModelId::from("google/gemini-3-pro-preview"),
            utility_model: ModelId::from("google/gemini-2.5-flash-lite"),
            search_model: ModelId::from("perplexity/sonar-pro-search"),
            image_model: ModelId::from("google/gemini-3-pro-image-preview"),
            enable_search: true,
            enable_clarification: true,
            enable_infographic: true,
            council_timeout_secs: 120,
            utility_timeout_secs: 30,
            search_timeout_secs: 90,
        }
    }
}

impl CouncilConfig {
    /// Load from a TOML file; unspecified fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.council_models.is_empty() {
            bail!("council_models must name at least one model");
        }
        if self.council_models.len() > MAX_COUNCIL_SIZE {
            bail!(
                "council_models supports at most {MAX_COUNCIL_SIZE} members, got {}",
                self.council_models.len()
            );
        }
        let mut seen = std::collections::HashSet::new();
        for model in &self.council_models {
            if model.as_str().is_empty() {
                bail!("council_models contains an empty model identifier");
            }
            if !seen.insert(model.as_str()) {
                bail!("council_models lists {model} more than once");
            }
        }
        Ok(())
    }

    /// All distinct models this configuration can address, for the roster
    /// availability check.
    pub fn all_models(&self) -> Vec<ModelId> {
        let mut models = self.council_models.clone();
        for extra in [
            &self.chairman_model,
            &self.utility_model,
            &self.search_model,
            &self.image_model,
        ] {
            if !models.contains(extra) {
                models.push(extra.clone());
            }
        }
        models
    }

    pub fn council_timeout(&self) -> Duration {
        Duration::from_secs(self.council_timeout_secs)
    }

    pub fn utility_timeout(&self) -> Duration {
        Duration::from_secs(self.utility_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}
