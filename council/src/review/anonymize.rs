//! Seeded label assignment for the ok subset.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::types::ModelId;

/// Bijection between review labels (`Response A`, `Response B`, ..) and the
/// models whose responses they hide. The assignment is a seeded shuffle, so
/// one turn always reproduces the same mapping while label positions carry
/// no information across turns.
#[derive(Debug, Clone)]
pub struct AnonymizationMap {
    /// `(label, model)` pairs in label order.
    entries: Vec<(String, ModelId)>,
    by_model: HashMap<ModelId, String>,
}

impl AnonymizationMap {
    /// Assign labels over `models` using `seed`. Rosters are capped well
    /// below 26, so single-letter labels always suffice.
    pub fn new(models: &[ModelId], seed: u64) -> Self {
        let mut shuffled: Vec<ModelId> = models.to_vec();
        let mut rng = StdRng::seed_from_u64(seed);
        shuffled.shuffle(&mut rng);

        let entries: Vec<(String, ModelId)> = shuffled
            .into_iter()
            .enumerate()
            .map(|(index, model)| (label_for(index), model))
            .collect();
        let by_model = entries
            .iter()
            .map(|(label, model)| (model.clone(), label.clone()))
            .collect();
        Self { entries, by_model }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in label order (`Response A` first).
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|(label, _)| label.clone()).collect()
    }

    /// `(label, model)` pairs in label order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ModelId)> {
        self.entries
            .iter()
            .map(|(label, model)| (label.as_str(), model))
    }

    pub fn label_of(&self, model: &ModelId) -> Option<&str> {
        self.by_model.get(model).map(|s| s.as_str())
    }

    pub fn model_of(&self, label: &str) -> Option<&ModelId> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == label)
            .map(|(_, model)| model)
    }

    /// Map labels back to identities, preserving order. Unknown labels are
    /// skipped; validated ballots never contain any.
    pub fn reveal(&self, labels: &[String]) -> Vec<ModelId> {
        labels
            .iter()
            .filter_map(|label| self.model_of(label).cloned())
            .collect()
    }
}

fn label_for(index: usize) -> String {
    debug_assert!(index < 26);
    format!("Response {}", (b'A' + index as u8) as char)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(ids: &[&str]) -> Vec<ModelId> {
        ids.iter().map(|id| ModelId::from(*id)).collect()
    }

    #[test]
    fn test_labels_are_contiguous_from_a() {
        let map = AnonymizationMap::new(
            &models(&["openai/gpt-5.1", "google/gemini-3-pro", "x-ai/grok-4"]),
            7,
        );
        assert_eq!(
            map.labels(),
            vec!["Response A", "Response B", "Response C"]
        );
    }

    #[test]
    fn test_map_is_a_bijection() {
        let roster = models(&["openai/gpt-5.1", "google/gemini-3-pro", "x-ai/grok-4"]);
        let map = AnonymizationMap::new(&roster, 42);

        for model in &roster {
            let label = map.label_of(model).unwrap();
            assert_eq!(map.model_of(label), Some(model));
        }
        let mut assigned: Vec<&ModelId> =
            map.entries().map(|(_, model)| model).collect();
        assigned.sort();
        let mut expected: Vec<&ModelId> = roster.iter().collect();
        expected.sort();
        assert_eq!(assigned, expected);
    }

    #[test]
    fn test_same_seed_reproduces_assignment() {
        let roster = models(&[
            "openai/gpt-5.1",
            "google/gemini-3-pro",
            "anthropic/claude-sonnet-4.5",
            "x-ai/grok-4",
        ]);
        let first = AnonymizationMap::new(&roster, 99);
        let second = AnonymizationMap::new(&roster, 99);
        for model in &roster {
            assert_eq!(first.label_of(model), second.label_of(model));
        }
    }

    #[test]
    fn test_reveal_preserves_order() {
        let roster = models(&["openai/gpt-5.1", "google/gemini-3-pro"]);
        let map = AnonymizationMap::new(&roster, 3);
        let order = vec!["Response B".to_string(), "Response A".to_string()];
        let revealed = map.reveal(&order);
        assert_eq!(revealed.len(), 2);
        assert_eq!(map.label_of(&revealed[0]), Some("Response B"));
        assert_eq!(map.label_of(&revealed[1]), Some("Response A"));
    }

    #[test]
    fn test_unknown_lookups() {
        let map = AnonymizationMap::new(&models(&["openai/gpt-5.1"]), 1);
        assert_eq!(map.model_of("Response Z"), None);
        assert_eq!(map.label_of(&ModelId::from("z/ghost")), None);
    }
}
