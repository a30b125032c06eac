//! Ballot parsing and Borda aggregation.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::AnonymizationMap;
use crate::types::{CouncilSet, ModelId};

/// One reviewer's validated ballot: every label exactly once, best first.
/// `rationale` carries the reviewer's free-form evaluation text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRanking {
    pub reviewer: ModelId,
    pub order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Aggregate standing for one label after all ballots are counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub model: ModelId,
    pub label: String,
    pub points: u32,
}

/// Borda outcome over the ballot multiset. A pure fold: the same ballots in
/// any arrival order produce the same entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateRanking {
    pub entries: Vec<AggregateEntry>,
    pub ballots: usize,
}

impl AggregateRanking {
    pub fn winner(&self) -> Option<&AggregateEntry> {
        self.entries.first()
    }
}

/// Extract a ranking from free-form reviewer text.
///
/// The primary path reads the numbered list after the `FINAL RANKING:`
/// marker. When the marker or the list is absent, any labels mentioned in
/// the text are taken in first-mention order. Either way the result must
/// use each expected label exactly once or the ballot is rejected.
pub fn parse_ranking(text: &str, expected: &[String]) -> Option<Vec<String>> {
    let order = extract_numbered(text).unwrap_or_else(|| extract_mentions(text));
    if order.len() != expected.len() {
        return None;
    }
    let allowed: HashSet<&str> = expected.iter().map(|s| s.as_str()).collect();
    let mut seen = HashSet::new();
    for label in &order {
        if !allowed.contains(label.as_str()) || !seen.insert(label.as_str()) {
            return None;
        }
    }
    Some(order)
}

/// Parse every ok response in `set` as a ballot. Malformed ballots are
/// dropped with a warning; the reviewer simply does not vote.
pub fn collect_rankings(set: &CouncilSet, expected: &[String]) -> Vec<PeerRanking> {
    let mut rankings = Vec::new();
    for result in set.ok_results() {
        match parse_ranking(&result.text, expected) {
            Some(order) => rankings.push(PeerRanking {
                reviewer: result.model.clone(),
                order,
                rationale: extract_rationale(&result.text),
            }),
            None => warn!(reviewer = %result.model, "dropping unparsable ranking ballot"),
        }
    }
    rankings
}

/// The evaluation prose preceding the `FINAL RANKING:` block, or the whole
/// text when the ballot was parsed from mentions.
fn extract_rationale(text: &str) -> Option<String> {
    let prose = match text.split_once("FINAL RANKING:") {
        Some((head, _)) => head,
        None => text,
    };
    let prose = prose.trim();
    (!prose.is_empty()).then(|| prose.to_string())
}

/// Count ballots with Borda scoring: a label at 1-based position `p` on a
/// ballot over `n` labels earns `n - p` points. Ties in total points break
/// by model identity string order.
pub fn aggregate_rankings(rankings: &[PeerRanking], map: &AnonymizationMap) -> AggregateRanking {
    let n = map.len() as u32;
    let mut points: HashMap<&str, u32> = map.entries().map(|(label, _)| (label, 0)).collect();

    for ballot in rankings {
        for (position, label) in ballot.order.iter().enumerate() {
            if let Some(total) = points.get_mut(label.as_str()) {
                *total += n - (position as u32 + 1);
            }
        }
    }

    let mut entries: Vec<AggregateEntry> = map
        .entries()
        .map(|(label, model)| AggregateEntry {
            model: model.clone(),
            label: label.to_string(),
            points: points.get(label).copied().unwrap_or(0),
        })
        .collect();
    entries.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.model.cmp(&b.model)));

    AggregateRanking {
        entries,
        ballots: rankings.len(),
    }
}

fn numbered_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\s*Response\s+([A-Z])").expect("pattern is valid"))
}

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Response\s+([A-Z])").expect("pattern is valid"))
}

fn extract_numbered(text: &str) -> Option<Vec<String>> {
    let (_, tail) = text.split_once("FINAL RANKING:")?;
    let labels: Vec<String> = numbered_re()
        .captures_iter(tail)
        .map(|caps| format!("Response {}", &caps[1]))
        .collect();
    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for caps in mention_re().captures_iter(text) {
        let label = format!("Response {}", &caps[1]);
        if seen.insert(label.clone()) {
            order.push(label);
        }
    }
    order
}
