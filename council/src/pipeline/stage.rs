//! Turn stage machine.
//!
//! # Design
//!
//! ```text
//!   Init ─► SearchGate ─► Searching ──┐
//!              │                      ├─► ClarifyCheck ─► AwaitingClarification
//!              └──────► SkipSearch ───┘         │
//!                                               ▼
//!                                            Council ─► PeerReview ────┐
//!                                               │                      ├─► Synthesis
//!                                               └────► SkipPeerReview ─┘      │
//!                                                                             ▼
//!                                                            Done ◄── Infographic
//! ```
//!
//! `Failed` is reachable from every non-terminal stage. `Done`,
//! `AwaitingClarification`, and `Failed` are terminal.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    SearchGate,
    Searching,
    SkipSearch,
    ClarifyCheck,
    AwaitingClarification,
    Council,
    PeerReview,
    SkipPeerReview,
    Synthesis,
    Infographic,
    Done,
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 13] = [
        Stage::Init,
        Stage::SearchGate,
        Stage::Searching,
        Stage::SkipSearch,
        Stage::ClarifyCheck,
        Stage::AwaitingClarification,
        Stage::Council,
        Stage::PeerReview,
        Stage::SkipPeerReview,
        Stage::Synthesis,
        Stage::Infographic,
        Stage::Done,
        Stage::Failed,
    ];

    pub fn valid_transitions(&self) -> &'static [Stage] {
        match self {
            Stage::Init => &[Stage::SearchGate, Stage::Failed],
            Stage::SearchGate => &[Stage::Searching, Stage::SkipSearch, Stage::Failed],
            Stage::Searching => &[Stage::ClarifyCheck, Stage::Failed],
            Stage::SkipSearch => &[Stage::ClarifyCheck, Stage::Failed],
            Stage::ClarifyCheck => &[
                Stage::AwaitingClarification,
                Stage::Council,
                Stage::Failed,
            ],
            Stage::Council => &[Stage::PeerReview, Stage::SkipPeerReview, Stage::Failed],
            Stage::PeerReview => &[Stage::Synthesis, Stage::Failed],
            Stage::SkipPeerReview => &[Stage::Synthesis, Stage::Failed],
            Stage::Synthesis => &[Stage::Infographic, Stage::Failed],
            Stage::Infographic => &[Stage::Done, Stage::Failed],
            Stage::AwaitingClarification | Stage::Done | Stage::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: Stage) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::AwaitingClarification | Stage::Done | Stage::Failed
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::SearchGate => "search_gate",
            Stage::Searching => "searching",
            Stage::SkipSearch => "skip_search",
            Stage::ClarifyCheck => "clarify_check",
            Stage::AwaitingClarification => "awaiting_clarification",
            Stage::Council => "council",
            Stage::PeerReview => "peer_review",
            Stage::SkipPeerReview => "skip_peer_review",
            Stage::Synthesis => "synthesis",
            Stage::Infographic => "infographic",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: Stage,
    pub to: Stage,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid stage transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Current stage plus the visited path, for logging and postmortems.
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: Stage,
    history: Vec<Stage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: Stage::Init,
            history: vec![Stage::Init],
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn advance(&mut self, next: Stage) -> Result<Stage, TransitionError> {
        if !self.current.can_transition_to(next) {
            return Err(TransitionError {
                from: self.current,
                to: next,
            });
        }
        debug!(from = %self.current, to = %next, "stage transition");
        self.current = next;
        self.history.push(next);
        Ok(next)
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(path: &[Stage]) -> Result<StageTracker, TransitionError> {
        let mut tracker = StageTracker::new();
        for stage in path {
            tracker.advance(*stage)?;
        }
        Ok(tracker)
    }

    #[test]
    fn test_full_happy_path() {
        let tracker = walk(&[
            Stage::SearchGate,
            Stage::Searching,
            Stage::ClarifyCheck,
            Stage::Council,
            Stage::PeerReview,
            Stage::Synthesis,
            Stage::Infographic,
            Stage::Done,
        ])
        .unwrap();
        assert_eq!(tracker.current(), Stage::Done);
        assert!(tracker.current().is_terminal());
        assert_eq!(tracker.history().len(), 9);
    }

    #[test]
    fn test_skip_paths() {
        let tracker = walk(&[
            Stage::SearchGate,
            Stage::SkipSearch,
            Stage::ClarifyCheck,
            Stage::Council,
            Stage::SkipPeerReview,
            Stage::Synthesis,
            Stage::Infographic,
            Stage::Done,
        ])
        .unwrap();
        assert_eq!(tracker.current(), Stage::Done);
    }

    #[test]
    fn test_clarification_is_terminal() {
        let mut tracker = walk(&[
            Stage::SearchGate,
            Stage::SkipSearch,
            Stage::ClarifyCheck,
            Stage::AwaitingClarification,
        ])
        .unwrap();
        assert!(tracker.current().is_terminal());
        assert!(tracker.advance(Stage::Council).is_err());
    }

    #[test]
    fn test_illegal_jump_rejected() {
        let mut tracker = StageTracker::new();
        let err = tracker.advance(Stage::Council).unwrap_err();
        assert_eq!(err.from, Stage::Init);
        assert_eq!(err.to, Stage::Council);
        assert_eq!(
            err.to_string(),
            "invalid stage transition: init -> council"
        );
        // The failed attempt must not move the tracker.
        assert_eq!(tracker.current(), Stage::Init);
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal() {
        for stage in Stage::ALL {
            if stage.is_terminal() {
                assert!(stage.valid_transitions().is_empty());
            } else {
                assert!(
                    stage.can_transition_to(Stage::Failed),
                    "{stage} cannot fail"
                );
            }
        }
    }

    #[test]
    fn test_serde_names_match_display() {
        for stage in Stage::ALL {
            let json = serde_json::to_value(stage).unwrap();
            assert_eq!(json, serde_json::Value::String(stage.to_string()));
        }
    }
}
