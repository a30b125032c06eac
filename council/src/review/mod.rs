//! Anonymized peer review.
//!
//! # Design
//!
//! ```text
//!   ok responses ──► AnonymizationMap (seeded shuffle, Response A..)
//!                        │
//!                        ▼
//!   reviewers ──► ranking ballots ──► parse ──► Borda aggregate
//!                                  (malformed ballots drop, non-voting)
//! ```
//!
//! Labels exist so reviewers cannot favour a vendor. The map is a bijection
//! over the ok subset only; failed members get no label and cast no ballot.

mod anonymize;
mod ranking;

pub use anonymize::AnonymizationMap;
pub use ranking::{
    aggregate_rankings, collect_rankings, parse_ranking, AggregateEntry, AggregateRanking,
    PeerRanking,
};

/// Peer review needs at least this many usable responses to be meaningful.
pub const MIN_REVIEWERS: usize = 2;
