//! Wire shapes for the turn event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::Stage;
use crate::review::{AggregateRanking, PeerRanking};
use crate::types::{
    ClarificationRequest, InfographicResult, ModelId, ProviderResult, SynthesisResult, TurnId,
};

/// One event on the turn stream. `payload` flattens into the envelope, so
/// consumers see a single object with a `type` tag, `turn_id`, and
/// `timestamp` on every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilEvent {
    pub turn_id: TurnId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl CouncilEvent {
    pub fn new(turn_id: TurnId, payload: EventPayload) -> Self {
        Self {
            turn_id,
            timestamp: crate::types::now(),
            payload,
        }
    }
}

/// Stage lifecycle payloads, tagged for stream consumers.
///
/// Skipped stages publish nothing: a turn with fewer than two usable
/// responses has no `stage2_*` events at all, and a turn that skips search
/// still opens with `stage0_start` so consumers can render the gate verdict
/// from `stage0_complete.performed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Stage0Start,
    Stage0Complete {
        performed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Stage1Start {
        models: Vec<ModelId>,
    },
    /// Advisory: one per provider as it finishes, in arrival order.
    Stage1Update {
        result: ProviderResult,
    },
    Stage1Complete {
        results: Vec<ProviderResult>,
    },
    Stage2Start {
        reviewers: Vec<ModelId>,
    },
    /// Advisory: one per returned ballot, before parsing.
    Stage2Update {
        result: ProviderResult,
    },
    Stage2Complete {
        rankings: Vec<PeerRanking>,
        aggregate: AggregateRanking,
    },
    Stage3Start {
        model: ModelId,
    },
    Stage3Update {
        delta: String,
    },
    Stage3Complete {
        synthesis: SynthesisResult,
    },
    Stage4Start {
        model: ModelId,
    },
    Stage4Complete {
        infographic: InfographicResult,
    },
    ClarificationNeeded {
        request: ClarificationRequest,
    },
    TitleComplete {
        title: String,
    },
    Error {
        stage: Stage,
        message: String,
    },
    Complete,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: EventPayload) -> serde_json::Value {
        serde_json::to_value(CouncilEvent::new(TurnId::new(), payload)).unwrap()
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(event(EventPayload::Stage0Start)["type"], "stage0_start");
        assert_eq!(
            event(EventPayload::Stage1Update {
                result: ProviderResult::ok(ModelId::from("m"), "text".into(), 5),
            })["type"],
            "stage1_update"
        );
        assert_eq!(
            event(EventPayload::Stage3Update { delta: "d".into() })["type"],
            "stage3_update"
        );
        assert_eq!(
            event(EventPayload::TitleComplete { title: "t".into() })["type"],
            "title_complete"
        );
        assert_eq!(event(EventPayload::Complete)["type"], "complete");
        assert_eq!(
            event(EventPayload::Error {
                stage: Stage::Council,
                message: "m".into()
            })["type"],
            "error"
        );
    }

    #[test]
    fn test_envelope_fields_are_top_level() {
        let value = event(EventPayload::Stage1Start {
            models: vec![ModelId::from("openai/gpt-5.1")],
        });
        assert!(value.get("turn_id").is_some());
        assert!(value.get("timestamp").is_some());
        assert_eq!(value["models"][0], "openai/gpt-5.1");
    }

    #[test]
    fn test_stage0_complete_omits_empty_summary() {
        let skipped = event(EventPayload::Stage0Complete {
            performed: false,
            summary: None,
        });
        assert_eq!(skipped["performed"], false);
        assert!(skipped.get("summary").is_none());

        let performed = event(EventPayload::Stage0Complete {
            performed: true,
            summary: Some("findings".into()),
        });
        assert_eq!(performed["summary"], "findings");
    }

    #[test]
    fn test_round_trip_of_tagged_event() {
        let original = CouncilEvent::new(
            TurnId::new(),
            EventPayload::Stage3Complete {
                synthesis: SynthesisResult {
                    model: ModelId::from("openai/gpt-5.1"),
                    text: "final".into(),
                },
            },
        );
        let json = serde_json::to_string(&original).unwrap();
        let parsed: CouncilEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.turn_id, original.turn_id);
        match parsed.payload {
            EventPayload::Stage3Complete { synthesis } => {
                assert_eq!(synthesis.text, "final");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
