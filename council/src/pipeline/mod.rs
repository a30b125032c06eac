//! Turn orchestration.
//!
//! # Design
//!
//! ```text
//!                ┌ gates ────────┐  ┌ fan-out ┐  ┌ fan-out ┐  ┌ stream ┐
//!   TurnRequest ─► search? clear? ─► council ──► review ────► chairman ─► infographic
//!                └───────┬───────┘  └────┬────┘  └────┬────┘  └───┬────┘       │
//!                        ▼               ▼            ▼           ▼            ▼
//!                     EventBus ◄──────── every transition publishes ───────────┘
//! ```
//!
//! One `run` call owns one turn end to end. Per-turn state (the council
//! set, the anonymization map) lives on this stack frame and is never
//! shared with another turn. Degraded steps log and continue; only an
//! empty council or a failed synthesis abort the turn.

mod stage;

pub use stage::{Stage, StageTracker, TransitionError};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::CouncilConfig;
use crate::context::{self, Attachment};
use crate::events::{CouncilEvent, EventBus, EventPayload};
use crate::gates;
use crate::invoker::Invoker;
use crate::knowledge::{self, KnowledgeSource};
use crate::prompts;
use crate::providers::{ChatMessage, CompletionRequest, ProviderError};
use crate::review::{
    aggregate_rankings, collect_rankings, AggregateRanking, AnonymizationMap, MIN_REVIEWERS,
};
use crate::store::TurnOutcome;
use crate::types::{CouncilSet, InfographicResult, ModelId, SynthesisResult, TurnId};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no usable council responses: all {dispatched} providers failed")]
    NoUsableResponses { dispatched: usize },

    #[error("synthesis failed: {0}")]
    SynthesisFailed(#[source] ProviderError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// One inbound user turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Prior turns, oldest first. The current question is not part of it.
    pub history: Vec<ChatMessage>,
    /// Generate a conversation title alongside the turn (first turn only).
    pub generate_title: bool,
    /// Demand at least one more clarification round regardless of verdict.
    pub force_clarification: bool,
    /// Skip stage 0 for this turn even when search is enabled.
    pub skip_search: bool,
    /// Pin the turn id (and with it the anonymization permutation).
    /// Freshly minted when absent.
    pub turn_id: Option<TurnId>,
}

impl TurnRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_title_generation(mut self) -> Self {
        self.generate_title = true;
        self
    }

    pub fn with_forced_clarification(mut self) -> Self {
        self.force_clarification = true;
        self
    }

    pub fn without_search(mut self) -> Self {
        self.skip_search = true;
        self
    }

    pub fn with_turn_id(mut self, turn_id: TurnId) -> Self {
        self.turn_id = Some(turn_id);
        self
    }
}

/// Everything a finished turn produced.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub turn_id: TurnId,
    pub outcome: TurnOutcome,
    pub title: Option<String>,
    pub stages: Vec<Stage>,
}

/// The deliberation pipeline. One instance serves many turns; each `run`
/// owns its turn state exclusively.
pub struct CouncilPipeline {
    config: CouncilConfig,
    invoker: Invoker,
    events: EventBus,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
}

impl CouncilPipeline {
    pub fn new(config: CouncilConfig, invoker: Invoker, events: EventBus) -> Self {
        Self {
            config,
            invoker,
            events,
            knowledge: None,
        }
    }

    pub fn with_knowledge(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(source);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &CouncilConfig {
        &self.config
    }

    /// Drive one turn to a terminal stage. `Ok` covers both a completed
    /// deliberation and an early clarification stop; `Err` is a fatal turn
    /// that already published its `error` event.
    pub async fn run(&self, request: TurnRequest) -> Result<TurnReport, PipelineError> {
        let turn_id = request.turn_id.unwrap_or_else(TurnId::new);
        let mut tracker = StageTracker::new();
        info!(turn_id = %turn_id, "turn started");

        let shaped = context::shape_attachments(&request.content, &request.attachments);
        let question = shaped.text.clone();
        let history = context::fold_history(&request.history);

        let title_task = request.generate_title.then(|| {
            let invoker = self.invoker.clone();
            let model = self.config.utility_model.clone();
            let content = request.content.clone();
            tokio::spawn(async move { generate_title(invoker, model, content).await })
        });

        // Stage 0: search gate, then at most one retrieval call.
        tracker.advance(Stage::SearchGate)?;
        let search_enabled = self.config.enable_search && !request.skip_search;
        let mut search_summary: Option<String> = None;
        if search_enabled {
            self.emit(turn_id, EventPayload::Stage0Start);
            if gates::needs_search(&self.invoker, &self.config.utility_model, &question).await {
                tracker.advance(Stage::Searching)?;
                search_summary = self.run_search(&question).await;
            } else {
                tracker.advance(Stage::SkipSearch)?;
            }
            self.emit(
                turn_id,
                EventPayload::Stage0Complete {
                    performed: search_summary.is_some(),
                    summary: search_summary.clone(),
                },
            );
        } else {
            tracker.advance(Stage::SkipSearch)?;
        }

        // Clarity gate: an ambiguous question ends the turn here.
        tracker.advance(Stage::ClarifyCheck)?;
        if self.config.enable_clarification {
            let mut gate_history = history.clone();
            gate_history.push(ChatMessage::user(&question));
            let verdict = gates::assess_clarity(
                &self.invoker,
                &self.config.utility_model,
                &gate_history,
                &request.content,
                request.force_clarification,
            )
            .await;
            if let Some(clarification) = verdict.into_clarification() {
                tracker.advance(Stage::AwaitingClarification)?;
                let title = join_title(title_task).await;
                if let Some(title) = &title {
                    self.emit(turn_id, EventPayload::TitleComplete { title: title.clone() });
                }
                self.emit(
                    turn_id,
                    EventPayload::ClarificationNeeded {
                        request: clarification.clone(),
                    },
                );
                info!(turn_id = %turn_id, "turn awaiting clarification");
                return Ok(TurnReport {
                    turn_id,
                    outcome: TurnOutcome::AwaitingClarification {
                        request: clarification,
                    },
                    title,
                    stages: tracker.history().to_vec(),
                });
            }
        }

        // Stage 1: full-roster fan-out.
        tracker.advance(Stage::Council)?;
        let council_request = self.build_council_request(&history, &shaped, &search_summary).await;
        self.emit(
            turn_id,
            EventPayload::Stage1Start {
                models: self.config.council_models.clone(),
            },
        );
        let council_set = self
            .invoker
            .dispatch_council_observed(&self.config.council_models, &council_request, |result| {
                self.emit(
                    turn_id,
                    EventPayload::Stage1Update {
                        result: result.clone(),
                    },
                );
            })
            .await;
        self.emit(
            turn_id,
            EventPayload::Stage1Complete {
                results: council_set.results().to_vec(),
            },
        );

        let ok_count = council_set.ok_count();
        if ok_count == 0 {
            tracker.advance(Stage::Failed)?;
            let err = PipelineError::NoUsableResponses {
                dispatched: self.config.council_models.len(),
            };
            self.emit(
                turn_id,
                EventPayload::Error {
                    stage: Stage::Council,
                    message: err.to_string(),
                },
            );
            return Err(err);
        }

        // Stage 2: anonymized peer review among the ok subset.
        let mut aggregate: Option<AggregateRanking> = None;
        let mut review_set: Option<CouncilSet> = None;
        if ok_count >= MIN_REVIEWERS {
            tracker.advance(Stage::PeerReview)?;
            let reviewers: Vec<ModelId> =
                council_set.ok_results().map(|r| r.model.clone()).collect();
            let map = AnonymizationMap::new(&reviewers, turn_id.seed());
            self.emit(
                turn_id,
                EventPayload::Stage2Start {
                    reviewers: reviewers.clone(),
                },
            );

            let ranking_request = CompletionRequest::from_prompt(prompts::ranking_prompt(
                &question,
                &map,
                &council_set,
            ));
            let ballots = self
                .invoker
                .dispatch_council_observed(&reviewers, &ranking_request, |result| {
                    self.emit(
                        turn_id,
                        EventPayload::Stage2Update {
                            result: result.clone(),
                        },
                    );
                })
                .await;
            let rankings = collect_rankings(&ballots, &map.labels());
            let result = aggregate_rankings(&rankings, &map);
            info!(
                turn_id = %turn_id,
                ballots = rankings.len(),
                reviewers = reviewers.len(),
                "peer review aggregated"
            );
            self.emit(
                turn_id,
                EventPayload::Stage2Complete {
                    rankings,
                    aggregate: result.clone(),
                },
            );
            aggregate = Some(result);
            review_set = Some(ballots);
        } else {
            tracker.advance(Stage::SkipPeerReview)?;
            info!(turn_id = %turn_id, ok = ok_count, "skipping peer review");
        }

        // Stage 3: streamed synthesis. Failure here is fatal.
        tracker.advance(Stage::Synthesis)?;
        let chairman = self.config.chairman_model.clone();
        self.emit(
            turn_id,
            EventPayload::Stage3Start {
                model: chairman.clone(),
            },
        );
        let synthesis = match self
            .run_synthesis(turn_id, &chairman, &question, &history, &council_set, &review_set, &aggregate)
            .await
        {
            Ok(synthesis) => {
                self.emit(
                    turn_id,
                    EventPayload::Stage3Complete {
                        synthesis: synthesis.clone(),
                    },
                );
                synthesis
            }
            Err(err) => {
                tracker.advance(Stage::Failed)?;
                self.emit(
                    turn_id,
                    EventPayload::Error {
                        stage: Stage::Synthesis,
                        message: err.to_string(),
                    },
                );
                return Err(PipelineError::SynthesisFailed(err));
            }
        };

        // Stage 4: best-effort infographic.
        tracker.advance(Stage::Infographic)?;
        let infographic = if self.config.enable_infographic {
            Some(self.run_infographic(turn_id, &question, &synthesis).await)
        } else {
            None
        };

        let title = join_title(title_task).await;
        if let Some(title) = &title {
            self.emit(turn_id, EventPayload::TitleComplete { title: title.clone() });
        }

        tracker.advance(Stage::Done)?;
        self.emit(turn_id, EventPayload::Complete);
        info!(turn_id = %turn_id, "turn complete");
        Ok(TurnReport {
            turn_id,
            outcome: TurnOutcome::Completed {
                council: council_set.results().to_vec(),
                aggregate,
                synthesis,
                infographic,
            },
            title,
            stages: tracker.history().to_vec(),
        })
    }

    fn emit(&self, turn_id: TurnId, payload: EventPayload) {
        self.events.publish(CouncilEvent::new(turn_id, payload));
    }

    async fn run_search(&self, question: &str) -> Option<String> {
        let request = CompletionRequest::from_prompt(prompts::search_prompt(question));
        match self
            .invoker
            .invoke_search(&self.config.search_model, request)
            .await
        {
            Ok(completion) => Some(context::truncate_sentence(
                &completion.text,
                prompts::SEARCH_CONTEXT_CHARS,
            )),
            Err(err) => {
                warn!(error = %err, "web search failed, proceeding without results");
                None
            }
        }
    }

    /// Fold history, knowledge snippets, search findings, and attachments
    /// into the stage 1 request.
    async fn build_council_request(
        &self,
        history: &[ChatMessage],
        shaped: &context::ShapedContent,
        search_summary: &Option<String>,
    ) -> CompletionRequest {
        let mut content = shaped.text.clone();
        if let Some(summary) = search_summary {
            content = prompts::augment_with_search(&content, summary);
        }
        if let Some(source) = &self.knowledge {
            match source.snippets(&shaped.text, knowledge::SNIPPET_LIMIT).await {
                Ok(snippets) => {
                    if let Some(block) = knowledge::render_snippets(&snippets) {
                        content = format!("{block}\n\n{content}");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "knowledge lookup failed, proceeding without it");
                }
            }
        }

        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(content).with_images(shaped.images.clone()));
        CompletionRequest::new(messages)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_synthesis(
        &self,
        turn_id: TurnId,
        chairman: &ModelId,
        question: &str,
        history: &[ChatMessage],
        council_set: &CouncilSet,
        review_set: &Option<CouncilSet>,
        aggregate: &Option<AggregateRanking>,
    ) -> Result<SynthesisResult, ProviderError> {
        let prompt = prompts::chairman_prompt(
            question,
            council_set,
            review_set.as_ref(),
            aggregate.as_ref(),
        );
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(prompt));

        let (tx, mut rx) = mpsc::channel::<String>(64);
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(delta) = rx.recv().await {
                events.publish(CouncilEvent::new(turn_id, EventPayload::Stage3Update { delta }));
            }
        });

        let result = self
            .invoker
            .invoke_streaming(chairman, CompletionRequest::new(messages), tx)
            .await;
        // All updates are on the bus before stage3_complete goes out.
        let _ = forwarder.await;

        result.map(|completion| SynthesisResult {
            model: chairman.clone(),
            text: completion.text,
        })
    }

    async fn run_infographic(
        &self,
        turn_id: TurnId,
        question: &str,
        synthesis: &SynthesisResult,
    ) -> InfographicResult {
        let model = self.config.image_model.clone();
        self.emit(
            turn_id,
            EventPayload::Stage4Start {
                model: model.clone(),
            },
        );

        let source_text = context::truncate_sentence(&synthesis.text, prompts::SYNOPSIS_CHARS);
        let request = CompletionRequest::from_prompt(prompts::infographic_prompt(
            question,
            &synthesis.text,
        ))
        .with_image_output();

        let result = match self.invoker.invoke_long(&model, request).await {
            Ok(completion) => match completion.images.into_iter().next() {
                Some(image) => InfographicResult::generated(model, image, source_text),
                None => {
                    warn!("image model returned no image, skipping infographic");
                    InfographicResult::skipped(model, source_text)
                }
            },
            Err(err) => {
                warn!(error = %err, "infographic generation failed, continuing");
                InfographicResult::skipped(model, source_text)
            }
        };

        self.emit(
            turn_id,
            EventPayload::Stage4Complete {
                infographic: result.clone(),
            },
        );
        result
    }
}

async fn generate_title(invoker: Invoker, model: ModelId, question: String) -> String {
    let request = CompletionRequest::from_prompt(prompts::title_prompt(&question));
    match invoker.invoke_utility(&model, request).await {
        Ok(completion) => prompts::clean_title(&completion.text),
        Err(err) => {
            warn!(error = %err, "title generation failed, titling from the question");
            prompts::clean_title(&question)
        }
    }
}

async fn join_title(task: Option<JoinHandle<String>>) -> Option<String> {
    match task {
        Some(handle) => Some(
            handle
                .await
                .unwrap_or_else(|_| prompts::DEFAULT_TITLE.to_string()),
        ),
        None => None,
    }
}
