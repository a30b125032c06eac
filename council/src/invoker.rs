//! Parallel model invocation with failure capture.
//!
//! # Design
//!
//! ```text
//!   roster ──► spawn ──► timeout(invoke) ──┐
//!   roster ──► spawn ──► timeout(invoke) ──┼──► FuturesUnordered ──► CouncilSet
//!   roster ──► spawn ──► timeout(invoke) ──┘        (arrival order)
//! ```
//!
//! Every dispatched call produces exactly one `ProviderResult`; errors,
//! timeouts, and panics are recorded as data, never propagated. Retry is
//! the gateway's concern, not this layer's.

use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::providers::{Completion, CompletionRequest, ProviderError, ProviderRegistry};
use crate::types::{CouncilSet, ModelId, ProviderResult, ProviderStatus};

pub const COUNCIL_TIMEOUT: Duration = Duration::from_secs(120);
pub const UTILITY_TIMEOUT: Duration = Duration::from_secs(30);
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub struct Invoker {
    registry: ProviderRegistry,
    council_timeout: Duration,
    utility_timeout: Duration,
    search_timeout: Duration,
}

impl Invoker {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            council_timeout: COUNCIL_TIMEOUT,
            utility_timeout: UTILITY_TIMEOUT,
            search_timeout: SEARCH_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, council: Duration, utility: Duration, search: Duration) -> Self {
        self.council_timeout = council;
        self.utility_timeout = utility;
        self.search_timeout = search;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Fan the same request out across the roster and collect one result per
    /// entry, in arrival order. The returned set always has exactly
    /// `roster.len()` entries.
    pub async fn dispatch_council(
        &self,
        roster: &[ModelId],
        request: &CompletionRequest,
    ) -> CouncilSet {
        self.dispatch_council_observed(roster, request, |_| {}).await
    }

    /// `dispatch_council` with a per-arrival callback, so callers can surface
    /// progress while the slower members are still out.
    pub async fn dispatch_council_observed(
        &self,
        roster: &[ModelId],
        request: &CompletionRequest,
        mut on_arrival: impl FnMut(&ProviderResult),
    ) -> CouncilSet {
        let mut in_flight = FuturesUnordered::new();
        for model in roster {
            in_flight.push(self.call_member(model.clone(), request.clone()));
        }

        let mut results = Vec::with_capacity(roster.len());
        while let Some(result) = in_flight.next().await {
            match result.status {
                ProviderStatus::Ok => info!(
                    model = %result.model,
                    elapsed_ms = result.elapsed_ms,
                    "council member responded"
                ),
                _ => warn!(
                    model = %result.model,
                    status = %result.status,
                    elapsed_ms = result.elapsed_ms,
                    error = result.error.as_deref().unwrap_or(""),
                    "council member failed"
                ),
            }
            on_arrival(&result);
            results.push(result);
        }
        CouncilSet::new(results)
    }

    async fn call_member(&self, model: ModelId, request: CompletionRequest) -> ProviderResult {
        let Some(backend) = self.registry.get(&model) else {
            let detail = ProviderError::NotRegistered(model.clone()).to_string();
            return ProviderResult::error(model, detail, 0);
        };
        let timeout = self.council_timeout;
        let started = Instant::now();
        // Spawned so one member's work cannot starve the others, and a
        // panic inside a backend is contained to its own result.
        let handle =
            tokio::spawn(
                async move { tokio::time::timeout(timeout, backend.invoke(request)).await },
            );

        let elapsed = || started.elapsed().as_millis() as u64;
        match handle.await {
            Ok(Ok(Ok(completion))) => ProviderResult::ok(model, completion.text, elapsed()),
            Ok(Ok(Err(err))) => ProviderResult::error(model, err.to_string(), elapsed()),
            Ok(Err(_)) => ProviderResult::timeout(model, elapsed()),
            Err(join_err) => {
                ProviderResult::error(model, format!("backend task failed: {join_err}"), elapsed())
            }
        }
    }

    /// Single short-deadline call for gates, titles, and other side work.
    pub async fn invoke_utility(
        &self,
        model: &ModelId,
        request: CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        self.invoke_bounded(model, request, self.utility_timeout)
            .await
    }

    /// Single call with the longer web-search deadline.
    pub async fn invoke_search(
        &self,
        model: &ModelId,
        request: CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        self.invoke_bounded(model, request, self.search_timeout)
            .await
    }

    /// Single call with the full council deadline, for whole-response work
    /// that is not part of the roster fan-out.
    pub async fn invoke_long(
        &self,
        model: &ModelId,
        request: CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        self.invoke_bounded(model, request, self.council_timeout)
            .await
    }

    /// Streamed call under the council deadline. Deltas flow through the
    /// channel as they arrive; the deadline covers the whole stream.
    pub async fn invoke_streaming(
        &self,
        model: &ModelId,
        request: CompletionRequest,
        deltas: mpsc::Sender<String>,
    ) -> Result<Completion, ProviderError> {
        let backend = self
            .registry
            .get(model)
            .ok_or_else(|| ProviderError::NotRegistered(model.clone()))?;
        match tokio::time::timeout(self.council_timeout, backend.invoke_streaming(request, deltas))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.council_timeout)),
        }
    }

    async fn invoke_bounded(
        &self,
        model: &ModelId,
        request: CompletionRequest,
        timeout: Duration,
    ) -> Result<Completion, ProviderError> {
        let backend = self
            .registry
            .get(model)
            .ok_or_else(|| ProviderError::NotRegistered(model.clone()))?;
        match tokio::time::timeout(timeout, backend.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        }
    }
}
