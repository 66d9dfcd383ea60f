//! Bounded concurrent orchestration of analysis units
//!
//! Each unit runs `retrieve → fuse → generate` on its own task. The two
//! retrieval lookups are blocking calls; they run on the blocking pool under
//! a separate worker semaphore and are joined before fusion. A unit
//! semaphore caps how many units are between retrieval and generation at
//! once. A failing unit is reported as skipped and never affects the others.

use crate::config::OrchestratorSettings;
use crate::fusion::{fuse, ContextBlob};
use crate::generation::{GenerationError, GenerationOutcome};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Longest skip reason kept, in characters.
pub const MAX_REASON_CHARS: usize = 100;

pub const BATCH_TIMEOUT_REASON: &str = "batch timeout exceeded";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
}

/// Lifecycle of one unit. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Pending,
    Retrieving,
    Fused,
    Generating,
    Succeeded,
    Failed,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Succeeded | UnitState::Failed)
    }
}

/// Called with `(unit index, new state)` on every transition.
pub type StateObserver = Arc<dyn Fn(usize, UnitState) + Send + Sync>;

/// The per-unit steps of one pipeline stage.
#[async_trait]
pub trait UnitWork: Send + Sync + 'static {
    type Context: Clone + Send + Sync + 'static;
    type Structural: Serialize + Send + 'static;
    type Semantic: Serialize + Send + 'static;

    /// Blocking structural lookup. Must not fail; degrade to empty instead.
    fn structural(&self, ctx: &Self::Context) -> Vec<Self::Structural>;

    /// Blocking semantic lookup. Must not fail; degrade to empty instead.
    fn semantic(&self, ctx: &Self::Context) -> Vec<Self::Semantic>;

    async fn generate(
        &self,
        ctx: &Self::Context,
        blob: &ContextBlob,
    ) -> Result<GenerationOutcome, GenerationError>;

    /// Short label for log lines
    fn describe(&self, _ctx: &Self::Context) -> String {
        String::new()
    }
}

#[derive(Debug, Clone)]
pub struct UnitSuccess<C> {
    pub index: usize,
    pub context: C,
    pub outcome: GenerationOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitSkip<C> {
    pub index: usize,
    pub context: C,
    pub reason: String,
}

/// Outcome of a batch, both lists in submission order.
#[derive(Debug, Clone)]
pub struct BatchReport<C> {
    pub succeeded: Vec<UnitSuccess<C>>,
    pub skipped: Vec<UnitSkip<C>>,
}

impl<C> Default for BatchReport<C> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<C> BatchReport<C> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.skipped.len()
    }

    /// Every unit with its decision or skip reason, in submission order.
    pub fn decisions(&self) -> Vec<(&C, &str)> {
        let mut all: Vec<(usize, &C, &str)> = self
            .succeeded
            .iter()
            .map(|s| (s.index, &s.context, s.outcome.analysis_decision.as_str()))
            .chain(
                self.skipped
                    .iter()
                    .map(|s| (s.index, &s.context, s.reason.as_str())),
            )
            .collect();
        all.sort_by_key(|(index, _, _)| *index);
        all.into_iter().map(|(_, ctx, text)| (ctx, text)).collect()
    }
}

fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_REASON_CHARS).collect()
}

fn notify(observer: &Option<StateObserver>, index: usize, state: UnitState) {
    if let Some(observer) = observer {
        observer(index, state);
    }
}

/// Run a blocking closure under a retrieval worker permit.
async fn blocking<T, F>(workers: Arc<Semaphore>, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let permit = workers
        .acquire_owned()
        .await
        .map_err(|e| format!("Error: retrieval pool closed: {e}"))?;
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        f()
    })
    .await
    .map_err(|e| format!("Error: retrieval task failed: {e}"))
}

/// Bounded-concurrency scheduler for analysis units.
pub struct Orchestrator {
    concurrency: usize,
    chunk_size: Option<usize>,
    retrieval_workers: usize,
    batch_timeout: Option<Duration>,
    observer: Option<StateObserver>,
}

impl Orchestrator {
    /// At most `concurrency` units in flight at once.
    pub fn new(concurrency: usize) -> Result<Self, OrchestratorError> {
        if concurrency == 0 {
            return Err(OrchestratorError::InvalidConcurrency);
        }
        Ok(Self {
            concurrency,
            chunk_size: None,
            retrieval_workers: 6,
            batch_timeout: None,
            observer: None,
        })
    }

    pub fn from_settings(settings: &OrchestratorSettings) -> Result<Self, OrchestratorError> {
        let mut orchestrator = Self::new(settings.concurrency)?
            .with_retrieval_workers(settings.retrieval_workers);
        if let Some(size) = settings.chunk_size {
            orchestrator = orchestrator.with_chunk_size(size);
        }
        if let Some(secs) = settings.batch_timeout_secs {
            orchestrator = orchestrator.with_batch_timeout(Duration::from_secs(secs));
        }
        Ok(orchestrator)
    }

    /// Process units in sequential chunks of this size. Zero disables chunking.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = (size > 0).then_some(size);
        self
    }

    /// Abort units still running when the batch exceeds `timeout`.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    pub fn with_retrieval_workers(mut self, workers: usize) -> Self {
        self.retrieval_workers = workers.max(1);
        self
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every unit. Always completes; failures land in `skipped`.
    pub async fn run<W: UnitWork>(
        &self,
        work: Arc<W>,
        units: Vec<W::Context>,
    ) -> BatchReport<W::Context> {
        let mut report = BatchReport::default();
        if units.is_empty() {
            return report;
        }

        let unit_permits = Arc::new(Semaphore::new(self.concurrency));
        let retrieval_permits = Arc::new(Semaphore::new(self.retrieval_workers));
        let deadline = self.batch_timeout.map(|timeout| Instant::now() + timeout);

        let indexed: Vec<(usize, W::Context)> = units.into_iter().enumerate().collect();
        for (index, _) in &indexed {
            notify(&self.observer, *index, UnitState::Pending);
        }
        let chunk_size = self.chunk_size.unwrap_or(indexed.len());

        for (chunk_no, chunk) in indexed.chunks(chunk_size).enumerate() {
            let (before_ok, before_skip) = (report.succeeded.len(), report.skipped.len());

            if deadline.is_some_and(|d| Instant::now() >= d) {
                for (index, ctx) in chunk {
                    notify(&self.observer, *index, UnitState::Failed);
                    report.skipped.push(UnitSkip {
                        index: *index,
                        context: ctx.clone(),
                        reason: BATCH_TIMEOUT_REASON.to_string(),
                    });
                }
                continue;
            }

            let handles: Vec<(usize, W::Context, JoinHandle<Result<GenerationOutcome, String>>)> =
                chunk
                    .iter()
                    .map(|(index, ctx)| {
                        let task = process_unit(
                            *index,
                            work.clone(),
                            ctx.clone(),
                            unit_permits.clone(),
                            retrieval_permits.clone(),
                            self.observer.clone(),
                        );
                        (*index, ctx.clone(), tokio::spawn(task))
                    })
                    .collect();

            for (index, context, mut handle) in handles {
                let joined = match deadline {
                    Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            handle.abort();
                            notify(&self.observer, index, UnitState::Failed);
                            report.skipped.push(UnitSkip {
                                index,
                                context,
                                reason: BATCH_TIMEOUT_REASON.to_string(),
                            });
                            continue;
                        }
                    },
                    None => (&mut handle).await,
                };

                match joined {
                    Ok(Ok(outcome)) => report.succeeded.push(UnitSuccess {
                        index,
                        context,
                        outcome,
                    }),
                    Ok(Err(reason)) => {
                        warn!(unit = index, label = %work.describe(&context), %reason, "unit failed");
                        report.skipped.push(UnitSkip {
                            index,
                            context,
                            reason: truncate_reason(&reason),
                        });
                    }
                    Err(e) => {
                        warn!(unit = index, error = %e, "unit task aborted");
                        notify(&self.observer, index, UnitState::Failed);
                        report.skipped.push(UnitSkip {
                            index,
                            context,
                            reason: truncate_reason(&format!("Error: unit task failed: {e}")),
                        });
                    }
                }
            }

            info!(
                chunk = chunk_no + 1,
                units = chunk.len(),
                succeeded = report.succeeded.len() - before_ok,
                skipped = report.skipped.len() - before_skip,
                "chunk complete"
            );
        }

        report
    }
}

/// One unit from permit to terminal state.
async fn process_unit<W: UnitWork>(
    index: usize,
    work: Arc<W>,
    ctx: W::Context,
    unit_permits: Arc<Semaphore>,
    retrieval_permits: Arc<Semaphore>,
    observer: Option<StateObserver>,
) -> Result<GenerationOutcome, String> {
    let _permit = unit_permits
        .acquire_owned()
        .await
        .map_err(|e| format!("Error: unit pool closed: {e}"))?;

    notify(&observer, index, UnitState::Retrieving);
    let result = retrieve_and_generate(index, &work, &ctx, retrieval_permits, &observer).await;
    let terminal = match &result {
        Ok(_) => UnitState::Succeeded,
        Err(_) => UnitState::Failed,
    };
    notify(&observer, index, terminal);
    result
}

async fn retrieve_and_generate<W: UnitWork>(
    index: usize,
    work: &Arc<W>,
    ctx: &W::Context,
    retrieval_permits: Arc<Semaphore>,
    observer: &Option<StateObserver>,
) -> Result<GenerationOutcome, String> {
    let structural = {
        let (work, ctx) = (work.clone(), ctx.clone());
        blocking(retrieval_permits.clone(), move || work.structural(&ctx))
    };
    let semantic = {
        let (work, ctx) = (work.clone(), ctx.clone());
        blocking(retrieval_permits, move || work.semantic(&ctx))
    };
    let (structural, semantic) = tokio::join!(structural, semantic);
    let blob = fuse(&structural?, &semantic?);
    notify(observer, index, UnitState::Fused);

    notify(observer, index, UnitState::Generating);
    let outcome = work
        .generate(ctx, &blob)
        .await
        .map_err(|e| format!("Error: {e}"))?;
    if outcome.is_error() {
        return Err(outcome.analysis_decision);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{generate, GenerationRequest, MockClient, Stage};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const OK: &str = r#"{"analysis_decision":"EXACT MATCH","content":["Pump coolant"]}"#;

    struct ScriptedWork {
        client: MockClient,
        panic_on: Option<usize>,
    }

    #[async_trait]
    impl UnitWork for ScriptedWork {
        type Context = usize;
        type Structural = Value;
        type Semantic = Value;

        fn structural(&self, ctx: &usize) -> Vec<Value> {
            if self.panic_on == Some(*ctx) {
                panic!("lookup exploded");
            }
            vec![json!({ "unit": ctx })]
        }

        fn semantic(&self, _ctx: &usize) -> Vec<Value> {
            Vec::new()
        }

        async fn generate(
            &self,
            ctx: &usize,
            blob: &ContextBlob,
        ) -> Result<GenerationOutcome, GenerationError> {
            let request = GenerationRequest::new("s", format!("<unit-{ctx}>\n{blob}"));
            generate(&self.client, Stage::Functions, &request).await
        }
    }

    fn work(client: MockClient) -> Arc<ScriptedWork> {
        Arc::new(ScriptedWork {
            client,
            panic_on: None,
        })
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert_eq!(
            Orchestrator::new(0).err(),
            Some(OrchestratorError::InvalidConcurrency)
        );
    }

    #[tokio::test]
    async fn never_more_than_k_units_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let observer: StateObserver = {
            let (in_flight, peak) = (in_flight.clone(), peak.clone());
            Arc::new(move |_, state| match state {
                UnitState::Retrieving => {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                }
                UnitState::Succeeded | UnitState::Failed => {
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                _ => {}
            })
        };

        let work = work(
            MockClient::available()
                .with_default(OK)
                .with_delay(Duration::from_millis(20)),
        );
        let orchestrator = Orchestrator::new(5).unwrap().with_observer(observer);
        let report = orchestrator.run(work.clone(), (0..50).collect()).await;

        assert_eq!(report.succeeded.len(), 50);
        assert_eq!(peak.load(Ordering::SeqCst), 5);
        assert!(work.client.peak_concurrency() <= 5);
    }

    #[tokio::test]
    async fn failed_unit_does_not_affect_others() {
        let work = work(
            MockClient::available()
                .with_failure("<unit-7>", GenerationError::InvocationFailed("boom".into()))
                .with_response("<unit-3>", "not json at all")
                .with_default(OK),
        );
        let report = Orchestrator::new(4).unwrap().run(work, (0..10).collect()).await;

        assert_eq!(report.succeeded.len(), 8);
        let succeeded: Vec<usize> = report.succeeded.iter().map(|s| s.context).collect();
        assert_eq!(succeeded, vec![0, 1, 2, 4, 5, 6, 8, 9]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].context, 3);
        assert_eq!(report.skipped[0].reason, "ERROR: JSON parsing failed");
        assert_eq!(report.skipped[1].context, 7);
        assert_eq!(report.skipped[1].reason, "Error: invocation failed: boom");
    }

    #[tokio::test]
    async fn panicking_lookup_fails_only_its_unit() {
        let work = Arc::new(ScriptedWork {
            client: MockClient::available().with_default(OK),
            panic_on: Some(2),
        });
        let report = Orchestrator::new(2).unwrap().run(work, (0..4).collect()).await;
        assert_eq!(report.succeeded.len(), 3);
        assert_eq!(report.skipped[0].context, 2);
        assert!(report.skipped[0].reason.starts_with("Error: retrieval task failed"));
    }

    #[tokio::test]
    async fn reasons_are_truncated() {
        let long = "x".repeat(300);
        let work = work(
            MockClient::available().with_failure("<unit-0>", GenerationError::InvocationFailed(long)),
        );
        let report = Orchestrator::new(1).unwrap().run(work, vec![0]).await;
        assert_eq!(report.skipped[0].reason.chars().count(), MAX_REASON_CHARS);
    }

    #[tokio::test]
    async fn units_pass_through_every_state_in_order() {
        let states: Arc<Mutex<HashMap<usize, Vec<UnitState>>>> = Arc::default();
        let observer: StateObserver = {
            let states = states.clone();
            Arc::new(move |index, state| {
                states.lock().unwrap().entry(index).or_default().push(state);
            })
        };
        let work = work(MockClient::available().with_default(OK));
        Orchestrator::new(2)
            .unwrap()
            .with_chunk_size(1)
            .with_observer(observer)
            .run(work, vec![0, 1])
            .await;

        let states = states.lock().unwrap();
        assert_eq!(
            states[&1],
            vec![
                UnitState::Pending,
                UnitState::Retrieving,
                UnitState::Fused,
                UnitState::Generating,
                UnitState::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn batch_timeout_skips_unfinished_units() {
        let work = work(
            MockClient::available()
                .with_default(OK)
                .with_delay(Duration::from_millis(200)),
        );
        let report = Orchestrator::new(1)
            .unwrap()
            .with_batch_timeout(Duration::from_millis(300))
            .run(work, (0..4).collect())
            .await;

        assert_eq!(report.total(), 4);
        assert_eq!(report.succeeded.len(), 1);
        assert!(report
            .skipped
            .iter()
            .all(|s| s.reason == BATCH_TIMEOUT_REASON));
    }

    #[tokio::test]
    async fn decisions_follow_submission_order() {
        let work = work(
            MockClient::available()
                .with_failure("<unit-0>", GenerationError::Unavailable("down".into()))
                .with_default(OK),
        );
        let report = Orchestrator::new(3).unwrap().run(work, vec![0, 1]).await;
        let decisions = report.decisions();
        assert_eq!(*decisions[0].0, 0);
        assert!(decisions[0].1.starts_with("Error:"));
        assert_eq!(decisions[1].1, "EXACT MATCH");
    }
}
