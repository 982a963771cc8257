//! Stage execution: single runs, whole-plan runs in topological order, and
//! stepwise runs.
//!
//! Each run is spawned onto the runtime and exposed as a shared handle, so a
//! second request for a stage that is already running joins the first run
//! instead of starting another. A spawned run finishes even if every caller
//! stops awaiting it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use synapse_types::{ExecutionRecord, Result, Stage, StageStatus, SynapseError};

use crate::delegate::{StageDelegate, StageOutput};
use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::{resolve_order_ids, DependencyGraph};
use crate::store::{PipelineStore, StageUpdate};

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Upper bound on one delegate call. Expiry fails the stage and drops
    /// the delegate future mid-flight, so work the delegate has not finished
    /// is abandoned. `None` lets every run finish on its own.
    pub stage_timeout: Option<Duration>,
}

impl ExecutorConfig {
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Keep going after a stage fails. Stages downstream of the failure are
    /// still left pending.
    pub continue_past_failures: bool,
}

impl ExecuteOptions {
    pub fn continue_past_failures() -> Self {
        Self {
            continue_past_failures: true,
        }
    }
}

/// How one `execute_stage` call settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed { stage_id: String, duration_ms: u64 },
    /// The stage had already completed; nothing ran.
    AlreadyCompleted { stage_id: String },
    Failed {
        stage_id: String,
        error: String,
        duration_ms: u64,
    },
    /// Some dependencies have not completed; nothing ran.
    Blocked {
        stage_id: String,
        waiting_on: Vec<String>,
    },
}

impl StageOutcome {
    pub fn stage_id(&self) -> &str {
        match self {
            StageOutcome::Completed { stage_id, .. }
            | StageOutcome::AlreadyCompleted { stage_id }
            | StageOutcome::Failed { stage_id, .. }
            | StageOutcome::Blocked { stage_id, .. } => stage_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            StageOutcome::Completed { .. } | StageOutcome::AlreadyCompleted { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed { .. })
    }

    /// Surface a failed run as a [`SynapseError::StageExecution`].
    pub fn into_result(self) -> Result<Self> {
        match self {
            StageOutcome::Failed {
                stage_id, error, ..
            } => Err(SynapseError::StageExecution {
                stage: stage_id,
                message: error,
            }),
            other => Ok(other),
        }
    }
}

/// Summary of one `execute_all` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub blocked: Vec<String>,
    /// Already completed before the run began.
    pub skipped: Vec<String>,
    /// Stopped at the first failure.
    pub aborted: bool,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    /// The first failure as a [`SynapseError::StageExecution`].
    pub fn into_result(self) -> Result<Self> {
        match self.failed.first() {
            Some((stage, message)) => Err(SynapseError::StageExecution {
                stage: stage.clone(),
                message: message.clone(),
            }),
            None => Ok(self),
        }
    }
}

type RunHandle = Shared<BoxFuture<'static, StageOutcome>>;

// ---------------------------------------------------------------------------
// StageExecutor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StageExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<PipelineStore>,
    delegate: Arc<dyn StageDelegate>,
    events: EventEmitter,
    config: ExecutorConfig,
    in_flight: Mutex<HashMap<String, RunHandle>>,
}

impl StageExecutor {
    pub fn new(
        store: Arc<PipelineStore>,
        delegate: Arc<dyn StageDelegate>,
        events: EventEmitter,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                delegate,
                events,
                config,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn is_in_flight(&self, stage_id: &str) -> bool {
        self.inner
            .in_flight
            .lock()
            .map(|m| m.contains_key(stage_id))
            .unwrap_or(false)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Run one stage unless it has already completed.
    ///
    /// A stage that is already running is not started again; the call waits
    /// on the existing run and returns its outcome. A delegate failure is
    /// reported as [`StageOutcome::Failed`], not as an `Err`.
    pub async fn execute_stage(&self, stage_id: &str) -> Result<StageOutcome> {
        let handle = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .map_err(|_| SynapseError::Other("in-flight map poisoned".into()))?;

            match in_flight.get(stage_id) {
                Some(handle) => {
                    tracing::debug!(stage = %stage_id, "joining in-flight run");
                    handle.clone()
                }
                None => {
                    let state = self.inner.store.state();
                    let stage = state
                        .stage(stage_id)
                        .ok_or_else(|| SynapseError::StageNotFound(stage_id.to_string()))?;
                    if stage.status == StageStatus::Completed {
                        return Ok(StageOutcome::AlreadyCompleted {
                            stage_id: stage_id.to_string(),
                        });
                    }

                    let graph = DependencyGraph::build(&state.stages);
                    let waiting_on: Vec<String> = graph
                        .dependencies_of(stage_id)
                        .into_iter()
                        .filter(|dep| state.status_of(dep) != Some(StageStatus::Completed))
                        .map(str::to_string)
                        .collect();
                    if !waiting_on.is_empty() {
                        tracing::debug!(stage = %stage_id, ?waiting_on, "stage blocked");
                        self.inner.events.emit(PipelineEvent::StageBlocked {
                            stage_id: stage_id.to_string(),
                            waiting_on: waiting_on.clone(),
                        });
                        return Ok(StageOutcome::Blocked {
                            stage_id: stage_id.to_string(),
                            waiting_on,
                        });
                    }

                    let handle = self.spawn_run(stage.clone());
                    in_flight.insert(stage_id.to_string(), handle.clone());
                    handle
                }
            }
        };
        Ok(handle.await)
    }

    /// Run every stage in dependency order, skipping completed ones.
    ///
    /// Without `continue_past_failures` the run stops at the first failed
    /// stage. With it, independent stages keep running and stages downstream
    /// of a failure are reported as blocked.
    pub async fn execute_all(&self, options: ExecuteOptions) -> Result<RunReport> {
        let order = resolve_order_ids(&self.inner.store.state().stages)?;
        let started = Instant::now();

        self.inner.store.set_executing(true);
        self.inner.events.emit(PipelineEvent::PipelineStarted {
            stage_count: order.len(),
        });
        tracing::info!(stages = order.len(), "pipeline run started");

        let result = self.run_in_order(&order, options).await;
        self.inner.store.set_executing(false);

        let mut report = result?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            duration_ms = report.duration_ms,
            "pipeline run finished"
        );
        self.inner.events.emit(PipelineEvent::PipelineCompleted {
            completed: report.completed.clone(),
            failed: report.failed.iter().map(|(id, _)| id.clone()).collect(),
            duration_ms: report.duration_ms,
        });
        Ok(report)
    }

    async fn run_in_order(&self, order: &[String], options: ExecuteOptions) -> Result<RunReport> {
        let mut report = RunReport::default();
        for stage_id in order {
            match self.execute_stage(stage_id).await? {
                StageOutcome::Completed { stage_id, .. } => report.completed.push(stage_id),
                StageOutcome::AlreadyCompleted { stage_id } => report.skipped.push(stage_id),
                StageOutcome::Blocked { stage_id, .. } => report.blocked.push(stage_id),
                StageOutcome::Failed {
                    stage_id, error, ..
                } => {
                    report.failed.push((stage_id.clone(), error.clone()));
                    if !options.continue_past_failures {
                        self.inner
                            .events
                            .emit(PipelineEvent::PipelineAborted { stage_id, error });
                        report.aborted = true;
                        break;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Run the first pending stage in dependency order. `None` when no stage
    /// is pending.
    pub async fn execute_next(&self) -> Result<Option<StageOutcome>> {
        let state = self.inner.store.state();
        let order = resolve_order_ids(&state.stages)?;
        let next = order
            .into_iter()
            .find(|id| state.status_of(id) == Some(StageStatus::Pending));
        match next {
            Some(id) => Ok(Some(self.execute_stage(&id).await?)),
            None => Ok(None),
        }
    }

    fn spawn_run(&self, stage: Stage) -> RunHandle {
        let inner = self.inner.clone();
        let stage_id = stage.id.clone();
        let task = tokio::spawn(async move {
            let outcome = inner.run(stage).await;
            if let Ok(mut in_flight) = inner.in_flight.lock() {
                in_flight.remove(outcome.stage_id());
            }
            outcome
        });
        async move {
            task.await.unwrap_or_else(|e| StageOutcome::Failed {
                stage_id,
                error: format!("stage task ended abnormally: {e}"),
                duration_ms: 0,
            })
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn run(&self, stage: Stage) -> StageOutcome {
        let id = stage.id.clone();
        let state = self.store.state();
        let inputs = state.inputs_for(&stage);

        let running = StageUpdate {
            status: Some(StageStatus::Running),
            error: Some(None),
            ..StageUpdate::default()
        };
        self.log_store_err(&id, self.store.update_stage(&id, running));
        self.log_store_err(&id, self.store.set_active_stage(Some(&id)));
        self.log_store_err(&id, self.store.append_execution_record(ExecutionRecord::started(&id)));
        self.events.emit(PipelineEvent::StageStarted {
            stage_id: id.clone(),
            engine: stage.engine.clone(),
        });
        tracing::info!(stage = %id, engine = %stage.engine, "stage started");

        let started = Instant::now();
        let result = self.call_delegate(&stage, &inputs).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                self.finish_completed(&stage, output, duration_ms);
                StageOutcome::Completed {
                    stage_id: id,
                    duration_ms,
                }
            }
            Err(e) => {
                let error = failure_message(e);
                self.finish_failed(&id, &error, duration_ms);
                StageOutcome::Failed {
                    stage_id: id,
                    error,
                    duration_ms,
                }
            }
        }
    }

    async fn call_delegate(
        &self,
        stage: &Stage,
        inputs: &serde_json::Map<String, Value>,
    ) -> Result<StageOutput> {
        let call = self.delegate.execute(stage, inputs);
        match self.config.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(SynapseError::StageExecution {
                    stage: stage.id.clone(),
                    message: format!("timed out after {}ms", limit.as_millis()),
                })
            }),
            None => call.await,
        }
    }

    fn finish_completed(&self, stage: &Stage, output: StageOutput, duration_ms: u64) {
        let id = &stage.id;
        let StageOutput {
            outputs,
            explanation,
            visual_payload,
        } = output;

        for slot in &stage.outputs {
            if !outputs.contains_key(slot) {
                tracing::warn!(stage = %id, slot = %slot, "delegate left output slot empty");
            }
        }
        self.log_store_err(id, self.store.set_stage_result(id, outputs));

        let update = StageUpdate {
            status: Some(StageStatus::Completed),
            visual_payload,
            explanation,
            ..StageUpdate::default()
        };
        self.log_store_err(id, self.store.update_stage(id, update));
        self.log_store_err(
            id,
            self.store
                .append_execution_record(ExecutionRecord::completed(id, duration_ms)),
        );
        self.events.emit(PipelineEvent::StageCompleted {
            stage_id: id.clone(),
            duration_ms,
        });
        tracing::info!(stage = %id, duration_ms, "stage completed");
    }

    fn finish_failed(&self, id: &str, error: &str, duration_ms: u64) {
        self.log_store_err(id, self.store.update_stage(id, StageUpdate::failed(error)));
        self.log_store_err(
            id,
            self.store
                .append_execution_record(ExecutionRecord::failed(id, duration_ms, error)),
        );
        self.events.emit(PipelineEvent::StageFailed {
            stage_id: id.to_string(),
            error: error.to_string(),
            duration_ms,
        });
        tracing::warn!(stage = %id, duration_ms, error = %error, "stage failed");
    }

    /// The plan may be replaced or reset while a run is in flight; writes for
    /// a stage that no longer exists are dropped.
    fn log_store_err<T>(&self, stage_id: &str, result: Result<T>) {
        if let Err(e) = result {
            tracing::debug!(stage = %stage_id, error = %e, "store write for stage dropped");
        }
    }
}

fn failure_message(error: SynapseError) -> String {
    match error {
        SynapseError::StageExecution { message, .. } => message,
        other => other.to_string(),
    }
}
