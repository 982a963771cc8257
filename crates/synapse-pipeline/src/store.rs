//! Pipeline state store.
//!
//! State changes only through a closed set of named [`Action`]s applied by the
//! pure [`reduce`] function. [`PipelineStore`] is the single writer: it checks
//! each action against the current state, swaps in the reduced state and
//! publishes a versioned [`Snapshot`] on a `watch` channel. Readers always see
//! a complete state, never a half-applied one.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use synapse_protocol::{AgentAvailability, AgentRunStatus};
use synapse_types::{ExecutionRecord, Result, Stage, StageStatus, SynapseError};
use tokio::sync::watch;

use crate::panel::PanelState;
use crate::plan::PlanFile;
use crate::validation;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub stages: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_version: Option<String>,
    pub active_stage: Option<String>,
    pub explanations: BTreeMap<String, String>,
    /// Flags of the panel bound to each stage, keyed by stage id. Written
    /// only by the panel manager through [`Action::SetPanelState`].
    pub panel_states: BTreeMap<String, PanelState>,
    pub is_executing: bool,
    pub history: Vec<ExecutionRecord>,
    /// Values of root inputs and produced output slots.
    pub slots: BTreeMap<String, Value>,
    /// Raw output object of each completed stage.
    pub results: BTreeMap<String, Map<String, Value>>,
    /// Last reported state of each agent, keyed by agent name. Survives plan
    /// loads; cleared by reset.
    pub agents: BTreeMap<String, AgentStatus>,
}

/// What the canvas knows about one agent from its heartbeat, status and
/// error messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<AgentAvailability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_status: Option<AgentRunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Timestamp of the last message from the agent, as sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

impl PipelineState {
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn has_stage(&self, id: &str) -> bool {
        self.stage(id).is_some()
    }

    pub fn status_of(&self, id: &str) -> Option<StageStatus> {
        self.stage(id).map(|s| s.status)
    }

    pub fn ids_with_status(&self, status: StageStatus) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Input values for `stage`, by slot name. Slots without a value yet are
    /// absent.
    pub fn inputs_for(&self, stage: &Stage) -> Map<String, Value> {
        stage
            .inputs
            .iter()
            .filter_map(|slot| self.slots.get(slot).map(|v| (slot.clone(), v.clone())))
            .collect()
    }

    /// The plan in its file form.
    pub fn export(&self) -> PlanFile {
        PlanFile {
            pipeline: self.stages.clone(),
            metadata: self.metadata.clone(),
            version: self.plan_version.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Partial stage update. Identity and slot wiring are fixed once a plan is
/// accepted, so they are not patchable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageUpdate {
    pub name: Option<String>,
    pub editable: Option<bool>,
    pub status: Option<StageStatus>,
    pub visual_payload: Option<Value>,
    pub explanation: Option<String>,
    /// `Some(None)` clears a previous error.
    pub error: Option<Option<String>>,
    /// Merged into the stage's passthrough fields.
    pub extra: Map<String, Value>,
}

impl StageUpdate {
    pub fn status(status: StageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(StageStatus::Failed),
            error: Some(Some(error.into())),
            ..Self::default()
        }
    }

    pub fn with_visual_payload(mut self, payload: Value) -> Self {
        self.visual_payload = Some(payload);
        self
    }

    pub fn with_explanation(mut self, text: impl Into<String>) -> Self {
        self.explanation = Some(text.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetPlan {
        stages: Vec<Stage>,
        metadata: Option<Value>,
        version: Option<String>,
    },
    UpdateStage {
        id: String,
        update: StageUpdate,
    },
    SetActiveStage(Option<String>),
    SetExplanation {
        stage_id: String,
        text: String,
    },
    SetExecuting(bool),
    AppendExecutionRecord(ExecutionRecord),
    SetRootInput {
        slot: String,
        value: Value,
    },
    SetStageResult {
        stage_id: String,
        outputs: Map<String, Value>,
    },
    SetPanelState {
        stage_id: String,
        state: PanelState,
    },
    SetAgentStatus {
        agent: String,
        status: AgentStatus,
    },
    Reset,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SetPlan { .. } => "set_plan",
            Action::UpdateStage { .. } => "update_stage",
            Action::SetActiveStage(_) => "set_active_stage",
            Action::SetExplanation { .. } => "set_explanation",
            Action::SetExecuting(_) => "set_executing",
            Action::AppendExecutionRecord(_) => "append_execution_record",
            Action::SetRootInput { .. } => "set_root_input",
            Action::SetStageResult { .. } => "set_stage_result",
            Action::SetPanelState { .. } => "set_panel_state",
            Action::SetAgentStatus { .. } => "set_agent_status",
            Action::Reset => "reset",
        }
    }
}

/// Apply one action. Actions naming a stage the state does not hold leave
/// the state as it was.
pub fn reduce(state: &PipelineState, action: Action) -> PipelineState {
    let mut next = state.clone();
    match action {
        Action::SetPlan {
            stages,
            metadata,
            version,
        } => {
            let explanations = stages
                .iter()
                .filter_map(|s| s.explanation.clone().map(|e| (s.id.clone(), e)))
                .collect();
            let panel_states = stages
                .iter()
                .map(|s| (s.id.clone(), PanelState::default()))
                .collect();
            next = PipelineState {
                stages,
                metadata,
                plan_version: version,
                explanations,
                panel_states,
                agents: state.agents.clone(),
                ..PipelineState::default()
            };
        }
        Action::UpdateStage { id, update } => {
            let Some(stage) = next.stages.iter_mut().find(|s| s.id == id) else {
                return next;
            };
            if let Some(name) = update.name {
                stage.name = name;
            }
            if let Some(editable) = update.editable {
                stage.editable = editable;
            }
            if let Some(payload) = update.visual_payload {
                stage.visual_payload = Some(payload);
            }
            if let Some(error) = update.error {
                stage.error = error;
            }
            stage.extra.extend(update.extra);
            if let Some(text) = update.explanation {
                stage.explanation = Some(text.clone());
                next.explanations.insert(id.clone(), text);
            }
            if let Some(status) = update.status {
                stage.status = status;
            }
        }
        Action::SetActiveStage(id) => {
            next.active_stage = id.filter(|id| state.has_stage(id));
        }
        Action::SetExplanation { stage_id, text } => {
            if let Some(stage) = next.stages.iter_mut().find(|s| s.id == stage_id) {
                stage.explanation = Some(text.clone());
                next.explanations.insert(stage_id, text);
            }
        }
        Action::SetExecuting(executing) => {
            next.is_executing = executing;
            if !executing {
                next.active_stage = None;
            }
        }
        Action::AppendExecutionRecord(record) => {
            if state.has_stage(&record.stage_id) {
                next.history.push(record);
            }
        }
        Action::SetRootInput { slot, value } => {
            next.slots.insert(slot, value);
        }
        Action::SetStageResult { stage_id, outputs } => {
            let Some(stage) = state.stage(&stage_id) else {
                return next;
            };
            for slot in &stage.outputs {
                if let Some(value) = outputs.get(slot) {
                    next.slots.insert(slot.clone(), value.clone());
                }
            }
            next.results.insert(stage_id, outputs);
        }
        Action::SetPanelState { stage_id, state: panel } => {
            if state.has_stage(&stage_id) {
                next.panel_states.insert(stage_id, panel);
            }
        }
        Action::SetAgentStatus { agent, status } => {
            next.agents.insert(agent, status);
        }
        Action::Reset => next = PipelineState::default(),
    }
    next
}

// ---------------------------------------------------------------------------
// PipelineStore
// ---------------------------------------------------------------------------

/// A state published by the store. `version` counts applied actions.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    pub action: &'static str,
    pub state: Arc<PipelineState>,
}

pub struct PipelineStore {
    tx: watch::Sender<Snapshot>,
}

impl PipelineStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot {
            version: 0,
            action: "init",
            state: Arc::new(PipelineState::default()),
        });
        Self { tx }
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.tx.borrow().state.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    /// Receive every published snapshot from now on.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Apply `action` unconditionally.
    pub fn dispatch(&self, action: Action) -> Arc<PipelineState> {
        match self.dispatch_checked(action, |_| Ok(())) {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Run `check` against the current state and apply `action` only if it
    /// passes. Check and apply happen under the same write lock.
    fn dispatch_checked<F>(&self, action: Action, check: F) -> Result<Arc<PipelineState>>
    where
        F: FnOnce(&PipelineState) -> Result<()>,
    {
        let name = action.name();
        let mut outcome: Result<Arc<PipelineState>> =
            Err(SynapseError::Other(format!("store action '{name}' not applied")));
        let mut version = 0;

        self.tx.send_if_modified(|snapshot| {
            if let Err(e) = check(&snapshot.state) {
                outcome = Err(e);
                return false;
            }
            let state = Arc::new(reduce(&snapshot.state, action));
            snapshot.version += 1;
            snapshot.action = name;
            snapshot.state = state.clone();
            version = snapshot.version;
            outcome = Ok(state);
            true
        });

        match &outcome {
            Ok(_) => tracing::debug!(action = name, version, "store transition"),
            Err(e) => tracing::debug!(action = name, error = %e, "store action rejected"),
        }
        outcome
    }

    /// Replace the plan. Plans with duplicate or empty ids, or with a
    /// dependency cycle, are rejected and the store is left unchanged.
    pub fn set_plan(&self, stages: Vec<Stage>) -> Result<Arc<PipelineState>> {
        self.set_plan_file(PlanFile::new(stages))
    }

    pub fn set_plan_file(&self, plan: PlanFile) -> Result<Arc<PipelineState>> {
        if let Err(e) = validation::check_plan(&plan.pipeline) {
            tracing::warn!(error = %e, "plan rejected");
            return Err(e);
        }
        Ok(self.dispatch(Action::SetPlan {
            stages: plan.pipeline,
            metadata: plan.metadata,
            version: plan.version,
        }))
    }

    /// Parse untrusted plan text and load it. On any error the store is left
    /// exactly as it was.
    pub fn load_plan_from_serialized(&self, text: &str) -> Result<Arc<PipelineState>> {
        let plan = PlanFile::parse(text).inspect_err(|e| {
            tracing::warn!(error = %e, "plan text rejected");
        })?;
        self.set_plan_file(plan)
    }

    pub fn update_stage(&self, id: &str, update: StageUpdate) -> Result<Arc<PipelineState>> {
        self.dispatch_checked(
            Action::UpdateStage {
                id: id.to_string(),
                update,
            },
            |s| require_stage(s, id),
        )
    }

    pub fn set_active_stage(&self, id: Option<&str>) -> Result<Arc<PipelineState>> {
        self.dispatch_checked(Action::SetActiveStage(id.map(str::to_string)), |s| {
            id.map_or(Ok(()), |id| require_stage(s, id))
        })
    }

    pub fn set_explanation(&self, stage_id: &str, text: &str) -> Result<Arc<PipelineState>> {
        self.dispatch_checked(
            Action::SetExplanation {
                stage_id: stage_id.to_string(),
                text: text.to_string(),
            },
            |s| require_stage(s, stage_id),
        )
    }

    pub fn set_executing(&self, executing: bool) -> Arc<PipelineState> {
        self.dispatch(Action::SetExecuting(executing))
    }

    pub fn append_execution_record(&self, record: ExecutionRecord) -> Result<Arc<PipelineState>> {
        let stage_id = record.stage_id.clone();
        self.dispatch_checked(Action::AppendExecutionRecord(record), |s| {
            require_stage(s, &stage_id)
        })
    }

    pub fn set_root_input(&self, slot: &str, value: Value) -> Arc<PipelineState> {
        self.dispatch(Action::SetRootInput {
            slot: slot.to_string(),
            value,
        })
    }

    pub fn set_stage_result(
        &self,
        stage_id: &str,
        outputs: Map<String, Value>,
    ) -> Result<Arc<PipelineState>> {
        self.dispatch_checked(
            Action::SetStageResult {
                stage_id: stage_id.to_string(),
                outputs,
            },
            |s| require_stage(s, stage_id),
        )
    }

    /// Publish the flags of the panel bound to `stage_id`. Unchanged flags
    /// publish nothing.
    pub fn set_panel_state(&self, stage_id: &str, panel: PanelState) -> Result<Arc<PipelineState>> {
        let current = self.state();
        if current.panel_states.get(stage_id) == Some(&panel) {
            return Ok(current);
        }
        self.dispatch_checked(
            Action::SetPanelState {
                stage_id: stage_id.to_string(),
                state: panel,
            },
            |s| require_stage(s, stage_id),
        )
    }

    pub fn set_agent_status(&self, agent: &str, status: AgentStatus) -> Arc<PipelineState> {
        self.dispatch(Action::SetAgentStatus {
            agent: agent.to_string(),
            status,
        })
    }

    /// Current status of `agent`, or the default for an agent not yet seen.
    pub fn agent_status(&self, agent: &str) -> AgentStatus {
        self.state().agents.get(agent).cloned().unwrap_or_default()
    }

    pub fn reset(&self) -> Arc<PipelineState> {
        self.dispatch(Action::Reset)
    }

    /// The current plan as file JSON.
    pub fn plan_json(&self) -> Result<String> {
        self.state().export().to_json_pretty()
    }
}

impl Default for PipelineStore {
    fn default() -> Self {
        Self::new()
    }
}

fn require_stage(state: &PipelineState, id: &str) -> Result<()> {
    if state.has_stage(id) {
        Ok(())
    } else {
        Err(SynapseError::StageNotFound(id.to_string()))
    }
}
