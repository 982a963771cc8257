//! The orchestrator ties the store, executor, panel manager and event stream
//! together behind one object.
//!
//! Loading a plan binds one panel to each stage, typed by the stage's
//! `visualType`. While stages run, bound panels follow stage status: loading
//! while running, an error banner on failure, and the stage's visual payload
//! (or raw result) as content on completion.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use synapse_protocol::MessageDispatcher;
use synapse_types::{Result, Stage, StageStatus};

use crate::delegate::StageDelegate;
use crate::events::{EventEmitter, PipelineEvent};
use crate::executor::{ExecuteOptions, ExecutorConfig, RunReport, StageExecutor, StageOutcome};
use crate::graph::DependencyGraph;
use crate::handlers::{register_agent_handlers, AgentContext, MessageLog};
use crate::panel::{Panel, PanelManager, PanelManagerConfig, PanelOverrides, PanelUpdate};
use crate::panel_registry::{PanelType, PanelTypeRegistry};
use crate::plan::{load_plan_file, save_plan_file, PlanFile};
use crate::store::{PipelineState, PipelineStore};

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub executor: ExecutorConfig,
    pub panels: PanelManagerConfig,
    pub event_capacity: usize,
    /// How many inbound agent messages the message log keeps.
    pub message_log_capacity: usize,
    /// Lay bound panels out on a grid after each load.
    pub arrange_on_load: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            panels: PanelManagerConfig::default(),
            event_capacity: 256,
            message_log_capacity: crate::handlers::DEFAULT_MESSAGE_LOG_CAPACITY,
            arrange_on_load: true,
        }
    }
}

pub struct Orchestrator {
    store: Arc<PipelineStore>,
    executor: StageExecutor,
    panels: Arc<PanelManager>,
    events: EventEmitter,
    messages: Arc<MessageLog>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(delegate: Arc<dyn StageDelegate>, config: OrchestratorConfig) -> Self {
        Self::with_registry(delegate, PanelTypeRegistry::with_defaults(), config)
    }

    pub fn with_registry(
        delegate: Arc<dyn StageDelegate>,
        registry: PanelTypeRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        let events = EventEmitter::new(config.event_capacity);
        let store = Arc::new(PipelineStore::new());
        let executor = StageExecutor::new(
            store.clone(),
            delegate,
            events.clone(),
            config.executor.clone(),
        );
        let panels = Arc::new(
            PanelManager::new(registry, config.panels)
                .with_events(events.clone())
                .with_store(store.clone()),
        );
        let messages = Arc::new(MessageLog::new(config.message_log_capacity));
        Self {
            store,
            executor,
            panels,
            events,
            messages,
            config,
        }
    }

    pub fn store(&self) -> &Arc<PipelineStore> {
        &self.store
    }

    pub fn panels(&self) -> &Arc<PanelManager> {
        &self.panels
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn executor(&self) -> &StageExecutor {
        &self.executor
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.store.state()
    }

    /// Inbound agent messages seen by the registered handlers.
    pub fn messages(&self) -> &Arc<MessageLog> {
        &self.messages
    }

    pub fn agent_context(&self) -> AgentContext {
        AgentContext {
            store: self.store.clone(),
            panels: self.panels.clone(),
            log: self.messages.clone(),
        }
    }

    /// Route inbound agent messages drained by `dispatcher` into this
    /// orchestrator's store and panels.
    pub fn register_message_handlers(&self, dispatcher: &MessageDispatcher) {
        register_agent_handlers(dispatcher, &self.agent_context());
    }

    // -- Loading --------------------------------------------------------------

    pub fn load_stages(&self, stages: Vec<Stage>) -> Result<Arc<PipelineState>> {
        self.load_plan(PlanFile::new(stages))
    }

    /// Load plan JSON. Text that is not a bare plan is searched for an
    /// embedded one.
    pub fn load_text(&self, text: &str) -> Result<Arc<PipelineState>> {
        let plan = match PlanFile::parse(text) {
            Ok(plan) => plan,
            Err(e) => match PlanFile::extract_embedded(text) {
                Some((plan, _rest)) => plan,
                None => return Err(self.rejected(e)),
            },
        };
        self.load_plan(plan)
    }

    pub async fn load_file(&self, path: &Path) -> Result<Arc<PipelineState>> {
        let plan = load_plan_file(path).await.map_err(|e| self.rejected(e))?;
        self.load_plan(plan)
    }

    /// Replace the current plan and its panels. A rejected plan leaves both
    /// the previous plan and its panels in place.
    pub fn load_plan(&self, plan: PlanFile) -> Result<Arc<PipelineState>> {
        let panels = plan
            .pipeline
            .iter()
            .map(|stage| self.panel_for(stage))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| self.rejected(e))?;

        let state = self.store.set_plan_file(plan).map_err(|e| self.rejected(e))?;
        self.panels.replace_all(panels)?;
        if self.config.arrange_on_load {
            self.panels.arrange_grid()?;
        }

        tracing::info!(stages = state.stages.len(), "plan loaded");
        self.events.emit(PipelineEvent::PlanLoaded {
            stage_count: state.stages.len(),
            panel_count: self.panels.len(),
        });
        Ok(state)
    }

    fn panel_for(&self, stage: &Stage) -> Result<Panel> {
        let panel_type = stage
            .visual_type
            .as_deref()
            .and_then(|v| v.parse::<PanelType>().ok())
            .unwrap_or(PanelType::Custom);
        let mut overrides = PanelOverrides::for_stage(&stage.id, &stage.name);
        if let Some(payload) = &stage.visual_payload {
            overrides = overrides.with_content(payload.clone());
        }
        self.panels.build_detached(panel_type, overrides)
    }

    fn rejected(&self, error: synapse_types::SynapseError) -> synapse_types::SynapseError {
        tracing::warn!(error = %error, "plan load rejected");
        self.events.emit(PipelineEvent::PlanRejected {
            error: error.to_string(),
        });
        error
    }

    // -- Export ---------------------------------------------------------------

    pub fn export(&self) -> PlanFile {
        self.store.state().export()
    }

    pub fn export_json(&self) -> Result<String> {
        self.export().to_json_pretty()
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        save_plan_file(&self.export(), path).await
    }

    // -- Execution ------------------------------------------------------------

    pub async fn execute_stage(&self, stage_id: &str) -> Result<StageOutcome> {
        self.with_panel_sync(self.executor.execute_stage(stage_id))
            .await
    }

    pub async fn execute_all(&self, options: ExecuteOptions) -> Result<RunReport> {
        self.with_panel_sync(self.executor.execute_all(options)).await
    }

    pub async fn execute_next(&self) -> Result<Option<StageOutcome>> {
        self.with_panel_sync(self.executor.execute_next()).await
    }

    /// Drive `work` while mirroring every store transition onto the panels.
    async fn with_panel_sync<F: Future>(&self, work: F) -> F::Output {
        let mut rx = self.store.subscribe();
        tokio::pin!(work);
        loop {
            tokio::select! {
                out = &mut work => {
                    self.sync_panels();
                    return out;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        let out = work.await;
                        self.sync_panels();
                        return out;
                    }
                    self.sync_panels();
                }
            }
        }
    }

    /// Bring every stage-bound panel in line with its stage.
    pub fn sync_panels(&self) {
        let state = self.store.state();
        for stage in &state.stages {
            for panel in self.panels.panels_for_stage(&stage.id) {
                self.sync_panel(&state, stage, &panel);
            }
        }
    }

    fn sync_panel(&self, state: &PipelineState, stage: &Stage, panel: &Panel) {
        let running = stage.status == StageStatus::Running;
        let mut update = PanelUpdate::new();
        if panel.state.loading != running {
            update = update.loading(running);
        }
        match (stage.status, &stage.error) {
            (StageStatus::Failed, Some(message))
                if panel.state.error_message.as_deref() != Some(message.as_str()) =>
            {
                update = update.error(message.clone());
            }
            (StageStatus::Failed, None) if !panel.state.has_error => {
                update = update.error("stage failed");
            }
            (StageStatus::Failed, _) => {}
            _ if panel.state.has_error => update = update.clear_error(),
            _ => {}
        }
        if update != PanelUpdate::new() {
            if let Err(e) = self.panels.update_panel(&panel.id, update) {
                tracing::debug!(panel = %panel.id, error = %e, "panel sync skipped");
            }
        }

        if stage.status == StageStatus::Completed {
            let content = stage
                .visual_payload
                .clone()
                .or_else(|| state.results.get(&stage.id).cloned().map(Value::Object));
            if let Some(content) = content {
                if content != panel.data.content {
                    if let Err(e) = self.panels.update_panel_data(&panel.id, content, None) {
                        tracing::debug!(panel = %panel.id, error = %e, "panel content sync skipped");
                    }
                }
            }
        }
    }

    // -- Queries and inputs ---------------------------------------------------

    pub fn is_stage_completed(&self, stage_id: &str) -> bool {
        self.store.state().status_of(stage_id) == Some(StageStatus::Completed)
    }

    /// Ids of every stage downstream of `stage_id`, in declaration order.
    pub fn get_dependents(&self, stage_id: &str) -> Vec<String> {
        let state = self.store.state();
        DependencyGraph::build(&state.stages)
            .transitive_dependents(stage_id)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn root_inputs(&self) -> Vec<String> {
        DependencyGraph::build(&self.store.state().stages)
            .root_inputs()
            .to_vec()
    }

    pub fn set_root_input(&self, slot: &str, value: Value) {
        self.store.set_root_input(slot, value);
    }

    // -- Reset ----------------------------------------------------------------

    /// Drop the plan, its history, every panel and the message log.
    pub fn reset(&self) {
        self.store.reset();
        let removed = self.panels.clear();
        self.messages.clear();
        tracing::info!(panels = removed, "pipeline reset");
        self.events.emit(PipelineEvent::PipelineReset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{DryRunDelegate, SlotValues, StageOutput};
    use serde_json::json;
    use synapse_types::{StageKind, SynapseError};

    struct EngineDown;

    #[async_trait::async_trait]
    impl StageDelegate for EngineDown {
        async fn execute(&self, stage: &Stage, _inputs: &SlotValues) -> Result<StageOutput> {
            Err(SynapseError::StageExecution {
                stage: stage.id.clone(),
                message: "engine down".into(),
            })
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(DryRunDelegate), OrchestratorConfig::default())
    }

    fn plan() -> Vec<Stage> {
        vec![
            Stage::new("parse", StageKind::Parse, "parser")
                .with_inputs(["source"])
                .with_outputs(["ast"])
                .with_visual_type("ast-tree"),
            Stage::new("trace", StageKind::Execute, "runtime")
                .with_inputs(["ast"])
                .with_outputs(["trace"])
                .with_visual_type("timeline"),
            Stage::new("explain", StageKind::Explain, "llm").with_inputs(["ast"]),
        ]
    }

    #[test]
    fn load_binds_one_panel_per_stage() {
        let orch = orchestrator();
        orch.load_stages(plan()).unwrap();

        let panels = orch.panels().panels();
        assert_eq!(panels.len(), 3);
        assert_eq!(panels[0].panel_type, PanelType::AstTree);
        assert_eq!(panels[1].panel_type, PanelType::Timeline);
        assert_eq!(panels[2].panel_type, PanelType::Custom);
        assert_eq!(panels[0].stage_id.as_deref(), Some("parse"));
    }

    #[test]
    fn rejected_load_keeps_previous_plan_and_panels() {
        let orch = orchestrator();
        orch.load_stages(plan()).unwrap();
        let panel_ids: Vec<_> = orch.panels().panels().into_iter().map(|p| p.id).collect();

        let cyclic = vec![
            Stage::new("a", StageKind::Custom, "x").with_inputs(["b"]).with_outputs(["a"]),
            Stage::new("b", StageKind::Custom, "x").with_inputs(["a"]).with_outputs(["b"]),
        ];
        assert!(matches!(
            orch.load_stages(cyclic),
            Err(SynapseError::CyclicGraph { .. })
        ));
        assert!(orch.load_text("not json at all").is_err());

        assert_eq!(orch.state().stages.len(), 3);
        let after: Vec<_> = orch.panels().panels().into_iter().map(|p| p.id).collect();
        assert_eq!(after, panel_ids);
    }

    #[test]
    fn load_text_finds_embedded_plan() {
        let orch = orchestrator();
        let text = r#"Here is the plan: {"pipeline": [{"id": "a", "engine": "x"}]} Enjoy."#;
        orch.load_text(text).unwrap();
        assert!(orch.state().has_stage("a"));
    }

    #[test]
    fn dependents_are_transitive() {
        let orch = orchestrator();
        orch.load_stages(plan()).unwrap();
        assert_eq!(orch.get_dependents("parse"), vec!["trace", "explain"]);
        assert!(orch.get_dependents("trace").is_empty());
        assert_eq!(orch.root_inputs(), vec!["source"]);
    }

    #[tokio::test]
    async fn completed_stage_fills_its_panel() {
        let orch = orchestrator();
        orch.load_stages(plan()).unwrap();
        orch.set_root_input("source", json!("print(1)"));

        orch.execute_stage("parse").await.unwrap();
        assert!(orch.is_stage_completed("parse"));

        let panel = &orch.panels().panels_for_stage("parse")[0];
        assert!(!panel.state.loading);
        assert_eq!(panel.data.version, 2);
        assert_eq!(panel.data.content["ast"]["stage"], json!("parse"));
    }

    #[test]
    fn panel_flag_changes_reach_the_store() {
        let orch = orchestrator();
        orch.load_stages(plan()).unwrap();
        let mut snapshots = orch.store().subscribe();
        let panel_id = orch.panels().panels_for_stage("trace")[0].id.clone();

        orch.panels()
            .update_panel(&panel_id, PanelUpdate::new().minimized(true))
            .unwrap();

        assert!(snapshots.has_changed().unwrap());
        let snapshot = snapshots.borrow_and_update().clone();
        assert_eq!(snapshot.action, "set_panel_state");
        let flags = &snapshot.state.panel_states["trace"];
        assert!(flags.minimized);
        assert_eq!(flags, &orch.panels().get(&panel_id).unwrap().state);
    }

    #[tokio::test]
    async fn failed_stage_flags_reach_the_store() {
        let orch = Orchestrator::new(Arc::new(EngineDown), OrchestratorConfig::default());
        orch.load_stages(plan()).unwrap();

        let outcome = orch.execute_stage("parse").await.unwrap();
        assert!(outcome.is_failed());

        let state = orch.state();
        let flags = &state.panel_states["parse"];
        assert!(flags.has_error && !flags.loading);
        assert_eq!(
            flags.error_message,
            orch.panels().panels_for_stage("parse")[0].state.error_message
        );
    }

    #[test]
    fn reset_clears_plan_and_panels() {
        let orch = orchestrator();
        orch.load_stages(plan()).unwrap();
        orch.reset();
        assert!(orch.state().stages.is_empty());
        assert!(orch.panels().is_empty());
    }
}
