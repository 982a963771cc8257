//! Pipeline orchestration: dependency ordering, plan state, stage execution,
//! and the panels bound to stages.
//!
//! The [`Orchestrator`] is the usual entry point. It composes the
//! [`PipelineStore`] (the single writer of plan state), the [`StageExecutor`],
//! the [`PanelManager`] and an [`EventEmitter`] for observers. Inbound agent
//! messages reach the store and panels through the handlers in [`handlers`].

pub mod delegate;
pub mod events;
pub mod executor;
pub mod graph;
pub mod handlers;
pub mod layout;
pub mod orchestrator;
pub mod panel;
pub mod panel_registry;
pub mod plan;
pub mod store;
pub mod validation;

pub use delegate::{AgentDelegate, DryRunDelegate, SlotValues, StageDelegate, StageOutput};
pub use events::{EventEmitter, PipelineEvent};
pub use executor::{ExecuteOptions, ExecutorConfig, RunReport, StageExecutor, StageOutcome};
pub use graph::{find_cycle, resolve_order, resolve_order_ids, DependencyGraph};
pub use handlers::{register_agent_handlers, AgentContext, MessageLog};
pub use layout::{grid_layout, Rect};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use panel::{
    Panel, PanelData, PanelDimensions, PanelManager, PanelManagerConfig, PanelOverrides,
    PanelState, PanelUpdate,
};
pub use panel_registry::{PanelType, PanelTypeConfig, PanelTypeRegistry};
pub use plan::{load_plan_file, save_plan_file, PlanFile};
pub use store::{Action, AgentStatus, PipelineState, PipelineStore, Snapshot, StageUpdate};
pub use validation::{check_plan, validate, validate_or_raise, Diagnostic, LintRule, Severity};
