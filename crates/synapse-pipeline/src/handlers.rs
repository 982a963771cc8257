//! Handlers for inbound agent messages.
//!
//! Each handler records the message in the shared [`MessageLog`] and then
//! applies it: content updates go to the matching panels, annotations to stage
//! explanations, errors to panel error banners, and heartbeats and status
//! reports to the agent entries in the store. `response` messages are left to
//! [`synapse_protocol::ResponseRouter`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use synapse_protocol::{
    AgentAvailability, ErrorSeverity, Message, MessageDispatcher, MessageHandler, MessageType,
    TypedPayload,
};
use synapse_types::{Result, SynapseError};

use crate::panel::{Panel, PanelManager, PanelUpdate};
use crate::panel_registry::PanelType;
use crate::store::PipelineStore;

// ---------------------------------------------------------------------------
// MessageLog
// ---------------------------------------------------------------------------

pub const DEFAULT_MESSAGE_LOG_CAPACITY: usize = 500;

/// The most recent inbound messages, oldest first. Once full, each new
/// message evicts the oldest.
pub struct MessageLog {
    capacity: usize,
    entries: Mutex<VecDeque<Message>>,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, message: &Message) {
        let Ok(mut entries) = self.entries.lock() else {
            tracing::error!("message log lock poisoned; message not recorded");
            return;
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(message.clone());
    }

    pub fn entries(&self) -> Vec<Message> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every entry. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        self.entries
            .lock()
            .map(|mut e| e.drain(..).count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_LOG_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// AgentContext
// ---------------------------------------------------------------------------

/// What the handlers write to.
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<PipelineStore>,
    pub panels: Arc<PanelManager>,
    pub log: Arc<MessageLog>,
}

impl AgentContext {
    /// Panels a message addresses. An explicit panel id wins over a stage id;
    /// without either, every panel of one of `fallback` types is addressed.
    fn target_panels(
        &self,
        panel_id: Option<&str>,
        stage_id: Option<&str>,
        fallback: &[PanelType],
    ) -> Result<Vec<Panel>> {
        if let Some(id) = panel_id {
            return self
                .panels
                .get(id)
                .map(|p| vec![p])
                .ok_or_else(|| SynapseError::PanelNotFound(id.to_string()));
        }
        if let Some(stage_id) = stage_id {
            if !self.store.state().has_stage(stage_id) {
                return Err(SynapseError::StageNotFound(stage_id.to_string()));
            }
            return Ok(self.panels.panels_for_stage(stage_id));
        }
        Ok(self
            .panels
            .panels()
            .into_iter()
            .filter(|p| fallback.contains(&p.panel_type))
            .collect())
    }
}

fn metadata_str<'a>(message: &'a Message, key: &str) -> Option<&'a str> {
    message.metadata.as_ref()?.get(key)?.as_str()
}

/// Register a handler for every inbound message type except `response`.
pub fn register_agent_handlers(dispatcher: &MessageDispatcher, ctx: &AgentContext) {
    for message_type in [
        MessageType::ExecutionTrace,
        MessageType::AstUpdate,
        MessageType::CfgUpdate,
        MessageType::VariableUpdate,
        MessageType::CallStackUpdate,
        MessageType::AlgorithmStep,
        MessageType::VisualizationUpdate,
    ] {
        dispatcher.register(Arc::new(PanelContentHandler::new(message_type, ctx.clone())));
    }
    dispatcher.register(Arc::new(AnnotationHandler(ctx.clone())));
    dispatcher.register(Arc::new(AgentErrorHandler(ctx.clone())));
    dispatcher.register(Arc::new(AgentStatusHandler::new(MessageType::Status, ctx.clone())));
    dispatcher.register(Arc::new(AgentStatusHandler::new(
        MessageType::Heartbeat,
        ctx.clone(),
    )));
    dispatcher.register(Arc::new(InboundCommandHandler(ctx.clone())));
}

// ---------------------------------------------------------------------------
// PanelContentHandler: replaces panel content
// ---------------------------------------------------------------------------

/// Panel types fed by each content message when no panel or stage is named.
fn panel_types_for(message_type: &MessageType) -> &'static [PanelType] {
    match message_type {
        MessageType::ExecutionTrace => &[PanelType::ExecutionTrace],
        MessageType::AstUpdate => &[PanelType::AstVisualizer, PanelType::AstTree],
        MessageType::CfgUpdate => &[PanelType::CfgGraph],
        MessageType::VariableUpdate => &[PanelType::VariableWatch],
        MessageType::CallStackUpdate => &[PanelType::CallStack],
        MessageType::AlgorithmStep => &[PanelType::AlgorithmSimulation],
        MessageType::AiAnnotation => &[PanelType::AiAnnotations],
        _ => &[],
    }
}

pub struct PanelContentHandler {
    message_type: MessageType,
    ctx: AgentContext,
}

impl PanelContentHandler {
    pub fn new(message_type: MessageType, ctx: AgentContext) -> Self {
        Self { message_type, ctx }
    }
}

#[async_trait]
impl MessageHandler for PanelContentHandler {
    fn message_type(&self) -> MessageType {
        self.message_type.clone()
    }

    async fn handle(&self, message: &Message) -> Result<()> {
        self.ctx.log.record(message);

        let (panels, content, content_type) = match message.typed_payload()? {
            TypedPayload::VisualizationUpdate(update) => {
                let panel_id = update
                    .panel_id
                    .as_deref()
                    .or_else(|| metadata_str(message, "panelId"));
                let stage_id = update
                    .stage_id
                    .as_deref()
                    .or_else(|| metadata_str(message, "stageId"));
                if panel_id.is_none() && stage_id.is_none() {
                    return Err(SynapseError::Validation(
                        "visualization-update names neither a panel nor a stage".into(),
                    ));
                }
                let panels = self.ctx.target_panels(panel_id, stage_id, &[])?;
                (panels, update.data, update.content_type)
            }
            _ => {
                let panels = self.ctx.target_panels(
                    metadata_str(message, "panelId"),
                    metadata_str(message, "stageId"),
                    panel_types_for(&message.message_type),
                )?;
                (panels, message.payload.clone(), None)
            }
        };

        if panels.is_empty() {
            tracing::debug!(id = %message.id, message_type = %message.message_type, "no panel to update");
        }
        for panel in panels {
            self.ctx
                .panels
                .update_panel_data(&panel.id, content.clone(), content_type.as_deref())?;
            tracing::debug!(panel = %panel.id, message_type = %message.message_type, "panel content updated");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AnnotationHandler: stage explanations and annotation panels
// ---------------------------------------------------------------------------

pub struct AnnotationHandler(AgentContext);

#[async_trait]
impl MessageHandler for AnnotationHandler {
    fn message_type(&self) -> MessageType {
        MessageType::AiAnnotation
    }

    async fn handle(&self, message: &Message) -> Result<()> {
        let ctx = &self.0;
        ctx.log.record(message);

        let TypedPayload::AiAnnotation(payload) = message.typed_payload()? else {
            return Ok(());
        };
        let annotation = &payload.annotation;
        let text = if annotation.explanation.is_empty() {
            &annotation.description
        } else {
            &annotation.explanation
        };

        let stage_id = metadata_str(message, "stageId").unwrap_or(payload.target_id.as_str());
        if !text.is_empty() && ctx.store.state().has_stage(stage_id) {
            ctx.store.set_explanation(stage_id, text)?;
            tracing::debug!(stage = %stage_id, "explanation set from annotation");
        }

        let panels = ctx.target_panels(
            metadata_str(message, "panelId"),
            None,
            panel_types_for(&MessageType::AiAnnotation),
        )?;
        for panel in panels {
            ctx.panels
                .update_panel_data(&panel.id, message.payload.clone(), None)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AgentErrorHandler: error banners
// ---------------------------------------------------------------------------

pub struct AgentErrorHandler(AgentContext);

#[async_trait]
impl MessageHandler for AgentErrorHandler {
    fn message_type(&self) -> MessageType {
        MessageType::Error
    }

    async fn handle(&self, message: &Message) -> Result<()> {
        let ctx = &self.0;
        ctx.log.record(message);

        let TypedPayload::Error(err) = message.typed_payload()? else {
            return Ok(());
        };
        let text = if err.code.is_empty() {
            err.message.clone()
        } else {
            format!("{}: {}", err.code, err.message)
        };
        match err.severity {
            ErrorSeverity::Critical => {
                tracing::error!(agent = %message.agent, code = %err.code, "{}", err.message)
            }
            _ => tracing::warn!(agent = %message.agent, code = %err.code, "{}", err.message),
        }

        let mut status = ctx.store.agent_status(&message.agent);
        status.last_error = Some(text.clone());
        status.last_seen = Some(message.timestamp.clone());
        ctx.store.set_agent_status(&message.agent, status);

        let panel_id = metadata_str(message, "panelId");
        let stage_id = metadata_str(message, "stageId");
        if panel_id.is_none() && stage_id.is_none() {
            return Ok(());
        }
        for panel in ctx.target_panels(panel_id, stage_id, &[])? {
            ctx.panels
                .update_panel(&panel.id, PanelUpdate::new().error(text.clone()))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AgentStatusHandler: heartbeat and status reports
// ---------------------------------------------------------------------------

pub struct AgentStatusHandler {
    message_type: MessageType,
    ctx: AgentContext,
}

impl AgentStatusHandler {
    pub fn new(message_type: MessageType, ctx: AgentContext) -> Self {
        Self { message_type, ctx }
    }
}

#[async_trait]
impl MessageHandler for AgentStatusHandler {
    fn message_type(&self) -> MessageType {
        self.message_type.clone()
    }

    async fn handle(&self, message: &Message) -> Result<()> {
        self.ctx.log.record(message);

        let mut status = self.ctx.store.agent_status(&message.agent);
        status.last_seen = Some(message.timestamp.clone());
        match message.typed_payload()? {
            TypedPayload::Heartbeat(beat) => {
                status.connected = beat.agent_status != AgentAvailability::Offline;
                status.availability = Some(beat.agent_status);
                status.capabilities = beat.capabilities;
                status.load = Some(beat.load);
                tracing::trace!(agent = %message.agent, availability = ?beat.agent_status, "heartbeat");
            }
            TypedPayload::Status(report) => {
                status.connected = true;
                status.run_status = Some(report.status);
                status.progress = report.progress;
                status.message = (!report.message.is_empty()).then_some(report.message);
                tracing::info!(
                    agent = %message.agent,
                    status = ?report.status,
                    progress = ?report.progress,
                    "agent status"
                );
            }
            _ => return Ok(()),
        }
        self.ctx.store.set_agent_status(&message.agent, status);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InboundCommandHandler
// ---------------------------------------------------------------------------

/// Agents may address commands to the canvas; none are acted on, but they
/// are logged and kept in the message log.
pub struct InboundCommandHandler(AgentContext);

#[async_trait]
impl MessageHandler for InboundCommandHandler {
    fn message_type(&self) -> MessageType {
        MessageType::Command
    }

    async fn handle(&self, message: &Message) -> Result<()> {
        self.0.log.record(message);
        if let TypedPayload::Command(cmd) = message.typed_payload()? {
            tracing::debug!(agent = %message.agent, command = %cmd.command, "inbound command ignored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelOverrides;
    use serde_json::{json, Map, Value};
    use synapse_protocol::{AgentRunStatus, QueueConfig};
    use synapse_types::{Stage, StageKind};

    fn context() -> AgentContext {
        let store = Arc::new(PipelineStore::new());
        store
            .set_plan(vec![
                Stage::new("parse", StageKind::Parse, "parser").with_outputs(["ast"]),
                Stage::new("explain", StageKind::Explain, "llm").with_inputs(["ast"]),
            ])
            .unwrap();
        let panels = Arc::new(PanelManager::default().with_store(store.clone()));
        AgentContext {
            store,
            panels,
            log: Arc::new(MessageLog::new(4)),
        }
    }

    fn dispatcher(ctx: &AgentContext) -> MessageDispatcher {
        let dispatcher = MessageDispatcher::new(QueueConfig::default());
        register_agent_handlers(&dispatcher, ctx);
        dispatcher
    }

    fn message(message_type: MessageType, payload: Value) -> Message {
        Message::new(message_type, "parser", payload)
    }

    fn with_metadata(mut message: Message, key: &str, value: &str) -> Message {
        let mut meta = Map::new();
        meta.insert(key.into(), json!(value));
        message.metadata = Some(meta);
        message
    }

    #[test]
    fn log_keeps_the_newest_entries() {
        let log = MessageLog::new(2);
        for n in 0..3 {
            log.record(&message(MessageType::Status, json!({ "n": n })));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload["n"], 1);
        assert_eq!(log.clear(), 2);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn ast_update_fills_ast_panels_only() {
        let ctx = context();
        let ast = ctx
            .panels
            .create_panel(PanelType::AstTree, PanelOverrides::default())
            .unwrap();
        let cfg = ctx
            .panels
            .create_panel(PanelType::CfgGraph, PanelOverrides::default())
            .unwrap();
        let d = dispatcher(&ctx);

        d.enqueue_message(message(MessageType::AstUpdate, json!({ "nodes": [{ "id": 1 }] })))
            .unwrap();
        let report = d.process_queue().await;
        assert_eq!(report.handled, 1);

        let ast = ctx.panels.get(&ast.id).unwrap();
        assert_eq!(ast.data.version, 2);
        assert_eq!(ast.data.content["nodes"][0]["id"], 1);
        assert_eq!(ctx.panels.get(&cfg.id).unwrap().data.version, 1);
        assert_eq!(ctx.log.len(), 1);
    }

    #[tokio::test]
    async fn visualization_update_targets_stage_panels() {
        let ctx = context();
        let bound = ctx
            .panels
            .create_panel(PanelType::Chart, PanelOverrides::for_stage("parse", "Parse"))
            .unwrap();
        let d = dispatcher(&ctx);

        d.enqueue_message(message(
            MessageType::VisualizationUpdate,
            json!({ "stageId": "parse", "contentType": "chart", "data": { "bars": [3, 1] } }),
        ))
        .unwrap();
        d.enqueue_message(message(MessageType::VisualizationUpdate, json!({ "data": 1 })))
            .unwrap();
        d.enqueue_message(message(
            MessageType::VisualizationUpdate,
            json!({ "stageId": "nope", "data": 1 }),
        ))
        .unwrap();
        let report = d.process_queue().await;
        assert_eq!(report.handled, 1);
        assert_eq!(report.failed, 2);

        let panel = ctx.panels.get(&bound.id).unwrap();
        assert_eq!(panel.data.content_type, "chart");
        assert_eq!(panel.data.content, json!({ "bars": [3, 1] }));
    }

    #[tokio::test]
    async fn annotation_sets_stage_explanation() {
        let ctx = context();
        let d = dispatcher(&ctx);
        d.enqueue_message(message(
            MessageType::AiAnnotation,
            json!({
                "targetId": "explain",
                "targetType": "stage",
                "annotation": { "title": "Why", "explanation": "Walks the AST" }
            }),
        ))
        .unwrap();
        d.process_queue().await;

        let state = ctx.store.state();
        assert_eq!(state.explanations["explain"], "Walks the AST");
    }

    #[tokio::test]
    async fn error_marks_the_stage_panel() {
        let ctx = context();
        let bound = ctx
            .panels
            .create_panel(PanelType::Logs, PanelOverrides::for_stage("parse", "Parse"))
            .unwrap();
        let d = dispatcher(&ctx);

        let err = with_metadata(
            message(
                MessageType::Error,
                json!({ "code": "E42", "message": "grammar missing", "severity": "error" }),
            ),
            "stageId",
            "parse",
        );
        d.enqueue_message(err).unwrap();
        d.process_queue().await;

        let panel = ctx.panels.get(&bound.id).unwrap();
        assert!(panel.state.has_error);
        assert_eq!(panel.state.error_message.as_deref(), Some("E42: grammar missing"));
        assert!(ctx.store.state().panel_states["parse"].has_error);
        assert_eq!(
            ctx.store.agent_status("parser").last_error.as_deref(),
            Some("E42: grammar missing")
        );
    }

    #[tokio::test]
    async fn heartbeat_and_status_track_the_agent() {
        let ctx = context();
        let d = dispatcher(&ctx);

        d.enqueue_message(message(
            MessageType::Heartbeat,
            json!({ "agentStatus": "busy", "capabilities": ["generateAST"], "load": 0.5 }),
        ))
        .unwrap();
        d.enqueue_message(message(
            MessageType::Status,
            json!({ "status": "running", "progress": 40.0, "message": "parsing" }),
        ))
        .unwrap();
        d.process_queue().await;

        let agent = ctx.store.agent_status("parser");
        assert!(agent.connected);
        assert_eq!(agent.availability, Some(AgentAvailability::Busy));
        assert_eq!(agent.run_status, Some(AgentRunStatus::Running));
        assert_eq!(agent.progress, Some(40.0));
        assert_eq!(agent.capabilities, vec!["generateAST"]);

        d.enqueue_message(message(MessageType::Heartbeat, json!({ "agentStatus": "offline" })))
            .unwrap();
        d.process_queue().await;
        assert!(!ctx.store.agent_status("parser").connected);
    }

    #[tokio::test]
    async fn responses_are_not_claimed() {
        let ctx = context();
        let d = dispatcher(&ctx);
        d.enqueue_message(message(
            MessageType::Response,
            json!({ "requestId": "msg_1", "success": true }),
        ))
        .unwrap();
        let report = d.process_queue().await;
        assert_eq!(report.unhandled, 1);
        assert!(ctx.log.is_empty());
    }
}
