//! Payload shapes, one per message type.
//!
//! Decoding is lenient about missing fields (they take their defaults) but a
//! payload whose present fields have the wrong shape is malformed. Payloads of
//! unknown message types stay opaque.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_types::{Result, SynapseError};

use crate::message::MessageType;

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableState {
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub var_type: String,
    pub scope: String,
    pub line_number: u32,
    pub is_modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallStackEntry {
    pub function_name: String,
    pub line_number: u32,
    pub file_name: String,
    pub variables: Vec<VariableState>,
    pub depth: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionTracePayload {
    pub line_number: u32,
    pub function_name: String,
    pub variables: Vec<VariableState>,
    pub call_stack: Vec<CallStackEntry>,
    pub execution_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableUpdatePayload {
    pub variables: Vec<VariableState>,
    pub execution_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallStackUpdatePayload {
    pub frames: Vec<CallStackEntry>,
    pub execution_id: String,
}

// ---------------------------------------------------------------------------
// Graph-shaped updates (node/edge bodies are renderer data)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AstUpdatePayload {
    pub nodes: Vec<Value>,
    pub edges: Vec<Value>,
    pub highlights: Vec<Value>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CfgUpdatePayload {
    pub nodes: Vec<Value>,
    pub edges: Vec<Value>,
    pub entry_point: String,
    pub exit_points: Vec<String>,
    pub current_block: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlgorithmStepPayload {
    pub step_number: u32,
    pub step_name: String,
    pub description: String,
    pub data: Value,
    pub visualization: Value,
    pub annotations: Vec<AiAnnotation>,
    pub execution_id: String,
}

/// Fresh renderer content for a panel, addressed by panel id or by the stage
/// the panel is bound to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualizationUpdatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub data: Value,
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiAnnotation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub explanation: String,
    pub suggestions: Vec<String>,
    pub confidence: f64,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiAnnotationPayload {
    pub target_id: String,
    pub target_type: String,
    pub annotation: AiAnnotation,
    pub priority: String,
    pub category: String,
    pub tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Agent lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    #[default]
    Error,
    Critical,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusPayload {
    pub status: AgentRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAvailability {
    #[default]
    Online,
    Offline,
    Busy,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatPayload {
    pub agent_status: AgentAvailability,
    pub capabilities: Vec<String>,
    pub load: f64,
    pub memory: f64,
    pub uptime: f64,
}

// ---------------------------------------------------------------------------
// Command / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandPayload {
    pub command: String,
    pub parameters: Value,
    pub target: String,
    pub response_required: bool,
    /// Milliseconds the sender will wait for a response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponsePayload {
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// TypedPayload
// ---------------------------------------------------------------------------

/// A payload decoded according to its message type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedPayload {
    ExecutionTrace(ExecutionTracePayload),
    AstUpdate(AstUpdatePayload),
    CfgUpdate(CfgUpdatePayload),
    VariableUpdate(VariableUpdatePayload),
    CallStackUpdate(CallStackUpdatePayload),
    AlgorithmStep(AlgorithmStepPayload),
    VisualizationUpdate(VisualizationUpdatePayload),
    AiAnnotation(AiAnnotationPayload),
    Error(ErrorPayload),
    Status(StatusPayload),
    Command(CommandPayload),
    Response(ResponsePayload),
    Heartbeat(HeartbeatPayload),
    Opaque(Value),
}

fn decode<T: serde::de::DeserializeOwned>(message_type: &MessageType, payload: &Value) -> Result<T> {
    T::deserialize(payload).map_err(|e| {
        SynapseError::MalformedMessage(format!("invalid '{message_type}' payload: {e}"))
    })
}

impl TypedPayload {
    pub fn decode(message_type: &MessageType, payload: &Value) -> Result<Self> {
        let t = message_type;
        Ok(match t {
            MessageType::ExecutionTrace => TypedPayload::ExecutionTrace(decode(t, payload)?),
            MessageType::AstUpdate => TypedPayload::AstUpdate(decode(t, payload)?),
            MessageType::CfgUpdate => TypedPayload::CfgUpdate(decode(t, payload)?),
            MessageType::VariableUpdate => TypedPayload::VariableUpdate(decode(t, payload)?),
            MessageType::CallStackUpdate => TypedPayload::CallStackUpdate(decode(t, payload)?),
            MessageType::AlgorithmStep => TypedPayload::AlgorithmStep(decode(t, payload)?),
            MessageType::VisualizationUpdate => {
                TypedPayload::VisualizationUpdate(decode(t, payload)?)
            }
            MessageType::AiAnnotation => TypedPayload::AiAnnotation(decode(t, payload)?),
            MessageType::Error => TypedPayload::Error(decode(t, payload)?),
            MessageType::Status => TypedPayload::Status(decode(t, payload)?),
            MessageType::Command => TypedPayload::Command(decode(t, payload)?),
            MessageType::Response => TypedPayload::Response(decode(t, payload)?),
            MessageType::Heartbeat => TypedPayload::Heartbeat(decode(t, payload)?),
            MessageType::Other(_) => TypedPayload::Opaque(payload.clone()),
        })
    }
}
