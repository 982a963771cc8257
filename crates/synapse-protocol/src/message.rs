//! Message envelope and well-formedness rules.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use synapse_types::{Result, SynapseError};

use crate::payload::TypedPayload;

/// Sender identity used for messages originating from the canvas core.
pub const CANVAS_AGENT: &str = "canvas";

/// Protocol version stamped on outbound messages. Logged, never branched on.
pub const PROTOCOL_VERSION: &str = "1.0";

const REQUIRED_STRING_FIELDS: [&str; 5] = ["id", "agent", "version", "timestamp", "type"];

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The `type` tag of a message. Tags outside the known vocabulary are kept as
/// [`MessageType::Other`] so they can be logged and dropped after dequeue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    ExecutionTrace,
    AstUpdate,
    CfgUpdate,
    VariableUpdate,
    CallStackUpdate,
    AlgorithmStep,
    VisualizationUpdate,
    AiAnnotation,
    Error,
    Status,
    Command,
    Response,
    Heartbeat,
    Other(String),
}

impl MessageType {
    pub fn known() -> [MessageType; 13] {
        [
            MessageType::ExecutionTrace,
            MessageType::AstUpdate,
            MessageType::CfgUpdate,
            MessageType::VariableUpdate,
            MessageType::CallStackUpdate,
            MessageType::AlgorithmStep,
            MessageType::VisualizationUpdate,
            MessageType::AiAnnotation,
            MessageType::Error,
            MessageType::Status,
            MessageType::Command,
            MessageType::Response,
            MessageType::Heartbeat,
        ]
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::ExecutionTrace => "execution-trace",
            MessageType::AstUpdate => "ast-update",
            MessageType::CfgUpdate => "cfg-update",
            MessageType::VariableUpdate => "variable-update",
            MessageType::CallStackUpdate => "call-stack-update",
            MessageType::AlgorithmStep => "algorithm-step",
            MessageType::VisualizationUpdate => "visualization-update",
            MessageType::AiAnnotation => "ai-annotation",
            MessageType::Error => "error",
            MessageType::Status => "status",
            MessageType::Command => "command",
            MessageType::Response => "response",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Other(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, MessageType::Other(_))
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        MessageType::known()
            .into_iter()
            .find(|t| t.as_str() == value)
            .unwrap_or(MessageType::Other(value))
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        MessageType::from(value.to_string())
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub agent: String,
    pub version: String,
    /// ISO-8601 timestamp as sent on the wire.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Message {
    /// Build an outbound message with a generated id and the current time.
    pub fn new(message_type: MessageType, agent: impl Into<String>, payload: Value) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            agent: agent.into(),
            version: PROTOCOL_VERSION.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            message_type,
            payload,
            metadata: None,
        }
    }

    /// Check a raw JSON value against the well-formedness rules: `id`,
    /// `agent`, `version`, `timestamp` and `type` must be non-empty strings
    /// and `payload` must be present and non-null.
    pub fn validate(raw: &Value) -> Result<()> {
        let obj = raw
            .as_object()
            .ok_or_else(|| SynapseError::MalformedMessage("message is not a JSON object".into()))?;

        for field in REQUIRED_STRING_FIELDS {
            match obj.get(field) {
                None | Some(Value::Null) => {
                    return Err(SynapseError::MalformedMessage(format!(
                        "missing field '{field}'"
                    )))
                }
                Some(Value::String(s)) if s.is_empty() => {
                    return Err(SynapseError::MalformedMessage(format!(
                        "field '{field}' is empty"
                    )))
                }
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(SynapseError::MalformedMessage(format!(
                        "field '{field}' must be a string"
                    )))
                }
            }
        }

        match obj.get("payload") {
            None | Some(Value::Null) => {
                return Err(SynapseError::MalformedMessage("missing field 'payload'".into()))
            }
            Some(_) => {}
        }

        match obj.get("metadata") {
            None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(SynapseError::MalformedMessage(
                "field 'metadata' must be an object".into(),
            )),
        }
    }

    /// Validate and convert a raw JSON value.
    pub fn from_value(raw: Value) -> Result<Self> {
        Self::validate(&raw)?;
        serde_json::from_value(raw).map_err(|e| SynapseError::MalformedMessage(e.to_string()))
    }

    /// Parse and validate a message from its JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| SynapseError::MalformedMessage(format!("invalid JSON: {e}")))?;
        Self::from_value(raw)
    }

    /// Re-check an already typed message (fields may have been emptied after
    /// construction).
    pub fn check(&self) -> Result<()> {
        let raw = serde_json::to_value(self)?;
        Self::validate(&raw)
    }

    pub fn parsed_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&chrono::Utc))
    }

    /// Decode the payload into the shape fixed by this message's type.
    pub fn typed_payload(&self) -> Result<TypedPayload> {
        TypedPayload::decode(&self.message_type, &self.payload)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_heartbeat() -> Value {
        json!({
            "id": "msg_1",
            "agent": "execution-engine",
            "version": "1.2.0",
            "timestamp": "2024-05-01T10:00:00Z",
            "type": "heartbeat",
            "payload": { "agentStatus": "online", "capabilities": [], "load": 0.1, "memory": 0.2, "uptime": 30 }
        })
    }

    #[test]
    fn well_formed_message_parses() {
        let msg = Message::from_value(raw_heartbeat()).unwrap();
        assert_eq!(msg.message_type, MessageType::Heartbeat);
        assert_eq!(msg.agent, "execution-engine");
        assert!(msg.parsed_timestamp().is_some());
        assert!(msg.metadata.is_none());
    }

    #[test]
    fn missing_payload_is_rejected() {
        let mut raw = raw_heartbeat();
        raw.as_object_mut().unwrap().remove("payload");
        let err = Message::from_value(raw).unwrap_err();
        assert!(matches!(err, SynapseError::MalformedMessage(ref m) if m.contains("payload")));
    }

    #[test]
    fn null_payload_is_rejected() {
        let mut raw = raw_heartbeat();
        raw["payload"] = Value::Null;
        assert!(Message::validate(&raw).is_err());
    }

    #[test]
    fn each_required_field_is_checked() {
        for field in REQUIRED_STRING_FIELDS {
            let mut raw = raw_heartbeat();
            raw.as_object_mut().unwrap().remove(field);
            let err = Message::validate(&raw).unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn empty_and_non_string_fields_are_rejected() {
        let mut raw = raw_heartbeat();
        raw["agent"] = json!("");
        assert!(Message::validate(&raw).is_err());

        let mut raw = raw_heartbeat();
        raw["id"] = json!(42);
        assert!(Message::validate(&raw).is_err());

        let mut raw = raw_heartbeat();
        raw["metadata"] = json!("nope");
        assert!(Message::validate(&raw).is_err());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(Message::validate(&json!([1, 2])).is_err());
        assert!(Message::parse("not json").is_err());
    }

    #[test]
    fn unknown_type_is_well_formed() {
        let mut raw = raw_heartbeat();
        raw["type"] = json!("telemetry");
        let msg = Message::from_value(raw).unwrap();
        assert_eq!(msg.message_type, MessageType::Other("telemetry".into()));
        assert!(!msg.message_type.is_known());
    }

    #[test]
    fn message_type_strings_round_trip() {
        for t in MessageType::known() {
            let s: String = t.clone().into();
            assert_eq!(MessageType::from(s), t);
        }
        assert_eq!(MessageType::from("call-stack-update"), MessageType::CallStackUpdate);
    }

    #[test]
    fn new_message_is_well_formed() {
        let msg = Message::new(MessageType::Status, CANVAS_AGENT, json!({ "status": "idle" }));
        assert!(msg.id.starts_with("msg_"));
        assert_eq!(msg.version, PROTOCOL_VERSION);
        msg.check().unwrap();

        let text = msg.to_json().unwrap();
        assert!(text.contains("\"type\":\"status\""));
        assert_eq!(Message::parse(&text).unwrap(), msg);
    }
}
