//! The stage model: one node of a pipeline plan.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// StageKind
// ---------------------------------------------------------------------------

/// What a stage does. Unrecognised kinds are carried verbatim in
/// [`StageKind::Other`] so newer plans survive a load/export cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageKind {
    Analysis,
    Visualize,
    Transform,
    Execute,
    Explain,
    Simulate,
    Optimize,
    Compile,
    Parse,
    #[default]
    Custom,
    Other(String),
}

impl StageKind {
    pub fn as_str(&self) -> &str {
        match self {
            StageKind::Analysis => "analysis",
            StageKind::Visualize => "visualize",
            StageKind::Transform => "transform",
            StageKind::Execute => "execute",
            StageKind::Explain => "explain",
            StageKind::Simulate => "simulate",
            StageKind::Optimize => "optimize",
            StageKind::Compile => "compile",
            StageKind::Parse => "parse",
            StageKind::Custom => "custom",
            StageKind::Other(s) => s,
        }
    }
}

impl From<String> for StageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "analysis" => StageKind::Analysis,
            "visualize" => StageKind::Visualize,
            "transform" => StageKind::Transform,
            "execute" => StageKind::Execute,
            "explain" => StageKind::Explain,
            "simulate" => StageKind::Simulate,
            "optimize" => StageKind::Optimize,
            "compile" => StageKind::Compile,
            "parse" => StageKind::Parse,
            "custom" => StageKind::Custom,
            _ => StageKind::Other(value),
        }
    }
}

impl From<StageKind> for String {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A named unit of work with declared input/output slots and an opaque engine
/// reference.
///
/// Fields the core does not know about are kept in `extra` and written back
/// unchanged on export. Legacy plans are read through [`RawStage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawStage")]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub kind: StageKind,
    pub engine: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub editable: bool,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire shape accepted for a stage, covering both the current keys and the
/// legacy ones (`stage`, `type`, `payload.visual`, `payload.explain`).
///
/// `name` wins over `stage` and `kind` wins over `type`; a legacy key that
/// loses is kept in `extra` so it is written back on export. Values under
/// `payload` fill `visualPayload` and `explanation` only when those are absent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStage {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    kind: Option<StageKind>,
    #[serde(default, rename = "type")]
    legacy_kind: Option<StageKind>,
    #[serde(default)]
    engine: String,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    outputs: Vec<String>,
    #[serde(default)]
    editable: bool,
    #[serde(default)]
    status: StageStatus,
    #[serde(default)]
    visual_type: Option<String>,
    #[serde(default)]
    visual_payload: Option<Value>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawStage> for Stage {
    fn from(raw: RawStage) -> Self {
        let mut extra = raw.extra;

        let name = match (raw.name, raw.stage) {
            (Some(name), Some(stage)) => {
                extra.insert("stage".into(), Value::String(stage));
                name
            }
            (Some(name), None) => name,
            (None, stage) => stage.unwrap_or_default(),
        };

        let kind = match (raw.kind, raw.legacy_kind) {
            (Some(kind), Some(legacy)) => {
                extra.insert("type".into(), Value::String(legacy.into()));
                kind
            }
            (Some(kind), None) => kind,
            (None, legacy) => legacy.unwrap_or_default(),
        };

        let payload = extra.get("payload").and_then(Value::as_object);
        let visual_payload = raw.visual_payload.or_else(|| {
            payload
                .and_then(|p| p.get("visual"))
                .filter(|v| !v.is_null())
                .cloned()
        });
        let explanation = raw.explanation.or_else(|| {
            payload
                .and_then(|p| p.get("explain"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        Self {
            id: raw.id,
            name,
            kind,
            engine: raw.engine,
            inputs: raw.inputs,
            outputs: raw.outputs,
            editable: raw.editable,
            status: raw.status,
            visual_type: raw.visual_type,
            visual_payload,
            explanation,
            error: raw.error,
            extra,
        }
    }
}

impl Stage {
    pub fn new(id: impl Into<String>, kind: StageKind, engine: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            engine: engine.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            editable: false,
            status: StageStatus::Pending,
            visual_type: None,
            visual_payload: None,
            explanation: None,
            error: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_visual_type(mut self, visual_type: impl Into<String>) -> Self {
        self.visual_type = Some(visual_type.into());
        self
    }

    pub fn consumes(&self, slot: &str) -> bool {
        self.inputs.iter().any(|s| s == slot)
    }

    pub fn produces(&self, slot: &str) -> bool {
        self.outputs.iter().any(|s| s == slot)
    }

    pub fn has_visual_payload(&self) -> bool {
        self.visual_payload.is_some()
    }
}
