//! The boundary between the executor and whatever performs a stage's work.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use synapse_protocol::{CommandClient, CommandOptions};
use synapse_types::{Result, Stage, SynapseError};

/// Input slot values handed to a delegate, keyed by slot name.
pub type SlotValues = Map<String, Value>;

/// What a delegate produced for one stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    /// Keys matching the stage's declared output slots fill those slots.
    /// Other keys are kept with the stage result only.
    pub outputs: Map<String, Value>,
    pub explanation: Option<String>,
    pub visual_payload: Option<Value>,
}

impl StageOutput {
    pub fn new(outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, slot: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(slot.into(), value);
        self
    }

    pub fn with_explanation(mut self, text: impl Into<String>) -> Self {
        self.explanation = Some(text.into());
        self
    }

    pub fn with_visual_payload(mut self, payload: Value) -> Self {
        self.visual_payload = Some(payload);
        self
    }

    /// Read a delegate result object. `explanation` and `visualPayload` keys
    /// are lifted out; everything else is an output.
    pub fn from_value(stage_id: &str, value: Value) -> Result<Self> {
        let mut outputs = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(SynapseError::StageExecution {
                    stage: stage_id.to_string(),
                    message: format!("delegate result must be an object, got {other}"),
                })
            }
        };
        let explanation = match outputs.remove("explanation") {
            Some(Value::String(text)) => Some(text),
            Some(other) => Some(other.to_string()),
            None => None,
        };
        let visual_payload = outputs.remove("visualPayload");
        Ok(Self {
            outputs,
            explanation,
            visual_payload,
        })
    }
}

/// Performs the work of a stage. Implementations receive the stage as it was
/// when the run started and the values of its input slots that are known.
#[async_trait]
pub trait StageDelegate: Send + Sync {
    async fn execute(&self, stage: &Stage, inputs: &SlotValues) -> Result<StageOutput>;
}

// ---------------------------------------------------------------------------
// DryRunDelegate
// ---------------------------------------------------------------------------

/// Completes every stage without doing any work. Each declared output slot
/// receives a record of the stage and the inputs it saw.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunDelegate;

#[async_trait]
impl StageDelegate for DryRunDelegate {
    async fn execute(&self, stage: &Stage, inputs: &SlotValues) -> Result<StageOutput> {
        let echo = json!({
            "stage": stage.id,
            "engine": stage.engine,
            "inputs": inputs,
        });
        let outputs = stage
            .outputs
            .iter()
            .map(|slot| (slot.clone(), echo.clone()))
            .collect();
        Ok(StageOutput::new(outputs)
            .with_explanation(format!("Dry run of '{}' via {}", stage.name, stage.engine)))
    }
}

// ---------------------------------------------------------------------------
// AgentDelegate
// ---------------------------------------------------------------------------

pub const EXECUTE_STAGE_COMMAND: &str = "executeStage";

/// Forwards each stage to the external agent as an `executeStage` command
/// addressed to the stage's engine, and reads the response data as the stage
/// result.
#[derive(Clone)]
pub struct AgentDelegate {
    client: CommandClient,
    timeout: Duration,
}

impl AgentDelegate {
    pub fn new(client: CommandClient) -> Self {
        Self {
            client,
            timeout: CommandOptions::default().timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StageDelegate for AgentDelegate {
    async fn execute(&self, stage: &Stage, inputs: &SlotValues) -> Result<StageOutput> {
        if stage.engine.trim().is_empty() {
            return Err(SynapseError::StageExecution {
                stage: stage.id.clone(),
                message: "stage names no engine".into(),
            });
        }
        let parameters = json!({
            "stageId": stage.id,
            "name": stage.name,
            "kind": stage.kind.as_str(),
            "inputs": inputs,
            "outputs": stage.outputs,
            "visualPayload": stage.visual_payload,
        });
        let response = self
            .client
            .send_command(
                &stage.engine,
                EXECUTE_STAGE_COMMAND,
                parameters,
                CommandOptions::default().with_timeout(self.timeout),
            )
            .await?;
        let data = response.and_then(|r| r.data).unwrap_or(Value::Null);
        StageOutput::from_value(&stage.id, data)
    }
}
