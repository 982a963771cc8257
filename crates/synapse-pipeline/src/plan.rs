//! Plan file import/export.
//!
//! A plan file is a JSON object `{ "pipeline": [Stage, ...] }` with optional
//! `metadata` and `version` values carried through untouched.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_types::{Result, Stage, SynapseError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanFile {
    pub pipeline: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PlanFile {
    pub fn new(pipeline: Vec<Stage>) -> Self {
        Self {
            pipeline,
            metadata: None,
            version: None,
        }
    }

    /// Parse untrusted plan text. Every failure is a
    /// [`SynapseError::PlanParse`].
    pub fn parse(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| SynapseError::PlanParse(format!("invalid JSON: {e}")))?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Result<Self> {
        match raw.get("pipeline") {
            Some(Value::Array(_)) => {}
            Some(_) => {
                return Err(SynapseError::PlanParse(
                    "\"pipeline\" must be an array of stages".into(),
                ))
            }
            None => {
                return Err(SynapseError::PlanParse(
                    "expected a JSON object with a \"pipeline\" array".into(),
                ))
            }
        }
        serde_json::from_value(raw).map_err(|e| SynapseError::PlanParse(e.to_string()))
    }

    /// Find a plan embedded in free-form text, such as an assistant reply
    /// that wraps the JSON in prose. Returns the plan and whatever text
    /// follows it.
    pub fn extract_embedded(text: &str) -> Option<(Self, String)> {
        static EMBEDDED: OnceLock<Option<Regex>> = OnceLock::new();
        let re = EMBEDDED
            .get_or_init(|| Regex::new(r#"(?s)\{.*"pipeline".*\}"#).ok())
            .as_ref()?;
        let found = re.find(text)?;
        let plan = Self::parse(found.as_str()).ok()?;
        Some((plan, text[found.end()..].trim().to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub async fn load_plan_file(path: &Path) -> Result<PlanFile> {
    let text = tokio::fs::read_to_string(path).await?;
    let plan = PlanFile::parse(&text)?;
    tracing::debug!(path = %path.display(), stages = plan.pipeline.len(), "plan file loaded");
    Ok(plan)
}

/// Write `plan` to `path`, creating parent directories as needed.
pub async fn save_plan_file(plan: &PlanFile, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, plan.to_json_pretty()?).await?;
    tracing::debug!(path = %path.display(), "plan file saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use synapse_types::StageKind;

    const SAMPLE: &str = r#"{
        "pipeline": [
            { "id": "parse", "name": "Parse", "kind": "parse", "engine": "tool:ast-parser",
              "inputs": ["source"], "outputs": ["ast"], "editable": false, "status": "pending" },
            { "id": "viz", "stage": "Visualize AST", "type": "visualize", "engine": "llm:gpt-4",
              "inputs": ["ast"], "outputs": [], "visualType": "ast-tree", "owner": "team-a" }
        ],
        "metadata": { "title": "AST walkthrough" },
        "version": "1.0"
    }"#;

    #[test]
    fn parses_stages_and_passthrough() {
        let plan = PlanFile::parse(SAMPLE).unwrap();
        assert_eq!(plan.pipeline.len(), 2);
        assert_eq!(plan.pipeline[0].kind, StageKind::Parse);
        assert_eq!(plan.pipeline[1].name, "Visualize AST");
        assert_eq!(plan.pipeline[1].extra.get("owner"), Some(&json!("team-a")));
        assert_eq!(plan.version.as_deref(), Some("1.0"));
        assert_eq!(plan.metadata, Some(json!({ "title": "AST walkthrough" })));
    }

    #[test]
    fn rejects_bad_text() {
        for text in [
            "",
            "{ not json",
            "[]",
            r#"{ "stages": [] }"#,
            r#"{ "pipeline": {} }"#,
            r#"{ "pipeline": [ { "name": "no id" } ] }"#,
        ] {
            let err = PlanFile::parse(text).unwrap_err();
            assert!(matches!(err, SynapseError::PlanParse(_)), "{text:?}: {err:?}");
        }
    }

    #[test]
    fn parses_legacy_stage_carrying_name_and_stage() {
        let plan = PlanFile::parse(
            r#"{ "pipeline": [ { "id": "a", "name": "A", "stage": "Stage A", "type": "analysis",
                "engine": "llm:gpt-4", "inputs": [], "outputs": ["x"], "editable": true,
                "visualType": "markdown",
                "payload": { "explain": "why", "visual": { "text": "hi" } } } ] }"#,
        )
        .unwrap();
        let stage = &plan.pipeline[0];
        assert_eq!(stage.name, "A");
        assert_eq!(stage.kind, StageKind::Analysis);
        assert_eq!(stage.explanation.as_deref(), Some("why"));
        assert_eq!(stage.visual_payload, Some(json!({ "text": "hi" })));

        let back = PlanFile::parse(&plan.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn export_then_import_is_lossless() {
        let plan = PlanFile::parse(SAMPLE).unwrap();
        let back = PlanFile::parse(&plan.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn extracts_plan_from_prose() {
        let text = format!("Here is the plan:\n{SAMPLE}\nRun it step by step.");
        let (plan, rest) = PlanFile::extract_embedded(&text).unwrap();
        assert_eq!(plan.pipeline.len(), 2);
        assert_eq!(rest, "Run it step by step.");

        assert!(PlanFile::extract_embedded("no plan here").is_none());
    }

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans").join("demo.json");

        let plan = PlanFile::parse(SAMPLE).unwrap();
        save_plan_file(&plan, &path).await.unwrap();
        let loaded = load_plan_file(&path).await.unwrap();
        assert_eq!(loaded, plan);

        let missing = load_plan_file(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(missing, SynapseError::Io(_)));
    }
}
