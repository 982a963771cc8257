//! Panel types and their canonical configuration.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_types::{Result, SynapseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanelType {
    ExecutionTrace,
    AstVisualizer,
    AstTree,
    CfgGraph,
    VariableWatch,
    CallStack,
    AlgorithmSimulation,
    CodeEditor,
    Editor,
    OutputConsole,
    AiAnnotations,
    Timeline,
    Table,
    Graph,
    Chart,
    Flowchart,
    TokenStream,
    Assembly,
    Logs,
    Debugger,
    Coverage,
    Pipeline,
    Explanation,
    Custom,
}

impl PanelType {
    pub const ALL: [PanelType; 24] = [
        PanelType::ExecutionTrace,
        PanelType::AstVisualizer,
        PanelType::AstTree,
        PanelType::CfgGraph,
        PanelType::VariableWatch,
        PanelType::CallStack,
        PanelType::AlgorithmSimulation,
        PanelType::CodeEditor,
        PanelType::Editor,
        PanelType::OutputConsole,
        PanelType::AiAnnotations,
        PanelType::Timeline,
        PanelType::Table,
        PanelType::Graph,
        PanelType::Chart,
        PanelType::Flowchart,
        PanelType::TokenStream,
        PanelType::Assembly,
        PanelType::Logs,
        PanelType::Debugger,
        PanelType::Coverage,
        PanelType::Pipeline,
        PanelType::Explanation,
        PanelType::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PanelType::ExecutionTrace => "execution-trace",
            PanelType::AstVisualizer => "ast-visualizer",
            PanelType::AstTree => "ast-tree",
            PanelType::CfgGraph => "cfg-graph",
            PanelType::VariableWatch => "variable-watch",
            PanelType::CallStack => "call-stack",
            PanelType::AlgorithmSimulation => "algorithm-simulation",
            PanelType::CodeEditor => "code-editor",
            PanelType::Editor => "editor",
            PanelType::OutputConsole => "output-console",
            PanelType::AiAnnotations => "ai-annotations",
            PanelType::Timeline => "timeline",
            PanelType::Table => "table",
            PanelType::Graph => "graph",
            PanelType::Chart => "chart",
            PanelType::Flowchart => "flowchart",
            PanelType::TokenStream => "token-stream",
            PanelType::Assembly => "assembly",
            PanelType::Logs => "logs",
            PanelType::Debugger => "debugger",
            PanelType::Coverage => "coverage",
            PanelType::Pipeline => "pipeline",
            PanelType::Explanation => "explanation",
            PanelType::Custom => "custom",
        }
    }

    /// Guess the panel type best suited to render `content`.
    ///
    /// Strings that parse as JSON are inspected as JSON; other strings that
    /// look like source code go to the code editor.
    pub fn detect(content: &Value) -> PanelType {
        match content {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed) if !parsed.is_string() => PanelType::detect(&parsed),
                _ if ["function", "class", "const", "fn "].iter().any(|k| s.contains(k)) => {
                    PanelType::CodeEditor
                }
                _ => PanelType::Explanation,
            },
            Value::Array(items) => match items.first() {
                Some(first) if has_any(first, &["children", "type"]) => PanelType::AstTree,
                Some(first) if has_any(first, &["timestamp", "duration"]) => PanelType::Timeline,
                Some(first) if has_any(first, &["source", "target"]) => PanelType::Graph,
                _ => PanelType::Explanation,
            },
            Value::Object(_) => {
                if has_all(content, &["nodes", "edges"]) {
                    PanelType::Graph
                } else if has_any(content, &["steps", "timeline"]) {
                    PanelType::Timeline
                } else if has_any(content, &["children", "type"]) {
                    PanelType::AstTree
                } else {
                    PanelType::Explanation
                }
            }
            _ => PanelType::Explanation,
        }
    }
}

fn has_any(value: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|k| value.get(k).is_some_and(|v| !v.is_null()))
}

fn has_all(value: &Value, keys: &[&str]) -> bool {
    keys.iter().all(|k| value.get(k).is_some_and(|v| !v.is_null()))
}

impl fmt::Display for PanelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelType {
    type Err = SynapseError;

    fn from_str(s: &str) -> Result<Self> {
        PanelType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SynapseError::UnknownPanelType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelTypeConfig {
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    /// `{name}` and `{stage}` are substituted when a panel is created.
    pub title_template: String,
    pub show_toolbar: bool,
}

impl PanelTypeConfig {
    pub fn render_title(&self, stage_name: Option<&str>) -> String {
        let title = self
            .title_template
            .replace("{name}", &self.name)
            .replace("{stage}", stage_name.unwrap_or(""));
        let trimmed = title.trim_end_matches([':', ' ', '-']);
        if trimmed.is_empty() {
            self.name.clone()
        } else {
            trimmed.to_string()
        }
    }
}

/// One canonical configuration per panel type.
#[derive(Debug, Clone, Default)]
pub struct PanelTypeRegistry {
    configs: HashMap<PanelType, PanelTypeConfig>,
}

impl PanelTypeRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for (panel_type, name, description, icon, category) in DEFAULTS {
            let template = if STAGE_TITLED.contains(&panel_type) {
                "{name}: {stage}"
            } else {
                "{name}"
            };
            registry.register(
                panel_type,
                PanelTypeConfig {
                    name: name.to_string(),
                    description: description.to_string(),
                    icon: icon.to_string(),
                    category: category.to_string(),
                    title_template: template.to_string(),
                    show_toolbar: panel_type != PanelType::Explanation,
                },
            );
        }
        registry
    }

    /// Register or replace the configuration for `panel_type`.
    pub fn register(&mut self, panel_type: PanelType, config: PanelTypeConfig) {
        self.configs.insert(panel_type, config);
    }

    pub fn get(&self, panel_type: PanelType) -> Result<&PanelTypeConfig> {
        self.configs
            .get(&panel_type)
            .ok_or_else(|| SynapseError::UnknownPanelType(panel_type.to_string()))
    }

    pub fn contains(&self, panel_type: PanelType) -> bool {
        self.configs.contains_key(&panel_type)
    }

    /// Registered types in canonical order.
    pub fn available_types(&self) -> Vec<PanelType> {
        PanelType::ALL
            .into_iter()
            .filter(|t| self.configs.contains_key(t))
            .collect()
    }
}

/// Types whose panels usually show one stage's output.
const STAGE_TITLED: [PanelType; 9] = [
    PanelType::AstTree,
    PanelType::AstVisualizer,
    PanelType::CfgGraph,
    PanelType::Timeline,
    PanelType::Graph,
    PanelType::Flowchart,
    PanelType::Table,
    PanelType::Explanation,
    PanelType::Custom,
];

const DEFAULTS: [(PanelType, &str, &str, &str, &str); 24] = [
    (PanelType::ExecutionTrace, "Execution Trace", "Line-by-line execution tracing with variable values", "▶️", "execution"),
    (PanelType::AstVisualizer, "AST Visualizer", "Abstract syntax tree with interactive nodes", "🌳", "compiler"),
    (PanelType::AstTree, "AST Tree", "Abstract syntax tree", "🌳", "compiler"),
    (PanelType::CfgGraph, "CFG Graph", "Control flow graph for program analysis", "🔄", "compiler"),
    (PanelType::VariableWatch, "Variable Watch", "Variable values and changes during execution", "👁️", "execution"),
    (PanelType::CallStack, "Call Stack", "Function call hierarchy and stack frames", "📚", "execution"),
    (PanelType::AlgorithmSimulation, "Algorithm Simulation", "Step-by-step algorithm visualization", "🎯", "simulation"),
    (PanelType::CodeEditor, "Code Editor", "Code editor with syntax highlighting", "📝", "editor"),
    (PanelType::Editor, "Editor", "Editable stage payload", "✏️", "editor"),
    (PanelType::OutputConsole, "Output Console", "Program output and console messages", "💻", "editor"),
    (PanelType::AiAnnotations, "AI Annotations", "Generated insights and code explanations", "🤖", "ai"),
    (PanelType::Timeline, "Timeline", "Chronological view of events and changes", "⏱️", "visualization"),
    (PanelType::Table, "Table", "Tabular data with sorting and filtering", "📊", "visualization"),
    (PanelType::Graph, "Graph", "Nodes and edges", "🕸️", "visualization"),
    (PanelType::Chart, "Chart", "Charts for data visualization", "📈", "visualization"),
    (PanelType::Flowchart, "Flowchart", "Flowchart and process visualization", "📊", "visualization"),
    (PanelType::TokenStream, "Token Stream", "Lexical token stream", "🔤", "compiler"),
    (PanelType::Assembly, "Assembly", "Assembly code view and analysis", "⚙️", "compiler"),
    (PanelType::Logs, "Logs", "System and application logs", "📋", "monitoring"),
    (PanelType::Debugger, "Debugger", "Interactive debugging interface", "🐛", "development"),
    (PanelType::Coverage, "Coverage", "Code coverage analysis", "📊", "testing"),
    (PanelType::Pipeline, "Pipeline", "Pipeline execution and management", "🔗", "execution"),
    (PanelType::Explanation, "Explanation", "Narrative explanation of a stage", "💡", "ai"),
    (PanelType::Custom, "Custom", "User-defined content", "🔧", "general"),
];
