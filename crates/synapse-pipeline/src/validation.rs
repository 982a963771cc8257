//! Plan validation: lint rules and diagnostics.
//!
//! Call [`validate`] for advisory diagnostics, [`validate_or_raise`] to fail
//! on any `Error`-severity issue, or [`check_plan`] for the hard invariants a
//! plan must satisfy before the store accepts it.

use std::collections::HashSet;

use synapse_types::{Result, Stage, SynapseError};

use crate::graph::DependencyGraph;
use crate::panel_registry::PanelType;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub stage_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, stages: &[Stage], graph: &DependencyGraph) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct IdPresentRule;
impl LintRule for IdPresentRule {
    fn name(&self) -> &str {
        "id_present"
    }
    fn apply(&self, stages: &[Stage], _graph: &DependencyGraph) -> Vec<Diagnostic> {
        stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.id.trim().is_empty())
            .map(|(i, _)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Stage at position {i} has an empty id"),
                stage_id: None,
                fix: Some("Give every stage a non-empty id".into()),
            })
            .collect()
    }
}

struct UniqueIdsRule;
impl LintRule for UniqueIdsRule {
    fn name(&self) -> &str {
        "unique_ids"
    }
    fn apply(&self, stages: &[Stage], _graph: &DependencyGraph) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut diags = Vec::new();
        for stage in stages {
            if !seen.insert(stage.id.as_str()) && reported.insert(stage.id.as_str()) {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!("Stage id '{}' is declared more than once", stage.id),
                    stage_id: Some(stage.id.clone()),
                    fix: Some("Rename one of the stages".into()),
                });
            }
        }
        diags
    }
}

struct AcyclicRule;
impl LintRule for AcyclicRule {
    fn name(&self) -> &str {
        "acyclic"
    }
    fn apply(&self, _stages: &[Stage], graph: &DependencyGraph) -> Vec<Diagnostic> {
        match graph.topological_indices() {
            Ok(_) => Vec::new(),
            Err(cycle) => vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Slot dependency cycle: {}", cycle.join(" -> ")),
                stage_id: cycle.first().cloned(),
                fix: Some("Rename an input or output slot to break the cycle".into()),
            }],
        }
    }
}

struct EnginePresentRule;
impl LintRule for EnginePresentRule {
    fn name(&self) -> &str {
        "engine_present"
    }
    fn apply(&self, stages: &[Stage], _graph: &DependencyGraph) -> Vec<Diagnostic> {
        stages
            .iter()
            .filter(|s| s.engine.trim().is_empty())
            .map(|s| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Stage '{}' names no engine", s.id),
                stage_id: Some(s.id.clone()),
                fix: Some("Set the engine that performs this stage".into()),
            })
            .collect()
    }
}

struct SingleProducerRule;
impl LintRule for SingleProducerRule {
    fn name(&self) -> &str {
        "single_producer"
    }
    fn apply(&self, stages: &[Stage], graph: &DependencyGraph) -> Vec<Diagnostic> {
        let mut checked = HashSet::new();
        let mut diags = Vec::new();
        for slot in stages.iter().flat_map(|s| &s.outputs) {
            if !checked.insert(slot.as_str()) {
                continue;
            }
            let producers = graph.producers_of(slot);
            if producers.len() > 1 {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Warning,
                    message: format!(
                        "Slot '{slot}' is produced by {} stages: {}",
                        producers.len(),
                        producers.join(", ")
                    ),
                    stage_id: producers.last().map(|s| s.to_string()),
                    fix: Some("Consumers wait for every producer; give each output a distinct name".into()),
                });
            }
        }
        diags
    }
}

struct LegacyDependenciesRule;
impl LintRule for LegacyDependenciesRule {
    fn name(&self) -> &str {
        "legacy_dependencies"
    }
    fn apply(&self, stages: &[Stage], _graph: &DependencyGraph) -> Vec<Diagnostic> {
        stages
            .iter()
            .filter(|s| s.extra.contains_key("dependencies"))
            .map(|s| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Stage '{}' declares 'dependencies'; ordering comes from input/output slots only",
                    s.id
                ),
                stage_id: Some(s.id.clone()),
                fix: Some("Express the dependency as a shared slot name".into()),
            })
            .collect()
    }
}

struct VisualTypeKnownRule;
impl LintRule for VisualTypeKnownRule {
    fn name(&self) -> &str {
        "visual_type_known"
    }
    fn apply(&self, stages: &[Stage], _graph: &DependencyGraph) -> Vec<Diagnostic> {
        stages
            .iter()
            .filter_map(|s| {
                let visual = s.visual_type.as_deref()?;
                if visual.parse::<PanelType>().is_ok() {
                    return None;
                }
                Some(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Warning,
                    message: format!(
                        "Stage '{}' has unknown visualType '{visual}'; a custom panel is used",
                        s.id
                    ),
                    stage_id: Some(s.id.clone()),
                    fix: None,
                })
            })
            .collect()
    }
}

struct RootInputsRule;
impl LintRule for RootInputsRule {
    fn name(&self) -> &str {
        "root_inputs"
    }
    fn apply(&self, _stages: &[Stage], graph: &DependencyGraph) -> Vec<Diagnostic> {
        if graph.root_inputs().is_empty() {
            return Vec::new();
        }
        vec![Diagnostic {
            rule: self.name().into(),
            severity: Severity::Info,
            message: format!(
                "Root inputs supplied from outside the plan: {}",
                graph.root_inputs().join(", ")
            ),
            stage_id: None,
            fix: None,
        }]
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(stages: &[Stage]) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(IdPresentRule),
        Box::new(UniqueIdsRule),
        Box::new(AcyclicRule),
        Box::new(EnginePresentRule),
        Box::new(SingleProducerRule),
        Box::new(LegacyDependenciesRule),
        Box::new(VisualTypeKnownRule),
        Box::new(RootInputsRule),
    ];

    let graph = DependencyGraph::build(stages);
    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(stages, &graph));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(stages: &[Stage]) -> Result<Vec<Diagnostic>> {
    check_plan(stages)?;
    Ok(validate(stages))
}

/// The invariants a plan must hold before it is accepted: non-empty unique
/// ids and an acyclic slot graph.
pub fn check_plan(stages: &[Stage]) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, stage) in stages.iter().enumerate() {
        if stage.id.trim().is_empty() {
            return Err(SynapseError::Validation(format!(
                "stage at position {i} has an empty id"
            )));
        }
        if !seen.insert(stage.id.as_str()) {
            return Err(SynapseError::Validation(format!(
                "duplicate stage id '{}'",
                stage.id
            )));
        }
    }
    DependencyGraph::build(stages)
        .topological_indices()
        .map(|_| ())
        .map_err(|cycle| SynapseError::CyclicGraph { stages: cycle })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
