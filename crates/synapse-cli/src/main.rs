//! CLI binary for validating, inspecting and running Synapse pipeline plans.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

use synapse_pipeline::{
    AgentDelegate, DryRunDelegate, ExecuteOptions, ExecutorConfig, Orchestrator,
    OrchestratorConfig, PanelType, PanelTypeRegistry, PipelineEvent, PlanFile, Severity,
    StageDelegate,
};
use synapse_protocol::{
    CommandClient, Message, MessageDispatcher, QueueConfig, ResponseRouter, Transport,
};

#[derive(Parser)]
#[command(name = "synapse", version, about = "Visual pipeline orchestration core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint a plan file
    Validate {
        /// Path to the plan JSON file
        plan: PathBuf,
    },

    /// Show stages, slots and bound panel types of a plan
    Info {
        /// Path to the plan JSON file
        plan: PathBuf,
    },

    /// Print the execution order of a plan
    Order {
        /// Path to the plan JSON file
        plan: PathBuf,
    },

    /// Execute a plan
    ///
    /// Without --dry-run, stages are sent to an agent as `executeStage`
    /// commands, one JSON message per line on stdout; responses are read from
    /// stdin. Progress is reported on stderr.
    Run {
        /// Path to the plan JSON file
        plan: PathBuf,

        /// Complete every stage without contacting an agent
        #[arg(long)]
        dry_run: bool,

        /// Keep running independent stages after a failure
        #[arg(long)]
        continue_on_failure: bool,

        /// Fail any stage that runs longer than this
        #[arg(long)]
        stage_timeout_ms: Option<u64>,

        /// Root input values as SLOT=VALUE. VALUE is read as JSON when it
        /// parses, otherwise as a string.
        #[arg(short, long = "input", value_name = "SLOT=VALUE")]
        inputs: Vec<String>,

        /// Write the plan with final stage status to this file
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// List the registered panel types
    Panels,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing. Stdout may carry agent messages, so logs go to stderr.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { plan } => {
            cmd_validate(&plan).await?;
        }
        Commands::Info { plan } => {
            cmd_info(&plan).await?;
        }
        Commands::Order { plan } => {
            cmd_order(&plan).await?;
        }
        Commands::Run {
            plan,
            dry_run,
            continue_on_failure,
            stage_timeout_ms,
            inputs,
            export,
        } => {
            let options = RunOptions {
                dry_run,
                continue_on_failure,
                stage_timeout: stage_timeout_ms.map(Duration::from_millis),
                inputs: parse_inputs(&inputs)?,
                export,
            };
            cmd_run(&plan, options).await?;
        }
        Commands::Panels => cmd_panels(),
    }

    Ok(())
}

async fn load_plan(path: &Path) -> anyhow::Result<PlanFile> {
    Ok(synapse_pipeline::load_plan_file(path).await?)
}

async fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let plan = load_plan(path).await?;
    let diagnostics = synapse_pipeline::validate(&plan.pipeline);

    if diagnostics.is_empty() {
        println!("Plan is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let plan = load_plan(path).await?;
    let graph = synapse_pipeline::DependencyGraph::build(&plan.pipeline);

    println!("Plan: {}", path.display());
    if let Some(version) = &plan.version {
        println!("Version: {version}");
    }
    println!("Stages: {}", plan.pipeline.len());
    if !graph.root_inputs().is_empty() {
        println!("Root inputs: {}", graph.root_inputs().join(", "));
    }

    println!("\nStages:");
    for stage in &plan.pipeline {
        let panel = stage
            .visual_type
            .as_deref()
            .and_then(|v| v.parse::<PanelType>().ok())
            .unwrap_or(PanelType::Custom);
        println!(
            "  {} [{}] kind={} engine={} status={} panel={}",
            stage.id, stage.name, stage.kind, stage.engine, stage.status, panel
        );
        if !stage.inputs.is_empty() {
            println!("      in:  {}", stage.inputs.join(", "));
        }
        if !stage.outputs.is_empty() {
            println!("      out: {}", stage.outputs.join(", "));
        }
        let deps = graph.dependencies_of(&stage.id);
        if !deps.is_empty() {
            println!("      after: {}", deps.join(", "));
        }
    }

    Ok(())
}

async fn cmd_order(path: &Path) -> anyhow::Result<()> {
    let plan = load_plan(path).await?;
    let order = synapse_pipeline::resolve_order(&plan.pipeline)?;
    for (i, stage) in order.iter().enumerate() {
        println!("{:>3}. {} ({})", i + 1, stage.id, stage.engine);
    }
    Ok(())
}

fn cmd_panels() {
    let registry = PanelTypeRegistry::with_defaults();
    for panel_type in registry.available_types() {
        if let Ok(config) = registry.get(panel_type) {
            println!(
                "{:<22} {:<14} {}",
                panel_type.as_str(),
                config.category,
                config.description
            );
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunOptions {
    dry_run: bool,
    continue_on_failure: bool,
    stage_timeout: Option<Duration>,
    inputs: Vec<(String, Value)>,
    export: Option<PathBuf>,
}

fn parse_inputs(raw: &[String]) -> anyhow::Result<Vec<(String, Value)>> {
    raw.iter()
        .map(|item| {
            let (slot, value) = item
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("input '{item}' is not SLOT=VALUE"))?;
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((slot.trim().to_string(), value))
        })
        .collect()
}

async fn cmd_run(path: &Path, options: RunOptions) -> anyhow::Result<()> {
    let mut dispatcher = None;
    let delegate: Arc<dyn StageDelegate> = if options.dry_run {
        eprintln!("(dry run mode -- no agent calls)");
        Arc::new(DryRunDelegate)
    } else {
        let client = CommandClient::new(Arc::new(StdoutTransport::default()));
        let agent_input = Arc::new(MessageDispatcher::new(QueueConfig::default()));
        agent_input.register(Arc::new(ResponseRouter::new(client.clone())));
        dispatcher = Some(agent_input);
        let mut delegate = AgentDelegate::new(client);
        if let Some(timeout) = options.stage_timeout {
            delegate = delegate.with_timeout(timeout);
        }
        Arc::new(delegate)
    };

    let config = OrchestratorConfig {
        executor: ExecutorConfig {
            stage_timeout: options.stage_timeout,
        },
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(delegate, config);
    if let Some(dispatcher) = dispatcher {
        orchestrator.register_message_handlers(&dispatcher);
        spawn_agent_reader(dispatcher);
    }

    let progress = spawn_progress_printer(&orchestrator);
    orchestrator.load_file(path).await?;
    for (slot, value) in options.inputs {
        orchestrator.set_root_input(&slot, value);
    }
    let missing: Vec<String> = orchestrator
        .root_inputs()
        .into_iter()
        .filter(|slot| !orchestrator.state().slots.contains_key(slot))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(slots = ?missing, "root inputs without a value");
    }

    let execute = if options.continue_on_failure {
        ExecuteOptions::continue_past_failures()
    } else {
        ExecuteOptions::default()
    };
    let report = orchestrator.execute_all(execute).await?;
    progress.abort();

    eprintln!("\nPipeline finished in {}ms", report.duration_ms);
    eprintln!("Completed: {:?}", report.completed);
    if !report.skipped.is_empty() {
        eprintln!("Already complete: {:?}", report.skipped);
    }
    for (stage, error) in &report.failed {
        eprintln!("Failed: {stage}: {error}");
    }
    if !report.blocked.is_empty() {
        eprintln!("Blocked: {:?}", report.blocked);
    }

    if let Some(export) = &options.export {
        orchestrator.save(export).await?;
        eprintln!("Plan written to {}", export.display());
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn spawn_progress_printer(orchestrator: &Orchestrator) -> tokio::task::JoinHandle<()> {
    let events = orchestrator.events().stream();
    tokio::spawn(async move {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            match event {
                PipelineEvent::StageStarted { stage_id, engine } => {
                    eprintln!("-> {stage_id} ({engine})");
                }
                PipelineEvent::StageCompleted {
                    stage_id,
                    duration_ms,
                } => eprintln!("   {stage_id} completed in {duration_ms}ms"),
                PipelineEvent::StageFailed {
                    stage_id, error, ..
                } => eprintln!("   {stage_id} FAILED: {error}"),
                PipelineEvent::StageBlocked {
                    stage_id,
                    waiting_on,
                } => eprintln!("   {stage_id} blocked on {}", waiting_on.join(", ")),
                _ => {}
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Agent I/O over stdio
// ---------------------------------------------------------------------------

/// Writes each outbound message as one JSON line on stdout.
struct StdoutTransport {
    out: Mutex<tokio::io::Stdout>,
}

impl Default for StdoutTransport {
    fn default() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, message: &Message) -> synapse_types::Result<()> {
        let mut line = message.to_json()?;
        line.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Feed stdin lines through the dispatcher, which routes responses to the
/// command client and every other agent message to the orchestrator.
fn spawn_agent_reader(dispatcher: Arc<MessageDispatcher>) {

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if dispatcher.enqueue_text(&line).is_ok() {
                        dispatcher.process_queue().await;
                    }
                }
                Ok(None) => {
                    tracing::debug!("agent input closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reading agent input failed");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inputs_parse_as_json_or_string() {
        let parsed = parse_inputs(&[
            "source=print(1)".to_string(),
            "limits={\"depth\": 3}".to_string(),
            "count=4".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed[0], ("source".to_string(), json!("print(1)")));
        assert_eq!(parsed[1].1, json!({"depth": 3}));
        assert_eq!(parsed[2].1, json!(4));
        assert!(parse_inputs(&["no-equals".to_string()]).is_err());
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "synapse",
            "run",
            "plan.json",
            "--dry-run",
            "--continue-on-failure",
            "--stage-timeout-ms",
            "250",
            "-i",
            "source=x",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                dry_run,
                continue_on_failure,
                stage_timeout_ms,
                inputs,
                ..
            } => {
                assert!(dry_run && continue_on_failure);
                assert_eq!(stage_timeout_ms, Some(250));
                assert_eq!(inputs, vec!["source=x"]);
            }
            _ => panic!("expected run"),
        }
    }
}
