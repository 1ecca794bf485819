use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowrun_core::config::AppConfig;
use flowrun_core::graph::WorkflowGraph;
use flowrun_core::types::RunId;
use flowrun_engine::WorkflowEngine;
use flowrun_store::SqliteRecorder;
use flowrun_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "flowrun", version, about = "Run workflow graphs against a trigger payload")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flowrun.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow once and print the run summary
    Run {
        /// Workflow JSON file
        workflow: PathBuf,
        /// Trigger payload as inline JSON
        #[arg(long, conflicts_with = "trigger_file")]
        trigger: Option<String>,
        /// Read the trigger payload from a JSON file
        #[arg(long)]
        trigger_file: Option<PathBuf>,
        /// Workflow id to record the run under (defaults to the graph's id)
        #[arg(long)]
        workflow_id: Option<String>,
        /// User id passed to tools
        #[arg(long, env = "FLOWRUN_USER")]
        user: Option<String>,
    },
    /// Check a workflow for structural problems without running it
    Validate {
        /// Workflow JSON file
        workflow: PathBuf,
    },
    /// List recorded runs, newest first
    Runs {
        /// Only runs of this workflow
        #[arg(long)]
        workflow: Option<String>,
        /// Maximum number of runs to list
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show a run with its steps, step logs and tool executions
    Show {
        run_id: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered tools and whether each is configured
    Tools,
    /// Show the effective configuration with secrets redacted
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowrun=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle commands that need no config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "flowrun", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { workflow } => return validate(workflow),
        _ => {}
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::Tools => {
            let tools = ToolRegistry::with_defaults(&config.tools);
            print_tools(&tools);
        }
        Commands::Run {
            workflow,
            trigger,
            trigger_file,
            workflow_id,
            user,
        } => {
            let graph = WorkflowGraph::load(&workflow)
                .with_context(|| format!("loading workflow {}", workflow.display()))?;
            for problem in graph.validate() {
                warn!(workflow = %workflow.display(), "{}", problem);
            }

            let trigger_data = read_trigger(trigger.as_deref(), trigger_file.as_deref())?;
            let workflow_id = workflow_id.unwrap_or_else(|| default_workflow_id(&graph, &workflow));
            let user = user.unwrap_or_else(|| config.engine.user_id.clone());

            let recorder = Arc::new(open_recorder(&config)?);
            let tools = Arc::new(ToolRegistry::with_defaults(&config.tools));
            let engine = WorkflowEngine::new(tools, recorder);

            match engine.execute(&workflow_id, &user, &graph, trigger_data).await {
                Ok(summary) => {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                Err(e) => {
                    if let Some(run_id) = e.run_id() {
                        eprintln!("Run {} failed. Inspect it with: flowrun show {}", run_id, run_id);
                    }
                    return Err(e.into());
                }
            }
        }
        Commands::Runs { workflow, limit } => {
            let recorder = open_recorder(&config)?;
            let runs = recorder.list_runs(workflow.as_deref(), limit)?;
            if runs.is_empty() {
                println!("No runs recorded yet.");
            }
            for run in runs {
                println!(
                    "{}  {:<10} {:<24} {}",
                    run.id,
                    run.status.as_str(),
                    truncate(&run.workflow_id, 24),
                    run.started_at.to_rfc3339()
                );
            }
        }
        Commands::Show { run_id, json } => {
            let recorder = open_recorder(&config)?;
            show_run(&recorder, &RunId::from_string(run_id), json)?;
        }
        Commands::Validate { .. } | Commands::Completions { .. } => {
            unreachable!("handled before config load")
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    // Check for config in common locations
    if let Some(home_config) = dirs_home().map(|h| h.join(".flowrun").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    info!("No config file found, using environment");
    Ok(AppConfig::from_env())
}

fn open_recorder(config: &AppConfig) -> anyhow::Result<SqliteRecorder> {
    let db_path = config.database_path();
    SqliteRecorder::open(&db_path)
        .with_context(|| format!("opening run database {}", db_path.display()))
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let graph = WorkflowGraph::load(path)
        .with_context(|| format!("loading workflow {}", path.display()))?;
    let problems = graph.validate();
    if problems.is_empty() {
        println!(
            "{}: ok ({} nodes, {} edges)",
            path.display(),
            graph.nodes.len(),
            graph.edges.len()
        );
        return Ok(());
    }
    for problem in &problems {
        println!("  - {}", problem);
    }
    anyhow::bail!("{} problem(s) found in {}", problems.len(), path.display())
}

fn read_trigger(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Value> {
    let raw = match (inline, file) {
        (Some(s), _) => s.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading trigger file {}", path.display()))?,
        (None, None) => return Ok(json!({})),
    };
    serde_json::from_str(&raw).context("trigger payload is not valid JSON")
}

fn default_workflow_id(graph: &WorkflowGraph, path: &Path) -> String {
    if !graph.id.is_empty() {
        return graph.id.clone();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string())
}

fn print_tools(tools: &ToolRegistry) {
    println!("Tools:");
    for name in tools.list() {
        let Some(tool) = tools.get(name) else {
            continue;
        };
        let mode = if tool.is_configured() { "configured" } else { "mock" };
        println!("  {:<22} [{}] {}", name, mode, tool.description());
    }
    println!("\nNode types:");
    for (node_type, tool) in tools.type_mappings() {
        println!("  {:<34} -> {}", node_type, tool);
    }
}

fn show_run(recorder: &SqliteRecorder, run_id: &RunId, as_json: bool) -> anyhow::Result<()> {
    let run = recorder
        .get_run(run_id)?
        .with_context(|| format!("run not found: {}", run_id))?;
    let steps = recorder.steps_for_run(run_id)?;
    let executions = recorder.tool_executions_for_run(run_id)?;

    if as_json {
        let doc = json!({
            "run": run,
            "steps": steps,
            "toolExecutions": executions,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("Run {} ({})", run.id, run.status);
    println!("  workflow: {}", run.workflow_id);
    println!("  started:  {}", run.started_at.to_rfc3339());
    if let Some(finished) = run.finished_at {
        println!("  finished: {}", finished.to_rfc3339());
    }
    if let Some(error) = &run.error {
        println!("  error:    {}", error);
    }

    for step in &steps {
        println!("\n[{}] {} ({})", step.status, step.node_id, step.node_type);
        for line in &step.logs {
            println!("    {}  {}", line.timestamp.format("%H:%M:%S%.3f"), line.message);
        }
        if let Some(error) = &step.error {
            println!("    error: {}", error);
        }
        for exec in executions.iter().filter(|e| e.step_id == step.id) {
            println!("    tool {} -> {}", exec.tool, exec.status);
        }
    }
    Ok(())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
