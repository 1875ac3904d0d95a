mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::PilotConfig;
use pilotcore::{
    EventKind, ExecutionEvent, NodeKind, NodeSpec, RunReport, RunStatus, Value, Variable,
    VariableType, Variables, Workflow,
};
use pilotnodes::services::{
    EchoCompletionService, OpenAiCompletionService, ProcessCodeEvaluator, ReqwestHttpClient,
};
use pilotnodes::Services;
use pilotruntime::{HandlerRegistry, PilotRuntime, RunRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pilot")]
#[command(about = "Workflow engine CLI", long_about = None)]
struct Cli {
    /// Config file (defaults to ./pilot.toml when present)
    #[arg(short, long, global = true, env = "PILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Answer model calls with an offline echo model
        #[arg(long)]
        dry_run: bool,

        /// Override the model endpoint
        #[arg(long, env = "PILOT_MODEL_BASE_URL")]
        base_url: Option<String>,

        /// Override the per-node timeout in seconds
        #[arg(long, env = "PILOT_NODE_TIMEOUT_SECS")]
        node_timeout: Option<u64>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = std::env::current_dir().context("reading working directory")?;
    let mut config = PilotConfig::load(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Commands::Run {
            file,
            input,
            dry_run,
            base_url,
            node_timeout,
        } => {
            if let Some(url) = base_url {
                config.model.base_url = url;
            }
            if let Some(secs) = node_timeout {
                config.runtime.node_timeout_secs = secs;
            }
            run_workflow(&config, &file, input.as_deref(), dry_run).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&config, &file)?;
        }

        Commands::Nodes => {
            list_nodes(&config)?;
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    Workflow::from_json(&json).with_context(|| format!("parsing {}", file.display()))
}

fn parse_input(input: Option<&str>) -> Result<Variables> {
    match input {
        Some(raw) => serde_json::from_str(raw).context("input must be a JSON object"),
        None => Ok(Variables::new()),
    }
}

/// Collaborators for a run; `dry_run` swaps the model for an echo
fn build_services(config: &PilotConfig, dry_run: bool) -> Result<Services> {
    let completion: Arc<dyn pilotcore::services::CompletionService> = if dry_run {
        Arc::new(EchoCompletionService::new())
    } else {
        let mut service = OpenAiCompletionService::new(
            &config.model.base_url,
            Duration::from_secs(config.model.timeout_secs),
        )?
        .with_pricing(config.pricing());
        match std::env::var(&config.model.api_key_env) {
            Ok(key) if !key.is_empty() => service = service.with_api_key(key),
            _ => tracing::warn!(
                "{} is not set; model calls are sent without an API key",
                config.model.api_key_env
            ),
        }
        Arc::new(service)
    };

    let http = ReqwestHttpClient::new(
        Duration::from_secs(config.http.timeout_secs),
        config.retry_policy(),
    )?;

    let mut code = ProcessCodeEvaluator::new(config.code.interpreters.clone());
    if let Some(image) = &config.code.docker_image {
        code = code.with_docker_image(image);
    }

    Ok(Services {
        completion,
        http: Arc::new(http),
        code: Arc::new(code),
    })
}

fn build_registry(config: &PilotConfig, dry_run: bool) -> Result<HandlerRegistry> {
    let services = build_services(config, dry_run)?;
    Ok(pilotnodes::standard_registry(&services))
}

async fn run_workflow(
    config: &PilotConfig,
    file: &Path,
    input: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let workflow = load_workflow(file)?;
    let input = parse_input(input)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    if dry_run {
        println!("   Model: echo (dry run)");
    }
    println!();

    let registry = build_registry(config, dry_run)?;
    let runtime = PilotRuntime::new(Arc::new(registry), config.runtime_config());
    let mut handle = runtime.start(RunRequest::new(workflow, input)).await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                println!("🛑 Interrupted, cancelling after the current node");
                handle.cancel();
            }
        }
    }

    let report = handle.wait().await?;
    print_summary(&report);

    match report.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Cancelled => bail!("run {} was cancelled", report.run_id),
        _ => bail!(
            "run {} failed: {}",
            report.run_id,
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn print_event(event: &ExecutionEvent) {
    let node = event.node_id.as_deref().unwrap_or("-");
    let percent = (event.progress * 100.0).round();
    match event.kind {
        EventKind::WorkflowStarted => println!("▶️  {}", event.message),
        EventKind::NodeStarted => println!("  ⚡ [{}] {}", node, event.message),
        EventKind::NodeCompleted => println!("  ✅ [{}] {} ({}%)", node, event.message, percent),
        EventKind::NodeSkipped => println!("  ⏭️  [{}] {} ({}%)", node, event.message, percent),
        EventKind::NodeFailed => println!("  ❌ [{}] {}", node, event.message),
        EventKind::WorkflowCompleted => println!("✨ {}", event.message),
        EventKind::WorkflowFailed => println!("💥 {}", event.message),
        EventKind::WorkflowCancelled => println!("🛑 {}", event.message),
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", report.run_id);
    println!("   Status: {:?}", report.status);
    println!("   Duration: {}ms", report.duration_ms);
    println!("   Tokens: {}", report.total_tokens_used);
    println!("   Cost: ${:.6}", report.total_cost);
    if let Some(error) = &report.error {
        println!("   Error: {}", error);
    }

    if !report.output.is_empty() {
        println!();
        println!("📤 Output:");
        for (key, value) in &report.output {
            let rendered = match value {
                Value::Object(_) | Value::Array(_) => {
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
                }
                other => other.to_string(),
            };
            println!("   {}: {}", key, rendered);
        }
    }
}

fn validate_workflow(config: &PilotConfig, file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());
    let workflow = load_workflow(file)?;

    let registry = build_registry(config, true)?;
    let mut problems = pilotruntime::validate(&workflow).messages();
    if let Err(e) = registry.ensure_supported(&workflow) {
        problems.push(e.to_string());
    }
    problems.extend(registry.check_configs(&workflow).messages());

    if !problems.is_empty() {
        println!("❌ Workflow is invalid:");
        for problem in &problems {
            println!("   • {}", problem);
        }
        bail!("{} problem(s) found in {}", problems.len(), file.display());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    Ok(())
}

fn list_nodes(config: &PilotConfig) -> Result<()> {
    println!("📦 Available Node Kinds:");
    println!();

    let registry = build_registry(config, true)?;
    for kind in registry.kinds() {
        match registry.metadata(kind) {
            Some(metadata) => {
                println!("  • {} ({})", kind, metadata.category);
                println!("    {}", metadata.description);
                for port in &metadata.outputs {
                    println!("      → {}: {}", port.name, port.description);
                }
            }
            None => println!("  • {}", kind),
        }
    }
    Ok(())
}

fn example_workflow() -> Workflow {
    let mut workflow = Workflow::new("Example Question Workflow")
        .with_variable(
            Variable::input("question", VariableType::String)
                .required()
                .with_default("What is a workflow engine?"),
        )
        .with_variable(Variable::output("answer", VariableType::String));
    workflow.description = Some("Asks a model a question and returns its answer".to_string());

    let start = workflow.add_node(
        NodeSpec::new("start", NodeKind::Start)
            .with_name("Start")
            .with_position(100.0, 100.0),
    );
    let ask = workflow.add_node(
        NodeSpec::new("ask", NodeKind::ModelCall)
            .with_name("Ask Model")
            .with_config("system_prompt", "Answer in one short paragraph.")
            .with_config("prompt", "{{question}}")
            .with_position(300.0, 100.0),
    );
    let answer = workflow.add_node(
        NodeSpec::new("answer", NodeKind::Output)
            .with_name("Answer")
            .with_config(
                "values",
                Value::Object(Variables::from([(
                    "answer".to_string(),
                    Value::from("ask.text"),
                )])),
            )
            .with_position(500.0, 100.0),
    );

    workflow.connect(start, ask.clone());
    workflow.connect(ask, answer);
    workflow
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let workflow = example_workflow();
    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  pilot run --file {} --dry-run --input '{{\"question\": \"Why Rust?\"}}'",
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn input_must_be_an_object() {
        let input = parse_input(Some(r#"{"question": "hi", "n": 2}"#)).unwrap();
        assert_eq!(input["question"], Value::from("hi"));
        assert_eq!(input["n"], Value::from(2i64));

        assert!(parse_input(Some("[1, 2]")).is_err());
        assert!(parse_input(None).unwrap().is_empty());
    }

    #[test]
    fn example_workflow_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workflow.json");
        create_example_workflow(&path).unwrap();

        let workflow = load_workflow(&path).unwrap();
        assert_eq!(workflow.nodes.len(), 3);
        assert!(validate_workflow(&PilotConfig::default(), &path).is_ok());
    }

    #[test]
    fn cyclic_workflow_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cycle.json");
        let mut workflow = example_workflow();
        workflow.connect("answer", "ask");
        std::fs::write(&path, serde_json::to_string(&workflow).unwrap()).unwrap();

        assert!(validate_workflow(&PilotConfig::default(), &path).is_err());
    }

    #[tokio::test]
    async fn dry_run_answers_with_echo_model() {
        let config = PilotConfig::default();
        let registry = build_registry(&config, true).unwrap();
        let runtime = PilotRuntime::new(Arc::new(registry), config.runtime_config());

        let input = Variables::from([("question".to_string(), Value::from("Why Rust?"))]);
        let report = runtime
            .run(RunRequest::new(example_workflow(), input))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        let answer = report.output["answer"].as_str().unwrap();
        assert!(answer.contains("Why Rust?"));
    }
}
