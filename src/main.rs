mod human;
mod llm;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::WeftConfig;
use weft_core::definition::WorkflowDefinition;
use weft_core::instance::InstanceStatus;
use weft_engine::WorkflowEngine;

use crate::human::TerminalHuman;
use crate::llm::OpenAiExecutor;

#[derive(Parser)]
#[command(name = "weft", version, about = "Run workflow graphs of agents, branches, loops and human reviews")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow definition and print the final instance
    Run {
        /// Workflow definition (JSON)
        definition: PathBuf,
        /// Trigger payload as a JSON string
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,
        /// Read the trigger payload from a JSON file
        #[arg(long)]
        payload_file: Option<PathBuf>,
        /// Print every workflow event as a JSON line on stderr
        #[arg(long)]
        events: bool,
    },
    /// Check a workflow definition without running it
    Validate {
        /// Workflow definition (JSON)
        definition: PathBuf,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { definition } => {
            let def = load_definition(&definition)?;
            def.validate()?;
            let triggers: Vec<&str> = def.triggers().map(|n| n.id.as_str()).collect();
            println!(
                "{}: ok ({} nodes, {} edges, triggers: {})",
                def.id,
                def.nodes.len(),
                def.edges.len(),
                triggers.join(", ")
            );
        }
        Commands::Run {
            definition,
            payload,
            payload_file,
            events,
        } => {
            let def = load_definition(&definition)?;
            let payload = read_payload(payload, payload_file)?;
            let status = run_workflow(config, &def, payload, events).await?;
            if status != InstanceStatus::Completed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<WeftConfig> {
    if path.exists() {
        return Ok(WeftConfig::load(path)?);
    }
    let home_config = dirs_home().map(|h| h.join(".weft").join("config.toml"));
    match home_config {
        Some(home) if home.exists() => {
            info!(path = %home.display(), "Loading config from home directory");
            Ok(WeftConfig::load(&home)?)
        }
        _ => Ok(WeftConfig::default()),
    }
}

fn load_definition(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    WorkflowDefinition::load(path).with_context(|| format!("loading {}", path.display()))
}

fn read_payload(inline: Option<String>, file: Option<PathBuf>) -> anyhow::Result<Value> {
    let text = match (inline, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading payload {}", path.display()))?,
        (None, None) => return Ok(Value::Null),
    };
    serde_json::from_str(&text).context("payload is not valid JSON")
}

async fn run_workflow(
    config: WeftConfig,
    definition: &WorkflowDefinition,
    payload: Value,
    print_events: bool,
) -> anyhow::Result<InstanceStatus> {
    let mut builder = WorkflowEngine::builder().human_provider(Arc::new(TerminalHuman));
    if let Some(model) = &config.llm {
        info!(model = %model.model, base_url = %model.base_url, "Using LLM endpoint");
        builder = builder.llm(Arc::new(OpenAiExecutor::new(model.clone())?));
    }
    let engine = builder.config(config).build();

    let printer = print_events.then(|| {
        let mut rx = engine.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => eprintln!("{}", line),
                        Err(e) => warn!(error = %e, "Failed to serialize event"),
                    },
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Event printer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let instance = {
        let execution = engine.execute(definition, payload);
        tokio::pin!(execution);
        tokio::select! {
            instance = &mut execution => instance,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling workflow");
                engine.cancel().await;
                execution.await
            }
        }
    };

    // Dropping the engine closes the event bus so the printer drains and exits.
    drop(engine);
    if let Some(printer) = printer {
        printer.await.ok();
    }

    println!("{}", serde_json::to_string_pretty(&instance)?);
    Ok(instance.status)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
