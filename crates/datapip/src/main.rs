//! datapip: multi-agent data pipeline runner
//!
//! Usage:
//!   datapip run --task "analyze sales" --source sales.jsonl
//!   datapip plan --task "clean and plot" --requires clean,visualize
//!   datapip check

mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use dp_core::{Config, Registry, Task, ToolManager, WorkflowManager};
use dp_tools::register_default_tools;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, TaskArgs};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let config = match &cli.config {
        Some(path) => Config::from_toml_file(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    let manager = build_manager(config)?;

    match cli.command {
        Commands::Run {
            task,
            source,
            params,
            output,
        } => {
            let task = build_task(task, params.as_deref(), source.as_deref())?;
            run(&manager, task, output.as_deref()).await
        }
        Commands::Plan { task } => {
            let task = build_task(task, None, None)?;
            let plan = manager.plan(&task).context("Planning failed")?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            check(&manager);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Registry, tools, and agents; fails on any binding problem
fn build_manager(config: Config) -> anyhow::Result<WorkflowManager> {
    let registry = Arc::new(Registry::from_config(config).context("Invalid agent configuration")?);

    let mut tools = ToolManager::new();
    register_default_tools(&mut tools);
    registry.configure_tools(&mut tools);
    tracing::info!("Registered {} tools: {:?}", tools.len(), tools.tool_names());

    WorkflowManager::new(registry, Arc::new(tools)).context("Failed to build agents")
}

fn build_task(args: TaskArgs, params: Option<&str>, source: Option<&Path>) -> anyhow::Result<Task> {
    let mut params: Value = match params {
        Some(raw) => serde_json::from_str(raw).context("--params is not valid JSON")?,
        None => Value::Object(Default::default()),
    };
    let Some(object) = params.as_object_mut() else {
        bail!("--params must be a JSON object");
    };
    if let Some(source) = source {
        object.insert("source".to_string(), Value::String(source.display().to_string()));
    }

    let mut task = Task::new(args.task).with_params(params);
    if !args.requires.is_empty() {
        task = task.with_requires(args.requires);
    }
    Ok(task)
}

async fn run(manager: &WorkflowManager, task: Task, output: Option<&Path>) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        })
    };

    let result = manager.run_with_cancel(task, cancel).await;
    ctrl_c.abort();

    let json = serde_json::to_string_pretty(&result)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Run result written to {}", path.display());
        }
        None => println!("{}", json),
    }

    tracing::info!(run_id = %result.run_id, status = %result.status, "Run finished");
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check(manager: &WorkflowManager) {
    let registry = manager.registry();
    println!("coordinator: {}", registry.coordinator_id());
    for agent in registry.agents() {
        let capabilities: Vec<&str> = agent.capabilities.iter().map(String::as_str).collect();
        println!("agent {} ({}): [{}]", agent.id, agent.role, capabilities.join(", "));
    }
    for binding in registry.bindings() {
        println!(
            "capability {} -> tool {} ({:?})",
            binding.name,
            binding.tool,
            registry.tool_concurrency(&binding.tool)
        );
    }
    println!("ok");
}
