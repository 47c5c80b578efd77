use anyhow::{bail, Context, Result};
use flowrun::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use flowrun::cli::output::*;
use flowrun::cli::{Cli, Command};
use flowrun::core::{RunStatus, Shell, TriggerEvent, Workflow};
use flowrun::execution::{EngineConfig, ExecutionEngine};
use flowrun::expression::Template;
use flowrun::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
use flowrun::secrets::EnvSecrets;
use std::sync::Arc;
use tracing::{debug, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Logs go to stderr so `--json` output stays parseable
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false);
    let result = if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(builder.with_max_level(log_level).finish())
    };
    result.context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Plan(cmd) => plan_workflow(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = flowrun::persistence::SqliteRunStore::with_default_path().await?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

async fn run_workflow(cmd: &RunCommand) -> Result<()> {
    let mut workflow = Workflow::load(&cmd.file)
        .with_context(|| format!("Failed to load workflow {}", cmd.file.display()))?;

    for (key, value) in &cmd.env {
        workflow.env.insert(key.clone(), Template::literal(value.clone()));
        debug!(key = %key, "workflow env override");
    }

    let event = TriggerEvent {
        event_name: cmd.event.clone(),
        git_ref: cmd.git_ref.clone(),
        sha: cmd.sha.clone(),
        actor: cmd.actor.clone(),
        repository: cmd.repository.clone(),
        inputs: cmd.input.iter().cloned().collect(),
    };

    if !workflow.is_triggered_by(&event) {
        if cmd.force {
            warn!(event = %event.event_name, git_ref = %event.git_ref, "workflow not triggered by event, running anyway");
        } else {
            println!(
                "{} {} is not triggered by {} on {}; nothing to do (use --force to run anyway)",
                INFO,
                style(&workflow.name).bold(),
                style(&event.event_name).cyan(),
                style(&event.git_ref).dim()
            );
            return Ok(());
        }
    }

    let Some(shell) = Shell::parse(&cmd.shell) else {
        bail!("Unknown shell '{}' (expected sh, bash or pwsh)", cmd.shell);
    };
    if cmd.max_parallel == 0 {
        bail!("--max-parallel must be at least 1");
    }

    let mut config = EngineConfig {
        max_parallel: cmd.max_parallel,
        shell,
        ..EngineConfig::default()
    };
    if let Some(timeout) = cmd.timeout_minutes {
        config.default_timeout = timeout;
    }
    if let Some(dir) = &cmd.working_dir {
        config.working_dir = dir.clone();
    }

    let mut engine = ExecutionEngine::new(config)
        .with_secrets(Arc::new(EnvSecrets::new()))
        .with_sink(Arc::new(ConsoleSink));

    if !cmd.json {
        engine.add_event_handler(|event| {
            if let Some(line) = format_execution_event(&event) {
                println!("{}", line);
            }
        });
    }

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_history().await?
    };

    let report = engine
        .run(Arc::new(workflow), event)
        .await
        .context("Failed to plan workflow")?;

    if !cmd.no_history {
        store.save_run(&report).await?;
        debug!(run_id = %report.run_id, "run saved to history");
    }

    if cmd.json {
        println!("{}", report.to_json()?);
    } else {
        println!("\n{}", format_report(&report));
    }

    if report.status != RunStatus::Success {
        std::process::exit(1);
    }

    Ok(())
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    match Workflow::load(&cmd.file) {
        Ok(workflow) => {
            let steps: usize = workflow.jobs.iter().map(|job| job.steps.len()).sum();
            if cmd.json {
                let value = serde_json::json!({
                    "valid": true,
                    "name": workflow.name,
                    "jobs": workflow.jobs.len(),
                    "steps": steps,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{} Workflow is valid!", CHECK);
                println!("  Name: {}", style(&workflow.name).bold());
                println!("  Jobs: {}", style(workflow.jobs.len()).cyan());
                println!("  Steps: {}", style(steps).cyan());
                println!(
                    "  Order: {}",
                    style(workflow.graph.topological_order().join(" -> ")).dim()
                );
            }
            Ok(())
        }
        Err(e) => {
            if cmd.json {
                let value = serde_json::json!({ "valid": false, "error": e.to_string() });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{} Workflow is invalid: {}", CROSS, style(&e).red());
            }
            std::process::exit(1);
        }
    }
}

fn plan_workflow(cmd: &PlanCommand) -> Result<()> {
    let workflow = Workflow::load(&cmd.file)
        .with_context(|| format!("Failed to load workflow {}", cmd.file.display()))?;
    let engine = ExecutionEngine::new(EngineConfig::default());
    let plan = engine.plan(Arc::new(workflow))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&plan_json(&plan))?);
    } else {
        println!("{}", format_plan(&plan));
    }
    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = Uuid::parse_str(run_id).context("Invalid run id")?;
        let Some(report) = store.load_run(run_id).await? else {
            bail!("Run {} not found in history", run_id);
        };
        if cmd.json {
            println!("{}", report.to_json()?);
        } else {
            println!("{}", format_report(&report));
        }
        return Ok(());
    }

    let runs: Vec<RunSummary> = store.list_runs(cmd.workflow.as_deref(), cmd.limit).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs recorded yet", INFO);
        return Ok(());
    }

    match &cmd.workflow {
        Some(name) => println!("{} Recent runs of {}:", INFO, style(name).bold()),
        None => println!("{} Recent runs:", INFO),
    }
    println!();
    for summary in &runs {
        println!("{}", format_run_summary(summary));
    }

    Ok(())
}
