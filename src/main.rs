use anyhow::{Context, Result};
use gantry::cli::commands::{ExpandCommand, HistoryCommand, RunCommand, ValidateCommand};
use gantry::cli::output::*;
use gantry::cli::{Cli, Command};
use gantry::core::config::PipelineConfig;
use gantry::core::{PipelineDefinition, StepOutcome};
use gantry::execution::{EngineConfig, ExecutionEngine, ExecutionEvent, RunReport};
use gantry::persistence::{create_summary, PersistenceBackend, RunSummary};
use gantry::{LocalArtifactStore, LocalCacheStore, ShellRunner};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipelines(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Expand(cmd) => expand_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_definition(path: &std::path::Path, vars: &[(String, String)]) -> Result<PipelineDefinition> {
    let config = PipelineConfig::from_file(path).context("Failed to load pipeline config")?;
    let mut definition = config
        .to_definition()
        .with_context(|| format!("Invalid pipeline {}", path.display()))?;
    for (key, value) in vars {
        definition.variables.insert(key.clone(), value.clone());
    }
    Ok(definition)
}

async fn run_pipelines(cmd: &RunCommand) -> Result<()> {
    let mut definitions = Vec::new();
    for path in &cmd.file {
        let definition = load_definition(path, &cmd.var)?;
        if !cmd.json {
            println!("{} Loaded pipeline: {}", INFO, style(&definition.name).bold());
        }
        definitions.push(definition);
    }

    let mut config = EngineConfig::default().with_strategy(cmd.scheduling_strategy());
    if let Some(workspace) = &cmd.workspace {
        config = config.with_workspace(workspace.clone());
    }
    for (key, value) in &cmd.event {
        config = config.with_invocation(key.clone(), value.clone());
    }

    let cache_root = cmd.cache_dir.clone().unwrap_or_else(LocalCacheStore::default_root);
    let artifact_root = cmd.artifact_dir.clone().unwrap_or_else(LocalArtifactStore::default_root);

    let total: usize = definitions
        .iter()
        .map(|d| d.expand(&config.invocation).map(|instances| instances.len()))
        .sum::<Result<usize, _>>()?;
    let progress = (!cmd.json).then(|| create_progress_bar(total));

    let mut engine = ExecutionEngine::new(ShellRunner::default(), config)
        .with_cache_store(Arc::new(LocalCacheStore::new(cache_root)))
        .with_artifact_store(Arc::new(LocalArtifactStore::new(artifact_root)));
    if let Some(progress) = progress.clone() {
        engine = engine.with_event_handler(move |event| {
            if let Some(line) = format_execution_event(&event) {
                progress.println(line);
            }
            if matches!(event, ExecutionEvent::JobFinished { .. } | ExecutionEvent::JobSkipped { .. }) {
                progress.inc(1);
            }
        });
    }

    let report = engine.run(&definitions).await?;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    if !cmd.no_history {
        save_history(&report, cmd.json).await;
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_failed_output(&report);
        println!("\n{}", format_run_report(&report));
    }

    std::process::exit(report.exit_code());
}

#[cfg(feature = "sqlite")]
async fn save_history(report: &RunReport, quiet: bool) {
    let summary = create_summary(report);
    let saved = match gantry::persistence::SqliteRunStore::with_default_path().await {
        Ok(store) => store.save_run(&summary).await,
        Err(e) => Err(e),
    };
    match saved {
        Ok(()) if !quiet => println!(
            "{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        ),
        Ok(()) => {}
        Err(e) => error!("Failed to save run history: {:#}", e),
    }
}

#[cfg(not(feature = "sqlite"))]
async fn save_history(report: &RunReport, _quiet: bool) {
    let summary = create_summary(report);
    tracing::debug!("History disabled in this build; run {} not saved", summary.run_id);
}

fn print_failed_output(report: &RunReport) {
    for instance in &report.instances {
        for record in &instance.steps {
            if !matches!(record.outcome, StepOutcome::Failed { .. }) {
                continue;
            }
            let output = if record.stderr.trim().is_empty() {
                &record.stdout
            } else {
                &record.stderr
            };
            if output.trim().is_empty() {
                continue;
            }
            println!(
                "\n{} Output of {} / {}:",
                CROSS,
                style(&instance.id).bold(),
                style(&record.name).red()
            );
            println!("{}", format_output(output, 20));
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let loaded = PipelineConfig::from_file(&cmd.file).and_then(|config| config.to_definition());

    match loaded {
        Ok(definition) => {
            let warnings = definition.condition_warnings();
            if cmd.json {
                let data = serde_json::json!({
                    "valid": true,
                    "name": definition.name,
                    "jobs": definition.jobs.iter().map(|j| j.id.clone()).collect::<Vec<_>>(),
                    "warnings": warnings,
                });
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&definition.name).bold());
            println!("  Jobs: {}", style(definition.jobs.len()).cyan());
            println!("  Variables: {}", style(definition.variables.len()).cyan());
            for warning in &warnings {
                println!("{} {}", WARN, style(warning).yellow());
            }
            Ok(())
        }
        Err(e) => {
            if cmd.json {
                let data = serde_json::json!({ "valid": false, "error": format!("{:#}", e) });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Validation failed:", CROSS);
                println!("  {}", style(format!("{:#}", e)).red());
            }
            std::process::exit(1);
        }
    }
}

fn expand_pipeline(cmd: &ExpandCommand) -> Result<()> {
    let definition = load_definition(&cmd.file, &[])?;
    let invocation: HashMap<String, String> = cmd.event.iter().cloned().collect();
    let instances = definition.expand(&invocation)?;

    println!("{} {}", INFO, style(&definition.name).bold());
    for job in &definition.jobs {
        let of_job: Vec<_> = instances.iter().filter(|i| i.job_id == job.id).collect();
        println!("  {} ({} instances)", style(&job.id).bold(), of_job.len());
        for instance in of_job {
            let values: Vec<String> = instance
                .context
                .matrix
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!(
                "    {} {}",
                style(&instance.id).cyan(),
                style(values.join(" ")).dim()
            );
        }
    }
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(gantry::persistence::SqliteRunStore::with_default_path().await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(gantry::persistence::InMemoryPersistence::new()))
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_history().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = store.list_runs(cmd.pipeline.as_deref(), cmd.limit).await?;
    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipelines: {}", style(summary.pipelines.join(", ")).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!("  Instances:");
    for instance in &summary.instances {
        println!(
            "    {:<40} {} {}",
            format!("{}/{}", instance.pipeline, instance.id),
            format_job_status(instance.status),
            style(instance.failure.clone().unwrap_or_default()).dim()
        );
    }

    Ok(())
}
