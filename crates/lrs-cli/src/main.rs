mod args;

use anyhow::{Context, Result};
use args::Cli;
use chrono::Local;
use clap::Parser;
use lrs_clearml::{ClearMlClient, ClearMlConfig, ClearMlReporter};
use lrs_optimizer::{
    run_sweep, run_sweep_with_runner, MetricsReporter, RunnerConfig, SandboxBackend,
    SandboxConfig, ShutdownSignal, SweepOutcome, TracingReporter,
};
use lrs_types::{config_error, JobId, SweepConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lr_sweep=info,lrs_optimizer=info,lrs_clearml=info"));

    // stdout carries the outcome JSON
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.sweep_config()?;

    let (trigger, shutdown) = ShutdownSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling sweep");
            trigger.cancel();
        }
    });

    let outcome = if cli.sandbox {
        sweep_sandbox(config, cli.sandbox_optimum, cli.sandbox_poll_interval(), shutdown).await?
    } else {
        sweep_clearml(config, shutdown).await?
    };

    let json = serde_json::to_string_pretty(&outcome)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "outcome written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn sweep_sandbox(
    mut config: SweepConfig,
    optimum: f64,
    poll_interval: Option<Duration>,
    shutdown: ShutdownSignal,
) -> Result<SweepOutcome> {
    if config.template_job_id.is_none() {
        config.template_job_id = Some(JobId::new("sandbox-template"));
    }
    let sandbox_config = SandboxConfig {
        learning_rate_parameter: config.learning_rate_parameter.clone(),
        loss_metric: config.loss_metric_key(),
        ..SandboxConfig::default()
    };
    let backend = Arc::new(SandboxBackend::log_quadratic(sandbox_config, optimum));
    let mut runner_config = RunnerConfig::from_sweep_config(&config)?;
    if let Some(interval) = poll_interval {
        runner_config = runner_config.with_check_interval(interval);
    }
    info!(
        optimum,
        poll_ms = runner_config.check_interval.as_millis() as u64,
        "running sweep against the sandbox backend"
    );

    let outcome = run_sweep_with_runner(
        &config,
        runner_config,
        backend,
        Arc::new(TracingReporter),
        shutdown,
    )
    .await?;
    Ok(outcome)
}

async fn sweep_clearml(mut config: SweepConfig, shutdown: ShutdownSignal) -> Result<SweepOutcome> {
    let client = ClearMlClient::connect(ClearMlConfig::from_env()?)
        .await
        .context("failed to connect to the tracking server")?;
    let client = Arc::new(client);

    if config.template_job_id.is_none() {
        let project = config
            .project_name
            .clone()
            .ok_or_else(|| config_error!("project_name is required to look up the template task"))?;
        let template = client
            .find_task_id(&project, &config.model_name)
            .await
            .with_context(|| format!("template task {} not found", config.model_name))?;
        info!(project = %project, template = %template, "resolved template task");
        config.template_job_id = Some(template);
    }

    let sweep_project = config
        .resolved_sweep_project()
        .ok_or_else(|| config_error!("sweep_project or project_name must be set"))?;
    let sweep_name = format!(
        "{}_lr_sweep_{}",
        config.model_name,
        Local::now().format("%Y%m%d_%H%M")
    );
    let parent = client.create_sweep_task(&sweep_project, &sweep_name).await?;

    let (reporter, uploader) = ClearMlReporter::spawn(client.clone(), parent.clone());
    let reporter: Arc<dyn MetricsReporter> = Arc::new(reporter);
    let result = run_sweep(&config, client.clone(), reporter.clone(), shutdown).await;

    // last handle: the uploader drains and exits
    drop(reporter);
    match uploader.await {
        Ok(delivered) => info!(delivered, "telemetry flushed"),
        Err(e) => warn!(error = %e, "telemetry uploader panicked"),
    }

    let (succeeded, reason) = match &result {
        Ok(outcome) => (true, format!("best lr {}", outcome.best_lr)),
        Err(e) => (false, e.to_string()),
    };
    if let Err(e) = client.close_task(&parent, succeeded, &reason).await {
        warn!(task = %parent, error = %e, "failed to close sweep task");
    }

    Ok(result?)
}
