use anyhow::{Context, Result};
use clap::Parser;
use lrs_types::{validation_error, JobId, SweepConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "lr-sweep",
    version,
    about = "Search for the learning rate with the lowest smoothed training loss"
)]
pub struct Cli {
    /// JSON sweep config; flags below override its values
    #[arg(long, env = "LR_SWEEP_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "LR_SWEEP_MODEL_NAME")]
    pub model_name: Option<String>,

    #[arg(long, env = "LR_SWEEP_QUEUE_NAME")]
    pub queue_name: Option<String>,

    /// Project holding the template task
    #[arg(long, env = "LR_SWEEP_PROJECT_NAME")]
    pub project_name: Option<String>,

    /// Project for the parent sweep task
    #[arg(long, env = "LR_SWEEP_SWEEP_PROJECT")]
    pub sweep_project: Option<String>,

    /// Skip the template lookup and clone this task
    #[arg(long, env = "LR_SWEEP_TEMPLATE_JOB_ID")]
    pub template_job_id: Option<String>,

    #[arg(long, env = "LR_SWEEP_LEARNING_RATE_PARAMETER")]
    pub learning_rate_parameter: Option<String>,

    #[arg(long, env = "LR_SWEEP_LOSS_METRIC")]
    pub loss_metric: Option<String>,

    #[arg(long, env = "LR_SWEEP_START_LR")]
    pub start_lr: Option<f64>,

    #[arg(long, env = "LR_SWEEP_MAX_LR")]
    pub max_lr: Option<f64>,

    #[arg(long, env = "LR_SWEEP_SEARCH_MULT")]
    pub search_mult: Option<f64>,

    #[arg(long, env = "LR_SWEEP_ITERATIONS")]
    pub iterations: Option<usize>,

    #[arg(long, env = "LR_SWEEP_CHECK_INTERVAL_SECONDS")]
    pub check_interval_seconds: Option<u64>,

    #[arg(long, env = "LR_SWEEP_RETRY_BUDGET")]
    pub retry_budget: Option<u32>,

    #[arg(long, env = "LR_SWEEP_SMOOTHING_ALPHA")]
    pub smoothing_alpha: Option<f64>,

    /// Run against the in-process simulated backend
    #[arg(long, env = "LR_SWEEP_SANDBOX")]
    pub sandbox: bool,

    /// Learning rate with the lowest simulated loss
    #[arg(long, env = "LR_SWEEP_SANDBOX_OPTIMUM", default_value_t = 0.01)]
    pub sandbox_optimum: f64,

    /// Milliseconds between status polls in sandbox mode. Replaces the
    /// config file's interval; an explicit --check-interval-seconds wins.
    #[arg(long, env = "LR_SWEEP_SANDBOX_POLL_MS", default_value_t = 10)]
    pub sandbox_poll_ms: u64,

    /// Write the outcome JSON here instead of stdout
    #[arg(long, short, env = "LR_SWEEP_OUTPUT")]
    pub output: Option<PathBuf>,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn sweep_config(&self) -> Result<SweepConfig> {
        let mut config = match &self.config {
            Some(path) => SweepConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => SweepConfig::default(),
        };

        if let Some(v) = &self.model_name {
            config.model_name = v.clone();
        }
        if let Some(v) = &self.queue_name {
            config.queue_name = v.clone();
        }
        if let Some(v) = &self.project_name {
            config.project_name = Some(v.clone());
        }
        if let Some(v) = &self.sweep_project {
            config.sweep_project = Some(v.clone());
        }
        if let Some(v) = &self.template_job_id {
            config.template_job_id = Some(JobId::new(v.clone()));
        }
        if let Some(v) = &self.learning_rate_parameter {
            config.learning_rate_parameter = v.clone();
        }
        if let Some(v) = &self.loss_metric {
            config.loss_metric = v.clone();
        }
        if let Some(v) = self.start_lr {
            config.start_lr = v;
        }
        if let Some(v) = self.max_lr {
            config.max_lr = v;
        }
        if let Some(v) = self.search_mult {
            config.search_mult = v;
        }
        if let Some(v) = self.iterations {
            config.iterations = v;
        }
        if let Some(v) = self.check_interval_seconds {
            config.check_interval_seconds = v;
        }
        if let Some(v) = self.retry_budget {
            config.retry_budget = v;
        }
        if let Some(v) = self.smoothing_alpha {
            config.smoothing_alpha = v;
        }

        if self.sandbox {
            if !(self.sandbox_optimum.is_finite() && self.sandbox_optimum > 0.0) {
                return Err(validation_error!(
                    "sandbox optimum must be positive, got {}",
                    self.sandbox_optimum
                )
                .into());
            }
        }

        config.validate().context("invalid sweep configuration")?;
        Ok(config)
    }

    /// Poll interval for the sandbox runner, unless the user chose one.
    pub fn sandbox_poll_interval(&self) -> Option<Duration> {
        if !self.sandbox || self.check_interval_seconds.is_some() {
            return None;
        }
        Some(Duration::from_millis(self.sandbox_poll_ms))
    }
}
