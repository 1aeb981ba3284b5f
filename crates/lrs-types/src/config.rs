//! Sweep configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::{SweepError, SweepResult};
use crate::job::{JobId, MetricKey};
use crate::learning_rate::MIN_LEARNING_RATE;

/// Top-level configuration for a learning-rate sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Name of the model; also the template task name and trial name prefix.
    pub model_name: String,

    /// Execution queue trial jobs are submitted to.
    pub queue_name: String,

    /// Project holding the template task.
    pub project_name: Option<String>,

    /// Project the parent sweep task is created in. Defaults to
    /// `<project_name>/lr_sweep`.
    pub sweep_project: Option<String>,

    /// Template job to clone. Looked up by project and model name when
    /// absent.
    pub template_job_id: Option<JobId>,

    /// Hyperparameter the candidate learning rate is written to.
    pub learning_rate_parameter: String,

    /// Scalar metric holding the training loss.
    pub loss_metric: String,

    pub start_lr: f64,
    pub max_lr: f64,

    /// Growth factor of the expansion phase; also the half-width (in
    /// multiplicative terms) of the initial bracket.
    pub search_mult: f64,

    /// Number of binary-narrowing iterations.
    pub iterations: usize,

    pub check_interval_seconds: u64,

    /// Attempts per trial, including the first.
    pub retry_budget: u32,

    /// EMA weight of the newest observation.
    pub smoothing_alpha: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            queue_name: String::new(),
            project_name: None,
            sweep_project: None,
            template_job_id: None,
            learning_rate_parameter: "Hydra/training.learning_rate".to_string(),
            loss_metric: "loss".to_string(),
            start_lr: 5e-4,
            max_lr: 5e-2,
            search_mult: 3.0,
            iterations: 5,
            check_interval_seconds: 120,
            retry_budget: 3,
            smoothing_alpha: 0.03,
        }
    }
}

impl SweepConfig {
    pub fn new(model_name: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> SweepResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project_name = Some(project.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<JobId>) -> Self {
        self.template_job_id = Some(template.into());
        self
    }

    pub fn with_lr_range(mut self, start_lr: f64, max_lr: f64) -> Self {
        self.start_lr = start_lr;
        self.max_lr = max_lr;
        self
    }

    pub fn with_search_mult(mut self, mult: f64) -> Self {
        self.search_mult = mult;
        self
    }

    pub fn with_iterations(mut self, n: usize) -> Self {
        self.iterations = n;
        self
    }

    pub fn with_check_interval(mut self, seconds: u64) -> Self {
        self.check_interval_seconds = seconds;
        self
    }

    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts;
        self
    }

    pub fn with_smoothing_alpha(mut self, alpha: f64) -> Self {
        self.smoothing_alpha = alpha;
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn loss_metric_key(&self) -> MetricKey {
        MetricKey::new(self.loss_metric.clone())
    }

    /// Project for the parent sweep task, if one can be derived.
    pub fn resolved_sweep_project(&self) -> Option<String> {
        self.sweep_project
            .clone()
            .or_else(|| self.project_name.as_ref().map(|p| format!("{p}/lr_sweep")))
    }

    /// Check numeric ranges and required fields.
    pub fn validate(&self) -> SweepResult<()> {
        if self.model_name.trim().is_empty() {
            return Err(invalid("model_name must not be empty"));
        }
        if self.queue_name.trim().is_empty() {
            return Err(invalid("queue_name must not be empty"));
        }
        if self.learning_rate_parameter.trim().is_empty() {
            return Err(invalid("learning_rate_parameter must not be empty"));
        }
        if self.loss_metric.trim().is_empty() {
            return Err(invalid("loss_metric must not be empty"));
        }
        if !(self.start_lr.is_finite() && self.start_lr > 0.0) {
            return Err(invalid(format!("start_lr must be positive, got {}", self.start_lr)));
        }
        if !(self.max_lr.is_finite() && self.max_lr >= self.start_lr) {
            return Err(invalid(format!(
                "max_lr ({}) must be >= start_lr ({})",
                self.max_lr, self.start_lr
            )));
        }
        if !(self.search_mult.is_finite() && self.search_mult > 1.0) {
            return Err(invalid(format!(
                "search_mult must be greater than 1, got {}",
                self.search_mult
            )));
        }
        if self.start_lr / self.search_mult < MIN_LEARNING_RATE {
            return Err(invalid(format!(
                "start_lr / search_mult ({}) is below the smallest representable learning rate {}",
                self.start_lr / self.search_mult,
                MIN_LEARNING_RATE
            )));
        }
        if self.check_interval_seconds == 0 {
            return Err(invalid("check_interval_seconds must be at least 1"));
        }
        if self.retry_budget == 0 {
            return Err(invalid("retry_budget must be at least 1"));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(invalid(format!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            )));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SweepError {
    SweepError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = SweepConfig::new("37m_mup_base", "a100");
        assert_eq!(config.start_lr, 5e-4);
        assert_eq!(config.max_lr, 5e-2);
        assert_eq!(config.search_mult, 3.0);
        assert_eq!(config.iterations, 5);
        assert_eq!(config.check_interval(), Duration::from_secs(120));
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.smoothing_alpha, 0.03);
        assert_eq!(config.loss_metric_key(), MetricKey::new("loss"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sweep_project_derives_from_project() {
        let config = SweepConfig::new("m", "q");
        assert_eq!(config.resolved_sweep_project(), None);

        let config = config.with_project("c4_a100x8x4_37m/mup");
        assert_eq!(
            config.resolved_sweep_project().as_deref(),
            Some("c4_a100x8x4_37m/mup/lr_sweep")
        );
    }

    #[test]
    fn validation_rejects_bad_ranges() {
        let base = SweepConfig::new("m", "q");

        assert!(base.clone().with_lr_range(0.0, 0.1).validate().is_err());
        assert!(base.clone().with_lr_range(0.01, 0.001).validate().is_err());
        assert!(base.clone().with_search_mult(1.0).validate().is_err());
        assert!(base.clone().with_retry_budget(0).validate().is_err());
        assert!(base.clone().with_check_interval(0).validate().is_err());
        assert!(base.clone().with_check_interval(1).validate().is_ok());
        assert!(base.clone().with_smoothing_alpha(0.0).validate().is_err());
        assert!(base.clone().with_smoothing_alpha(1.5).validate().is_err());
        assert!(base.clone().with_smoothing_alpha(1.0).validate().is_ok());
        // 2e-5 / 3 rounds to zero at five decimals
        assert!(base.clone().with_lr_range(2e-5, 0.1).validate().is_err());
        assert!(SweepConfig::new("", "q").validate().is_err());
        assert!(SweepConfig::new("m", " ").validate().is_err());
    }

    #[test]
    fn loads_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model_name": "37m", "queue_name": "gpu", "start_lr": 0.0054, "template_job_id": "abc"}}"#
        )
        .unwrap();

        let config = SweepConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model_name, "37m");
        assert_eq!(config.start_lr, 0.0054);
        assert_eq!(config.template_job_id, Some(JobId::new("abc")));
        assert_eq!(config.iterations, 5);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SweepConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, SweepError::Io(_)));
    }
}
