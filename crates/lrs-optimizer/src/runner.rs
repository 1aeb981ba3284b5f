//! Runs one candidate learning rate as a remote training job.

use async_trait::async_trait;
use chrono::Utc;
use lrs_types::{
    EvaluationError, JobId, JobStatus, LearningRate, MetricKey, SweepConfig, SweepError,
    SweepResult,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{JobBackend, ParameterOverrides};
use crate::cache::Evaluator;
use crate::shutdown::ShutdownSignal;
use crate::smoother::MetricSmoother;
use crate::trial::TrialRecord;

/// Settings for submitting and monitoring trial jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub template_job_id: JobId,
    pub queue_name: String,
    /// Prefix of every trial job name.
    pub model_name: String,
    pub learning_rate_parameter: String,
    pub loss_metric: MetricKey,
    pub check_interval: Duration,
    pub retry_budget: u32,
    pub smoothing_alpha: f64,
}

impl RunnerConfig {
    /// Derive runner settings from a sweep config whose template has been
    /// resolved.
    pub fn from_sweep_config(config: &SweepConfig) -> SweepResult<Self> {
        let template_job_id = config
            .template_job_id
            .clone()
            .ok_or_else(|| SweepError::Config("template_job_id is not resolved".into()))?;
        Ok(Self {
            template_job_id,
            queue_name: config.queue_name.clone(),
            model_name: config.model_name.clone(),
            learning_rate_parameter: config.learning_rate_parameter.clone(),
            loss_metric: config.loss_metric_key(),
            check_interval: config.check_interval(),
            retry_budget: config.retry_budget,
            smoothing_alpha: config.smoothing_alpha,
        })
    }

    /// Replace the poll interval taken from the sweep config.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn job_name(&self, learning_rate: LearningRate) -> String {
        format!("{}_lr:{:.6}", self.model_name, learning_rate.value())
    }

    /// The candidate learning rate is the only overridden parameter.
    pub fn overrides(&self, learning_rate: LearningRate) -> ParameterOverrides {
        let mut overrides = ParameterOverrides::new();
        overrides.insert(
            self.learning_rate_parameter.clone(),
            learning_rate.value().to_string(),
        );
        overrides
    }
}

/// Clones the template, submits it, waits for a terminal state and smooths
/// the reported loss. Failed jobs are re-cloned and resubmitted up to the
/// retry budget.
pub struct TrialRunner<B> {
    backend: Arc<B>,
    config: RunnerConfig,
    smoother: MetricSmoother,
    shutdown: ShutdownSignal,
}

impl<B: JobBackend> TrialRunner<B> {
    pub fn new(backend: Arc<B>, config: RunnerConfig, shutdown: ShutdownSignal) -> SweepResult<Self> {
        if config.retry_budget == 0 {
            return Err(SweepError::Config("retry_budget must be at least 1".into()));
        }
        let smoother = MetricSmoother::new(config.smoothing_alpha)?;
        Ok(Self {
            backend,
            config,
            smoother,
            shutdown,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Evaluate one candidate. Blocks (asynchronously) for the full training
    /// time of the job.
    pub async fn run_trial(&mut self, learning_rate: LearningRate) -> SweepResult<TrialRecord> {
        let started_at = Utc::now();
        let name = self.config.job_name(learning_rate);
        let overrides = self.config.overrides(learning_rate);
        let mut last_job: Option<JobId> = None;

        info!(lr = %learning_rate, name = %name, "training model");

        for attempt in 1..=self.config.retry_budget {
            // no new remote job once cancelled
            if self.shutdown.is_cancelled() {
                warn!(lr = %learning_rate, attempt, "sweep cancelled, not submitting");
                return Err(SweepError::Cancelled { job_id: None });
            }
            let job_id = self
                .backend
                .clone_job(&self.config.template_job_id, &name, &overrides)
                .await?;
            self.backend.reveal_job(&job_id).await?;
            self.backend.submit(&job_id, &self.config.queue_name).await?;
            info!(
                lr = %learning_rate,
                job_id = %job_id,
                attempt,
                queue = %self.config.queue_name,
                "trial submitted"
            );

            let status = self.wait_for_terminal(&job_id).await?;
            if !status.has_results() {
                warn!(
                    lr = %learning_rate,
                    job_id = %job_id,
                    attempt,
                    budget = self.config.retry_budget,
                    "trial job failed"
                );
                last_job = Some(job_id);
                continue;
            }

            let points = self
                .backend
                .get_metric_series(&job_id, &self.config.loss_metric)
                .await?;
            let raw_loss_series: Vec<f64> = points.iter().map(|p| p.value).collect();
            let smoothed = self.smoother.smooth(&raw_loss_series).ok_or_else(|| {
                EvaluationError::EmptySeries {
                    job_id: job_id.to_string(),
                    metric: self.config.loss_metric.to_string(),
                }
            })?;
            let fitness = if smoothed.is_finite() {
                smoothed
            } else {
                warn!(lr = %learning_rate, job_id = %job_id, "non-finite loss, ranking trial last");
                f64::INFINITY
            };

            info!(
                lr = %learning_rate,
                job_id = %job_id,
                status = %status,
                points = raw_loss_series.len(),
                fitness,
                "trial finished"
            );

            return Ok(TrialRecord {
                learning_rate,
                job_id,
                attempts: attempt,
                final_status: status,
                raw_loss_series,
                fitness,
                started_at,
                finished_at: Utc::now(),
            });
        }

        Err(EvaluationError::RetriesExhausted {
            learning_rate: learning_rate.value(),
            job_id: last_job.map(|j| j.to_string()).unwrap_or_default(),
            attempts: self.config.retry_budget,
        }
        .into())
    }

    /// Poll until the job is terminal, suspending between polls. Exactly one
    /// status request is outstanding at a time.
    async fn wait_for_terminal(&mut self, job_id: &JobId) -> SweepResult<JobStatus> {
        loop {
            let status = self.backend.get_status(job_id).await?;
            if status.is_terminal() {
                return Ok(status);
            }
            debug!(job_id = %job_id, status = %status, "waiting for job");

            if self.shutdown.wait(self.config.check_interval).await {
                warn!(job_id = %job_id, "sweep cancelled, stopping job");
                if let Err(e) = self.backend.stop_job(job_id, "lr sweep cancelled").await {
                    warn!(job_id = %job_id, error = %e, "failed to stop job");
                }
                return Err(SweepError::Cancelled {
                    job_id: Some(job_id.to_string()),
                });
            }
        }
    }
}

#[async_trait]
impl<B: JobBackend> Evaluator for TrialRunner<B> {
    async fn evaluate(&mut self, learning_rate: LearningRate) -> SweepResult<TrialRecord> {
        self.run_trial(learning_rate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxBackend, SandboxConfig};

    fn runner_config(retry_budget: u32) -> RunnerConfig {
        let config = SweepConfig::new("37m", "gpu")
            .with_template("template")
            .with_retry_budget(retry_budget);
        RunnerConfig::from_sweep_config(&config).unwrap()
    }

    fn backend() -> Arc<SandboxBackend> {
        let config = SandboxConfig {
            polls_to_finish: 3,
            steps: 50,
            noise: 0.0,
            ..SandboxConfig::default()
        };
        Arc::new(SandboxBackend::new(config, |lr: f64| (lr.log10() + 2.0).powi(2)))
    }

    #[test]
    fn job_name_and_overrides() {
        let config = runner_config(3);
        let lr = LearningRate::new(0.0045).unwrap();
        assert_eq!(config.job_name(lr), "37m_lr:0.004500");
        let overrides = config.overrides(lr);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides["Hydra/training.learning_rate"], "0.0045");
    }

    #[test]
    fn requires_resolved_template() {
        let config = SweepConfig::new("m", "q");
        assert!(matches!(
            RunnerConfig::from_sweep_config(&config),
            Err(SweepError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_is_smoothed() {
        let backend = backend();
        let mut runner =
            TrialRunner::new(backend.clone(), runner_config(3), ShutdownSignal::never()).unwrap();
        let lr = LearningRate::new(0.01).unwrap();

        let record = runner.run_trial(lr).await.unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.final_status, JobStatus::Completed);
        assert_eq!(record.raw_loss_series.len(), 50);
        let expected = MetricSmoother::default().smooth(&record.raw_loss_series).unwrap();
        assert_eq!(record.fitness, expected);
        assert_eq!(backend.clone_count(), 1);
        assert_eq!(backend.submitted_jobs(), vec![record.job_id.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_wait_between_status_checks() {
        let backend = backend();
        let mut runner =
            TrialRunner::new(backend.clone(), runner_config(3), ShutdownSignal::never()).unwrap();
        let start = tokio::time::Instant::now();
        runner.run_trial(LearningRate::new(0.003).unwrap()).await.unwrap();
        // three non-terminal polls, each followed by a 120s suspension
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(360) && elapsed < Duration::from_secs(361));
        assert_eq!(backend.status_polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_then_succeeds() {
        let backend = backend();
        let lr = LearningRate::new(0.009).unwrap();
        backend.fail_attempts(lr, 1);
        let mut runner =
            TrialRunner::new(backend.clone(), runner_config(3), ShutdownSignal::never()).unwrap();

        let record = runner.run_trial(lr).await.unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(backend.clone_count_for(lr), 2);
        assert_eq!(backend.submitted_jobs().len(), 2);
        assert_eq!(record.job_id, backend.submitted_jobs()[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_is_fatal() {
        let backend = backend();
        let lr = LearningRate::new(0.027).unwrap();
        backend.fail_attempts(lr, u32::MAX);
        let mut runner =
            TrialRunner::new(backend.clone(), runner_config(3), ShutdownSignal::never()).unwrap();

        let err = runner.run_trial(lr).await.unwrap_err();
        assert_eq!(backend.clone_count_for(lr), 3);
        assert_eq!(backend.submitted_jobs().len(), 3);
        let last_job = backend.submitted_jobs()[2].to_string();
        match err {
            SweepError::Evaluation(EvaluationError::RetriesExhausted {
                learning_rate,
                job_id,
                attempts,
            }) => {
                assert_eq!(learning_rate, 0.027);
                assert_eq!(job_id, last_job);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_jobs_still_yield_results() {
        let backend = backend();
        let lr = LearningRate::new(0.0015).unwrap();
        backend.stop_attempts(lr);
        let mut runner =
            TrialRunner::new(backend.clone(), runner_config(3), ShutdownSignal::never()).unwrap();
        let record = runner.run_trial(lr).await.unwrap();
        assert_eq!(record.final_status, JobStatus::Stopped);
        assert_eq!(record.attempts, 1);
        assert!(!record.raw_loss_series.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backend_errors_are_not_retried() {
        let backend = backend();
        backend.set_unavailable(true);
        let mut runner =
            TrialRunner::new(backend.clone(), runner_config(3), ShutdownSignal::never()).unwrap();
        let err = runner.run_trial(LearningRate::new(0.01).unwrap()).await.unwrap_err();
        assert!(err.is_infrastructure());
        assert_eq!(backend.clone_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_series_is_fatal() {
        let backend = backend();
        let lr = LearningRate::new(0.005).unwrap();
        backend.silence_metrics(lr);
        let mut runner =
            TrialRunner::new(backend.clone(), runner_config(3), ShutdownSignal::never()).unwrap();
        let err = runner.run_trial(lr).await.unwrap_err();
        assert!(matches!(
            err,
            SweepError::Evaluation(EvaluationError::EmptySeries { .. })
        ));
        assert_eq!(backend.clone_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_running_job() {
        let backend = backend();
        let (trigger, signal) = ShutdownSignal::new();
        let mut runner = TrialRunner::new(backend.clone(), runner_config(3), signal).unwrap();

        let handle =
            tokio::spawn(async move { runner.run_trial(LearningRate::new(0.01).unwrap()).await });
        tokio::time::sleep(Duration::from_secs(150)).await;
        trigger.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SweepError::Cancelled { .. }));
        assert_eq!(backend.stopped_jobs(), backend.submitted_jobs());
        assert_eq!(backend.clone_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_sweep_submits_nothing() {
        let backend = backend();
        let (trigger, signal) = ShutdownSignal::new();
        let mut runner = TrialRunner::new(backend.clone(), runner_config(3), signal).unwrap();
        trigger.cancel();

        let err = runner.run_trial(LearningRate::new(0.01).unwrap()).await.unwrap_err();
        assert!(matches!(err, SweepError::Cancelled { job_id: None }));
        assert_eq!(backend.clone_count(), 0);
        assert!(backend.submitted_jobs().is_empty());
        assert!(backend.stopped_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overridden_interval_is_used() {
        let backend = backend();
        let config = runner_config(3).with_check_interval(Duration::from_millis(10));
        let mut runner = TrialRunner::new(backend.clone(), config, ShutdownSignal::never()).unwrap();
        let start = tokio::time::Instant::now();
        runner.run_trial(LearningRate::new(0.003).unwrap()).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30) && elapsed < Duration::from_millis(31));
    }

    #[test]
    fn zero_retry_budget_is_rejected() {
        let mut config = runner_config(3);
        config.retry_budget = 0;
        assert!(TrialRunner::new(backend(), config, ShutdownSignal::never()).is_err());
    }
}
