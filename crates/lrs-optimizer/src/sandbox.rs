//! Sandbox (simulated) tracking backend.
//!
//! Runs trial jobs in-process against a synthetic fitness function with no
//! external dependencies. Useful for dry-run sweeps, integration testing, and
//! checking search settings before spending cluster time.

use async_trait::async_trait;
use lrs_types::{
    BackendError, BackendResult, JobId, JobStatus, LearningRate, MetricKey, MetricPoint,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::backend::{JobBackend, ParameterOverrides};

/// Configuration for the sandbox backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Non-terminal status polls a submitted job answers before finishing.
    pub polls_to_finish: u32,
    /// Loss points each job reports.
    pub steps: usize,
    /// Loss above the final fitness at step 0; decays exponentially.
    pub initial_excess: f64,
    /// Amplitude of uniform noise added to each point.
    pub noise: f64,
    pub seed: u64,
    /// Override key holding the learning rate.
    pub learning_rate_parameter: String,
    /// Metric the loss series is reported under.
    pub loss_metric: MetricKey,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            polls_to_finish: 2,
            steps: 200,
            initial_excess: 1.0,
            noise: 0.02,
            seed: 42,
            learning_rate_parameter: "Hydra/training.learning_rate".to_string(),
            loss_metric: MetricKey::default(),
        }
    }
}

type FitnessFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

#[derive(Debug, Clone)]
struct SandboxJob {
    learning_rate: LearningRate,
    submitted: bool,
    stopped: bool,
    polls: u32,
    /// Terminal status the job reaches once it finishes.
    outcome: JobStatus,
    series: Vec<f64>,
}

#[derive(Debug)]
struct SandboxState {
    jobs: HashMap<JobId, SandboxJob>,
    submitted: Vec<JobId>,
    stopped: Vec<JobId>,
    revealed: HashSet<JobId>,
    clones_per_rate: HashMap<LearningRate, u32>,
    pending_failures: HashMap<LearningRate, u32>,
    stop_rates: HashSet<LearningRate>,
    silent_rates: HashSet<LearningRate>,
    unavailable: bool,
    status_polls: u64,
    rng: ChaCha8Rng,
}

/// A fully in-process backend that simulates training jobs.
pub struct SandboxBackend {
    config: SandboxConfig,
    fitness: FitnessFn,
    state: Mutex<SandboxState>,
}

impl SandboxBackend {
    /// `fitness` maps a learning rate to the loss its simulated run
    /// converges to.
    pub fn new(config: SandboxConfig, fitness: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            fitness: Arc::new(fitness),
            state: Mutex::new(SandboxState {
                jobs: HashMap::new(),
                submitted: Vec::new(),
                stopped: Vec::new(),
                revealed: HashSet::new(),
                clones_per_rate: HashMap::new(),
                pending_failures: HashMap::new(),
                stop_rates: HashSet::new(),
                silent_rates: HashSet::new(),
                unavailable: false,
                status_polls: 0,
                rng,
            }),
        }
    }

    /// Sandbox whose loss is minimal at `optimum` and grows quadratically in
    /// log10 distance from it.
    pub fn log_quadratic(config: SandboxConfig, optimum: f64) -> Self {
        let center = optimum.log10();
        Self::new(config, move |lr: f64| (lr.log10() - center).powi(2))
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Make the next `attempts` jobs cloned for `learning_rate` fail.
    pub fn fail_attempts(&self, learning_rate: LearningRate, attempts: u32) {
        self.state
            .lock()
            .pending_failures
            .insert(learning_rate, attempts);
    }

    /// Jobs for `learning_rate` end `Stopped` instead of `Completed`.
    pub fn stop_attempts(&self, learning_rate: LearningRate) {
        self.state.lock().stop_rates.insert(learning_rate);
    }

    /// Jobs for `learning_rate` never report the loss metric.
    pub fn silence_metrics(&self, learning_rate: LearningRate) {
        self.state.lock().silent_rates.insert(learning_rate);
    }

    /// Simulate the tracking server being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn clone_count(&self) -> u32 {
        self.state.lock().clones_per_rate.values().sum()
    }

    pub fn clone_count_for(&self, learning_rate: LearningRate) -> u32 {
        self.state
            .lock()
            .clones_per_rate
            .get(&learning_rate)
            .copied()
            .unwrap_or(0)
    }

    /// Distinct learning rates that had at least one job cloned.
    pub fn cloned_rates(&self) -> Vec<LearningRate> {
        let mut rates: Vec<LearningRate> =
            self.state.lock().clones_per_rate.keys().copied().collect();
        rates.sort();
        rates
    }

    pub fn submitted_jobs(&self) -> Vec<JobId> {
        self.state.lock().submitted.clone()
    }

    pub fn stopped_jobs(&self) -> Vec<JobId> {
        self.state.lock().stopped.clone()
    }

    pub fn is_revealed(&self, job_id: &JobId) -> bool {
        self.state.lock().revealed.contains(job_id)
    }

    pub fn status_polls(&self) -> u64 {
        self.state.lock().status_polls
    }

    fn check_available(state: &SandboxState) -> BackendResult<()> {
        if state.unavailable {
            return Err(BackendError::Unavailable {
                message: "sandbox backend marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn simulate_series(&self, learning_rate: LearningRate, rng: &mut ChaCha8Rng) -> Vec<f64> {
        let target = (self.fitness)(learning_rate.value());
        let steps = self.config.steps.max(1);
        (0..steps)
            .map(|step| {
                let progress = step as f64 / steps as f64;
                let noise = if self.config.noise > 0.0 {
                    rng.gen_range(-self.config.noise..=self.config.noise)
                } else {
                    0.0
                };
                target + self.config.initial_excess * (-5.0 * progress).exp() + noise
            })
            .collect()
    }

    fn parse_learning_rate(&self, overrides: &ParameterOverrides) -> BackendResult<LearningRate> {
        let key = &self.config.learning_rate_parameter;
        let raw = overrides.get(key).ok_or_else(|| BackendError::Api {
            endpoint: "sandbox.clone".to_string(),
            message: format!("missing override {key}"),
        })?;
        raw.parse::<f64>()
            .ok()
            .and_then(|v| LearningRate::new(v).ok())
            .ok_or_else(|| BackendError::Api {
                endpoint: "sandbox.clone".to_string(),
                message: format!("invalid learning rate override {raw:?}"),
            })
    }

    fn job<'a>(state: &'a mut SandboxState, job_id: &JobId) -> BackendResult<&'a mut SandboxJob> {
        state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| BackendError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    fn is_finished(&self, job: &SandboxJob) -> bool {
        job.stopped || job.polls > self.config.polls_to_finish
    }
}

#[async_trait]
impl JobBackend for SandboxBackend {
    async fn clone_job(
        &self,
        _template: &JobId,
        name: &str,
        overrides: &ParameterOverrides,
    ) -> BackendResult<JobId> {
        let learning_rate = self.parse_learning_rate(overrides)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        Self::check_available(state)?;

        let outcome = match state.pending_failures.get_mut(&learning_rate) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                JobStatus::Failed
            }
            _ if state.stop_rates.contains(&learning_rate) => JobStatus::Stopped,
            _ => JobStatus::Completed,
        };
        let series = if state.silent_rates.contains(&learning_rate) {
            Vec::new()
        } else {
            self.simulate_series(learning_rate, &mut state.rng)
        };

        let job_id = JobId::new(format!("sandbox-{}", Uuid::new_v4().simple()));
        state.jobs.insert(
            job_id.clone(),
            SandboxJob {
                learning_rate,
                submitted: false,
                stopped: false,
                polls: 0,
                outcome,
                series,
            },
        );
        *state.clones_per_rate.entry(learning_rate).or_insert(0) += 1;

        info!(job_id = %job_id, name, lr = %learning_rate, "sandbox job cloned");
        Ok(job_id)
    }

    async fn reveal_job(&self, job_id: &JobId) -> BackendResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        Self::job(&mut state, job_id)?;
        state.revealed.insert(job_id.clone());
        Ok(())
    }

    async fn submit(&self, job_id: &JobId, _queue: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        Self::job(&mut state, job_id)?.submitted = true;
        state.submitted.push(job_id.clone());
        Ok(())
    }

    async fn get_status(&self, job_id: &JobId) -> BackendResult<JobStatus> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        state.status_polls += 1;
        let polls_to_finish = self.config.polls_to_finish;
        let job = Self::job(&mut state, job_id)?;

        if job.stopped {
            return Ok(JobStatus::Stopped);
        }
        if !job.submitted {
            return Ok(JobStatus::Pending);
        }
        job.polls = job.polls.saturating_add(1);
        if job.polls > polls_to_finish {
            Ok(job.outcome)
        } else {
            Ok(JobStatus::Running)
        }
    }

    async fn get_metric_series(
        &self,
        job_id: &JobId,
        metric: &MetricKey,
    ) -> BackendResult<Vec<MetricPoint>> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        let job = Self::job(&mut state, job_id)?.clone();

        if *metric != self.config.loss_metric {
            return Ok(Vec::new());
        }

        let total = job.series.len();
        let visible = if self.is_finished(&job) {
            match job.outcome {
                JobStatus::Failed => total / 2,
                _ => total,
            }
        } else {
            total * job.polls as usize / (self.config.polls_to_finish as usize + 1)
        };

        Ok(job.series[..visible.min(total)]
            .iter()
            .enumerate()
            .map(|(step, &value)| MetricPoint::new(step as u64, value))
            .collect())
    }

    async fn stop_job(&self, job_id: &JobId, reason: &str) -> BackendResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&state)?;
        let job = Self::job(&mut state, job_id)?;
        job.stopped = true;
        let learning_rate = job.learning_rate;
        state.stopped.push(job_id.clone());
        info!(job_id = %job_id, lr = %learning_rate, reason, "sandbox job stopped");
        Ok(())
    }
}
