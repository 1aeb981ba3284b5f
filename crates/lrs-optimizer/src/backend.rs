//! Job / experiment-tracking backend abstraction.

use async_trait::async_trait;
use lrs_types::{BackendResult, JobId, JobStatus, MetricKey, MetricPoint};
use std::collections::BTreeMap;

/// Hyperparameter overrides applied to a cloned job, keyed by the backend's
/// parameter path (e.g. `Hydra/training.learning_rate`).
pub type ParameterOverrides = BTreeMap<String, String>;

/// Core backend interface.
///
/// Implementations may talk to a real tracking server (see the
/// `lrs-clearml` crate) or simulate jobs in-process (see
/// [`super::sandbox::SandboxBackend`]). Calls are not retried by the sweep;
/// any error surfaces as a fatal infrastructure error.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Clone `template` under a new name with `overrides` applied. Returns the
    /// id of the new, not yet submitted, job.
    async fn clone_job(
        &self,
        template: &JobId,
        name: &str,
        overrides: &ParameterOverrides,
    ) -> BackendResult<JobId>;

    /// Remove any visibility flag that hides the job from normal listings.
    async fn reveal_job(&self, job_id: &JobId) -> BackendResult<()>;

    /// Put the job on an execution queue.
    async fn submit(&self, job_id: &JobId, queue: &str) -> BackendResult<()>;

    /// Current lifecycle status of the job.
    async fn get_status(&self, job_id: &JobId) -> BackendResult<JobStatus>;

    /// All points reported so far for `metric`, ordered by step. Partial while
    /// the job runs; final once it is terminal.
    async fn get_metric_series(
        &self,
        job_id: &JobId,
        metric: &MetricKey,
    ) -> BackendResult<Vec<MetricPoint>>;

    /// Ask the backend to stop a queued or running job.
    async fn stop_job(&self, job_id: &JobId, reason: &str) -> BackendResult<()>;
}
