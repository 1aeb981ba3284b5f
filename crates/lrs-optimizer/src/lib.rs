//! # lrs-optimizer
//!
//! Learning-rate search over remote training jobs.
//!
//! A sweep clones a template training job once per candidate learning rate,
//! waits for it to finish on a worker queue, smooths its loss curve into a
//! single fitness value, and uses that value to choose the next candidate:
//! geometric expansion first, then binary narrowing in log space. Every
//! evaluation is memoized by its canonical (5-decimal) learning rate.

mod backend;
mod cache;
mod controller;
mod report;
mod runner;
mod sandbox;
mod shutdown;
mod smoother;
mod trial;

use lrs_types::{SweepConfig, SweepResult};
use std::sync::Arc;

pub use backend::{JobBackend, ParameterOverrides};
pub use cache::{CacheStats, EvaluationCache, Evaluator};
pub use controller::{narrow_bounds, SearchBounds, SearchController, SearchParams, SearchState};
pub use report::{MetricsReporter, NullReporter, RecordingReporter, ReportEvent, TracingReporter};
pub use runner::{RunnerConfig, TrialRunner};
pub use sandbox::{SandboxBackend, SandboxConfig};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use smoother::{MetricSmoother, DEFAULT_SMOOTHING_ALPHA};
pub use trial::{IterationSummary, SweepId, SweepOutcome, SweepPhase, TrialRecord};

/// Run a complete sweep against `backend`.
///
/// `config.template_job_id` must already be resolved. Telemetry goes to
/// `reporter`; `shutdown` aborts the sweep between status polls.
pub async fn run_sweep<B: JobBackend>(
    config: &SweepConfig,
    backend: Arc<B>,
    reporter: Arc<dyn MetricsReporter>,
    shutdown: ShutdownSignal,
) -> SweepResult<SweepOutcome> {
    config.validate()?;
    let runner_config = RunnerConfig::from_sweep_config(config)?;
    run_sweep_with_runner(config, runner_config, backend, reporter, shutdown).await
}

/// Like [`run_sweep`], with trial settings supplied directly instead of
/// derived from `config`. Simulated backends use this to poll faster than
/// the one-second floor `SweepConfig` enforces.
pub async fn run_sweep_with_runner<B: JobBackend>(
    config: &SweepConfig,
    runner_config: RunnerConfig,
    backend: Arc<B>,
    reporter: Arc<dyn MetricsReporter>,
    shutdown: ShutdownSignal,
) -> SweepResult<SweepOutcome> {
    config.validate()?;
    let runner = TrialRunner::new(backend, runner_config, shutdown)?;
    let mut controller = SearchController::new(
        EvaluationCache::new(runner),
        SearchParams::from_config(config),
        reporter,
    );
    controller.run().await
}
