//! Fire-and-forget telemetry sinks for sweep progress.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Append-only sink for per-iteration scalars.
///
/// `report` must return promptly and never fail; implementations that talk
/// to a remote service queue the value and deliver it in the background.
/// The parent context (e.g. the sweep task the scalars belong to) is owned by
/// the implementation.
pub trait MetricsReporter: Send + Sync {
    fn report(&self, series: &str, track: &str, value: f64, iteration: u64);
}

/// A single emitted scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub series: String,
    pub track: String,
    pub value: f64,
    pub iteration: u64,
}

/// Writes every scalar to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl MetricsReporter for TracingReporter {
    fn report(&self, series: &str, track: &str, value: f64, iteration: u64) {
        info!(series, track, value, iteration, "sweep scalar");
    }
}

/// Keeps every scalar in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }

    /// Values of one `series`/`track` pair in emission order.
    pub fn values(&self, series: &str, track: &str) -> Vec<f64> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.series == series && e.track == track)
            .map(|e| e.value)
            .collect()
    }
}

impl MetricsReporter for RecordingReporter {
    fn report(&self, series: &str, track: &str, value: f64, iteration: u64) {
        self.events.lock().push(ReportEvent {
            series: series.to_string(),
            track: track.to_string(),
            value,
            iteration,
        });
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl MetricsReporter for NullReporter {
    fn report(&self, _series: &str, _track: &str, _value: f64, _iteration: u64) {}
}
