//! Remote job identifiers, lifecycle states and reported metrics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a job by the tracking backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a remote job.
///
/// Backends map their own status vocabulary onto this closed set at the
/// boundary so the search logic never sees raw status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Terminal with a usable metric series.
    pub fn has_results(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One reported scalar observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub step: u64,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(step: u64, value: f64) -> Self {
        Self { step, value }
    }
}

/// Names a scalar series on the backend: a metric title and its variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub metric: String,
    pub variant: String,
}

impl MetricKey {
    /// Key whose variant has the same name as the metric (e.g. `loss/loss`).
    pub fn new(metric: impl Into<String>) -> Self {
        let metric = metric.into();
        Self {
            variant: metric.clone(),
            metric,
        }
    }

    pub fn with_variant(metric: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            variant: variant.into(),
        }
    }
}

impl Default for MetricKey {
    fn default() -> Self {
        Self::new("loss")
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.metric, self.variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(JobStatus::Failed.is_terminal());

        assert!(JobStatus::Stopped.has_results());
        assert!(!JobStatus::Failed.has_results());
    }

    #[test]
    fn default_metric_key_is_loss() {
        let key = MetricKey::default();
        assert_eq!(key.metric, "loss");
        assert_eq!(key.variant, "loss");
        assert_eq!(key.to_string(), "loss/loss");
    }

    #[test]
    fn job_id_is_transparent_in_json() {
        let id = JobId::new("020a9883f8584b1ab9e53613db3c7edd");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"020a9883f8584b1ab9e53613db3c7edd\"");
        assert_eq!(serde_json::to_string(&JobStatus::Completed).unwrap(), "\"completed\"");
    }
}
