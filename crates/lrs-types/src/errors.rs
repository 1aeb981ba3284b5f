use thiserror::Error;

/// Main error type for a sweep run
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Sweep cancelled (in-flight job: {})", .job_id.as_deref().unwrap_or("none"))]
    Cancelled { job_id: Option<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl SweepError {
    /// Whether the error came from the tracking backend itself rather than
    /// from a trial that ran and failed.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, SweepError::Backend(_))
    }
}

/// Errors raised by the job / experiment-tracking backend.
///
/// These are never retried by the sweep; the backend client owns its own
/// transport retries.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Backend call {endpoint} failed: {message}")]
    Api { endpoint: String, message: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Invalid backend response: {message}")]
    InvalidResponse { message: String },
}

/// Fatal trial outcomes.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Trial for lr {learning_rate} failed on all {attempts} attempts (last job {job_id})")]
    RetriesExhausted {
        learning_rate: f64,
        job_id: String,
        attempts: u32,
    },

    #[error("Job {job_id} finished without reporting metric {metric}")]
    EmptySeries { job_id: String, metric: String },
}

/// Result type alias for sweep operations
pub type SweepResult<T> = Result<T, SweepError>;

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Config(format!($($arg)*))
    };
}
