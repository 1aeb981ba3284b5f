//! Trial records and sweep run bookkeeping.

use chrono::{DateTime, Utc};
use lrs_types::{JobId, JobStatus, LearningRate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::controller::SearchBounds;

/// Unique sweep run identifier.
pub type SweepId = Uuid;

/// A finished evaluation of one candidate learning rate.
///
/// Created by the trial runner once a job reaches a terminal state with
/// results; owned by the evaluation cache afterwards and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub learning_rate: LearningRate,
    /// Job that produced the series (the last attempt).
    pub job_id: JobId,
    /// Number of clone+submit attempts, including failed ones.
    pub attempts: u32,
    pub final_status: JobStatus,
    pub raw_loss_series: Vec<f64>,
    /// Smoothed final loss; lower is better.
    pub fitness: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TrialRecord {
    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

/// Lifecycle state of a sweep.
///
/// `Init -> Expanding -> Narrowing -> Done`, with `Failed` reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepPhase {
    Init,
    Expanding,
    Narrowing,
    Done,
    Failed,
}

impl SweepPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: SweepPhase) -> bool {
        use SweepPhase::*;
        match (self, next) {
            (Init, Expanding) => true,
            (Expanding, Narrowing) | (Expanding, Done) => true,
            (Narrowing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Telemetry snapshot of one search step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u64,
    pub phase: SweepPhase,
    /// Candidate evaluated in this step (the midpoint while narrowing).
    pub learning_rate: LearningRate,
    pub fitness: f64,
    pub bounds: Option<SearchBounds>,
    pub best_lr: LearningRate,
    pub best_fitness: f64,
}

/// Result of a completed sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub id: SweepId,
    pub best_lr: LearningRate,
    pub best_fitness: f64,
    /// Bracket after the last narrowing step.
    pub bounds: SearchBounds,
    pub history: Vec<IterationSummary>,
    /// Every evaluated trial, ordered by learning rate.
    pub trials: Vec<TrialRecord>,
    pub cache: CacheStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
