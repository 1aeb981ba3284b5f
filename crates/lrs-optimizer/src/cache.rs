//! Memoization of learning rate -> fitness for the lifetime of one sweep.

use async_trait::async_trait;
use lrs_types::{LearningRate, SweepResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::trial::TrialRecord;

/// Produces a trial record for a canonical learning rate.
#[async_trait]
pub trait Evaluator: Send {
    async fn evaluate(&mut self, learning_rate: LearningRate) -> SweepResult<TrialRecord>;
}

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses whose evaluation returned an error.
    pub failures: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Canonical learning rate -> trial record.
///
/// At most one record exists per canonical key and a stored fitness is never
/// recomputed. Failed evaluations are not stored, so a later request for the
/// same key evaluates again.
#[derive(Debug)]
pub struct EvaluationCache<E> {
    evaluator: E,
    records: HashMap<LearningRate, TrialRecord>,
    stats: CacheStats,
}

impl<E: Evaluator> EvaluationCache<E> {
    pub fn new(evaluator: E) -> Self {
        Self {
            evaluator,
            records: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Fitness of `raw_lr` after canonicalization, evaluating on a miss.
    pub async fn get_fitness(&mut self, raw_lr: f64) -> SweepResult<f64> {
        let learning_rate = LearningRate::new(raw_lr)?;
        self.fitness_of(learning_rate).await
    }

    pub async fn fitness_of(&mut self, learning_rate: LearningRate) -> SweepResult<f64> {
        if let Some(record) = self.records.get(&learning_rate) {
            self.stats.hits += 1;
            debug!(lr = %learning_rate, fitness = record.fitness, "cache hit");
            return Ok(record.fitness);
        }

        self.stats.misses += 1;
        let record = match self.evaluator.evaluate(learning_rate).await {
            Ok(record) => record,
            Err(e) => {
                self.stats.failures += 1;
                return Err(e);
            }
        };
        let fitness = record.fitness;
        self.records.insert(learning_rate, record);
        Ok(fitness)
    }

    pub fn contains(&self, learning_rate: LearningRate) -> bool {
        self.records.contains_key(&learning_rate)
    }

    pub fn get(&self, learning_rate: LearningRate) -> Option<&TrialRecord> {
        self.records.get(&learning_rate)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// All records ordered by learning rate.
    pub fn records(&self) -> Vec<TrialRecord> {
        let mut records: Vec<TrialRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.learning_rate);
        records
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lrs_types::{JobId, JobStatus, SweepError};
    use std::collections::HashMap;

    /// Evaluates `lr * 10` and counts calls per key; fails the first
    /// `fail_first` calls for any key listed in `flaky`.
    #[derive(Default)]
    struct CountingEvaluator {
        calls: HashMap<LearningRate, u32>,
        flaky: HashMap<LearningRate, u32>,
    }

    #[async_trait]
    impl Evaluator for CountingEvaluator {
        async fn evaluate(&mut self, learning_rate: LearningRate) -> SweepResult<TrialRecord> {
            let calls = self.calls.entry(learning_rate).or_insert(0);
            *calls += 1;
            if let Some(remaining) = self.flaky.get_mut(&learning_rate) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SweepError::Internal("transient".into()));
                }
            }
            let now = Utc::now();
            Ok(TrialRecord {
                learning_rate,
                job_id: JobId::new(format!("job-{learning_rate}")),
                attempts: 1,
                final_status: JobStatus::Completed,
                raw_loss_series: vec![learning_rate.value() * 10.0],
                fitness: learning_rate.value() * 10.0,
                started_at: now,
                finished_at: now,
            })
        }
    }

    #[tokio::test]
    async fn evaluates_each_canonical_rate_once() {
        let mut cache = EvaluationCache::new(CountingEvaluator::default());
        let requests = [0.001, 0.003, 0.0010000001, 0.009, 0.003, 0.00299999, 0.001, 0.009];
        for lr in requests {
            cache.get_fitness(lr).await.unwrap();
        }

        assert_eq!(cache.len(), 3);
        for (lr, calls) in &cache.evaluator().calls {
            assert_eq!(*calls, 1, "lr {lr} evaluated {calls} times");
        }
        let stats = cache.stats();
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.hits, 5);
        assert!((stats.hit_rate() - 5.0 / 8.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn returns_stored_fitness() {
        let mut cache = EvaluationCache::new(CountingEvaluator::default());
        let first = cache.get_fitness(0.0045).await.unwrap();
        let second = cache.get_fitness(0.0045).await.unwrap();
        assert_eq!(first, second);
        assert!((first - 0.045).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let lr = LearningRate::new(0.0135).unwrap();
        let mut evaluator = CountingEvaluator::default();
        evaluator.flaky.insert(lr, 1);
        let mut cache = EvaluationCache::new(evaluator);

        assert!(cache.fitness_of(lr).await.is_err());
        assert!(!cache.contains(lr));

        let fitness = cache.fitness_of(lr).await.unwrap();
        assert!((fitness - 0.135).abs() < 1e-12);
        assert_eq!(cache.evaluator().calls[&lr], 2);
        assert_eq!(cache.stats().failures, 1);
        assert!(cache.get(lr).is_some());
    }

    #[tokio::test]
    async fn rejects_non_canonicalizable_rates() {
        let mut cache = EvaluationCache::new(CountingEvaluator::default());
        assert!(cache.get_fitness(0.0).await.is_err());
        assert!(cache.get_fitness(1e-9).await.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn records_are_sorted_by_rate() {
        let mut cache = EvaluationCache::new(CountingEvaluator::default());
        for lr in [0.027, 0.001, 0.009, 0.003] {
            cache.get_fitness(lr).await.unwrap();
        }
        let rates: Vec<f64> = cache.records().iter().map(|r| r.learning_rate.value()).collect();
        assert_eq!(rates, vec![0.001, 0.003, 0.009, 0.027]);
    }
}
