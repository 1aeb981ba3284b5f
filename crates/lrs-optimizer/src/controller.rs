//! Two-phase learning-rate search.
//!
//! Phase 1 grows the candidate geometrically from `start_lr` while the loss
//! keeps improving. Phase 2 runs a fixed number of binary-narrowing steps in
//! log space over the bracket phase 1 produced.
//!
//! Precondition: fitness is unimodal in `log(lr)` over the explored range.
//! This is assumed, not checked; on a multimodal curve the search settles on
//! whichever local minimum the expansion walks into.

use chrono::Utc;
use lrs_types::{internal_error, LearningRate, SweepConfig, SweepError, SweepResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cache::{EvaluationCache, Evaluator};
use crate::report::MetricsReporter;
use crate::trial::{IterationSummary, SweepId, SweepOutcome, SweepPhase};

/// Numeric knobs of the search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub start_lr: f64,
    pub max_lr: f64,
    pub search_mult: f64,
    /// Binary-narrowing steps.
    pub iterations: usize,
}

impl SearchParams {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            start_lr: config.start_lr,
            max_lr: config.max_lr,
            search_mult: config.search_mult,
            iterations: config.iterations,
        }
    }

    pub fn validate(&self) -> SweepResult<()> {
        if !(self.start_lr > 0.0 && self.start_lr <= self.max_lr) {
            return Err(SweepError::Config(format!(
                "need 0 < start_lr ({}) <= max_lr ({})",
                self.start_lr, self.max_lr
            )));
        }
        if !(self.search_mult.is_finite() && self.search_mult > 1.0) {
            return Err(SweepError::Config(format!(
                "search_mult must be greater than 1, got {}",
                self.search_mult
            )));
        }
        Ok(())
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

/// Log-space interval believed to contain the optimum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub lr_low: f64,
    pub lr_high: f64,
}

impl SearchBounds {
    pub fn new(lr_low: f64, lr_high: f64) -> Self {
        Self { lr_low, lr_high }
    }

    /// `[center / mult, center * mult]`.
    pub fn around(center: f64, mult: f64) -> Self {
        Self::new(center / mult, center * mult)
    }

    pub fn point(lr: f64) -> Self {
        Self::new(lr, lr)
    }

    /// `lr_high / lr_low`; 1 for a collapsed bracket.
    pub fn ratio(&self) -> f64 {
        self.lr_high / self.lr_low
    }

    /// Zero-width or inverted.
    pub fn is_degenerate(&self) -> bool {
        !(self.lr_low < self.lr_high)
    }

    pub fn log_midpoint(&self) -> f64 {
        10f64.powf((self.lr_low.log10() + self.lr_high.log10()) / 2.0)
    }

    pub fn contains(&self, lr: f64, rel_tolerance: f64) -> bool {
        lr >= self.lr_low * (1.0 - rel_tolerance) && lr <= self.lr_high * (1.0 + rel_tolerance)
    }
}

/// Best point found so far and the telemetry step counter.
///
/// Passed into and returned from each phase; `best_fitness` never increases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    pub best_lr: Option<LearningRate>,
    pub best_fitness: f64,
    pub iteration: u64,
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            best_lr: None,
            best_fitness: f64::INFINITY,
            iteration: 0,
        }
    }

    /// Record an evaluation. The first one always becomes the best; after
    /// that only a strictly lower fitness replaces it.
    pub fn observe(&mut self, learning_rate: LearningRate, fitness: f64) -> bool {
        if self.best_lr.is_none() || fitness < self.best_fitness {
            self.best_lr = Some(learning_rate);
            self.best_fitness = fitness;
            true
        } else {
            false
        }
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Narrowing rule for one binary step, in priority order:
/// low beats mid -> keep the left half; high beats mid -> keep the right
/// half; otherwise pull both ends halfway (in log space) toward mid.
pub fn narrow_bounds(
    bounds: SearchBounds,
    mid: f64,
    low_fitness: f64,
    mid_fitness: f64,
    high_fitness: f64,
) -> SearchBounds {
    if low_fitness < mid_fitness {
        SearchBounds::new(bounds.lr_low, mid)
    } else if high_fitness < mid_fitness {
        SearchBounds::new(mid, bounds.lr_high)
    } else {
        let log_mid = mid.log10();
        SearchBounds::new(
            10f64.powf((bounds.lr_low.log10() + log_mid) / 2.0),
            10f64.powf((bounds.lr_high.log10() + log_mid) / 2.0),
        )
    }
}

/// Drives the search. Evaluations are strictly sequential: every candidate
/// depends on the fitness of the one before it.
pub struct SearchController<E> {
    id: SweepId,
    cache: EvaluationCache<E>,
    params: SearchParams,
    reporter: Arc<dyn MetricsReporter>,
    phase: SweepPhase,
    history: Vec<IterationSummary>,
}

impl<E: Evaluator> SearchController<E> {
    pub fn new(
        cache: EvaluationCache<E>,
        params: SearchParams,
        reporter: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cache,
            params,
            reporter,
            phase: SweepPhase::Init,
            history: Vec::new(),
        }
    }

    /// Run id, fixed at construction; also the `id` of the outcome.
    pub fn id(&self) -> SweepId {
        self.id
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    pub fn history(&self) -> &[IterationSummary] {
        &self.history
    }

    pub fn cache(&self) -> &EvaluationCache<E> {
        &self.cache
    }

    /// Run both phases to completion. Any evaluation error aborts the sweep
    /// and moves it to `Failed`; no partial result is returned.
    pub async fn run(&mut self) -> SweepResult<SweepOutcome> {
        let started_at = Utc::now();
        info!(
            sweep_id = %self.id,
            start_lr = self.params.start_lr,
            max_lr = self.params.max_lr,
            "sweep started"
        );
        match self.search().await {
            Ok((state, bounds)) => {
                let best_lr = state
                    .best_lr
                    .ok_or_else(|| SweepError::Internal("sweep finished without a best point".into()))?;
                info!(
                    sweep_id = %self.id,
                    best_lr = %best_lr,
                    best_fitness = state.best_fitness,
                    evaluations = self.cache.len(),
                    "best learning rate found"
                );
                Ok(SweepOutcome {
                    id: self.id,
                    best_lr,
                    best_fitness: state.best_fitness,
                    bounds,
                    history: self.history.clone(),
                    trials: self.cache.records(),
                    cache: self.cache.stats(),
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err(e) => {
                if self.phase.can_transition_to(SweepPhase::Failed) {
                    self.phase = SweepPhase::Failed;
                }
                error!(sweep_id = %self.id, error = %e, "sweep failed");
                Err(e)
            }
        }
    }

    async fn search(&mut self) -> SweepResult<(SearchState, SearchBounds)> {
        self.params.validate()?;
        self.transition(SweepPhase::Expanding)?;
        let (state, bounds) = self.expand(SearchState::new()).await?;

        if self.params.iterations == 0 {
            self.transition(SweepPhase::Done)?;
            return Ok((state, bounds));
        }

        info!(
            sweep_id = %self.id,
            low = bounds.lr_low,
            high = bounds.lr_high,
            "proceeding with binary search"
        );
        self.transition(SweepPhase::Narrowing)?;
        let (state, bounds) = self.narrow(state, bounds).await?;
        self.transition(SweepPhase::Done)?;
        Ok((state, bounds))
    }

    fn transition(&mut self, next: SweepPhase) -> SweepResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(internal_error!(
                "invalid sweep transition {:?} -> {:?}",
                self.phase, next
            ));
        }
        debug!(from = ?self.phase, to = ?next, "sweep phase");
        self.phase = next;
        Ok(())
    }

    /// Phase 1: multiply the candidate by `search_mult` while fitness
    /// improves and the next candidate stays within `max_lr`. Returns the
    /// bracket `[best / mult, best * mult]`.
    pub async fn expand(
        &mut self,
        mut state: SearchState,
    ) -> SweepResult<(SearchState, SearchBounds)> {
        let mut candidate = self.params.start_lr;
        loop {
            let lr = LearningRate::new(candidate)?;
            let fitness = self.cache.fitness_of(lr).await?;
            let improved = state.observe(lr, fitness);
            info!(
                sweep_id = %self.id,
                iteration = state.iteration,
                lr = %lr,
                fitness,
                improved,
                "expansion step"
            );
            self.record(
                SweepPhase::Expanding,
                &mut state,
                &[("value", lr, fitness)],
                None,
            )?;

            if !improved {
                break;
            }
            let next = candidate * self.params.search_mult;
            if next > self.params.max_lr {
                debug!(next, max_lr = self.params.max_lr, "expansion reached max_lr");
                break;
            }
            candidate = next;
        }

        let best = state
            .best_lr
            .ok_or_else(|| SweepError::Internal("expansion evaluated no candidate".into()))?;
        Ok((state, SearchBounds::around(best.value(), self.params.search_mult)))
    }

    /// Phase 2: `iterations` binary-narrowing steps.
    pub async fn narrow(
        &mut self,
        mut state: SearchState,
        mut bounds: SearchBounds,
    ) -> SweepResult<(SearchState, SearchBounds)> {
        for _ in 0..self.params.iterations {
            (state, bounds) = self.narrow_step(state, bounds).await?;
        }
        Ok((state, bounds))
    }

    /// One narrowing step. A zero-width or inverted bracket, or one whose
    /// ends canonicalize to the same rate, collapses to a single point.
    pub async fn narrow_step(
        &mut self,
        mut state: SearchState,
        bounds: SearchBounds,
    ) -> SweepResult<(SearchState, SearchBounds)> {
        let low = LearningRate::new(bounds.lr_low)?;
        let high = LearningRate::new(bounds.lr_high)?;

        if bounds.is_degenerate() || low == high {
            let fitness = self.cache.fitness_of(low).await?;
            state.observe(low, fitness);
            let collapsed = SearchBounds::point(low.value());
            debug!(lr = %low, "bracket collapsed to a single point");
            self.record(
                SweepPhase::Narrowing,
                &mut state,
                &[("mid", low, fitness)],
                Some(collapsed),
            )?;
            return Ok((state, collapsed));
        }

        let mid_raw = bounds.log_midpoint();
        let mid = LearningRate::new(mid_raw)?;
        let mid_fitness = self.cache.fitness_of(mid).await?;
        let low_fitness = self.cache.fitness_of(low).await?;
        let high_fitness = self.cache.fitness_of(high).await?;

        state.observe(low, low_fitness);
        state.observe(mid, mid_fitness);
        state.observe(high, high_fitness);

        let next = narrow_bounds(bounds, mid_raw, low_fitness, mid_fitness, high_fitness);
        info!(
            sweep_id = %self.id,
            iteration = state.iteration,
            lr = %mid,
            fitness = mid_fitness,
            low = next.lr_low,
            high = next.lr_high,
            "narrowing step"
        );
        self.record(
            SweepPhase::Narrowing,
            &mut state,
            &[
                ("low", low, low_fitness),
                ("mid", mid, mid_fitness),
                ("high", high, high_fitness),
            ],
            Some(next),
        )?;
        Ok((state, next))
    }

    /// Emit telemetry for one step and advance the step counter.
    fn record(
        &mut self,
        phase: SweepPhase,
        state: &mut SearchState,
        points: &[(&str, LearningRate, f64)],
        bounds: Option<SearchBounds>,
    ) -> SweepResult<()> {
        let iteration = state.iteration;
        let best_lr = state
            .best_lr
            .ok_or_else(|| SweepError::Internal("telemetry before first evaluation".into()))?;

        for (track, lr, fitness) in points {
            self.reporter.report("loss", track, *fitness, iteration);
            self.reporter.report("lr", track, lr.value(), iteration);
        }
        self.reporter.report("best", "loss", state.best_fitness, iteration);
        self.reporter.report("best", "lr", best_lr.value(), iteration);
        if let Some(b) = bounds {
            self.reporter.report("bounds", "low", b.lr_low, iteration);
            self.reporter.report("bounds", "high", b.lr_high, iteration);
        }

        // the candidate of a narrowing step is its midpoint
        let (_, learning_rate, fitness) = points
            .iter()
            .find(|(track, _, _)| *track == "mid")
            .or_else(|| points.first())
            .copied()
            .ok_or_else(|| SweepError::Internal("telemetry without points".into()))?;

        self.history.push(IterationSummary {
            iteration,
            phase,
            learning_rate,
            fitness,
            bounds,
            best_lr,
            best_fitness: state.best_fitness,
        });
        state.iteration += 1;
        Ok(())
    }
}
