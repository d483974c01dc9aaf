//! Constructor options for the CPR preconditioner.
//!
//! Everything the outer solver can tune lives here: the weight strategy
//! and its scaling, the rebuild/refresh schedules for the pressure
//! hierarchy, and the optional inner-Krylov tightening of the pressure
//! solve.

use crate::preconditioner::weights::{WeightScaling, WeightStrategy};
use crate::utils::schedule::UpdateInterval;

pub struct CprConfig {
    /// Weight-computation method.
    pub strategy: WeightStrategy,
    /// Post-solve normalization of the weight columns.
    pub weight_scaling: WeightScaling,
    /// How often a full pressure-hierarchy rebuild may fire.
    pub update_frequency: usize,
    /// Scheduling granularity for full rebuilds.
    pub update_interval: UpdateInterval,
    /// How often a partial (numerics-only) refresh may fire.
    pub update_frequency_partial: usize,
    /// Scheduling granularity for partial refreshes.
    pub update_interval_partial: UpdateInterval,
    /// Whether the partial-refresh branch is taken at all.
    pub partial_update: bool,
    /// When set, tighten the pressure solve with inner FGMRES at this
    /// relative tolerance instead of a single multigrid cycle.
    pub pressure_rtol: Option<f64>,
    /// Minimum cells per rayon work unit in the parallel loops.
    pub min_batch: usize,
}

impl Default for CprConfig {
    fn default() -> Self {
        Self {
            strategy: WeightStrategy::QuasiImpes,
            weight_scaling: WeightScaling::Unit,
            update_frequency: 1,
            update_interval: UpdateInterval::Iteration,
            update_frequency_partial: 1,
            update_interval_partial: UpdateInterval::Iteration,
            partial_update: true,
            pressure_rtol: None,
            min_batch: 512,
        }
    }
}

impl CprConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_strategy(mut self, strategy: WeightStrategy) -> Self {
        self.strategy = strategy;
        self
    }
    pub fn with_weight_scaling(mut self, scaling: WeightScaling) -> Self {
        self.weight_scaling = scaling;
        self
    }
    pub fn with_update_schedule(mut self, interval: UpdateInterval, frequency: usize) -> Self {
        self.update_interval = interval;
        self.update_frequency = frequency;
        self
    }
    pub fn with_partial_schedule(mut self, interval: UpdateInterval, frequency: usize) -> Self {
        self.update_interval_partial = interval;
        self.update_frequency_partial = frequency;
        self
    }
    pub fn with_partial_update(mut self, enabled: bool) -> Self {
        self.partial_update = enabled;
        self
    }
    pub fn with_pressure_rtol(mut self, rtol: f64) -> Self {
        self.pressure_rtol = Some(rtol);
        self
    }
    pub fn with_min_batch(mut self, min_batch: usize) -> Self {
        self.min_batch = min_batch;
        self
    }
}
