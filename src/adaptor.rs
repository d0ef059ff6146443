/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Field adaptors: runtime feedback from monitors onto predicted metrics.
//!
//! Every adaptor watches one metric of the running configuration. When the
//! monitored value leaves the one-sigma band around the prediction, the
//! adaptor records a correction sample; the error coefficient is the mean of
//! the last `inertia` samples. Ranking and constraints then read corrected
//! values through an immutable [`Corrections`] snapshot.
//!
//! ```text
//! multiplicative   sample = predicted / observed     corrected = predicted / coefficient
//! additive         sample = observed − predicted     corrected = predicted + coefficient
//! ```
//!
//! # Invariants
//!
//! - The window always holds exactly `inertia` samples (at least one),
//!   initially the neutral value, so a fresh adaptor applies no correction.
//! - An empty monitor leaves the coefficient untouched.
//! - A zero observed or predicted value yields the neutral multiplicative
//!   sample and an [`DegradedCondition::UndefinedCorrection`].
//! - Each adaptor sits behind its own mutex; adaptors of different metrics
//!   never contend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;

use crate::distribution::FieldValue;
use crate::error::{ConfigError, DegradedCondition};
use crate::monitor::Monitor;
use crate::operating_point::{FieldReading, OperatingPoint, SegmentKind};
use crate::telemetry::Telemetry;

// ─── Corrections ────────────────────────────────────────────────────────────

/// How a coefficient is applied to a predicted value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CorrectionMode {
    /// Scale the prediction.
    #[default]
    Multiplicative,
    /// Shift the prediction.
    Additive,
}

impl CorrectionMode {
    /// Coefficient that leaves a prediction unchanged.
    pub const fn neutral(self) -> f64 {
        match self {
            Self::Multiplicative => 1.0,
            Self::Additive => 0.0,
        }
    }

    /// Apply `coefficient` to `predicted`.
    #[inline]
    pub fn apply(self, predicted: f64, coefficient: f64) -> f64 {
        match self {
            Self::Multiplicative if coefficient == 0.0 => predicted,
            Self::Multiplicative => predicted / coefficient,
            Self::Additive => predicted + coefficient,
        }
    }
}

/// Immutable per-metric correction table taken at selection time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Corrections {
    entries: Vec<Option<(CorrectionMode, f64)>>,
}

impl Corrections {
    /// No correction on any metric.
    pub fn none() -> Self {
        Self::default()
    }

    /// Multiplicative coefficients by metric index.
    pub fn from_coefficients(coefficients: &[Option<f64>]) -> Self {
        Self {
            entries: coefficients
                .iter()
                .map(|c| c.map(|c| (CorrectionMode::Multiplicative, c)))
                .collect(),
        }
    }

    /// Coefficients with an explicit mode, by metric index.
    pub fn from_modes(entries: &[Option<(CorrectionMode, f64)>]) -> Self {
        Self { entries: entries.to_vec() }
    }

    fn set(&mut self, metric: usize, mode: CorrectionMode, coefficient: f64) {
        if self.entries.len() <= metric {
            self.entries.resize(metric + 1, None);
        }
        self.entries[metric] = Some((mode, coefficient));
    }

    /// Corrected value of metric `metric` predicted at `predicted`.
    #[inline]
    pub fn correct(&self, metric: usize, predicted: f64) -> f64 {
        match self.entries.get(metric) {
            Some(Some((mode, coefficient))) => mode.apply(predicted, *coefficient),
            _ => predicted,
        }
    }

    /// Coefficient of one metric, if adapted.
    pub fn coefficient(&self, metric: usize) -> Option<f64> {
        self.entries.get(metric).copied().flatten().map(|(_, c)| c)
    }
}

// ─── FieldAdaptor ───────────────────────────────────────────────────────────

/// Runtime error model of one metric.
pub trait FieldAdaptor: Send + core::fmt::Debug {
    /// Index of the adapted metric.
    fn metric(&self) -> usize;

    /// How the coefficient is applied.
    fn mode(&self) -> CorrectionMode;

    /// Monitor the adaptor reads.
    fn monitor(&self) -> &Monitor;

    /// Compare the monitor against the prediction of the running
    /// configuration and update the coefficient.
    ///
    /// Returns the new coefficient, or `None` when the monitor had nothing.
    fn evaluate_error(&mut self, predicted: &FieldReading) -> Option<f64>;

    /// Current coefficient. No side effects.
    fn error_coefficient(&self) -> f64;

    /// Apply the current coefficient to a predicted value.
    fn correct(&self, predicted: f64) -> f64 {
        self.mode().apply(predicted, self.error_coefficient())
    }

    /// Overwrite the coefficient, e.g. when restoring a previous run.
    fn set_error_coefficient(&mut self, coefficient: f64);

    /// Forget every correction sample.
    fn clear_observations(&mut self);

    /// One-line human-readable status.
    fn status(&self) -> String;
}

/// The one-sigma adaptor.
///
/// A sample is only taken from an observation outside
/// `[mean − σ, mean + σ]` of the prediction; inside it the sample is neutral.
#[derive(Debug)]
pub struct OneSigmaAdaptor {
    metric: usize,
    monitor: Monitor,
    mode: CorrectionMode,
    window: VecDeque<f64>,
    inertia: usize,
    telemetry: Arc<Telemetry>,
}

impl OneSigmaAdaptor {
    /// Adaptor for `metric` averaging the last `inertia` samples.
    pub fn new(
        metric: usize,
        monitor: Monitor,
        inertia: usize,
        mode: CorrectionMode,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let inertia = inertia.max(1);
        let window = core::iter::repeat(mode.neutral()).take(inertia).collect();
        Self { metric, monitor, mode, window, inertia, telemetry }
    }

    /// Window size.
    pub fn inertia(&self) -> usize {
        self.inertia
    }

    fn sample(&self, observed: f64, predicted: &FieldReading) -> f64 {
        let mean = predicted.average();
        let sd = predicted.standard_deviation();
        if observed >= mean - sd && observed <= mean + sd {
            return self.mode.neutral();
        }
        match self.mode {
            CorrectionMode::Additive => observed - mean,
            CorrectionMode::Multiplicative => {
                if observed == 0.0 || mean == 0.0 {
                    self.telemetry
                        .degraded(&DegradedCondition::UndefinedCorrection { metric: self.metric });
                    self.mode.neutral()
                } else {
                    mean / observed
                }
            }
        }
    }
}

impl FieldAdaptor for OneSigmaAdaptor {
    fn metric(&self) -> usize {
        self.metric
    }

    fn mode(&self) -> CorrectionMode {
        self.mode
    }

    fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    fn evaluate_error(&mut self, predicted: &FieldReading) -> Option<f64> {
        let observed = self.monitor.average()?;
        let sample = self.sample(observed, predicted);
        self.window.pop_front();
        self.window.push_back(sample);
        let coefficient = self.error_coefficient();
        tracing::debug!(
            block = %self.telemetry.block(),
            metric = self.metric,
            observed,
            predicted = predicted.average(),
            coefficient,
            "field adaptor updated"
        );
        Some(coefficient)
    }

    fn error_coefficient(&self) -> f64 {
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    fn set_error_coefficient(&mut self, coefficient: f64) {
        self.window.iter_mut().for_each(|s| *s = coefficient);
    }

    fn clear_observations(&mut self) {
        let neutral = self.mode.neutral();
        self.set_error_coefficient(neutral);
    }

    fn status(&self) -> String {
        format!(
            "metric {} | size = {} | coefficient_error = {}",
            self.metric,
            self.window.len(),
            self.error_coefficient()
        )
    }
}

// ─── KnowledgeAdaptor ───────────────────────────────────────────────────────

/// The adaptors of one block, one per adapted metric.
#[derive(Debug, Default)]
pub struct KnowledgeAdaptor {
    adaptors: HashMap<usize, Mutex<Box<dyn FieldAdaptor>>>,
}

fn lock(adaptor: &Mutex<Box<dyn FieldAdaptor>>) -> MutexGuard<'_, Box<dyn FieldAdaptor>> {
    adaptor.lock().unwrap_or_else(PoisonError::into_inner)
}

impl KnowledgeAdaptor {
    /// No adaptors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adaptor; one per metric.
    pub fn add(&mut self, adaptor: Box<dyn FieldAdaptor>) -> Result<(), ConfigError> {
        let metric = adaptor.metric();
        if self.adaptors.contains_key(&metric) {
            return Err(ConfigError::DuplicateAdaptor { index: metric });
        }
        self.adaptors.insert(metric, Mutex::new(adaptor));
        Ok(())
    }

    /// Check every adapted metric exists.
    pub fn validate_indices(&self, metrics: usize) -> Result<(), ConfigError> {
        match self.adaptors.keys().find(|&&m| m >= metrics) {
            Some(&index) => Err(ConfigError::IndexOutOfRange {
                segment: SegmentKind::Metrics,
                index,
                size: metrics,
            }),
            None => Ok(()),
        }
    }

    /// Number of adaptors.
    pub fn len(&self) -> usize {
        self.adaptors.len()
    }

    /// `true` with no adaptors.
    pub fn is_empty(&self) -> bool {
        self.adaptors.is_empty()
    }

    /// Feed every adaptor the prediction of the running configuration.
    ///
    /// Returns how many adaptors had an observation to compare.
    pub fn evaluate_error<K, M, const KN: usize, const MN: usize>(
        &self,
        running: &OperatingPoint<K, M, KN, MN>,
    ) -> usize
    where
        K: FieldValue,
        M: FieldValue,
    {
        let mut updated = 0;
        for (&metric, adaptor) in &self.adaptors {
            let Ok(predicted) = running.field(SegmentKind::Metrics, metric) else {
                continue;
            };
            if lock(adaptor).evaluate_error(&predicted).is_some() {
                updated += 1;
            }
        }
        updated
    }

    /// Coefficient of one metric.
    pub fn error_coefficient(&self, metric: usize) -> Option<f64> {
        self.adaptors.get(&metric).map(|a| lock(a).error_coefficient())
    }

    /// Monitor of one metric.
    pub fn monitor(&self, metric: usize) -> Option<Monitor> {
        self.adaptors.get(&metric).map(|a| lock(a).monitor().clone())
    }

    /// Snapshot of every coefficient.
    pub fn corrections(&self) -> Corrections {
        let mut c = Corrections::none();
        for (&metric, adaptor) in &self.adaptors {
            let a = lock(adaptor);
            c.set(metric, a.mode(), a.error_coefficient());
        }
        c
    }

    /// Coefficients sorted by metric, for persistence across runs.
    pub fn observation_errors(&self) -> Vec<(usize, f64)> {
        let mut errors: Vec<(usize, f64)> = self
            .adaptors
            .iter()
            .map(|(&m, a)| (m, lock(a).error_coefficient()))
            .collect();
        errors.sort_by_key(|&(m, _)| m);
        errors
    }

    /// Restore coefficients; unknown metrics are ignored.
    pub fn set_observation_errors(&self, errors: &[(usize, f64)]) {
        for &(metric, coefficient) in errors {
            if let Some(a) = self.adaptors.get(&metric) {
                lock(a).set_error_coefficient(coefficient);
            }
        }
    }

    /// Clear every adaptor window.
    pub fn reset(&self) {
        for adaptor in self.adaptors.values() {
            lock(adaptor).clear_observations();
        }
    }

    /// Status lines sorted by metric.
    pub fn status(&self) -> Vec<String> {
        let mut metrics: Vec<usize> = self.adaptors.keys().copied().collect();
        metrics.sort_unstable();
        metrics
            .into_iter()
            .filter_map(|m| self.adaptors.get(&m).map(|a| lock(a).status()))
            .collect()
    }
}
