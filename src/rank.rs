/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Rank calculator: an [`Evaluator`] bound to an optimisation direction.
//!
//! # Invariants
//!
//! - Minimize orders ascending, Maximize descending.
//! - Equal ranks fall back to a caller-supplied stable key (the knowledge
//!   base insertion position), so the ordering is total and deterministic.
//! - NaN ranks order after every number in both directions.

use core::cmp::Ordering;

use crate::adaptor::Corrections;
use crate::distribution::FieldValue;
use crate::error::ConfigError;
use crate::evaluator::{Evaluator, FieldComposer, FieldTerm};
use crate::operating_point::OperatingPoint;

/// Optimisation direction of a rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RankObjective {
    /// Lower rank is better.
    #[default]
    Minimize,
    /// Higher rank is better.
    Maximize,
}

/// Scores operating points and orders them.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RankCalculator {
    objective: RankObjective,
    evaluator: Evaluator,
}

impl RankCalculator {
    /// Bind an evaluator to a direction.
    pub fn new(objective: RankObjective, evaluator: Evaluator) -> Self {
        Self { objective, evaluator }
    }

    /// Weighted sum of the given terms.
    pub fn linear(
        objective: RankObjective,
        terms: impl IntoIterator<Item = FieldTerm>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(objective, Evaluator::new(FieldComposer::Linear, terms)?))
    }

    /// Product of powers of the given terms.
    pub fn geometric(
        objective: RankObjective,
        terms: impl IntoIterator<Item = FieldTerm>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(objective, Evaluator::new(FieldComposer::Geometric, terms)?))
    }

    /// Rank every point 0, leaving the order to the tie-break key.
    pub fn unranked() -> Self {
        Self::new(RankObjective::Minimize, Evaluator::constant())
    }

    /// Direction.
    pub fn objective(&self) -> RankObjective {
        self.objective
    }

    /// Underlying evaluator.
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Rank on raw stored values.
    pub fn rank<K, M, const KN: usize, const MN: usize>(&self, op: &OperatingPoint<K, M, KN, MN>) -> f64
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.evaluator.evaluate(op)
    }

    /// Rank on adaptor-corrected values.
    pub fn rank_corrected<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
        corrections: &Corrections,
    ) -> f64
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.evaluator.evaluate_corrected(op, corrections)
    }

    /// Order two `(rank, tie_key)` pairs; `Less` means `a` is better.
    pub fn compare(&self, a: (f64, usize), b: (f64, usize)) -> Ordering {
        self.compare_ranks(a.0, b.0).then(a.1.cmp(&b.1))
    }

    /// Order two ranks by the objective only; `Less` means `a` is better.
    pub fn compare_ranks(&self, a: f64, b: f64) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match self.objective {
                RankObjective::Minimize => a.total_cmp(&b),
                RankObjective::Maximize => b.total_cmp(&a),
            },
        }
    }
}

impl Default for RankCalculator {
    fn default() -> Self {
        Self::unranked()
    }
}
