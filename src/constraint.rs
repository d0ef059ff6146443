/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Constraints: goals on a field bound, with a debounced runtime state.
//!
//! A [`Constraint`] filters operating points by their predicted (adaptor
//! corrected) bound. Its [`ConstraintTracker`] follows what the monitors see
//! for the running configuration and reports [`ConstraintStatus`] with
//! Schmitt-style debounce: a flip needs `inertia` consecutive agreeing votes.
//!
//! # Invariants
//!
//! - `>` / `>=` read the lower bound, `<` / `<=` the upper bound, at
//!   `confidence` standard deviations.
//! - The tracker starts [`ConstraintStatus::Satisfied`].
//! - Inertia 0 and 1 both flip on the first disagreeing vote.
//! - A vote that agrees with the reported status resets the streak.

use crate::adaptor::Corrections;
use crate::distribution::FieldValue;
use crate::evaluator::FieldSelector;
use crate::goal::Goal;
use crate::operating_point::{OperatingPoint, SegmentKind};

// ─── Tracker ────────────────────────────────────────────────────────────────

/// Reported state of a constraint for the running configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstraintStatus {
    /// Observations meet the goal.
    Satisfied,
    /// Observations have missed the goal for at least `inertia` votes.
    Violated,
}

/// Debounce state machine over constraint observations.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintTracker {
    reported: ConstraintStatus,
    streak: u32,
    inertia: u32,
}

impl ConstraintTracker {
    /// Fresh tracker in the optimistic state.
    pub fn new(inertia: u32) -> Self {
        Self { reported: ConstraintStatus::Satisfied, streak: 0, inertia }
    }

    /// Currently reported status.
    pub fn status(&self) -> ConstraintStatus {
        self.reported
    }

    /// Consecutive disagreeing votes seen so far.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Required streak length.
    pub fn inertia(&self) -> u32 {
        self.inertia
    }

    /// Feed one observation. Returns `true` when the reported status flips.
    pub fn observe(&mut self, satisfied: bool) -> bool {
        let vote = if satisfied { ConstraintStatus::Satisfied } else { ConstraintStatus::Violated };
        if vote == self.reported {
            self.streak = 0;
            return false;
        }
        self.streak = self.streak.saturating_add(1);
        if self.streak >= self.inertia.max(1) {
            self.reported = vote;
            self.streak = 0;
            true
        } else {
            false
        }
    }

    /// Back to the optimistic state.
    pub fn reset(&mut self) {
        self.reported = ConstraintStatus::Satisfied;
        self.streak = 0;
    }
}

// ─── Constraint ─────────────────────────────────────────────────────────────

/// A goal on one field of every operating point.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    selector: FieldSelector,
    goal: Goal,
    confidence: f64,
    priority: u32,
    tracker: ConstraintTracker,
}

impl Constraint {
    /// Build a constraint on `field` (its segment and index; the bound is
    /// derived from the goal direction and `confidence`).
    pub fn new(field: FieldSelector, goal: Goal, confidence: f64, inertia: u32, priority: u32) -> Self {
        let selector = if goal.comparison().is_lower_limit() {
            field.lower(confidence)
        } else {
            field.upper(confidence)
        };
        Self { selector, goal, confidence, priority, tracker: ConstraintTracker::new(inertia) }
    }

    /// Field bound this constraint reads.
    pub fn selector(&self) -> &FieldSelector {
        &self.selector
    }

    /// Goal.
    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    /// Move the goal target.
    pub fn set_goal_value(&mut self, target: f64) {
        self.goal.set_target(target);
    }

    /// Number of standard deviations used for the bound.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Priority; lower numbers are more important.
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Debounce tracker.
    pub fn tracker(&self) -> &ConstraintTracker {
        &self.tracker
    }

    /// Reported status for the running configuration.
    pub fn status(&self) -> ConstraintStatus {
        self.tracker.status()
    }

    /// Metric index watched by this constraint, if any.
    pub fn metric_index(&self) -> Option<usize> {
        match self.selector.segment {
            SegmentKind::Metrics => Some(self.selector.index),
            SegmentKind::Knobs => None,
        }
    }

    /// Corrected bound value of `op`.
    pub fn value_of<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
        corrections: &Corrections,
    ) -> f64
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.selector.read_corrected(op, corrections)
    }

    /// Whether the predicted bound of `op` meets the goal.
    pub fn admits<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
        corrections: &Corrections,
    ) -> bool
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.goal.check(self.value_of(op, corrections))
    }

    /// Relative violation magnitude of `op` (0 when admitted).
    pub fn violation<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
        corrections: &Corrections,
    ) -> f64
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.goal.relative_error(self.value_of(op, corrections))
    }

    /// Vote with an observed value of the running configuration.
    /// Returns `true` when the reported status flips.
    pub fn observe(&mut self, observed: f64) -> bool {
        let satisfied = self.goal.check(observed);
        self.tracker.observe(satisfied)
    }

    /// Forget every observation.
    pub fn reset(&mut self) {
        self.tracker.reset();
    }
}
