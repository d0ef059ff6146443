/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Operating regimes and the selection they drive.
//!
//! A [`State`] is a rank calculator plus constraints keyed by priority. Given a
//! knowledge base snapshot and the current corrections, [`State::select`]
//! filters, ranks and, when nothing is eligible, falls back to the least
//! violating point.
//!
//! # Invariants
//!
//! - A point is eligible when every constraint admits its corrected bound.
//! - While any constraint reports Violated, the running configuration is
//!   ineligible whatever its predictions say.
//! - A point whose corrected rank is undefined is never ranked. Leaving
//!   points out this way degrades the selection.
//! - The fallback minimises the summed relative violation; ties go to rank,
//!   then to insertion order. It is reported, never raised.
//! - Selection is a pure function of (snapshot, corrections, tracker states,
//!   running configuration).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adaptor::Corrections;
use crate::constraint::{Constraint, ConstraintStatus};
use crate::distribution::FieldValue;
use crate::error::{ConfigError, DegradedCondition};
use crate::knowledge::KnowledgeBase;
use crate::operating_point::OperatingPoint;
use crate::rank::RankCalculator;

// ─── Selection ──────────────────────────────────────────────────────────────

/// Outcome quality of a selection.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionStatus {
    /// The point satisfies every constraint.
    Optimal,
    /// Best-effort fallback.
    Degraded(DegradedCondition),
}

impl SelectionStatus {
    /// `true` for [`SelectionStatus::Degraded`].
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// The configuration chosen for the application.
#[derive(Clone, Debug)]
pub struct Selection<K, M, const KN: usize, const MN: usize> {
    /// Chosen operating point.
    pub point: Arc<OperatingPoint<K, M, KN, MN>>,
    /// Its corrected rank.
    pub rank: f64,
    /// Whether it satisfies every constraint.
    pub status: SelectionStatus,
    /// Version of the knowledge base it was chosen from.
    pub knowledge_version: u64,
    /// `true` when the point differs from the running configuration.
    pub changed: bool,
}

impl<K: FieldValue, M: FieldValue, const KN: usize, const MN: usize> Selection<K, M, KN, MN> {
    /// Knob means to apply.
    pub fn knob_values(&self) -> [f64; KN] {
        self.point.knobs().averages()
    }

    /// Predicted metric means.
    pub fn metric_values(&self) -> [f64; MN] {
        self.point.metrics().averages()
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

/// One operating regime of a block.
#[derive(Clone, Debug)]
pub struct State {
    name: String,
    rank: RankCalculator,
    constraints: BTreeMap<u32, Constraint>,
}

impl State {
    /// A state with the given rank and no constraints.
    pub fn new(name: impl Into<String>, rank: RankCalculator) -> Self {
        Self { name: name.into(), rank, constraints: BTreeMap::new() }
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rank calculator.
    pub fn rank(&self) -> &RankCalculator {
        &self.rank
    }

    /// Replace the rank calculator.
    pub fn set_rank(&mut self, rank: RankCalculator) {
        self.rank = rank;
    }

    /// Constraints by ascending priority number.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    /// Add a constraint; priorities are unique within a state.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<(), ConfigError> {
        let priority = constraint.priority();
        if self.constraints.contains_key(&priority) {
            return Err(ConfigError::DuplicatePriority { state: self.name.clone(), priority });
        }
        self.constraints.insert(priority, constraint);
        Ok(())
    }

    /// Remove the constraint at `priority`.
    pub fn remove_constraint(&mut self, priority: u32) -> Result<Constraint, ConfigError> {
        self.constraints.remove(&priority).ok_or_else(|| ConfigError::UnknownConstraint {
            state: self.name.clone(),
            priority,
        })
    }

    /// Move the goal target of the constraint at `priority`.
    pub fn set_goal_value(&mut self, priority: u32, target: f64) -> Result<(), ConfigError> {
        let name = &self.name;
        let c = self.constraints.get_mut(&priority).ok_or_else(|| {
            ConfigError::UnknownConstraint { state: name.clone(), priority }
        })?;
        c.set_goal_value(target);
        Ok(())
    }

    /// Check field indices and geometric rank definedness against a base.
    pub fn validate<K, M, const KN: usize, const MN: usize>(
        &self,
        knowledge: &KnowledgeBase<K, M, KN, MN>,
    ) -> Result<(), ConfigError>
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.rank.evaluator().validate_indices(KN, MN)?;
        for c in self.constraints.values() {
            c.selector().check_index(KN, MN)?;
        }
        self.rank.evaluator().validate_points(knowledge.iter())
    }

    /// Whether any constraint currently reports Violated.
    pub fn any_violated(&self) -> bool {
        self.constraints.values().any(|c| c.status() == ConstraintStatus::Violated)
    }

    /// Feed observations of the running configuration to every constraint
    /// watching a metric. Returns `true` when any reported status flipped.
    pub fn observe(&mut self, observed_metric: impl Fn(usize) -> Option<f64>) -> bool {
        let mut changed = false;
        for c in self.constraints.values_mut() {
            if let Some(value) = c.metric_index().and_then(&observed_metric) {
                if c.observe(value) {
                    tracing::debug!(
                        state = %self.name,
                        priority = c.priority(),
                        status = ?c.status(),
                        value,
                        "constraint status changed"
                    );
                    changed = true;
                }
            }
        }
        changed
    }

    /// Reset every debounce tracker.
    pub fn reset_trackers(&mut self) {
        self.constraints.values_mut().for_each(Constraint::reset);
    }

    /// Pick the best point of `knowledge`.
    ///
    /// `running` is the configuration id currently applied, if any.
    pub fn select<K, M, const KN: usize, const MN: usize>(
        &self,
        knowledge: &KnowledgeBase<K, M, KN, MN>,
        corrections: &Corrections,
        running: Option<&str>,
    ) -> Selection<K, M, KN, MN>
    where
        K: FieldValue,
        M: FieldValue,
    {
        let running_blocked = self.any_violated();
        let evaluator = self.rank.evaluator();

        let mut best: Option<(f64, usize)> = None;
        let mut excluded = 0;
        for (position, op) in knowledge.points().iter().enumerate() {
            if running_blocked && running == Some(op.configuration_id()) {
                continue;
            }
            if !self.constraints.values().all(|c| c.admits(op.as_ref(), corrections)) {
                continue;
            }
            if !evaluator.is_defined_corrected(op.as_ref(), corrections) {
                excluded += 1;
                continue;
            }
            let candidate = (self.rank.rank_corrected(op.as_ref(), corrections), position);
            if best.map_or(true, |b| self.rank.compare(candidate, b).is_lt()) {
                best = Some(candidate);
            }
        }

        if let Some((rank, position)) = best {
            let point = Arc::clone(&knowledge.points()[position]);
            let status = match excluded {
                0 => SelectionStatus::Optimal,
                excluded => SelectionStatus::Degraded(DegradedCondition::UndefinedRank { excluded }),
            };
            return Selection {
                changed: running != Some(point.configuration_id()),
                point,
                rank,
                status,
                knowledge_version: knowledge.version(),
            };
        }

        self.least_violating(knowledge, corrections, running)
    }

    fn least_violating<K, M, const KN: usize, const MN: usize>(
        &self,
        knowledge: &KnowledgeBase<K, M, KN, MN>,
        corrections: &Corrections,
        running: Option<&str>,
    ) -> Selection<K, M, KN, MN>
    where
        K: FieldValue,
        M: FieldValue,
    {
        let evaluator = self.rank.evaluator();
        let score = |op: &OperatingPoint<K, M, KN, MN>| {
            let violation: f64 =
                self.constraints.values().map(|c| c.violation(op, corrections)).sum();
            let defined = evaluator.is_defined_corrected(op, corrections);
            (defined, violation, self.rank.rank_corrected(op, corrections))
        };

        // a knowledge base is never empty, so position 0 always exists
        let (mut defined, mut violation, mut rank) = score(knowledge.points()[0].as_ref());
        let mut position = 0;
        let mut undefined = usize::from(!defined);
        for (p, op) in knowledge.points().iter().enumerate().skip(1) {
            let (d, v, r) = score(op.as_ref());
            undefined += usize::from(!d);
            let better = defined
                .cmp(&d)
                .then_with(|| v.total_cmp(&violation))
                .then_with(|| self.rank.compare((r, p), (rank, position)))
                .is_lt();
            if better {
                (defined, violation, rank, position) = (d, v, r, p);
            }
        }

        // only undefined points are left when the best one is undefined
        let condition = if defined {
            DegradedCondition::EmptyEligibleSet { violation }
        } else {
            DegradedCondition::UndefinedRank { excluded: undefined }
        };
        let point = Arc::clone(&knowledge.points()[position]);
        Selection {
            changed: running != Some(point.configuration_id()),
            point,
            rank,
            status: SelectionStatus::Degraded(condition),
            knowledge_version: knowledge.version(),
        }
    }
}
