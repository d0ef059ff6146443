//! Per-block telemetry context.
//!
//! One [`Telemetry`] handle is created per application block and passed by
//! `Arc` to the manager and every field adaptor. It owns the block name that
//! tags every `tracing` event and a set of monotonic counters that tests and
//! hosts can read without a subscriber.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DegradedCondition;

/// Point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetrySnapshot {
    /// Selections that fell back to the least violating point.
    pub degraded_selections: u64,
    /// Correction samples that hit a division by zero.
    pub undefined_corrections: u64,
    /// Selections that left out points with an undefined corrected rank.
    pub undefined_ranks: u64,
    /// Knowledge swaps applied.
    pub knowledge_updates: u64,
    /// Active state switches.
    pub state_switches: u64,
    /// Selections served.
    pub selections: u64,
}

/// Telemetry handle for one application block.
#[derive(Debug, Default)]
pub struct Telemetry {
    block: String,
    degraded_selections: AtomicU64,
    undefined_corrections: AtomicU64,
    undefined_ranks: AtomicU64,
    knowledge_updates: AtomicU64,
    state_switches: AtomicU64,
    selections: AtomicU64,
}

impl Telemetry {
    /// Fresh handle for the named block.
    pub fn new(block: impl Into<String>) -> Self {
        Self { block: block.into(), ..Self::default() }
    }

    /// Block name carried by every event.
    pub fn block(&self) -> &str {
        &self.block
    }

    /// Log and count a degraded condition.
    pub fn degraded(&self, condition: &DegradedCondition) {
        match condition {
            DegradedCondition::EmptyEligibleSet { violation } => {
                self.degraded_selections.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    block = %self.block,
                    violation = *violation,
                    "no operating point satisfies every constraint, using least violating"
                );
            }
            DegradedCondition::UndefinedCorrection { metric } => {
                self.undefined_corrections.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    block = %self.block,
                    metric = *metric,
                    "correction sample needs a division by zero, keeping neutral coefficient"
                );
            }
            DegradedCondition::UndefinedRank { excluded } => {
                self.undefined_ranks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    block = %self.block,
                    excluded = *excluded,
                    "corrected rank undefined, points left out of the selection"
                );
            }
        }
    }

    /// Count a served selection.
    pub fn selection(&self, configuration: &str, rank: f64) {
        self.selections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(block = %self.block, configuration, rank, "best configuration selected");
    }

    /// Log and count a knowledge swap.
    pub fn knowledge_swapped(&self, version: u64, points: usize) {
        self.knowledge_updates.fetch_add(1, Ordering::Relaxed);
        tracing::info!(block = %self.block, version, points, "knowledge base swapped");
    }

    /// Log and count a state switch.
    pub fn state_switched(&self, from: &str, to: &str) {
        self.state_switches.fetch_add(1, Ordering::Relaxed);
        tracing::info!(block = %self.block, from, to, "active state switched");
    }

    /// Read every counter.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            degraded_selections: self.degraded_selections.load(Ordering::Relaxed),
            undefined_corrections: self.undefined_corrections.load(Ordering::Relaxed),
            undefined_ranks: self.undefined_ranks.load(Ordering::Relaxed),
            knowledge_updates: self.knowledge_updates.load(Ordering::Relaxed),
            state_switches: self.state_switches.load(Ordering::Relaxed),
            selections: self.selections.load(Ordering::Relaxed),
        }
    }
}
