//! Declarative block description.
//!
//! A [`BlockDescription`] names the knobs and metrics of a block and declares
//! its states, constraints and adaptors by field name. Parsing a file format
//! is left to the host; with the `serde` feature the description derives
//! `Serialize`/`Deserialize` so any serde format can load it.
//!
//! [`BlockDescription::builder`] resolves every name and hands back a
//! [`ManagerBuilder`] still waiting for its knowledge. Every constrained
//! metric gets a monitor, shared with its adaptor when it has one.
//!
//! ```
//! use margot_core::description::{BlockDescription, FieldRef, RankTermDescription, StateDescription};
//! use margot_core::{FieldComposer, RankObjective};
//!
//! let description = BlockDescription {
//!     name: "encoder".into(),
//!     knobs: vec!["threads".into()],
//!     metrics: vec!["time".into()],
//!     states: vec![StateDescription {
//!         name: "fast".into(),
//!         objective: RankObjective::Minimize,
//!         composer: FieldComposer::Linear,
//!         rank: vec![RankTermDescription::new(FieldRef::metric("time"))],
//!         constraints: vec![],
//!     }],
//!     active_state: None,
//!     adaptors: vec![],
//! };
//! let manager = description
//!     .builder::<u32, f64, 1, 1>()
//!     .unwrap()
//!     .knowledge([margot_core::OperatingPoint::new([1], [2.0])])
//!     .build()
//!     .unwrap();
//! assert_eq!(manager.active_state(), "fast");
//! ```

use std::collections::BTreeSet;

use crate::adaptor::CorrectionMode;
use crate::constraint::Constraint;
use crate::distribution::FieldValue;
use crate::error::ConfigError;
use crate::evaluator::{BoundKind, Evaluator, FieldComposer, FieldSelector, FieldTerm};
use crate::goal::{ComparisonFunction, Goal};
use crate::manager::ManagerBuilder;
use crate::monitor::Monitor;
use crate::operating_point::SegmentKind;
use crate::rank::{RankCalculator, RankObjective};
use crate::state::State;

#[cfg(feature = "serde")]
fn one() -> f64 {
    1.0
}

#[cfg(feature = "serde")]
fn average() -> BoundKind {
    BoundKind::Average
}

#[cfg(feature = "serde")]
fn default_window() -> usize {
    crate::monitor::DEFAULT_WINDOW
}

/// A knob or metric referenced by name.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldRef {
    /// Segment holding the field.
    pub segment: SegmentKind,
    /// Declared name.
    pub name: String,
}

impl FieldRef {
    /// Reference a knob.
    pub fn knob(name: impl Into<String>) -> Self {
        Self { segment: SegmentKind::Knobs, name: name.into() }
    }

    /// Reference a metric.
    pub fn metric(name: impl Into<String>) -> Self {
        Self { segment: SegmentKind::Metrics, name: name.into() }
    }
}

/// One term of a rank.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RankTermDescription {
    /// Field read.
    pub field: FieldRef,
    /// Bound read; the mean by default.
    #[cfg_attr(feature = "serde", serde(default = "average"))]
    pub bound: BoundKind,
    /// Standard deviations for lower / upper bounds.
    #[cfg_attr(feature = "serde", serde(default))]
    pub sigma: f64,
    /// Weight or exponent; 1 by default.
    #[cfg_attr(feature = "serde", serde(default = "one"))]
    pub coefficient: f64,
}

impl RankTermDescription {
    /// Mean of `field` with coefficient 1.
    pub fn new(field: FieldRef) -> Self {
        Self { field, bound: BoundKind::Average, sigma: 0.0, coefficient: 1.0 }
    }
}

/// One constraint of a state.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintDescription {
    /// Field constrained.
    pub field: FieldRef,
    /// Comparison.
    pub comparison: ComparisonFunction,
    /// Target value.
    pub target: f64,
    /// Standard deviations used for the bound.
    #[cfg_attr(feature = "serde", serde(default))]
    pub confidence: f64,
    /// Debounce length.
    #[cfg_attr(feature = "serde", serde(default))]
    pub inertia: u32,
    /// Priority; lower is more important.
    pub priority: u32,
}

/// One state.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StateDescription {
    /// State name.
    pub name: String,
    /// Rank direction.
    #[cfg_attr(feature = "serde", serde(default))]
    pub objective: RankObjective,
    /// Rank composer.
    pub composer: FieldComposer,
    /// Rank terms. Empty with a linear composer means every point ranks
    /// the same; the other composers need terms.
    #[cfg_attr(feature = "serde", serde(default))]
    pub rank: Vec<RankTermDescription>,
    /// Constraints.
    #[cfg_attr(feature = "serde", serde(default))]
    pub constraints: Vec<ConstraintDescription>,
}

/// One field adaptor.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdaptorDescription {
    /// Adapted metric name.
    pub metric: String,
    /// Correction window length.
    pub inertia: usize,
    /// Correction mode.
    #[cfg_attr(feature = "serde", serde(default))]
    pub mode: CorrectionMode,
    /// Monitor window length.
    #[cfg_attr(feature = "serde", serde(default = "default_window"))]
    pub window: usize,
}

/// Declarative description of one application block.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockDescription {
    /// Block name.
    pub name: String,
    /// Knob names in positional order.
    pub knobs: Vec<String>,
    /// Metric names in positional order.
    pub metrics: Vec<String>,
    /// States.
    #[cfg_attr(feature = "serde", serde(default))]
    pub states: Vec<StateDescription>,
    /// Initially active state; the first state by default.
    #[cfg_attr(feature = "serde", serde(default))]
    pub active_state: Option<String>,
    /// Field adaptors.
    #[cfg_attr(feature = "serde", serde(default))]
    pub adaptors: Vec<AdaptorDescription>,
}

impl BlockDescription {
    /// Position of a field name.
    pub fn index_of(&self, field: &FieldRef) -> Result<usize, ConfigError> {
        let names = match field.segment {
            SegmentKind::Knobs => &self.knobs,
            SegmentKind::Metrics => &self.metrics,
        };
        names.iter().position(|n| *n == field.name).ok_or_else(|| ConfigError::UnknownField {
            segment: field.segment,
            name: field.name.clone(),
        })
    }

    /// Position of a metric name.
    pub fn metric_index(&self, name: &str) -> Result<usize, ConfigError> {
        self.index_of(&FieldRef::metric(name))
    }

    fn selector(&self, field: &FieldRef) -> Result<FieldSelector, ConfigError> {
        let index = self.index_of(field)?;
        Ok(match field.segment {
            SegmentKind::Knobs => FieldSelector::knob(index),
            SegmentKind::Metrics => FieldSelector::metric(index),
        })
    }

    fn state(&self, description: &StateDescription) -> Result<State, ConfigError> {
        let terms = description
            .rank
            .iter()
            .map(|t| {
                let selector = self.selector(&t.field)?;
                let selector = match t.bound {
                    BoundKind::Average => selector,
                    BoundKind::Lower => selector.lower(t.sigma),
                    BoundKind::Upper => selector.upper(t.sigma),
                };
                Ok(FieldTerm::weighted(selector, t.coefficient))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let rank = if terms.is_empty() && description.composer == FieldComposer::Linear {
            RankCalculator::unranked()
        } else {
            RankCalculator::new(description.objective, Evaluator::new(description.composer, terms)?)
        };

        let mut state = State::new(description.name.clone(), rank);
        for c in &description.constraints {
            state.add_constraint(Constraint::new(
                self.selector(&c.field)?,
                Goal::new(c.comparison, c.target),
                c.confidence,
                c.inertia,
                c.priority,
            ))?;
        }
        Ok(state)
    }

    /// Resolve every name into a builder. Knowledge is added by the caller.
    pub fn builder<K, M, const KN: usize, const MN: usize>(
        &self,
    ) -> Result<ManagerBuilder<K, M, KN, MN>, ConfigError>
    where
        K: FieldValue,
        M: FieldValue,
    {
        if self.knobs.len() != KN {
            return Err(ConfigError::ArityMismatch { expected: KN, found: self.knobs.len() });
        }
        if self.metrics.len() != MN {
            return Err(ConfigError::ArityMismatch { expected: MN, found: self.metrics.len() });
        }

        let mut builder = ManagerBuilder::new(self.name.clone());
        for s in &self.states {
            builder = builder.state(self.state(s)?);
        }
        if let Some(active) = &self.active_state {
            builder = builder.active_state(active.clone());
        }
        for a in &self.adaptors {
            let metric = self.metric_index(&a.metric)?;
            builder = builder.adaptor_with_monitor(metric, Monitor::new(a.window), a.inertia, a.mode);
        }

        // constraint trackers read the same monitors; adaptor ones win
        let mut constrained = BTreeSet::new();
        for c in self.states.iter().flat_map(|s| &s.constraints) {
            if c.field.segment == SegmentKind::Metrics {
                constrained.insert(self.index_of(&c.field)?);
            }
        }
        for metric in constrained {
            builder = builder.watch(metric, Monitor::default());
        }
        Ok(builder)
    }
}
