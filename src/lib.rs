//! # margot-core
//!
//! Autonomic decision core: pick the best software-knob configuration of an
//! application block against runtime goals, and keep the choice honest as the
//! running system drifts from its model.
//!
//! ---
//!
//! ## Three ideas
//!
//! **Operating points.** The design space is a table of knob configurations,
//! each paired with the metric distributions it is expected to produce. The
//! table is immutable and shared; new knowledge replaces it wholesale.
//!
//! **Rank and goals.** A state (an operating regime such as "performance" or
//! "power-save") scores points with a linear or geometric composition of field
//! bounds and filters them with constraints on the confidence bound of a field.
//!
//! **Field adaptation.** Monitors observe the running configuration. When an
//! observation leaves the one-sigma band of the prediction, a correction
//! coefficient nudges every prediction of that metric, so the next decision is
//! taken on corrected values.
//!
//! ## The loop
//!
//! ```text
//! Monitors → FieldAdaptor → Corrections ─┐
//!                                        ▼
//! KnowledgeBase ──snapshot──→ State::select ──→ Selection → application
//!      ▲                     (filter, rank,
//! KnowledgeUpdate             fallback)
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`distribution`] | [`FieldValue`], [`Distribution`] | Mean / standard deviation and confidence bounds |
//! | [`operating_point`] | [`Segment`], [`OperatingPoint`] | Fixed-arity knob and metric rows |
//! | [`evaluator`] | [`FieldSelector`], [`Evaluator`] | Field extraction and simple / linear / geometric composition |
//! | [`rank`] | [`RankCalculator`], [`RankObjective`] | Ordering with deterministic tie-break |
//! | [`goal`] | [`Goal`], [`ComparisonFunction`] | Comparisons and goal errors |
//! | [`constraint`] | [`Constraint`], [`ConstraintTracker`] | Bound-based filtering with debounce |
//! | [`monitor`] | [`Monitor`] | Windowed observations |
//! | [`adaptor`] | [`OneSigmaAdaptor`], [`KnowledgeAdaptor`] | Runtime correction of predictions |
//! | [`knowledge`] | [`KnowledgeBase`], [`SharedKnowledge`] | Copy-on-write point set and update queue |
//! | [`state`] | [`State`], [`Selection`] | Filter, rank and fallback |
//! | [`manager`] | [`Manager`], [`ManagerBuilder`] | One application block |
//! | [`data_aware`] | [`DataAwareManager`], [`FeatureComparison`] | One manager per input feature cluster |
//! | [`description`] | [`description::BlockDescription`] | Declarative configuration |
//! | [`telemetry`] | [`Telemetry`] | `tracing` events and counters |
//! | [`error`] | [`ConfigError`], [`DegradedCondition`] | Fatal and non-fatal conditions |
//!
//! ## Example
//!
//! ```
//! use margot_core::*;
//!
//! let points = (1..=4).map(|threads| {
//!     OperatingPoint::new([threads], [100.0 / threads as f64, threads as f64 * 5.0])
//! });
//! let fast = State::new(
//!     "fast",
//!     RankCalculator::linear(RankObjective::Minimize, [FieldSelector::metric(0).into()]).unwrap(),
//! );
//!
//! let manager: Manager<u32, f64, 1, 2> = Manager::builder("encoder")
//!     .knowledge(points)
//!     .state(fast)
//!     .adaptor(0, 3, CorrectionMode::Multiplicative)
//!     .build()
//!     .unwrap();
//!
//! manager
//!     .add_constraint(
//!         "fast",
//!         Constraint::new(FieldSelector::metric(1), Goal::new(ComparisonFunction::LessOrEqual, 15.0), 0.0, 0, 10),
//!     )
//!     .unwrap();
//!
//! let best = manager.get_best_configuration();
//! assert_eq!(*best.point.knob::<0>(), 3);
//! manager.configuration_applied(&best.point);
//!
//! // producer side
//! manager.monitor(0).unwrap().push(40.0);
//! manager.update();
//! ```
//!
//! ## Features
//!
//! - `serde`: `Serialize`/`Deserialize` for the declarative description and
//!   the value types it is made of.
//!
//! ## License
//!
//! Business Source License 1.1.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod adaptor;
pub mod constraint;
pub mod data_aware;
pub mod description;
pub mod distribution;
pub mod error;
pub mod evaluator;
pub mod goal;
pub mod knowledge;
pub mod manager;
pub mod monitor;
pub mod operating_point;
pub mod rank;
pub mod state;
pub mod telemetry;

pub use adaptor::{CorrectionMode, Corrections, FieldAdaptor, KnowledgeAdaptor, OneSigmaAdaptor};
pub use constraint::{Constraint, ConstraintStatus, ConstraintTracker};
pub use data_aware::{DataAwareManager, FeatureComparison, FeatureDistance};
pub use distribution::{Distribution, FieldValue};
pub use error::{ConfigError, DegradedCondition, KnowledgeError};
pub use evaluator::{BoundKind, Evaluator, FieldComposer, FieldSelector, FieldTerm};
pub use goal::{ComparisonFunction, Goal};
pub use knowledge::{KnowledgeBase, KnowledgeSender, KnowledgeUpdate, SharedKnowledge};
pub use manager::{Manager, ManagerBuilder, Report, DEFAULT_STATE};
pub use monitor::Monitor;
pub use operating_point::{FieldReading, OperatingPoint, Segment, SegmentKind};
pub use rank::{RankCalculator, RankObjective};
pub use state::{Selection, SelectionStatus, State};
pub use telemetry::{Telemetry, TelemetrySnapshot};
