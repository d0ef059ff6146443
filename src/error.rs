//! Error and degraded-condition types.
//!
//! Configuration problems are fatal and surface as [`ConfigError`] from every
//! constructor and validation step. Runtime trouble never becomes an `Err`:
//! it is described by a [`DegradedCondition`], logged, counted and attached to
//! the selection that hit it.

use crate::operating_point::SegmentKind;

/// Fatal configuration error. Raised while a block is being assembled and
/// aborts its construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    // === Data model ===
    /// A segment was built from the wrong number of values.
    #[error("arity mismatch: expected {expected} fields, found {found}")]
    ArityMismatch {
        /// Declared segment arity.
        expected: usize,
        /// Number of values supplied.
        found: usize,
    },

    /// A runtime field index does not exist in its segment.
    #[error("index {index} out of range for {segment} segment of size {size}")]
    IndexOutOfRange {
        /// Segment the index was looked up in.
        segment: SegmentKind,
        /// Offending index.
        index: usize,
        /// Number of fields in that segment.
        size: usize,
    },

    /// A distribution was declared with a negative standard deviation.
    #[error("standard deviation must be non-negative, got {value}")]
    InvalidStandardDeviation {
        /// The rejected value.
        value: f64,
    },

    // === Composition ===
    /// A composer received a number of terms it cannot combine.
    #[error("{composer} composition needs {expected} term(s), got {found}")]
    CompositionArityError {
        /// Name of the composer.
        composer: &'static str,
        /// Human description of the accepted count.
        expected: &'static str,
        /// Number of terms supplied.
        found: usize,
    },

    /// A geometric composition would raise a non-positive value to a
    /// non-integer power.
    #[error(
        "geometric rank undefined: {segment} field {index} is {value} in configuration {configuration} under exponent {exponent}"
    )]
    InvalidGeometricExponent {
        /// Segment holding the offending field.
        segment: SegmentKind,
        /// Field index.
        index: usize,
        /// The non-positive field value.
        value: f64,
        /// The exponent it would be raised to.
        exponent: f64,
        /// Configuration id of the operating point.
        configuration: String,
    },

    // === States ===
    /// A state name was looked up but never registered.
    #[error("unknown state '{name}'")]
    UnknownState {
        /// Requested name.
        name: String,
    },

    /// A state name was registered twice.
    #[error("state '{name}' is already registered")]
    DuplicateState {
        /// Conflicting name.
        name: String,
    },

    /// The active state cannot be removed.
    #[error("state '{name}' is active and cannot be removed")]
    ActiveStateRemoval {
        /// Name of the active state.
        name: String,
    },

    /// Two constraints of one state share a priority.
    #[error("state '{state}' already has a constraint at priority {priority}")]
    DuplicatePriority {
        /// State the constraint belongs to.
        state: String,
        /// Conflicting priority.
        priority: u32,
    },

    /// No constraint is registered at the given priority.
    #[error("state '{state}' has no constraint at priority {priority}")]
    UnknownConstraint {
        /// State searched.
        state: String,
        /// Requested priority.
        priority: u32,
    },

    /// A block cannot start without operating points.
    #[error("knowledge base is empty")]
    EmptyKnowledge,

    /// A field adaptor was registered twice for the same metric.
    #[error("metric {index} already has a field adaptor")]
    DuplicateAdaptor {
        /// Metric index.
        index: usize,
    },

    /// A description referenced a knob or metric name that was never declared.
    #[error("unknown {segment} field '{name}'")]
    UnknownField {
        /// Segment the name was looked up in.
        segment: SegmentKind,
        /// The missing name.
        name: String,
    },

    // === Feature clusters ===
    /// A data feature is NaN or infinite.
    #[error("data feature {index} is not finite: {value}")]
    InvalidFeature {
        /// Position in the feature vector.
        index: usize,
        /// The rejected value.
        value: f64,
    },

    /// A feature cluster with the same features already exists.
    #[error("feature cluster [{key}] already exists")]
    DuplicateCluster {
        /// Rendered features.
        key: String,
    },

    /// No feature cluster has the given features.
    #[error("unknown feature cluster [{key}]")]
    UnknownCluster {
        /// Rendered features.
        key: String,
    },

    /// The selected feature cluster cannot be removed.
    #[error("feature cluster [{key}] is selected and cannot be removed")]
    ActiveClusterRemoval {
        /// Rendered features.
        key: String,
    },

    /// The operation needs at least one feature cluster.
    #[error("no feature cluster registered")]
    NoFeatureCluster,
}

/// Errors raised by the asynchronous knowledge hand-off.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KnowledgeError {
    /// The bounded update queue is at capacity.
    #[error("knowledge update queue is full ({capacity} pending)")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// The receiving manager was dropped.
    #[error("knowledge update queue is disconnected")]
    Disconnected,

    /// The update was rejected by validation.
    #[error("knowledge update rejected: {0}")]
    Rejected(#[from] ConfigError),
}

/// A non-fatal runtime condition. Reported through logs, telemetry counters
/// and [`crate::SelectionStatus`]; never returned as an error.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DegradedCondition {
    /// No operating point satisfied every constraint; the least violating one
    /// was returned instead.
    EmptyEligibleSet {
        /// Sum of the relative errors of the fallback point.
        violation: f64,
    },
    /// A correction sample needed a division by zero and was replaced by the
    /// neutral coefficient.
    UndefinedCorrection {
        /// Metric index of the adaptor.
        metric: usize,
    },
    /// Corrected values put a geometric rank out of its domain on some
    /// points; they were left out of the selection.
    UndefinedRank {
        /// Number of points left out.
        excluded: usize,
    },
}

impl core::fmt::Display for DegradedCondition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EmptyEligibleSet { violation } => {
                write!(f, "no eligible operating point (violation {violation:.6})")
            }
            Self::UndefinedCorrection { metric } => {
                write!(f, "undefined correction on metric {metric}")
            }
            Self::UndefinedRank { excluded } => {
                write!(f, "rank undefined on {excluded} corrected point(s)")
            }
        }
    }
}
