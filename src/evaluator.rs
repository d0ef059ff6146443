/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Field extraction and composition algebra.
//!
//! A [`FieldSelector`] reads one statistical bound of one field. An
//! [`Evaluator`] reduces a list of weighted selectors to a single scalar with a
//! [`FieldComposer`]. Ranks and constraint values are both computed this way.
//!
//! ```text
//! Simple     value₀
//! Linear     Σ cᵢ · valueᵢ
//! Geometric  Π valueᵢ ^ cᵢ
//! ```
//!
//! # Invariants
//!
//! - Simple takes exactly one term; Geometric at least one; Linear any number
//!   (the empty sum is 0).
//! - Selector indices are checked once, by [`Evaluator::validate_indices`].
//!   Evaluation itself does no bounds checking.
//! - Geometric compositions are checked against the knowledge base by
//!   [`Evaluator::validate_points`] before use: a non-positive base under a
//!   non-integer exponent, or a zero base under a negative one, is rejected.
//!   Corrections can move a base out of range after that check, so selection
//!   asks [`Evaluator::is_defined_corrected`] for every point it ranks.
//! - No clamping. Arithmetic is `f64` throughout.

use crate::adaptor::Corrections;
use crate::distribution::FieldValue;
use crate::error::ConfigError;
use crate::operating_point::{OperatingPoint, SegmentKind};

// ─── Selectors ──────────────────────────────────────────────────────────────

/// Which statistical bound of a field to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoundKind {
    /// `mean - sigma * std`.
    Lower,
    /// `mean`.
    Average,
    /// `mean + sigma * std`.
    Upper,
}

/// Reference to one bound of one field of an operating point.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldSelector {
    /// Segment the field lives in.
    pub segment: SegmentKind,
    /// Positional index within the segment.
    pub index: usize,
    /// Bound to read.
    pub bound: BoundKind,
    /// Number of standard deviations for `Lower` / `Upper`.
    pub sigma: f64,
}

impl FieldSelector {
    /// Mean of knob `index`.
    pub const fn knob(index: usize) -> Self {
        Self { segment: SegmentKind::Knobs, index, bound: BoundKind::Average, sigma: 0.0 }
    }

    /// Mean of metric `index`.
    pub const fn metric(index: usize) -> Self {
        Self { segment: SegmentKind::Metrics, index, bound: BoundKind::Average, sigma: 0.0 }
    }

    /// Read the lower bound at `sigma` standard deviations instead.
    pub const fn lower(self, sigma: f64) -> Self {
        Self { bound: BoundKind::Lower, sigma, ..self }
    }

    /// Read the upper bound at `sigma` standard deviations instead.
    pub const fn upper(self, sigma: f64) -> Self {
        Self { bound: BoundKind::Upper, sigma, ..self }
    }

    /// Read the mean.
    pub const fn average(self) -> Self {
        Self { bound: BoundKind::Average, sigma: 0.0, ..self }
    }

    /// Signed multiplier applied to the standard deviation.
    fn k(&self) -> f64 {
        match self.bound {
            BoundKind::Lower => -self.sigma,
            BoundKind::Average => 0.0,
            BoundKind::Upper => self.sigma,
        }
    }

    /// Fail if the index does not exist for the given segment sizes.
    pub fn check_index(&self, knobs: usize, metrics: usize) -> Result<(), ConfigError> {
        let size = match self.segment {
            SegmentKind::Knobs => knobs,
            SegmentKind::Metrics => metrics,
        };
        if self.index < size {
            Ok(())
        } else {
            Err(ConfigError::IndexOutOfRange { segment: self.segment, index: self.index, size })
        }
    }

    /// Raw selected bound.
    #[inline]
    pub fn read<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
    ) -> f64
    where
        K: FieldValue,
        M: FieldValue,
    {
        match self.segment {
            SegmentKind::Knobs => op.knobs().as_slice()[self.index].bound(self.k()),
            SegmentKind::Metrics => op.metrics().as_slice()[self.index].bound(self.k()),
        }
    }

    /// Selected bound with the field adaptor correction applied to the mean.
    #[inline]
    pub fn read_corrected<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
        corrections: &Corrections,
    ) -> f64
    where
        K: FieldValue,
        M: FieldValue,
    {
        match self.segment {
            SegmentKind::Knobs => self.read(op),
            SegmentKind::Metrics => {
                let field = &op.metrics().as_slice()[self.index];
                corrections.correct(self.index, field.average())
                    + self.k() * field.standard_deviation()
            }
        }
    }
}

// ─── Terms and composers ────────────────────────────────────────────────────

/// A selector with its coefficient (weight for Linear, exponent for Geometric).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldTerm {
    /// Field read by this term.
    pub selector: FieldSelector,
    /// Coefficient. Defaults to 1.0.
    pub coefficient: f64,
}

impl FieldTerm {
    /// Term with the default coefficient of 1.0.
    pub const fn new(selector: FieldSelector) -> Self {
        Self { selector, coefficient: 1.0 }
    }

    /// Term with an explicit coefficient.
    pub const fn weighted(selector: FieldSelector, coefficient: f64) -> Self {
        Self { selector, coefficient }
    }
}

impl From<FieldSelector> for FieldTerm {
    fn from(selector: FieldSelector) -> Self {
        Self::new(selector)
    }
}

/// Reduction applied to the extracted field values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldComposer {
    /// The single selected value, unmodified.
    Simple,
    /// Weighted sum.
    Linear,
    /// Product of powers.
    Geometric,
}

impl FieldComposer {
    fn name(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Linear => "linear",
            Self::Geometric => "geometric",
        }
    }
}

// ─── Evaluator ──────────────────────────────────────────────────────────────

/// Composes weighted field selections into one scalar.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Evaluator {
    composer: FieldComposer,
    terms: Vec<FieldTerm>,
}

impl Evaluator {
    /// Build an evaluator, checking the term count against the composer.
    pub fn new(
        composer: FieldComposer,
        terms: impl IntoIterator<Item = FieldTerm>,
    ) -> Result<Self, ConfigError> {
        let terms: Vec<FieldTerm> = terms.into_iter().collect();
        let arity_error = |expected| ConfigError::CompositionArityError {
            composer: composer.name(),
            expected,
            found: terms.len(),
        };
        match composer {
            FieldComposer::Simple if terms.len() != 1 => return Err(arity_error("exactly 1")),
            FieldComposer::Geometric if terms.is_empty() => return Err(arity_error("at least 1")),
            _ => {}
        }
        Ok(Self { composer, terms })
    }

    /// Simple evaluator on one field.
    pub fn simple(selector: FieldSelector) -> Self {
        Self { composer: FieldComposer::Simple, terms: vec![FieldTerm::new(selector)] }
    }

    /// Linear evaluator with no terms: every point evaluates to 0.
    pub fn constant() -> Self {
        Self { composer: FieldComposer::Linear, terms: Vec::new() }
    }

    /// Composer in use.
    pub fn composer(&self) -> FieldComposer {
        self.composer
    }

    /// Terms in declaration order.
    pub fn terms(&self) -> &[FieldTerm] {
        &self.terms
    }

    /// Check every selector index against the segment sizes.
    pub fn validate_indices(&self, knobs: usize, metrics: usize) -> Result<(), ConfigError> {
        self.terms
            .iter()
            .try_for_each(|t| t.selector.check_index(knobs, metrics))
    }

    /// Check that a geometric composition is defined on every given point.
    ///
    /// Other composers are always defined and pass unconditionally.
    pub fn validate_points<'a, K, M, const KN: usize, const MN: usize>(
        &self,
        points: impl IntoIterator<Item = &'a OperatingPoint<K, M, KN, MN>>,
    ) -> Result<(), ConfigError>
    where
        K: FieldValue,
        M: FieldValue,
    {
        if self.composer != FieldComposer::Geometric {
            return Ok(());
        }
        for op in points {
            for term in &self.terms {
                let value = term.selector.read(op);
                let exponent = term.coefficient;
                if undefined_power(value, exponent) {
                    return Err(ConfigError::InvalidGeometricExponent {
                        segment: term.selector.segment,
                        index: term.selector.index,
                        value,
                        exponent,
                        configuration: op.configuration_id().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether the composition is defined on the corrected values of `op`.
    ///
    /// Always `true` for Simple and Linear.
    pub fn is_defined_corrected<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
        corrections: &Corrections,
    ) -> bool
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.composer != FieldComposer::Geometric
            || self
                .terms
                .iter()
                .all(|t| !undefined_power(t.selector.read_corrected(op, corrections), t.coefficient))
    }

    /// Evaluate on the raw stored values.
    pub fn evaluate<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
    ) -> f64
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.compose(self.terms.iter().map(|t| (t.selector.read(op), t.coefficient)))
    }

    /// Evaluate on values corrected by the field adaptors.
    pub fn evaluate_corrected<K, M, const KN: usize, const MN: usize>(
        &self,
        op: &OperatingPoint<K, M, KN, MN>,
        corrections: &Corrections,
    ) -> f64
    where
        K: FieldValue,
        M: FieldValue,
    {
        self.compose(
            self.terms
                .iter()
                .map(|t| (t.selector.read_corrected(op, corrections), t.coefficient)),
        )
    }

    fn compose(&self, values: impl Iterator<Item = (f64, f64)>) -> f64 {
        match self.composer {
            FieldComposer::Simple => values.map(|(v, _)| v).next().unwrap_or(0.0),
            FieldComposer::Linear => values.map(|(v, c)| c * v).sum(),
            FieldComposer::Geometric => values.map(|(v, c)| v.powf(c)).product(),
        }
    }
}

/// `value ^ exponent` has no real finite result.
fn undefined_power(value: f64, exponent: f64) -> bool {
    value.is_nan()
        || (value < 0.0 && exponent.fract() != 0.0)
        || (value == 0.0 && (exponent <= 0.0 || exponent.fract() != 0.0))
}
