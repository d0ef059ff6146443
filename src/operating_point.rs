//! Operating points: a knob configuration paired with its predicted metrics.
//!
//! A [`Segment`] is a fixed-arity row of fields. An [`OperatingPoint`] owns one
//! knob segment and one metric segment and never changes once built; the
//! knowledge base shares points behind `Arc` and replaces them wholesale.
//!
//! # Invariants
//!
//! - Segment arity is part of the type. Array construction is checked by the
//!   compiler, slice construction returns [`ConfigError::ArityMismatch`].
//! - [`Segment::get`] rejects an out-of-range index at compile time;
//!   [`Segment::field`] is the runtime accessor for reflective code.
//! - Equality and hashing only look at field means, so two points that differ
//!   only in their spread describe the same configuration.

use core::hash::{Hash, Hasher};

use crate::distribution::FieldValue;
use crate::error::ConfigError;

// ─── SegmentKind ────────────────────────────────────────────────────────────

/// Which half of an operating point a field lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SegmentKind {
    /// Software knobs: the configuration the application applies.
    Knobs,
    /// Metrics: the predicted behaviour of that configuration.
    Metrics,
}

impl core::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Knobs => f.write_str("knobs"),
            Self::Metrics => f.write_str("metrics"),
        }
    }
}

// ─── FieldReading ───────────────────────────────────────────────────────────

/// Type-erased view of one field, returned by runtime accessors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldReading {
    /// Field mean.
    pub average: f64,
    /// Field standard deviation (0 for plain values).
    pub standard_deviation: f64,
}

impl FieldReading {
    /// Capture the statistics of any field.
    pub fn of<F: FieldValue>(field: &F) -> Self {
        Self {
            average: field.average(),
            standard_deviation: field.standard_deviation(),
        }
    }
}

impl FieldValue for FieldReading {
    fn average(&self) -> f64 {
        self.average
    }

    fn standard_deviation(&self) -> f64 {
        self.standard_deviation
    }
}

// ─── Segment ────────────────────────────────────────────────────────────────

/// An ordered row of exactly `N` fields.
#[derive(Clone, Copy, Debug)]
pub struct Segment<F, const N: usize> {
    fields: [F; N],
}

impl<F: FieldValue, const N: usize> Segment<F, N> {
    /// Wrap an array of fields.
    pub const fn new(fields: [F; N]) -> Self {
        Self { fields }
    }

    /// Build a segment from a slice whose length is only known at runtime.
    pub fn from_slice(values: &[F]) -> Result<Self, ConfigError> {
        let fields: [F; N] = values.try_into().map_err(|_| ConfigError::ArityMismatch {
            expected: N,
            found: values.len(),
        })?;
        Ok(Self { fields })
    }

    /// Compile-time indexed access.
    ///
    /// ```compile_fail
    /// use margot_core::Segment;
    /// let s = Segment::new([1_i32, 2]);
    /// let _ = s.get::<2>();
    /// ```
    #[inline]
    pub fn get<const I: usize>(&self) -> &F {
        const { assert!(I < N, "field index out of range") };
        &self.fields[I]
    }

    /// Runtime indexed access, for generic code such as reports.
    pub fn field(&self, kind: SegmentKind, index: usize) -> Result<&F, ConfigError> {
        self.fields.get(index).ok_or(ConfigError::IndexOutOfRange {
            segment: kind,
            index,
            size: N,
        })
    }

    /// Number of fields.
    pub const fn len(&self) -> usize {
        N
    }

    /// `true` for a zero-arity segment.
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// All fields in positional order.
    pub fn as_slice(&self) -> &[F] {
        &self.fields
    }

    /// Field means in positional order.
    pub fn averages(&self) -> [f64; N] {
        self.fields.map(|f| f.average())
    }
}

impl<F: FieldValue, const N: usize> PartialEq for Segment<F, N> {
    fn eq(&self, other: &Self) -> bool {
        self.fields
            .iter()
            .zip(other.fields.iter())
            .all(|(a, b)| a.average() == b.average())
    }
}

impl<F: FieldValue, const N: usize> Hash for Segment<F, N> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for f in &self.fields {
            normalised_bits(f.average()).hash(state);
        }
    }
}

/// Bit pattern of a mean with `-0.0` folded onto `0.0`.
fn normalised_bits(value: f64) -> u64 {
    if value == 0.0 {
        0
    } else {
        value.to_bits()
    }
}

// ─── OperatingPoint ─────────────────────────────────────────────────────────

/// One row of the knowledge base.
///
/// `K`/`M` are the knob and metric field types, `KN`/`MN` their counts.
#[derive(Clone, Debug)]
pub struct OperatingPoint<K, M, const KN: usize, const MN: usize> {
    knobs: Segment<K, KN>,
    metrics: Segment<M, MN>,
    configuration_id: String,
}

impl<K: FieldValue, M: FieldValue, const KN: usize, const MN: usize> OperatingPoint<K, M, KN, MN> {
    /// Build a point from fixed-size arrays.
    pub fn new(knobs: [K; KN], metrics: [M; MN]) -> Self {
        Self::from_segments(Segment::new(knobs), Segment::new(metrics))
    }

    /// Build a point from runtime-sized slices (remote knowledge, description files).
    pub fn from_slices(knobs: &[K], metrics: &[M]) -> Result<Self, ConfigError> {
        Ok(Self::from_segments(Segment::from_slice(knobs)?, Segment::from_slice(metrics)?))
    }

    /// Build a point from already validated segments.
    pub fn from_segments(knobs: Segment<K, KN>, metrics: Segment<M, MN>) -> Self {
        let configuration_id = render_configuration_id(&knobs);
        Self { knobs, metrics, configuration_id }
    }

    /// Knob segment.
    pub fn knobs(&self) -> &Segment<K, KN> {
        &self.knobs
    }

    /// Metric segment.
    pub fn metrics(&self) -> &Segment<M, MN> {
        &self.metrics
    }

    /// Compile-time indexed knob.
    #[inline]
    pub fn knob<const I: usize>(&self) -> &K {
        self.knobs.get::<I>()
    }

    /// Compile-time indexed metric.
    #[inline]
    pub fn metric<const I: usize>(&self) -> &M {
        self.metrics.get::<I>()
    }

    /// Runtime indexed access across both segments.
    pub fn field(&self, kind: SegmentKind, index: usize) -> Result<FieldReading, ConfigError> {
        match kind {
            SegmentKind::Knobs => self.knobs.field(kind, index).map(FieldReading::of),
            SegmentKind::Metrics => self.metrics.field(kind, index).map(FieldReading::of),
        }
    }

    /// Stable identifier of the knob configuration, used to deduplicate
    /// points when knowledge updates are merged.
    pub fn configuration_id(&self) -> &str {
        &self.configuration_id
    }

    /// Deterministic FNV-1a hash of the knob means.
    ///
    /// Same configuration, same hash, across restarts and platforms.
    pub fn configuration_hash_u64(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for value in self.knobs.averages() {
            for byte in normalised_bits(value).to_le_bytes() {
                h ^= byte as u64;
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
        }
        h
    }

    /// Whether both points carry the same knob configuration.
    pub fn same_configuration(&self, other: &Self) -> bool {
        self.knobs == other.knobs
    }

    /// Size of the given segment.
    pub const fn segment_len(kind: SegmentKind) -> usize {
        match kind {
            SegmentKind::Knobs => KN,
            SegmentKind::Metrics => MN,
        }
    }
}

impl<K: FieldValue, M: FieldValue, const KN: usize, const MN: usize> PartialEq
    for OperatingPoint<K, M, KN, MN>
{
    fn eq(&self, other: &Self) -> bool {
        self.knobs == other.knobs && self.metrics == other.metrics
    }
}

fn render_configuration_id<K: FieldValue, const KN: usize>(knobs: &Segment<K, KN>) -> String {
    let mut id = String::new();
    for (i, value) in knobs.averages().iter().enumerate() {
        if i > 0 {
            id.push(',');
        }
        // `{}` on f64 prints 3.0 as "3", which keeps integer knobs readable.
        // -0.0 would print as "-0"; it names the same configuration as 0.0.
        let value = if *value == 0.0 { 0.0 } else { *value };
        id.push_str(&format!("{value}"));
    }
    id
}
