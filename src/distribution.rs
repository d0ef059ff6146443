//! Field values: plain data and normal distributions.
//!
//! Every field of an operating point implements [`FieldValue`]. A plain number
//! is a distribution with zero spread, so the same bound arithmetic serves
//! knobs and metrics alike.
//!
//! # Invariants
//!
//! - Standard deviation is never negative; [`Distribution::new`] rejects it,
//!   and deserialization goes through the same check.
//! - `bound(k) = average + k * standard_deviation`; `k` may be negative.
//! - Values are immutable once built.

use crate::error::ConfigError;

// ─── FieldValue ─────────────────────────────────────────────────────────────

/// Statistical view of one field of an operating point.
///
/// All arithmetic is carried out in `f64` whatever the storage type.
pub trait FieldValue: Copy + core::fmt::Debug + Send + Sync + 'static {
    /// Expected value of the field.
    fn average(&self) -> f64;

    /// Spread of the field. Plain values have none.
    fn standard_deviation(&self) -> f64 {
        0.0
    }

    /// Confidence bound `average + k * standard_deviation`.
    fn bound(&self, k: f64) -> f64 {
        self.average() + k * self.standard_deviation()
    }

    /// `average - sigma * standard_deviation`.
    fn lower_bound(&self, sigma: f64) -> f64 {
        self.bound(-sigma)
    }

    /// `average + sigma * standard_deviation`.
    fn upper_bound(&self, sigma: f64) -> f64 {
        self.bound(sigma)
    }
}

macro_rules! plain_field_value {
    ($($t:ty),*) => {
        $(
            impl FieldValue for $t {
                #[inline]
                fn average(&self) -> f64 {
                    *self as f64
                }
            }
        )*
    };
}

plain_field_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

// ─── Distribution ───────────────────────────────────────────────────────────

/// A normally distributed field: mean plus standard deviation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(
        try_from = "RawDistribution<T>",
        bound(deserialize = "T: serde::Deserialize<'de> + Copy + Into<f64>")
    )
)]
pub struct Distribution<T = f64> {
    mean: T,
    standard_deviation: T,
}

/// Unchecked wire form of [`Distribution`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawDistribution<T> {
    mean: T,
    standard_deviation: T,
}

#[cfg(feature = "serde")]
impl<T: Copy + Into<f64>> TryFrom<RawDistribution<T>> for Distribution<T> {
    type Error = ConfigError;

    fn try_from(raw: RawDistribution<T>) -> Result<Self, ConfigError> {
        Self::new(raw.mean, raw.standard_deviation)
    }
}

impl<T> Distribution<T>
where
    T: Copy + Into<f64>,
{
    /// Build a distribution, rejecting a negative standard deviation.
    pub fn new(mean: T, standard_deviation: T) -> Result<Self, ConfigError> {
        let sd: f64 = standard_deviation.into();
        if sd < 0.0 || sd.is_nan() {
            return Err(ConfigError::InvalidStandardDeviation { value: sd });
        }
        Ok(Self { mean, standard_deviation })
    }

    /// Mean in the storage type.
    pub fn mean(&self) -> T {
        self.mean
    }

    /// Standard deviation in the storage type.
    pub fn deviation(&self) -> T {
        self.standard_deviation
    }
}

impl<T: Copy + Default + Into<f64>> Distribution<T> {
    /// A distribution without uncertainty.
    pub fn exact(mean: T) -> Self {
        Self { mean, standard_deviation: T::default() }
    }
}

impl<T> FieldValue for Distribution<T>
where
    T: Copy + Into<f64> + core::fmt::Debug + Send + Sync + 'static,
{
    #[inline]
    fn average(&self) -> f64 {
        self.mean.into()
    }

    #[inline]
    fn standard_deviation(&self) -> f64 {
        self.standard_deviation.into()
    }
}

impl<T: Copy + Into<f64>> core::fmt::Display for Distribution<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mean: f64 = self.mean.into();
        let sd: f64 = self.standard_deviation.into();
        write!(f, "{mean}~{sd}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_value_has_no_spread() {
        let v = 7_i32;
        assert_eq!(v.average(), 7.0);
        assert_eq!(v.standard_deviation(), 0.0);
        assert_eq!(v.bound(3.0), 7.0);
        assert_eq!(v.lower_bound(2.0), 7.0);
    }

    #[test]
    fn test_distribution_bounds() {
        let d = Distribution::new(4.0_f64, 0.1).unwrap();
        assert!((d.upper_bound(1.0) - 4.1).abs() < 1e-12, "got {}", d.upper_bound(1.0));
        assert!((d.lower_bound(2.0) - 3.8).abs() < 1e-12, "got {}", d.lower_bound(2.0));
        assert_eq!(d.bound(0.0), 4.0);
    }

    #[test]
    fn test_negative_deviation_rejected() {
        let err = Distribution::new(1.0_f64, -0.5).unwrap_err();
        assert_eq!(err, ConfigError::InvalidStandardDeviation { value: -0.5 });
    }

    #[test]
    fn test_f32_distribution_widens_to_f64() {
        let d = Distribution::new(3.0_f32, 0.5_f32).unwrap();
        assert_eq!(d.average(), 3.0);
        assert_eq!(d.standard_deviation(), 0.5);
        assert_eq!(d.mean(), 3.0_f32);
    }

    #[test]
    fn test_exact_distribution() {
        let d = Distribution::exact(2.0_f64);
        assert_eq!(d.standard_deviation(), 0.0);
        assert_eq!(d.to_string(), "2~0");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_checks_deviation() {
        let d: Distribution<f64> =
            serde_json::from_str(r#"{"mean": 3.0, "standard_deviation": 0.5}"#).unwrap();
        assert_eq!(d, Distribution::new(3.0, 0.5).unwrap());

        let err = serde_json::from_str::<Distribution<f64>>(r#"{"mean": 3.0, "standard_deviation": -1.0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("standard deviation must be non-negative"), "got {}", err);
    }
}
