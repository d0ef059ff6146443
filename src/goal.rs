//! Goals: a comparison against a target value.

/// Comparison applied between a value and a goal target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComparisonFunction {
    /// `value > target`
    Greater,
    /// `value >= target`
    GreaterOrEqual,
    /// `value < target`
    Less,
    /// `value <= target`
    LessOrEqual,
}

impl ComparisonFunction {
    /// Apply the comparison.
    #[inline]
    pub fn holds(self, value: f64, target: f64) -> bool {
        match self {
            Self::Greater => value > target,
            Self::GreaterOrEqual => value >= target,
            Self::Less => value < target,
            Self::LessOrEqual => value <= target,
        }
    }

    /// `true` for `>` and `>=`: the value must stay above the target.
    pub fn is_lower_limit(self) -> bool {
        matches!(self, Self::Greater | Self::GreaterOrEqual)
    }

    /// Operator symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
        }
    }
}

/// A comparison with a target that the application may move at runtime.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Goal {
    comparison: ComparisonFunction,
    target: f64,
}

impl Goal {
    /// Build a goal.
    pub const fn new(comparison: ComparisonFunction, target: f64) -> Self {
        Self { comparison, target }
    }

    /// Comparison operator.
    pub fn comparison(&self) -> ComparisonFunction {
        self.comparison
    }

    /// Current target.
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Move the target.
    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    /// Whether `value` meets the goal.
    #[inline]
    pub fn check(&self, value: f64) -> bool {
        self.comparison.holds(value, self.target)
    }

    /// Distance to the target, or 0 when the goal is met.
    pub fn absolute_error(&self, value: f64) -> f64 {
        if self.check(value) {
            0.0
        } else {
            (value - self.target).abs()
        }
    }

    /// Relative distance `|value / target - 1|`, or 0 when the goal is met.
    ///
    /// A zero target shifts both sides by one to keep the ratio finite.
    pub fn relative_error(&self, value: f64) -> f64 {
        if self.check(value) {
            return 0.0;
        }
        if self.target == 0.0 {
            ((value + 1.0) / (self.target + 1.0) - 1.0).abs()
        } else {
            (value / self.target - 1.0).abs()
        }
    }
}

impl core::fmt::Display for Goal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.comparison.symbol(), self.target)
    }
}
