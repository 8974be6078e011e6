//! Integer ranges for dynamic dimensions.

use std::fmt;

use crate::error::RangeError;

/// Upper bound used when a classifier cannot prove anything tighter about an
/// axis.
pub const INT32_MAX: i64 = i32::MAX as i64;

/// Closed interval `[lo, hi]` of the values a dimension may take at run time.
///
/// `hi` is `None` if the dimension has no upper bound.
///
/// ```
/// use varshape::Bound;
///
/// let a = Bound::new(1, Some(256)).unwrap();
/// let b = Bound::at_least(16);
/// assert_eq!(a.intersect(&b).unwrap(), Bound::new(16, Some(256)).unwrap());
/// assert_eq!(b.to_string(), "(16, None)");
/// ```
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(try_from = "(i64, Option<i64>)"))]
#[cfg_attr(feature = "serde", serde(into = "(i64, Option<i64>)"))]
pub struct Bound {
    lo: i64,
    hi: Option<i64>,
}

impl Bound {
    /// Create a bound, or fail if `lo` is negative or `hi < lo`.
    pub fn new(lo: i64, hi: Option<i64>) -> Result<Bound, RangeError> {
        let bound = Bound { lo, hi };
        match hi {
            _ if lo < 0 => Err(RangeError::invalid(bound)),
            Some(hi) if hi < lo => Err(RangeError::invalid(bound)),
            _ => Ok(bound),
        }
    }

    /// Bound which contains the single value `value`.
    ///
    /// Negative values are clamped to zero.
    pub fn exact(value: i64) -> Bound {
        let value = value.max(0);
        Bound {
            lo: value,
            hi: Some(value),
        }
    }

    /// Bound which is `>= lo` and has no upper limit.
    pub fn at_least(lo: i64) -> Bound {
        Bound {
            lo: lo.max(0),
            hi: None,
        }
    }

    /// The `[1, INT32_MAX]` bound assigned to axes whose extent cannot be
    /// derived from the inputs, such as an axis where either side may be
    /// broadcast.
    pub fn unbounded_like() -> Bound {
        Bound {
            lo: 1,
            hi: Some(INT32_MAX),
        }
    }

    pub fn lo(&self) -> i64 {
        self.lo
    }

    pub fn hi(&self) -> Option<i64> {
        self.hi
    }

    /// Return the value if this bound contains exactly one value.
    pub fn is_exact(&self) -> Option<i64> {
        match self.hi {
            Some(hi) if hi == self.lo => Some(hi),
            _ => None,
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.lo && self.hi.is_none_or(|hi| value <= hi)
    }

    /// Return true if a dimension with this bound may have size 1, and so may
    /// be broadcast.
    pub fn may_be_one(&self) -> bool {
        self.contains(1)
    }

    /// Intersect two bounds, treating an unbounded upper limit as infinity.
    pub fn intersect(&self, other: &Bound) -> Result<Bound, RangeError> {
        let lo = self.lo.max(other.lo);
        let hi = match (self.hi, other.hi) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        match hi {
            Some(hi) if hi < lo => Err(RangeError::empty(*self, *other)),
            _ => Ok(Bound { lo, hi }),
        }
    }

    /// Bound of the product of two dimensions with bounds `self` and `other`.
    ///
    /// The upper limit becomes unbounded if either side is unbounded or the
    /// product overflows.
    pub fn product(&self, other: &Bound) -> Bound {
        let lo = self.lo.saturating_mul(other.lo);
        let hi = match (self.hi, other.hi) {
            (Some(a), Some(b)) => a.checked_mul(b),
            _ => None,
        };
        Bound { lo, hi }
    }

    /// Return this bound with the upper limit clamped to at most `hi`.
    pub fn clamp_hi(&self, hi: i64) -> Result<Bound, RangeError> {
        self.intersect(&Bound {
            lo: 0,
            hi: Some(hi),
        })
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hi {
            Some(hi) => write!(f, "({}, {})", self.lo, hi),
            None => write!(f, "({}, None)", self.lo),
        }
    }
}

impl TryFrom<(i64, Option<i64>)> for Bound {
    type Error = RangeError;

    fn try_from((lo, hi): (i64, Option<i64>)) -> Result<Self, Self::Error> {
        Bound::new(lo, hi)
    }
}

impl From<Bound> for (i64, Option<i64>) {
    fn from(val: Bound) -> Self {
        (val.lo, val.hi)
    }
}
