use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::bound::Bound;

/// A tensor descriptor is malformed.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeError {
    /// A shape entry is negative but not `-1`.
    InvalidDim { axis: usize, dim: i64 },

    /// The range list does not have one entry per dimension.
    RangeLengthMismatch { rank: usize, ranges: usize },

    /// A dynamic (`-1`) axis has no range.
    MissingRange { axis: usize },

    /// A range entry is not a valid interval, or the range of a dynamic axis
    /// starts below 1.
    InvalidRange {
        axis: usize,
        lo: i64,
        hi: Option<i64>,
    },

    /// A static dimension lies outside the range given for it.
    DimOutOfRange { axis: usize, dim: i64, bound: Bound },

    /// An axis pattern annotation does not match the rank of the shape.
    PatternLengthMismatch { rank: usize, pattern: usize },

    /// A descriptor lacks a field required by its mode.
    MissingField(&'static str),

    /// The wrong number of descriptors was supplied.
    WrongInputCount { expected: usize, actual: usize },

    /// An axis value is outside `[-rank, rank - 1]`.
    AxisOutOfRange { axis: i64, rank: usize },

    /// The context lacks an entry that the operator mode needs.
    MissingContext(&'static str),
}

impl Display for ShapeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDim { axis, dim } => {
                write!(f, "dimension {} has invalid size {}", axis, dim)
            }
            Self::RangeLengthMismatch { rank, ranges } => write!(
                f,
                "shape has {} dims but range has {} entries",
                rank, ranges
            ),
            Self::MissingRange { axis } => {
                write!(f, "dynamic dimension {} has no range", axis)
            }
            Self::InvalidRange { axis, lo, hi } => match hi {
                Some(hi) => write!(f, "dimension {} has invalid range ({}, {})", axis, lo, hi),
                None => write!(f, "dimension {} has invalid range ({}, None)", axis, lo),
            },
            Self::DimOutOfRange { axis, dim, bound } => write!(
                f,
                "dimension {} has size {} outside its range {}",
                axis, dim, bound
            ),
            Self::PatternLengthMismatch { rank, pattern } => write!(
                f,
                "axis pattern has {} entries for a shape of rank {}",
                pattern, rank
            ),
            Self::MissingField(field) => write!(f, "descriptor is missing \"{}\"", field),
            Self::WrongInputCount { expected, actual } => {
                write!(f, "expected {} descriptors but got {}", expected, actual)
            }
            Self::AxisOutOfRange { axis, rank } => {
                write!(f, "axis {} is out of range for rank {}", axis, rank)
            }
            Self::MissingContext(key) => write!(f, "context has no \"{}\" entry", key),
        }
    }
}

impl Error for ShapeError {}

/// The inputs to `classify` violate the structure the pattern requires.
///
/// The message text is stable, since callers match on it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationError {
    message: String,
}

impl ClassificationError {
    pub fn new(message: impl Into<String>) -> Self {
        ClassificationError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ClassificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ClassificationError {}

/// A bound is invalid, or two bounds have an empty intersection.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeError {
    lhs: Bound,
    rhs: Option<Bound>,
}

impl RangeError {
    pub(crate) fn invalid(bound: Bound) -> Self {
        RangeError {
            lhs: bound,
            rhs: None,
        }
    }

    pub(crate) fn empty(lhs: Bound, rhs: Bound) -> Self {
        RangeError {
            lhs,
            rhs: Some(rhs),
        }
    }
}

impl Display for RangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.rhs {
            Some(rhs) => write!(f, "ranges {} and {} do not intersect", self.lhs, rhs),
            None => write!(f, "invalid range {}", self.lhs),
        }
    }
}

impl Error for RangeError {}

/// Errors returned by [`ClassificationSession::classify`](crate::ClassificationSession::classify).
#[derive(Clone, Debug, PartialEq)]
pub enum ClassifyError {
    Shape(ShapeError),
    Classification(ClassificationError),
    Range(RangeError),
}

impl Display for ClassifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shape(err) => write!(f, "shape error: {}", err),
            Self::Classification(err) => write!(f, "classification error: {}", err),
            Self::Range(err) => write!(f, "range error: {}", err),
        }
    }
}

impl Error for ClassifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Shape(err) => Some(err),
            Self::Classification(err) => Some(err),
            Self::Range(err) => Some(err),
        }
    }
}

impl From<ShapeError> for ClassifyError {
    fn from(val: ShapeError) -> Self {
        Self::Shape(val)
    }
}

impl From<ClassificationError> for ClassifyError {
    fn from(val: ClassificationError) -> Self {
        Self::Classification(val)
    }
}

impl From<RangeError> for ClassifyError {
    fn from(val: RangeError) -> Self {
        Self::Range(val)
    }
}

/// Construct and return a [`ClassificationError`] from a format string.
macro_rules! classify_bail {
    ($($arg:tt)*) => {
        return Err(crate::error::ClassificationError::new(format!($($arg)*)).into())
    };
}

pub(crate) use classify_bail;
