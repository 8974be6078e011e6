//! Descriptors for the tensors handed to the classifier.

use std::fmt;
use std::str::FromStr;

use crate::bound::Bound;
use crate::error::ShapeError;

/// Shape mode of a tensor descriptor.
///
/// The mode tells the variable-shape builder how the dims of a classified
/// tensor should be turned into variables.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Mode {
    /// Shape as supplied by the caller, not classified yet.
    #[default]
    Original,
    /// Every dim is known.
    Const,
    /// Dims have been classified and may be dynamic.
    Special,
    /// Split input whose last dim is padded to a multiple of the split factor.
    SplitGeneral,
    /// Split input which is used without padding.
    SplitSpecial,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Const => "const",
            Self::Special => "special",
            Self::SplitGeneral => "split_general",
            Self::SplitSpecial => "split_special",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Memory layout of a tensor.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Format {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "ND"))]
    Nd,
    #[cfg_attr(feature = "serde", serde(rename = "NCHW"))]
    Nchw,
    #[cfg_attr(feature = "serde", serde(rename = "NHWC"))]
    Nhwc,
    /// Blocked layout where the channel axis is split into `C1` blocks of `C0`.
    #[cfg_attr(feature = "serde", serde(rename = "NC1HWC0"))]
    Nc1hwc0,
    /// Blocked layout where the last two axes `(m, n)` become
    /// `(n1, m1, m0, n0)`.
    #[cfg_attr(feature = "serde", serde(rename = "FRACTAL_NZ"))]
    FractalNz,
}

/// Position of a tensor relative to the reduction in a reduce classification.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RelPos {
    /// The tensor is the data being reduced.
    Before,
    /// The tensor holds the axes being reduced.
    Axis,
}

/// Broadcast role of one axis.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum AxisKind {
    /// `A`: the axis has the same extent in every input.
    Common,
    /// `B`: the axis may be broadcast, ie. have extent 1 in some inputs.
    Broadcast,
}

impl AxisKind {
    pub fn as_char(&self) -> char {
        match self {
            Self::Common => 'A',
            Self::Broadcast => 'B',
        }
    }
}

/// Per-axis broadcast annotation such as `ABA`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct AxisPattern(Vec<AxisKind>);

impl AxisPattern {
    pub fn new(kinds: Vec<AxisKind>) -> Self {
        AxisPattern(kinds)
    }

    pub fn kinds(&self) -> &[AxisKind] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Error returned when parsing an [`AxisPattern`] from a string.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsePatternError(char);

impl fmt::Display for ParsePatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown axis kind '{}', expected 'A' or 'B'", self.0)
    }
}

impl std::error::Error for ParsePatternError {}

impl FromStr for AxisPattern {
    type Err = ParsePatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kinds = s
            .chars()
            .map(|ch| match ch {
                'A' => Ok(AxisKind::Common),
                'B' => Ok(AxisKind::Broadcast),
                _ => Err(ParsePatternError(ch)),
            })
            .collect::<Result<_, _>>()?;
        Ok(AxisPattern(kinds))
    }
}

impl TryFrom<String> for AxisPattern {
    type Error = ParsePatternError;

    fn try_from(val: String) -> Result<Self, Self::Error> {
        val.parse()
    }
}

impl From<AxisPattern> for String {
    fn from(val: AxisPattern) -> Self {
        val.to_string()
    }
}

impl fmt::Display for AxisPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in &self.0 {
            write!(f, "{}", kind.as_char())?;
        }
        Ok(())
    }
}

/// Shape, value ranges and layout metadata of one tensor.
///
/// A `-1` in the shape marks a dimension that is unknown until run time. Its
/// range gives the values it may take. Descriptors are created with
/// [`TensorDesc::builder`], which validates them.
///
/// ```
/// use varshape::{Bound, TensorDesc};
///
/// let desc = TensorDesc::builder(vec![-1, 16])
///     .range(vec![(1, None), (16, Some(16))])
///     .build()
///     .unwrap();
/// assert_eq!(desc.ndim(), 2);
/// assert_eq!(desc.bound(0), Bound::at_least(1));
/// assert_eq!(desc.static_dim(1), Some(16));
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(try_from = "serde_impl::RawTensorDesc"))]
pub struct TensorDesc {
    shape: Vec<i64>,
    range: Vec<Bound>,
    dtype: String,
    format: Format,
    ori_format: Format,
    ori_shape: Option<Vec<i64>>,
    mode: Mode,
    pattern: Option<AxisPattern>,
    rel_pos_to_reduce: Option<RelPos>,
    value: Option<Vec<i64>>,
    split_factor: Option<i64>,
}

impl TensorDesc {
    /// Start building a descriptor with the given shape.
    pub fn builder(shape: Vec<i64>) -> TensorDescBuilder {
        TensorDescBuilder {
            shape,
            range: None,
            dtype: "float16".to_string(),
            format: Format::Nd,
            ori_format: None,
            ori_shape: None,
            mode: Mode::Original,
            pattern: None,
            rel_pos_to_reduce: None,
            value: None,
            split_factor: None,
        }
    }

    /// Create a builder initialized with the fields of this descriptor.
    pub fn to_builder(&self) -> TensorDescBuilder {
        TensorDescBuilder {
            shape: self.shape.clone(),
            range: Some(RangeSpec::Bounds(self.range.clone())),
            dtype: self.dtype.clone(),
            format: self.format,
            ori_format: Some(self.ori_format),
            ori_shape: self.ori_shape.clone(),
            mode: self.mode,
            pattern: self.pattern.clone(),
            rel_pos_to_reduce: self.rel_pos_to_reduce,
            value: self.value.clone(),
            split_factor: self.split_factor,
        }
    }

    /// Create a descriptor for a list of reduce axes known at compile time.
    pub fn axes(values: Vec<i64>) -> TensorDesc {
        let mut desc = Self::int_vector(values.len());
        desc.rel_pos_to_reduce = Some(RelPos::Axis);
        desc.value = Some(values);
        desc
    }

    /// Create a descriptor for `len` reduce axes whose values are only known
    /// at run time.
    pub fn axes_unknown(len: usize) -> TensorDesc {
        let mut desc = Self::int_vector(len);
        desc.rel_pos_to_reduce = Some(RelPos::Axis);
        desc
    }

    /// Create a descriptor for a vector whose values are listed in `values`.
    ///
    /// Unknown elements are `-1`.
    pub fn values(values: Vec<i64>) -> TensorDesc {
        let mut desc = Self::int_vector(values.len());
        desc.value = Some(values);
        desc
    }

    fn int_vector(len: usize) -> TensorDesc {
        let len = len as i64;
        TensorDesc {
            shape: vec![len],
            range: vec![Bound::exact(len)],
            dtype: "int32".to_string(),
            format: Format::Nd,
            ori_format: Format::Nd,
            ori_shape: None,
            mode: Mode::Original,
            pattern: None,
            rel_pos_to_reduce: None,
            value: None,
            split_factor: None,
        }
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn range(&self) -> &[Bound] {
        &self.range
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Return the range of values the dimension at `axis` may take.
    ///
    /// Panics if `axis` is out of bounds.
    pub fn bound(&self, axis: usize) -> Bound {
        self.range[axis]
    }

    /// Return the size of `axis` if it is known, either because the shape
    /// gives it or because its range contains a single value.
    pub fn static_dim(&self, axis: usize) -> Option<i64> {
        match self.shape[axis] {
            -1 => self.range[axis].is_exact(),
            dim => Some(dim),
        }
    }

    /// Return the shape with every dim known, or `None` if any dim is
    /// dynamic.
    pub fn static_shape(&self) -> Option<Vec<i64>> {
        (0..self.ndim()).map(|axis| self.static_dim(axis)).collect()
    }

    pub fn is_static(&self) -> bool {
        (0..self.ndim()).all(|axis| self.static_dim(axis).is_some())
    }

    pub fn dtype(&self) -> &str {
        &self.dtype
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn ori_format(&self) -> Format {
        self.ori_format
    }

    pub fn ori_shape(&self) -> Option<&[i64]> {
        self.ori_shape.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn pattern(&self) -> Option<&AxisPattern> {
        self.pattern.as_ref()
    }

    pub fn rel_pos_to_reduce(&self) -> Option<RelPos> {
        self.rel_pos_to_reduce
    }

    pub fn value(&self) -> Option<&[i64]> {
        self.value.as_deref()
    }

    pub fn split_factor(&self) -> Option<i64> {
        self.split_factor
    }
}

#[derive(Clone, Debug)]
enum RangeSpec {
    Pairs(Vec<(i64, Option<i64>)>),
    Bounds(Vec<Bound>),
}

/// Builder for [`TensorDesc`].
#[derive(Clone, Debug)]
pub struct TensorDescBuilder {
    shape: Vec<i64>,
    range: Option<RangeSpec>,
    dtype: String,
    format: Format,
    ori_format: Option<Format>,
    ori_shape: Option<Vec<i64>>,
    mode: Mode,
    pattern: Option<AxisPattern>,
    rel_pos_to_reduce: Option<RelPos>,
    value: Option<Vec<i64>>,
    split_factor: Option<i64>,
}

impl TensorDescBuilder {
    /// Replace the shape.
    pub fn shape(mut self, shape: Vec<i64>) -> Self {
        self.shape = shape;
        self
    }

    /// Set the value range of each dim as `(lo, hi)` pairs, where `hi` is
    /// `None` if the dim has no upper bound.
    pub fn range(mut self, range: Vec<(i64, Option<i64>)>) -> Self {
        self.range = Some(RangeSpec::Pairs(range));
        self
    }

    /// Set the value range of each dim.
    pub fn bounds(mut self, bounds: Vec<Bound>) -> Self {
        self.range = Some(RangeSpec::Bounds(bounds));
        self
    }

    pub fn dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = dtype.into();
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Set the layout that reduce axes are expressed in. Defaults to the
    /// tensor's own format.
    pub fn ori_format(mut self, format: Format) -> Self {
        self.ori_format = Some(format);
        self
    }

    pub fn ori_shape(mut self, shape: Vec<i64>) -> Self {
        self.ori_shape = Some(shape);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn pattern(mut self, pattern: AxisPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn rel_pos_to_reduce(mut self, pos: RelPos) -> Self {
        self.rel_pos_to_reduce = Some(pos);
        self
    }

    pub fn value(mut self, value: Vec<i64>) -> Self {
        self.value = Some(value);
        self
    }

    pub fn split_factor(mut self, factor: i64) -> Self {
        self.split_factor = Some(factor);
        self
    }

    /// Validate the fields and create the descriptor.
    pub fn build(self) -> Result<TensorDesc, ShapeError> {
        let rank = self.shape.len();

        for (axis, &dim) in self.shape.iter().enumerate() {
            if dim < -1 {
                return Err(ShapeError::InvalidDim { axis, dim });
            }
        }

        let range = match self.range {
            Some(spec) => {
                let bounds = match spec {
                    RangeSpec::Bounds(bounds) => bounds,
                    RangeSpec::Pairs(pairs) => pairs
                        .into_iter()
                        .enumerate()
                        .map(|(axis, (lo, hi))| {
                            Bound::new(lo, hi).map_err(|_| ShapeError::InvalidRange { axis, lo, hi })
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                };
                if bounds.len() != rank {
                    return Err(ShapeError::RangeLengthMismatch {
                        rank,
                        ranges: bounds.len(),
                    });
                }
                for (axis, (&dim, bound)) in self.shape.iter().zip(&bounds).enumerate() {
                    if dim == -1 && bound.lo() < 1 {
                        return Err(ShapeError::InvalidRange {
                            axis,
                            lo: bound.lo(),
                            hi: bound.hi(),
                        });
                    }
                    if dim >= 0 && !bound.contains(dim) {
                        return Err(ShapeError::DimOutOfRange {
                            axis,
                            dim,
                            bound: *bound,
                        });
                    }
                }
                bounds
            }
            None => self
                .shape
                .iter()
                .enumerate()
                .map(|(axis, &dim)| match dim {
                    -1 => Err(ShapeError::MissingRange { axis }),
                    dim => Ok(Bound::exact(dim)),
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        if let Some(pattern) = &self.pattern
            && pattern.len() != rank
        {
            return Err(ShapeError::PatternLengthMismatch {
                rank,
                pattern: pattern.len(),
            });
        }

        Ok(TensorDesc {
            shape: self.shape,
            range,
            dtype: self.dtype,
            format: self.format,
            ori_format: self.ori_format.unwrap_or(self.format),
            ori_shape: self.ori_shape,
            mode: self.mode,
            pattern: self.pattern,
            rel_pos_to_reduce: self.rel_pos_to_reduce,
            value: self.value,
            split_factor: self.split_factor,
        })
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::{AxisPattern, Format, Mode, RelPos, TensorDesc};
    use crate::error::ShapeError;

    /// Dict form of a descriptor, eg.
    /// `{"shape": [-1, 16], "range": [[1, null], [16, 16]], "mode": "special"}`.
    #[derive(serde::Deserialize)]
    pub(super) struct RawTensorDesc {
        shape: Vec<i64>,
        range: Option<Vec<(i64, Option<i64>)>>,
        dtype: Option<String>,
        format: Option<Format>,
        ori_format: Option<Format>,
        ori_shape: Option<Vec<i64>>,
        mode: Option<Mode>,
        pattern: Option<AxisPattern>,
        rel_pos_to_reduce: Option<RelPos>,
        value: Option<Vec<i64>>,
        split_factor: Option<i64>,
    }

    impl TryFrom<RawTensorDesc> for TensorDesc {
        type Error = ShapeError;

        fn try_from(raw: RawTensorDesc) -> Result<Self, Self::Error> {
            let mut builder = TensorDesc::builder(raw.shape);
            if let Some(range) = raw.range {
                builder = builder.range(range);
            }
            if let Some(dtype) = raw.dtype {
                builder = builder.dtype(dtype);
            }
            if let Some(format) = raw.format {
                builder = builder.format(format);
            }
            if let Some(format) = raw.ori_format {
                builder = builder.ori_format(format);
            }
            if let Some(shape) = raw.ori_shape {
                builder = builder.ori_shape(shape);
            }
            if let Some(mode) = raw.mode {
                builder = builder.mode(mode);
            }
            if let Some(pattern) = raw.pattern {
                builder = builder.pattern(pattern);
            }
            if let Some(pos) = raw.rel_pos_to_reduce {
                builder = builder.rel_pos_to_reduce(pos);
            }
            if let Some(value) = raw.value {
                builder = builder.value(value);
            }
            if let Some(factor) = raw.split_factor {
                builder = builder.split_factor(factor);
            }
            builder.build()
        }
    }
}
