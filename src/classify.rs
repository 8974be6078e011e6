//! Classification of inputs into kernel variants.
//!
//! Each compute pattern has an options struct which implements the
//! [`Classify`] trait. [`Pattern`] selects one of them.

use std::fmt;

use smallvec::SmallVec;

use crate::context::{Context, ContextKey, ContextValue, SessionOptions};
use crate::descriptor::{Mode, RelPos, TensorDesc};
use crate::error::{ClassificationError, ClassifyError, classify_bail};

mod broadcast;
mod elewise;
mod norm;
mod reduce;
mod split;
mod transdata;

pub use broadcast::BroadcastOptions;
pub use elewise::ElewiseOptions;
pub use norm::NormOptions;
pub use reduce::ReduceOptions;
pub use split::{MAX_SPLIT_NUM, SplitOptions};
pub use transdata::TransdataOptions;

/// One input to [`classify`](crate::ClassificationSession::classify).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ClassifyInput {
    Tensor(TensorDesc),
    /// List of integers, where `None` is a value unknown at compile time.
    ///
    /// Used for reduce axes and split sizes.
    List(Vec<Option<i64>>),
}

impl ClassifyInput {
    pub fn as_tensor(&self) -> Option<&TensorDesc> {
        match self {
            Self::Tensor(desc) => Some(desc),
            Self::List(_) => None,
        }
    }

    /// Return true if this input holds reduce axes.
    fn is_axis(&self) -> bool {
        match self {
            Self::Tensor(desc) => desc.rel_pos_to_reduce() == Some(RelPos::Axis),
            Self::List(_) => true,
        }
    }
}

impl From<TensorDesc> for ClassifyInput {
    fn from(val: TensorDesc) -> Self {
        Self::Tensor(val)
    }
}

impl From<Vec<Option<i64>>> for ClassifyInput {
    fn from(val: Vec<Option<i64>>) -> Self {
        Self::List(val)
    }
}

/// A combination of input shapes that needs its own compiled kernel.
#[derive(Clone, Debug)]
pub struct Variant {
    tensors: Vec<TensorDesc>,
    mode: Mode,
    attrs: Context,
}

impl Variant {
    pub fn new(tensors: Vec<TensorDesc>, mode: Mode) -> Variant {
        Variant {
            tensors,
            mode,
            attrs: Context::new(),
        }
    }

    /// Add an entry to the variant's context.
    pub fn with_attr(mut self, key: ContextKey, value: impl Into<ContextValue>) -> Self {
        self.attrs.set(key, value);
        self
    }

    /// Classified descriptors, one per input slot.
    pub fn tensors(&self) -> &[TensorDesc] {
        &self.tensors
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Context entries specific to this variant.
    pub fn attrs(&self) -> &Context {
        &self.attrs
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.mode)?;
        for (i, desc) in self.tensors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?} (", desc.shape())?;
            for (j, bound) in desc.range().iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", bound)?;
            }
            write!(f, ")")?;
        }
        write!(f, "]")?;
        for (key, value) in self.attrs.iter() {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Compute pattern of an operator, with the options that control how its
/// inputs are classified.
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Elewise(ElewiseOptions),
    Broadcast(BroadcastOptions),
    Reduce(ReduceOptions),
    Split(SplitOptions),
    Transdata(TransdataOptions),
    Norm(NormOptions),
}

impl Pattern {
    /// Elementwise pattern with default options.
    pub fn elewise() -> Pattern {
        Self::Elewise(ElewiseOptions::default())
    }

    /// Broadcast pattern with axis kinds inferred from the inputs.
    pub fn broadcast() -> Pattern {
        Self::Broadcast(BroadcastOptions::default())
    }

    /// Name of the pattern, as recorded in the `_pattern` context entry.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Elewise(_) => "elewise",
            Self::Broadcast(_) => "broadcast",
            Self::Reduce(_) => "reduce",
            Self::Split(_) => "split",
            Self::Transdata(_) => "transdata",
            Self::Norm(_) => "norm",
        }
    }

    pub(crate) fn classifier(&self) -> &dyn Classify {
        match self {
            Self::Elewise(opts) => opts,
            Self::Broadcast(opts) => opts,
            Self::Reduce(opts) => opts,
            Self::Split(opts) => opts,
            Self::Transdata(opts) => opts,
            Self::Norm(opts) => opts,
        }
    }
}

/// Enumerate the variants of one compute pattern.
pub(crate) trait Classify {
    /// Classify `inputs` into variants, most general first.
    ///
    /// Session-level entries which depend on the pattern are written to
    /// `ctx`. Per-variant entries go in each variant's attributes.
    fn classify(
        &self,
        inputs: &[ClassifyInput],
        options: &SessionOptions,
        ctx: &mut Context,
    ) -> Result<Vec<Variant>, ClassifyError>;
}

/// Return the descriptors in `inputs`, failing if any input is a list.
fn tensor_inputs<'a>(
    inputs: &'a [ClassifyInput],
    pattern: &str,
) -> Result<Vec<&'a TensorDesc>, ClassifyError> {
    inputs
        .iter()
        .map(|input| match input {
            ClassifyInput::Tensor(desc) => Ok(desc),
            ClassifyInput::List(_) => Err(ClassificationError::new(format!(
                "{} inputs must be tensors",
                pattern
            ))
            .into()),
        })
        .collect()
}

/// Return the mode for a classified tensor with the given shape.
fn mode_for(desc: &TensorDesc) -> Mode {
    if desc.is_static() {
        Mode::Const
    } else {
        Mode::Special
    }
}

/// Read the axis values of a reduce-axis input.
///
/// Returns `None` if the values are only known at run time.
fn axis_values(input: &ClassifyInput) -> Result<Option<Vec<i64>>, ClassifyError> {
    match input {
        ClassifyInput::List(values) => {
            let Some(values) = values.iter().copied().collect::<Option<Vec<_>>>() else {
                classify_bail!("reduce axis must not be None");
            };
            Ok(Some(values))
        }
        ClassifyInput::Tensor(desc) => Ok(desc.value().map(|v| v.to_vec())),
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim-1]` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
fn resolve_axis(ndim: usize, axis: i64) -> Result<usize, ClassifyError> {
    let len = ndim as i64;
    if axis < -len || axis >= len {
        classify_bail!("axis out of range: {} for rank {}", axis, ndim);
    }
    let axis = if axis >= 0 { axis } else { len + axis };
    Ok(axis as usize)
}

/// Resolve a sequence of axes to sorted and de-duplicated zero-based
/// dimension indexes.
fn resolve_axes(ndim: usize, axes: &[i64]) -> Result<SmallVec<[usize; 4]>, ClassifyError> {
    let mut resolved = SmallVec::with_capacity(axes.len());
    for &axis in axes {
        resolved.push(resolve_axis(ndim, axis)?);
    }
    resolved.sort();
    resolved.dedup();
    Ok(resolved)
}
