use crate::bound::Bound;
use crate::classify::{Classify, ClassifyInput, Variant, tensor_inputs};
use crate::context::{Context, SessionOptions};
use crate::descriptor::{Mode, TensorDesc};
use crate::error::{ClassifyError, classify_bail};

/// Classification of elementwise operators, whose inputs all have the same
/// shape.
///
/// Produces a single variant in which all inputs have the unified shape.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct ElewiseOptions {}

impl Classify for ElewiseOptions {
    fn classify(
        &self,
        inputs: &[ClassifyInput],
        _options: &SessionOptions,
        _ctx: &mut Context,
    ) -> Result<Vec<Variant>, ClassifyError> {
        let tensors = tensor_inputs(inputs, "elewise")?;
        let rank = tensors[0].ndim();
        if tensors.iter().any(|t| t.ndim() != rank) {
            classify_bail!("elewise inputs must have the same rank");
        }

        let mut shape = Vec::with_capacity(rank);
        let mut bounds = Vec::with_capacity(rank);
        for axis in 0..rank {
            let dims: Vec<_> = tensors
                .iter()
                .map(|t| (t.static_dim(axis), t.bound(axis)))
                .collect();
            let (dim, bound) = unify_dims(&dims, axis)?;
            shape.push(dim);
            bounds.push(bound);
        }

        let mode = if shape.iter().all(|&dim| dim >= 0) {
            Mode::Const
        } else {
            Mode::Special
        };
        let classified = tensors
            .iter()
            .map(|desc| retype(desc, shape.clone(), bounds.clone(), Some(mode)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(vec![Variant::new(classified, mode)])
    }
}

/// Unify the sizes that several tensors have on one axis.
///
/// `dims` holds the static size, if known, and range of each tensor. Returns
/// the unified shape entry (`-1` if dynamic) and range.
pub(super) fn unify_dims(
    dims: &[(Option<i64>, Bound)],
    axis: usize,
) -> Result<(i64, Bound), ClassifyError> {
    let mut known: Option<i64> = None;
    for &(size, _) in dims {
        match (known, size) {
            (Some(k), Some(s)) if k != s => {
                classify_bail!("inputs have different sizes {} and {} on axis {}", k, s, axis);
            }
            (None, Some(s)) => known = Some(s),
            _ => {}
        }
    }

    if let Some(size) = known {
        if let Some((_, bound)) = dims.iter().find(|(_, bound)| !bound.contains(size)) {
            classify_bail!(
                "range {} on axis {} does not contain static size {}",
                bound,
                axis,
                size
            );
        }
        return Ok((size, Bound::exact(size)));
    }

    let mut bound = dims[0].1;
    for (_, other) in &dims[1..] {
        bound = bound.intersect(other)?;
    }
    match bound.is_exact() {
        Some(size) => Ok((size, bound)),
        None => Ok((-1, bound)),
    }
}

/// Copy `desc` with a new shape, range and optionally mode.
pub(super) fn retype(
    desc: &TensorDesc,
    shape: Vec<i64>,
    bounds: Vec<Bound>,
    mode: Option<Mode>,
) -> Result<TensorDesc, ClassifyError> {
    let mut builder = desc.to_builder().shape(shape).bounds(bounds);
    if let Some(mode) = mode {
        builder = builder.mode(mode);
    }
    Ok(builder.build()?)
}
