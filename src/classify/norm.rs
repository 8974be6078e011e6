use crate::bound::Bound;
use crate::classify::elewise::{retype, unify_dims};
use crate::classify::{Classify, ClassifyInput, Variant, axis_values, resolve_axes};
use crate::context::{Context, ContextKey, SessionOptions};
use crate::descriptor::{Mode, TensorDesc};
use crate::error::{ClassificationError, ClassifyError, classify_bail};

/// Input has the full shape of the data being normalized.
const FULL_SHAPE: u8 = 0;

/// Input has the shape of the data after reduction, ie. size 1 on reduce
/// axes.
const REDUCED_SHAPE: u8 = 1;

/// Classification of normalization operators such as layer norm.
///
/// Inputs are one or more tensors followed by the reduce axes.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NormOptions {
    /// Shape type of each tensor input: `0` for the full shape, `1` for the
    /// reduced shape.
    pub input_shape_type: Vec<u8>,

    /// Groups of tensor inputs whose shapes are identical.
    pub same_input_shape_group: Vec<Vec<usize>>,

    pub keepdims: bool,
}

impl NormOptions {
    /// Check that each group member is a valid tensor index, belongs to one
    /// group only and has the same shape type as the rest of its group.
    fn validate_groups(&self, n_tensors: usize) -> Result<(), ClassifyError> {
        let mut grouped = vec![false; n_tensors];
        for group in &self.same_input_shape_group {
            for &member in group {
                match grouped.get_mut(member) {
                    None => classify_bail!(
                        "norm shape group member {} out of range for {} tensors",
                        member,
                        n_tensors
                    ),
                    Some(true) => {
                        classify_bail!("norm input {} is in more than one shape group", member)
                    }
                    Some(seen) => *seen = true,
                }
            }
            let mut types = group.iter().map(|&member| self.input_shape_type[member]);
            if let Some(first) = types.next()
                && types.any(|ty| ty != first)
            {
                classify_bail!(
                    "norm shape group {:?} mixes full and reduced shape inputs",
                    group
                );
            }
        }
        Ok(())
    }
}

impl Classify for NormOptions {
    fn classify(
        &self,
        inputs: &[ClassifyInput],
        _options: &SessionOptions,
        _ctx: &mut Context,
    ) -> Result<Vec<Variant>, ClassifyError> {
        let Some((axis_input, tensor_inputs)) = inputs.split_last() else {
            classify_bail!("norm requires input tensors and reduce axes");
        };
        let tensors: Vec<&TensorDesc> = tensor_inputs
            .iter()
            .map(|input| input.as_tensor())
            .collect::<Option<_>>()
            .ok_or_else(|| {
                ClassificationError::new("norm inputs before the axes must be tensors")
            })?;
        if tensors.is_empty() {
            classify_bail!("norm requires input tensors and reduce axes");
        }

        if self.input_shape_type.len() != tensors.len() {
            classify_bail!(
                "input_shape_type has {} entries for {} input tensors",
                self.input_shape_type.len(),
                tensors.len()
            );
        }
        if let Some(ty) = self
            .input_shape_type
            .iter()
            .find(|&&ty| ty != FULL_SHAPE && ty != REDUCED_SHAPE)
        {
            classify_bail!("unknown input shape type {}", ty);
        }
        self.validate_groups(tensors.len())?;

        let Some(rank) = tensors
            .iter()
            .zip(&self.input_shape_type)
            .find(|(_, ty)| **ty == FULL_SHAPE)
            .map(|(t, _)| t.ndim())
        else {
            classify_bail!("norm requires at least one input with the full shape");
        };
        if tensors.iter().any(|t| t.ndim() != rank) {
            classify_bail!("norm inputs must have the same rank");
        }

        let Some(values) = axis_values(axis_input)? else {
            classify_bail!("norm reduce axes must be known at compile time");
        };
        let axes = resolve_axes(rank, &values)?;

        // (static size, range) of each tensor on each axis.
        let mut dims: Vec<Vec<(Option<i64>, Bound)>> = Vec::with_capacity(tensors.len());
        for (i, (desc, &ty)) in tensors.iter().zip(&self.input_shape_type).enumerate() {
            let mut tensor_dims: Vec<_> = (0..rank)
                .map(|axis| (desc.static_dim(axis), desc.bound(axis)))
                .collect();
            if ty == REDUCED_SHAPE {
                for &axis in &axes {
                    match tensor_dims[axis].0 {
                        Some(size) if size != 1 => classify_bail!(
                            "reduced input {} has size {} on reduce axis {}",
                            i,
                            size,
                            axis
                        ),
                        _ => tensor_dims[axis] = (Some(1), Bound::exact(1)),
                    }
                }
            }
            dims.push(tensor_dims);
        }

        for group in &self.same_input_shape_group {
            for axis in 0..rank {
                let column: Vec<_> = group.iter().map(|&m| dims[m][axis]).collect();
                let (size, bound) = unify_dims(&column, axis)?;
                let size = (size >= 0).then_some(size);
                for &member in group {
                    dims[member][axis] = (size, bound);
                }
            }
        }

        let all_static = dims
            .iter()
            .all(|tensor_dims| tensor_dims.iter().all(|(size, _)| size.is_some()));
        let mode = if all_static { Mode::Const } else { Mode::Special };

        let mut classified = Vec::with_capacity(inputs.len());
        for (desc, tensor_dims) in tensors.iter().zip(dims) {
            let (shape, bounds): (Vec<i64>, Vec<Bound>) = tensor_dims
                .into_iter()
                .map(|(size, bound)| (size.unwrap_or(-1), bound))
                .unzip();
            classified.push(retype(desc, shape, bounds, Some(mode))?);
        }
        let reduce_axes: Vec<i64> = axes.iter().map(|&a| a as i64).collect();
        classified.push(TensorDesc::axes(reduce_axes.clone()));

        Ok(vec![
            Variant::new(classified, mode)
                .with_attr(ContextKey::ReduceAxes, reduce_axes)
                .with_attr(ContextKey::Keepdims, self.keepdims)
                .with_attr(
                    ContextKey::SameInputShapeGroup,
                    self.same_input_shape_group.clone(),
                ),
        ])
    }
}
