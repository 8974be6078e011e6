use crate::context::{Context, ContextKey};
use crate::descriptor::{RelPos, TensorDesc};
use crate::error::ShapeError;
use crate::sym_expr::{DimCategory, DimExpr};
use crate::variable_shape::{resolve_axes, value_or_var};

/// Build the shapes for a normalization.
///
/// Tensors in the same `_same_input_shape_group` share the variables of the
/// group's first member. The trailing axis descriptor gets its length.
pub(super) fn variable_shape(
    ctx: &mut Context,
    tensors: &[TensorDesc],
) -> Result<Vec<Vec<DimExpr>>, ShapeError> {
    let Some((axis_desc, data)) = tensors.split_last() else {
        return Err(ShapeError::WrongInputCount {
            expected: 2,
            actual: 0,
        });
    };
    if axis_desc.rel_pos_to_reduce() != Some(RelPos::Axis) {
        return Err(ShapeError::MissingField("rel_pos_to_reduce"));
    }
    let axes = axis_desc
        .value()
        .or_else(|| ctx.shape_value(ContextKey::ReduceAxes))
        .ok_or(ShapeError::MissingField("value"))?
        .to_vec();

    // Index of the tensor whose variables each tensor uses.
    let mut owner: Vec<usize> = (0..data.len()).collect();
    if let Some(groups) = ctx.groups_value(ContextKey::SameInputShapeGroup) {
        for group in groups {
            let Some(&first) = group.first() else {
                continue;
            };
            for &member in group {
                if let Some(slot) = owner.get_mut(member) {
                    *slot = first;
                }
            }
        }
    }

    let pool = ctx.pool_mut();
    let mut shapes = Vec::with_capacity(tensors.len());
    for (input, desc) in data.iter().enumerate() {
        let reduce_axes = resolve_axes(&axes, desc.ndim())?;
        let dims: Vec<DimExpr> = (0..desc.ndim())
            .map(|axis| {
                let category = if reduce_axes.contains(&axis) {
                    DimCategory::Reduce
                } else {
                    DimCategory::Normal
                };
                value_or_var(pool, desc, axis, owner[input], category)
            })
            .collect();
        shapes.push(dims);
    }
    shapes.push(
        axis_desc
            .shape()
            .iter()
            .map(|&len| DimExpr::Value(len))
            .collect(),
    );

    Ok(shapes)
}
