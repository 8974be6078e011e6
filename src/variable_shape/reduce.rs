use crate::context::{Context, ContextKey};
use crate::descriptor::{RelPos, TensorDesc};
use crate::error::ShapeError;
use crate::sym_expr::{DimCategory, DimExpr};
use crate::variable_shape::{resolve_axes, value_or_var};

/// Build the shapes for a reduction.
///
/// The data tensor gets its dims, with reduced axes marked as such. The axis
/// descriptor's slot gets the shape of the reduction's output.
pub(super) fn variable_shape(
    ctx: &mut Context,
    tensors: &[TensorDesc],
) -> Result<Vec<Vec<DimExpr>>, ShapeError> {
    if tensors.len() != 2 {
        return Err(ShapeError::WrongInputCount {
            expected: 2,
            actual: tensors.len(),
        });
    }
    let axis_slot = tensors
        .iter()
        .position(|t| t.rel_pos_to_reduce() == Some(RelPos::Axis))
        .ok_or(ShapeError::MissingField("rel_pos_to_reduce"))?;
    let data_slot = 1 - axis_slot;
    let data = &tensors[data_slot];

    let axes = tensors[axis_slot]
        .value()
        .ok_or(ShapeError::MissingField("value"))?;
    let axes = resolve_axes(axes, data.ndim())?;
    let keepdims = ctx.flag(ContextKey::Keepdims);

    let pool = ctx.pool_mut();
    let dims: Vec<DimExpr> = (0..data.ndim())
        .map(|axis| {
            let category = if axes.contains(&axis) {
                DimCategory::Reduce
            } else {
                DimCategory::Normal
            };
            value_or_var(pool, data, axis, data_slot, category)
        })
        .collect();

    let output: Vec<DimExpr> = dims
        .iter()
        .enumerate()
        .filter_map(|(axis, dim)| match axes.contains(&axis) {
            false => Some(dim.clone()),
            true if keepdims => Some(DimExpr::Value(1)),
            true => None,
        })
        .collect();

    let mut shapes = vec![Vec::new(), Vec::new()];
    shapes[data_slot] = dims;
    shapes[axis_slot] = output;
    Ok(shapes)
}
