use crate::bound::Bound;
use crate::context::{Context, ContextKey};
use crate::descriptor::{Mode, TensorDesc};
use crate::error::ShapeError;
use crate::sym_expr::{DimCategory, DimExpr};
use crate::variable_shape::value_or_var;

/// Build the shapes for a split: the dims of the tensor being split,
/// followed by the size of each piece.
pub(super) fn variable_shape(
    ctx: &mut Context,
    tensors: &[TensorDesc],
) -> Result<Vec<Vec<DimExpr>>, ShapeError> {
    let [shape, pieces] = tensors else {
        return Err(ShapeError::WrongInputCount {
            expected: 2,
            actual: tensors.len(),
        });
    };
    let general = match ctx.str_value(ContextKey::Mode) {
        Some(mode) => mode == Mode::SplitGeneral.as_str(),
        None => shape.mode() == Mode::SplitGeneral,
    };
    let avg_split = ctx.flag(ContextKey::AvgSplit);
    let sizes = pieces.value().ok_or(ShapeError::MissingField("value"))?;

    let pool = ctx.pool_mut();
    let mut dims: Vec<DimExpr> = (0..shape.ndim())
        .map(|axis| value_or_var(pool, shape, axis, 0, DimCategory::Normal))
        .collect();

    let last_bound = match dims.last_mut() {
        Some(last) => {
            if general {
                let factor = shape
                    .split_factor()
                    .ok_or(ShapeError::MissingField("split_factor"))?;
                *last = last.ceil_to_multiple(factor).simplify();
            }
            shape.bound(shape.ndim() - 1)
        }
        None => Bound::at_least(1),
    };

    // A piece is at least 1 and no larger than the axis it is taken from.
    let piece_bound = match last_bound.hi() {
        Some(hi) => Bound::at_least(1)
            .clamp_hi(hi)
            .unwrap_or(Bound::exact(0)),
        None => Bound::at_least(1),
    };

    let piece_dims = sizes
        .iter()
        .enumerate()
        .map(|(k, &size)| match size {
            size if size >= 0 => DimExpr::Value(size),
            _ if avg_split => pool.mint_split(0, piece_bound),
            _ => pool.mint_split(k, piece_bound),
        })
        .collect();

    Ok(vec![dims, piece_dims])
}
