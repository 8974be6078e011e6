use crate::context::{Context, ContextKey};
use crate::descriptor::TensorDesc;
use crate::error::ShapeError;
use crate::sym_expr::{DimCategory, DimExpr};
use crate::variable_shape::value_or_var;

/// Build the shapes for a layout transformation.
///
/// Source dims are variables. Destination dims are expressions over them,
/// derived from the `_transdata_axes` map: a split axis becomes
/// `(ceil_div(d, c0), c0)` and merged axes become `outer * inner`.
pub(super) fn variable_shape(
    ctx: &mut Context,
    tensors: &[TensorDesc],
) -> Result<Vec<Vec<DimExpr>>, ShapeError> {
    let [src, dst] = tensors else {
        return Err(ShapeError::WrongInputCount {
            expected: 2,
            actual: tensors.len(),
        });
    };
    let c0 = ctx
        .int_value(ContextKey::TransdataC0)
        .ok_or(ShapeError::MissingContext(ContextKey::TransdataC0.as_str()))?;
    let axes_map = ctx
        .get_key(ContextKey::TransdataAxes)
        .and_then(|v| v.as_axes_map())
        .ok_or(ShapeError::MissingContext(ContextKey::TransdataAxes.as_str()))?
        .to_vec();

    let pool = ctx.pool_mut();
    let src_dims: Vec<DimExpr> = (0..src.ndim())
        .map(|axis| value_or_var(pool, src, axis, 0, DimCategory::Normal))
        .collect();
    let src_dim = |axis: usize| {
        src_dims.get(axis).cloned().ok_or(ShapeError::AxisOutOfRange {
            axis: axis as i64,
            rank: src.ndim(),
        })
    };

    let mut derived: Vec<Option<DimExpr>> = vec![None; dst.ndim()];
    let mut assign = |axis: usize, dim: DimExpr| match derived.get_mut(axis) {
        Some(slot) => {
            *slot = Some(dim.simplify());
            Ok(())
        }
        None => Err(ShapeError::AxisOutOfRange {
            axis: axis as i64,
            rank: dst.ndim(),
        }),
    };

    for (src_axes, dst_axes) in &axes_map {
        match (src_axes.as_slice(), dst_axes.as_slice()) {
            (&[s], &[d]) => assign(d, src_dim(s)?)?,
            (&[s], &[outer, inner]) => {
                assign(outer, src_dim(s)?.div_ceil(&DimExpr::Value(c0)))?;
                assign(inner, DimExpr::Value(c0))?;
            }
            (&[outer, inner], &[d]) => assign(d, src_dim(outer)? * src_dim(inner)?)?,
            // Classification rejects other entries. Axes they would produce
            // get variables of their own below.
            _ => {}
        }
    }

    let dst_dims = derived
        .into_iter()
        .enumerate()
        .map(|(axis, dim)| match (dst.static_dim(axis), dim) {
            (Some(size), _) => DimExpr::Value(size),
            (None, Some(dim)) => dim,
            (None, None) => pool.mint_dim(axis, 1, dst.bound(axis), DimCategory::Normal),
        })
        .collect();

    Ok(vec![src_dims, dst_dims])
}

#[cfg(test)]
mod tests {
    use crate::classify::{ClassifyInput, Pattern, TransdataOptions, Variant};
    use crate::context::{ClassificationSession, Context, SessionOptions};
    use crate::descriptor::TensorDesc;
    use crate::error::ShapeError;
    use crate::sym_expr::{DimExpr, SymbolMap};
    use crate::test_util::{debug_dims, display_dims, tensor};
    use crate::variable_shape::{OpMode, variable_shape};

    fn classify(
        src: TensorDesc,
        axes_map: Vec<(Vec<usize>, Vec<usize>)>,
    ) -> (ClassificationSession, Vec<Variant>) {
        let mut session = ClassificationSession::enter(SessionOptions::default());
        let variants = session
            .classify(
                &[ClassifyInput::from(src)],
                &Pattern::Transdata(TransdataOptions { axes_map, c0: 16 }),
            )
            .unwrap();
        (session, variants)
    }

    #[test]
    fn test_transdata_forward() {
        let src = tensor!(
            [2, -1, 7, 7],
            [(2, Some(2)), (1, Some(64)), (7, Some(7)), (7, Some(7))]
        );
        let axes_map = vec![
            (vec![0], vec![0]),
            (vec![1], vec![1, 4]),
            (vec![2], vec![2]),
            (vec![3], vec![3]),
        ];
        let (session, variants) = classify(src, axes_map);
        assert_eq!(variants.len(), 2);

        let shapes = session.variable_shape(&variants[0], OpMode::Transdata).unwrap();
        assert_eq!(
            display_dims(&shapes),
            [
                vec!["2", "_dim_1_0", "7", "7"],
                vec!["2", "ceil_div(_dim_1_0, 16)", "7", "7", "16"]
            ]
        );
        let values = SymbolMap::from_iter([("_dim_1_0", 33)]);
        assert_eq!(shapes[1][1].eval(&values), Ok(3));

        // The single block variant has a static destination.
        let shapes = session.variable_shape(&variants[1], OpMode::Transdata).unwrap();
        assert_eq!(
            debug_dims(&shapes),
            [
                vec!["2", "_dim_1_0(1, 16)", "7", "7"],
                vec!["2", "1", "7", "7", "16"]
            ]
        );
    }

    #[test]
    fn test_transdata_backward() {
        let src = tensor!([-1, -1, 16], [(1, Some(8)), (2, None), (16, Some(16))]);
        let axes_map = vec![(vec![0], vec![0]), (vec![1, 2], vec![1])];
        let (session, variants) = classify(src, axes_map);

        let shapes = session.variable_shape(&variants[0], OpMode::Transdata).unwrap();
        assert_eq!(
            display_dims(&shapes),
            [
                vec!["_dim_0_0", "_dim_1_0", "16"],
                vec!["_dim_0_0", "_dim_1_0 * 16"]
            ]
        );
        assert!(shapes[0][0].same_var(&shapes[1][0]));
        assert_eq!(shapes[1][1], DimExpr::var("_dim_1_0") * DimExpr::Value(16));
    }

    #[test]
    fn test_transdata_missing_context() {
        let src = tensor!([-1], [(1, None)]);
        let dst = tensor!([-1, 16], [(1, None), (16, Some(16))]);
        let mut ctx = Context::new();
        assert_eq!(
            variable_shape(&mut ctx, &[src.clone(), dst], OpMode::Transdata),
            Err(ShapeError::MissingContext("_transdata_c0"))
        );
        assert_eq!(
            variable_shape(&mut ctx, &[src], OpMode::Transdata),
            Err(ShapeError::WrongInputCount {
                expected: 2,
                actual: 1
            })
        );
    }
}
