//! Fixtures shared by unit tests.

use crate::sym_expr::DimExpr;

/// Create a [`TensorDesc`](crate::TensorDesc) from a shape and optional list
/// of `(lo, hi)` ranges.
///
/// ```text
/// tensor!([-1, 16], [(1, None), (16, Some(16))])
/// ```
macro_rules! tensor {
    ([$($dim:expr),* $(,)?]) => {
        $crate::descriptor::TensorDesc::builder(vec![$($dim),*])
            .build()
            .unwrap()
    };
    ([$($dim:expr),* $(,)?], [$(($lo:expr, $hi:expr)),* $(,)?]) => {
        $crate::descriptor::TensorDesc::builder(vec![$($dim),*])
            .range(vec![$(($lo, $hi)),*])
            .build()
            .unwrap()
    };
}

pub(crate) use tensor;

/// Format variable shapes using the `Debug` representation of each dim, which
/// includes variable bounds and categories.
pub fn debug_dims(shapes: &[Vec<DimExpr>]) -> Vec<Vec<String>> {
    shapes
        .iter()
        .map(|dims| dims.iter().map(|d| format!("{:?}", d)).collect())
        .collect()
}

/// Format variable shapes using the `Display` representation of each dim.
pub fn display_dims(shapes: &[Vec<DimExpr>]) -> Vec<Vec<String>> {
    shapes
        .iter()
        .map(|dims| dims.iter().map(|d| d.to_string()).collect())
        .collect()
}
