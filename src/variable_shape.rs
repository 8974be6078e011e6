//! Construction of symbolic shapes for the tensors of one classified variant.
//!
//! [`variable_shape`] turns each dynamic axis into a variable minted from the
//! context's [`SymbolPool`](crate::SymbolPool), or an expression over such
//! variables. Whether two axes share a variable is decided by the entries
//! that classification left in the context.

use std::fmt;

use log::debug;

use crate::context::{Context, ContextKey};
use crate::descriptor::TensorDesc;
use crate::error::ShapeError;
use crate::sym_expr::{DimCategory, DimExpr};
use crate::sym_pool::SymbolPool;

mod norm;
mod reduce;
mod split;
mod transdata;

/// Kind of operator the variable shapes are built for.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OpMode {
    #[default]
    Elewise,
    Reduce,
    Transdata,
    Norm,
}

impl OpMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Elewise => "elewise",
            Self::Reduce => "reduce",
            Self::Transdata => "transdata",
            Self::Norm => "norm",
        }
    }
}

impl fmt::Display for OpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build the symbolic shape of each tensor in `tensors`.
///
/// Returns one list per tensor, in axis order. Axes with a known size are
/// [`DimExpr::Value`]s. Dynamic axes are variables minted in `ctx`'s symbol
/// pool, named `_dim_<axis>_<input>`, or expressions over them.
///
/// The context is normally a fork created by
/// [`ClassificationSession::fork`](crate::ClassificationSession::fork). It
/// can also be a fresh [`Context`] for tensors that were not classified, in
/// which case elementwise sharing is decided by comparing ranges.
pub fn variable_shape(
    ctx: &mut Context,
    tensors: &[TensorDesc],
    op_mode: OpMode,
) -> Result<Vec<Vec<DimExpr>>, ShapeError> {
    let shapes = if ctx.str_value(ContextKey::Pattern) == Some("split") {
        split::variable_shape(ctx, tensors)?
    } else {
        match op_mode {
            OpMode::Elewise => elewise(ctx, tensors)?,
            OpMode::Reduce => reduce::variable_shape(ctx, tensors)?,
            OpMode::Transdata => transdata::variable_shape(ctx, tensors)?,
            OpMode::Norm => norm::variable_shape(ctx, tensors)?,
        }
    };
    debug!(
        "{} variable shape {:?} ({} symbols)",
        op_mode,
        shapes,
        ctx.pool().len()
    );
    Ok(shapes)
}

/// Return the known size of `axis` as a value, or mint the
/// `_dim_<axis>_<input>` variable for it.
fn value_or_var(
    pool: &mut SymbolPool,
    desc: &TensorDesc,
    axis: usize,
    input: usize,
    category: DimCategory,
) -> DimExpr {
    match desc.static_dim(axis) {
        Some(size) => DimExpr::Value(size),
        None => pool.mint_dim(axis, input, desc.bound(axis), category),
    }
}

/// Convert axis values in `[-rank, rank - 1]` to indices.
fn resolve_axes(axes: &[i64], rank: usize) -> Result<Vec<usize>, ShapeError> {
    axes.iter()
        .map(|&axis| {
            let resolved = if axis < 0 { axis + rank as i64 } else { axis };
            if resolved < 0 || resolved >= rank as i64 {
                return Err(ShapeError::AxisOutOfRange { axis, rank });
            }
            Ok(resolved as usize)
        })
        .collect()
}

fn elewise(ctx: &mut Context, tensors: &[TensorDesc]) -> Result<Vec<Vec<DimExpr>>, ShapeError> {
    let sharing: Option<Vec<char>> = if ctx.flag(ContextKey::SupportBroadcast) {
        ctx.str_value(ContextKey::AxisPattern)
            .map(|pattern| pattern.chars().collect())
    } else {
        None
    };
    let pool = ctx.pool_mut();

    // Variables minted so far on each axis, for sharing by range.
    let mut minted: Vec<Vec<DimExpr>> = Vec::new();

    let mut shapes = Vec::with_capacity(tensors.len());
    for (input, desc) in tensors.iter().enumerate() {
        let sharing = sharing.as_deref().filter(|s| s.len() == desc.ndim());
        let mut dims = Vec::with_capacity(desc.ndim());

        for axis in 0..desc.ndim() {
            if let Some(size) = desc.static_dim(axis) {
                dims.push(DimExpr::Value(size));
                continue;
            }
            let bound = desc.bound(axis);
            let dim = match sharing.map(|s| s[axis]) {
                Some('S') => {
                    let owner = tensors
                        .iter()
                        .position(|t| axis < t.ndim() && t.static_dim(axis).is_none())
                        .unwrap_or(input);
                    pool.mint_dim(axis, owner, bound, DimCategory::Normal)
                }
                Some(_) => pool.mint_dim(axis, input, bound, DimCategory::Normal),
                None => {
                    if minted.len() <= axis {
                        minted.resize(axis + 1, Vec::new());
                    }
                    let existing = minted[axis]
                        .iter()
                        .find(|var| var.as_symbol().is_some_and(|sym| sym.bound == bound));
                    match existing {
                        Some(var) => var.clone(),
                        None => {
                            let var = pool.mint_dim(axis, input, bound, DimCategory::Normal);
                            minted[axis].push(var.clone());
                            var
                        }
                    }
                }
            };
            dims.push(dim);
        }
        shapes.push(dims);
    }

    Ok(shapes)
}
