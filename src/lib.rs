//! Dynamic-shape classification and variable shapes for kernel compilation.
//!
//! # About classification
//!
//! A kernel compiled for tensors whose shapes are only partly known at
//! compile time has to handle every shape the tensors may take at run time.
//! Some of those shapes are better served by a specialized kernel, for
//! example one that knows an axis is never broadcast, or that the axes being
//! reduced are the trailing ones. Classification takes a set of tensor
//! descriptors, where unknown dimensions are `-1` and each dimension has a
//! range of possible sizes, and decides which kernel variants to compile.
//!
//! For each variant, [`variable_shape`] then assigns a symbolic variable to
//! each dynamic dimension. Dimensions which the classifier proved are equal
//! share a variable, so the compute graph built for the variant can rely on
//! that equality.
//!
//! ```
//! use varshape::{
//!     ClassificationSession, ClassifyInput, Context, OpMode, Pattern, SessionOptions, TensorDesc,
//!     variable_shape,
//! };
//!
//! let x = TensorDesc::builder(vec![-1])
//!     .range(vec![(1, None)])
//!     .build()
//!     .unwrap();
//! let y = TensorDesc::builder(vec![-1, -1])
//!     .range(vec![(1, None), (4, Some(50))])
//!     .build()
//!     .unwrap();
//!
//! let mut session = ClassificationSession::enter(SessionOptions::default());
//! let variants = session
//!     .classify(&[ClassifyInput::from(x.clone())], &Pattern::elewise())
//!     .unwrap();
//! let shapes = session.variable_shape(&variants[0], OpMode::Elewise).unwrap();
//! assert_eq!(format!("{:?}", shapes[0][0]), "_dim_0_0(1, None)");
//!
//! // Tensors which were not classified share variables when their ranges
//! // are equal.
//! let mut ctx = Context::new();
//! let shapes = variable_shape(&mut ctx, &[x, y], OpMode::Elewise).unwrap();
//! assert!(shapes[0][0].same_var(&shapes[1][0]));
//! assert_eq!(shapes[1][1].to_string(), "_dim_1_1");
//! ```
//!
//! # Crate overview
//!
//! - [`TensorDesc`] describes an input, and [`Bound`] the range of one of its
//!   dimensions.
//! - [`ClassificationSession`] owns the [`Context`] that classification
//!   writes to. [`ClassificationSession::classify`] dispatches on a
//!   [`Pattern`] and returns a list of [`Variant`]s, most general first.
//! - [`variable_shape`] returns the symbolic shape of each tensor in a
//!   variant, as [`DimExpr`]s over variables minted from a [`SymbolPool`].
//!
//! # Configuration
//!
//! [`SessionOptions::from_env`] reads options from the `VARSHAPE_OPTIONS`
//! environment variable, eg. `VARSHAPE_OPTIONS="fuse-axes=0 verbose=1"`.
//! Diagnostics are logged through the [`log`](https://docs.rs/log) crate.

mod bound;
mod classify;
mod context;
mod descriptor;
mod env;
mod error;
mod sym_expr;
mod sym_pool;
mod variable_shape;

#[cfg(test)]
mod test_util;

pub use bound::{Bound, INT32_MAX};
pub use classify::{
    BroadcastOptions, ClassifyInput, ElewiseOptions, MAX_SPLIT_NUM, NormOptions, Pattern,
    ReduceOptions, SplitOptions, TransdataOptions, Variant,
};
pub use context::{
    ClassificationSession, Context, ContextKey, ContextValue, OPTIONS_ENV_VAR, SessionOptions,
};
pub use descriptor::{
    AxisKind, AxisPattern, Format, Mode, ParsePatternError, RelPos, TensorDesc, TensorDescBuilder,
};
pub use error::{ClassificationError, ClassifyError, RangeError, ShapeError};
pub use sym_expr::{DimCategory, DimExpr, EvalError, Symbol, SymbolMap};
pub use sym_pool::{SymbolPool, dim_name, split_name};
pub use variable_shape::{OpMode, variable_shape};
