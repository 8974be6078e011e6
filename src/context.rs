//! Classification context and the session which owns it.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info, warn};

use crate::classify::{ClassifyInput, Pattern, Variant};
use crate::descriptor::{Mode, RelPos, TensorDesc};
use crate::env::{config_pairs, str_as_bool};
use crate::error::{ClassifyError, ShapeError, classify_bail};
use crate::sym_expr::DimExpr;
use crate::sym_pool::SymbolPool;
use crate::variable_shape::{OpMode, variable_shape};

/// Environment variable read by [`SessionOptions::from_env`].
pub const OPTIONS_ENV_VAR: &str = "VARSHAPE_OPTIONS";

/// Key of a context entry.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ContextKey {
    Mode,
    Pattern,
    ConstShape,
    SupportBroadcast,
    AvgSplit,
    AxisPattern,
    BroadcastInput,
    Keepdims,
    ReduceAxes,
    SameInputShapeGroup,
    TransdataC0,
    TransdataAxes,
}

impl ContextKey {
    pub const ALL: [ContextKey; 12] = [
        Self::Mode,
        Self::Pattern,
        Self::ConstShape,
        Self::SupportBroadcast,
        Self::AvgSplit,
        Self::AxisPattern,
        Self::BroadcastInput,
        Self::Keepdims,
        Self::ReduceAxes,
        Self::SameInputShapeGroup,
        Self::TransdataC0,
        Self::TransdataAxes,
    ];

    /// Return the name under which this entry can be looked up with
    /// [`Context::get`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mode => "_mode",
            Self::Pattern => "_pattern",
            Self::ConstShape => "_const_shape",
            Self::SupportBroadcast => "_support_broadcast",
            Self::AvgSplit => "_avg_split",
            Self::AxisPattern => "_axis_pattern",
            Self::BroadcastInput => "_broadcast_input",
            Self::Keepdims => "_keepdims",
            Self::ReduceAxes => "_reduce_axes",
            Self::SameInputShapeGroup => "_same_input_shape_group",
            Self::TransdataC0 => "_transdata_c0",
            Self::TransdataAxes => "_transdata_axes",
        }
    }

    pub fn from_name(name: &str) -> Option<ContextKey> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Value of a context entry.
#[derive(Clone, Debug, PartialEq)]
pub enum ContextValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Shape(Vec<i64>),
    Groups(Vec<Vec<usize>>),
    /// Pairs of `(source axes, destination axes)`.
    AxesMap(Vec<(Vec<usize>, Vec<usize>)>),
}

impl ContextValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_shape(&self) -> Option<&[i64]> {
        match self {
            Self::Shape(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn as_groups(&self) -> Option<&[Vec<usize>]> {
        match self {
            Self::Groups(groups) => Some(groups),
            _ => None,
        }
    }

    pub fn as_axes_map(&self) -> Option<&[(Vec<usize>, Vec<usize>)]> {
        match self {
            Self::AxesMap(map) => Some(map),
            _ => None,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) => write!(f, "{}", s),
            Self::Shape(shape) => write!(f, "{:?}", shape),
            Self::Groups(groups) => write!(f, "{:?}", groups),
            Self::AxesMap(map) => write!(f, "{:?}", map),
        }
    }
}

impl From<bool> for ContextValue {
    fn from(val: bool) -> Self {
        Self::Bool(val)
    }
}

impl From<i64> for ContextValue {
    fn from(val: i64) -> Self {
        Self::Int(val)
    }
}

impl From<&str> for ContextValue {
    fn from(val: &str) -> Self {
        Self::Str(val.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(val: String) -> Self {
        Self::Str(val)
    }
}

impl From<Vec<i64>> for ContextValue {
    fn from(val: Vec<i64>) -> Self {
        Self::Shape(val)
    }
}

impl From<Vec<Vec<usize>>> for ContextValue {
    fn from(val: Vec<Vec<usize>>) -> Self {
        Self::Groups(val)
    }
}

impl From<Vec<(Vec<usize>, Vec<usize>)>> for ContextValue {
    fn from(val: Vec<(Vec<usize>, Vec<usize>)>) -> Self {
        Self::AxesMap(val)
    }
}

/// Key-value store shared by the classifier and the variable-shape builder,
/// plus the pool of variables minted for one variant.
///
/// A context is owned by a single session or variant. Contexts for different
/// variants are independent forks; nothing written to a fork reaches the
/// session it came from.
#[derive(Clone, Debug, Default)]
pub struct Context {
    values: BTreeMap<ContextKey, ContextValue>,
    pool: SymbolPool,
}

impl Context {
    pub fn new() -> Context {
        Self::default()
    }

    /// Look up an entry by its string name, eg. `"_mode"`.
    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        ContextKey::from_name(name).and_then(|key| self.get_key(key))
    }

    pub fn get_key(&self, key: ContextKey) -> Option<&ContextValue> {
        self.values.get(&key)
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn set(&mut self, key: ContextKey, value: impl Into<ContextValue>) {
        let value = value.into();
        debug!("set {} = {}", key, value);
        self.values.insert(key, value);
    }

    /// Builder-style variant of [`set`](Context::set).
    pub fn with(mut self, key: ContextKey, value: impl Into<ContextValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: ContextKey) -> Option<ContextValue> {
        self.values.remove(&key)
    }

    /// Copy all entries of `other` into this context, replacing existing
    /// entries with the same key.
    pub fn overlay(&mut self, other: &Context) {
        for (key, value) in other.iter() {
            self.set(key, value.clone());
        }
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (ContextKey, &ContextValue)> {
        self.values.iter().map(|(key, value)| (*key, value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn pool(&self) -> &SymbolPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut SymbolPool {
        &mut self.pool
    }

    pub(crate) fn flag(&self, key: ContextKey) -> bool {
        self.get_key(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub(crate) fn str_value(&self, key: ContextKey) -> Option<&str> {
        self.get_key(key).and_then(|v| v.as_str())
    }

    pub(crate) fn shape_value(&self, key: ContextKey) -> Option<&[i64]> {
        self.get_key(key).and_then(|v| v.as_shape())
    }

    pub(crate) fn int_value(&self, key: ContextKey) -> Option<i64> {
        self.get_key(key).and_then(|v| v.as_int())
    }

    pub(crate) fn groups_value(&self, key: ContextKey) -> Option<&[Vec<usize>]> {
        self.get_key(key).and_then(|v| v.as_groups())
    }
}

/// Options which control classification.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    /// Drop static-1 axes and fuse adjacent axes of the same kind when
    /// classifying reductions.
    pub fuse_axes: bool,

    /// Maximum number of axis sets enumerated for reductions whose axes are
    /// unknown at compile time.
    pub max_axis_variants: usize,

    /// Log every enumerated variant at info level.
    pub verbose: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            fuse_axes: true,
            max_axis_variants: 256,
            verbose: false,
        }
    }
}

impl SessionOptions {
    /// Read options from the `VARSHAPE_OPTIONS` environment variable, falling
    /// back to the defaults.
    ///
    /// The variable holds space-separated `key=value` tokens, eg.
    /// `"fuse-axes=0 max-axis-variants=64 verbose=1"`.
    pub fn from_env() -> SessionOptions {
        let mut opts = SessionOptions::default();
        if let Ok(config) = std::env::var(OPTIONS_ENV_VAR) {
            opts.parse_config(&config);
        }
        opts
    }

    /// Update options from a configuration string in the format used by
    /// [`from_env`](SessionOptions::from_env).
    pub fn parse_config(&mut self, config: &str) {
        for (key, val) in config_pairs(config) {
            match key {
                "fuse-axes" => self.fuse_axes = str_as_bool(val),
                "max-axis-variants" => match val.parse() {
                    Ok(n) => self.max_axis_variants = n,
                    Err(_) => warn!("Invalid max-axis-variants value \"{}\"", val),
                },
                "verbose" => self.verbose = str_as_bool(val),
                _ => warn!("Unrecognized option \"{}\"", key),
            }
        }
    }
}

/// Scope in which inputs are classified into variants.
///
/// A session owns the session-level context. Each variant it returns can be
/// turned into an independent per-variant context with
/// [`fork`](ClassificationSession::fork).
///
/// ```
/// use varshape::{ClassificationSession, ClassifyInput, OpMode, Pattern, SessionOptions, TensorDesc};
///
/// let x = TensorDesc::builder(vec![-1]).range(vec![(1, None)]).build().unwrap();
/// let mut session = ClassificationSession::enter(SessionOptions::default());
/// let variants = session
///     .classify(&[ClassifyInput::Tensor(x)], &Pattern::elewise())
///     .unwrap();
/// let shapes = session.variable_shape(&variants[0], OpMode::Elewise).unwrap();
/// assert_eq!(shapes[0][0].to_string(), "_dim_0_0");
/// let ctx = session.exit();
/// assert_eq!(ctx.get("_pattern").and_then(|v| v.as_str()), Some("elewise"));
/// ```
#[derive(Debug)]
pub struct ClassificationSession {
    ctx: Context,
    options: SessionOptions,
}

impl ClassificationSession {
    /// Enter a new classification scope with an empty context.
    pub fn enter(options: SessionOptions) -> ClassificationSession {
        debug!("enter classification scope {:?}", options);
        ClassificationSession {
            ctx: Context::new(),
            options,
        }
    }

    /// Leave the scope and return the final session context.
    pub fn exit(self) -> Context {
        debug!("exit classification scope");
        self.ctx
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Classify `inputs` according to `pattern`.
    ///
    /// Returns a non-empty list of variants, most general first.
    pub fn classify(
        &mut self,
        inputs: &[ClassifyInput],
        pattern: &Pattern,
    ) -> Result<Vec<Variant>, ClassifyError> {
        if inputs.is_empty() {
            classify_bail!("{} classification requires at least one input", pattern.name());
        }

        // Entries from an earlier classification do not carry over.
        self.ctx = Context::new();
        self.ctx.set(ContextKey::Pattern, pattern.name());
        let variants = pattern
            .classifier()
            .classify(inputs, &self.options, &mut self.ctx)?;

        let Some(first) = variants.first() else {
            classify_bail!("{} classification produced no variants", pattern.name());
        };
        self.ctx.set(ContextKey::Mode, first.mode().as_str());
        if first.mode() == Mode::Const
            && let Some(shape) = first
                .tensors()
                .iter()
                .find(|desc| desc.rel_pos_to_reduce() != Some(RelPos::Axis))
                .and_then(TensorDesc::static_shape)
        {
            self.ctx.set(ContextKey::ConstShape, shape);
        }

        for (i, variant) in variants.iter().enumerate() {
            if self.options.verbose {
                info!("{} variant {}: {}", pattern.name(), i, variant);
            } else {
                debug!("{} variant {}: {}", pattern.name(), i, variant);
            }
        }

        Ok(variants)
    }

    /// Create the context in which `variant` is turned into variables.
    ///
    /// The fork starts from the session context, with the variant's own
    /// entries and mode written over it and an empty symbol pool.
    pub fn fork(&self, variant: &Variant) -> Context {
        let mut ctx = Context {
            values: self.ctx.values.clone(),
            pool: SymbolPool::new(),
        };
        ctx.overlay(variant.attrs());
        ctx.set(ContextKey::Mode, variant.mode().as_str());
        ctx
    }

    /// Fork a context for `variant` and build the variable shapes of its
    /// tensors.
    pub fn variable_shape(
        &self,
        variant: &Variant,
        op_mode: OpMode,
    ) -> Result<Vec<Vec<DimExpr>>, ShapeError> {
        let mut ctx = self.fork(variant);
        variable_shape(&mut ctx, variant.tensors(), op_mode)
    }
}
