//! Symbolic dimension variables and expressions over them.

use std::error::Error;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::bound::Bound;

/// Role of a symbolic dimension in the computation that consumes it.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum DimCategory {
    /// A plain data axis.
    #[default]
    Normal,
    /// An axis that is reduced over.
    Reduce,
}

/// A named dimension variable with the range of values it may take.
///
/// Two symbols are equal if they have the same name. Variables which the
/// classifier decided must co-vary also share the same allocation, see
/// [`DimExpr::same_var`].
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub bound: Bound,
    pub category: DimCategory,
}

impl Symbol {
    pub fn new(name: impl Into<String>, bound: Bound, category: DimCategory) -> Symbol {
        Symbol {
            name: name.into(),
            bound,
            category,
        }
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Symbol) -> bool {
        self.name == other.name
    }
}

/// Size of one tensor axis.
///
/// Sizes are known integers, symbolic variables or composite expressions over
/// them. Expressions are kept as trees rather than evaluated so that
/// placeholder construction can lower them to its own IR.
#[derive(Clone)]
pub enum DimExpr {
    /// Axis with a known size.
    Value(i64),
    /// Symbolic size.
    Var(Arc<Symbol>),
    Add(Arc<DimExpr>, Arc<DimExpr>),
    Sub(Arc<DimExpr>, Arc<DimExpr>),
    Mul(Arc<DimExpr>, Arc<DimExpr>),
    /// Flooring division of first expression by second.
    Div(Arc<DimExpr>, Arc<DimExpr>),
    /// Ceiling division of first expression by second.
    DivCeil(Arc<DimExpr>, Arc<DimExpr>),
    Max(Arc<DimExpr>, Arc<DimExpr>),
    Min(Arc<DimExpr>, Arc<DimExpr>),
}

impl DimExpr {
    /// Create a variable with no upper bound and a normal category.
    ///
    /// This is mostly useful in tests, where only the name matters for
    /// comparisons.
    pub fn var(name: &str) -> Self {
        Symbol::new(name, Bound::at_least(1), DimCategory::Normal).into()
    }

    /// Return the known value, if this is a constant.
    pub fn as_value(&self) -> Option<i64> {
        match self {
            Self::Value(x) => Some(*x),
            _ => None,
        }
    }

    /// Return the variable, if this expression is a bare variable.
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Self::Var(sym) => Some(sym),
            _ => None,
        }
    }

    /// Return true if `self` and `other` are the same variable allocation,
    /// rather than just variables with the same name.
    pub fn same_var(&self, other: &DimExpr) -> bool {
        match (self, other) {
            (Self::Var(a), Self::Var(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Return the maximum of `self` and `other`.
    pub fn max(&self, other: &DimExpr) -> DimExpr {
        Self::Max(self.clone().into(), other.clone().into())
    }

    /// Return the minimum of `self` and `other`.
    pub fn min(&self, other: &DimExpr) -> DimExpr {
        Self::Min(self.clone().into(), other.clone().into())
    }

    /// Return the result of dividing `self` by `other`, rounded up.
    pub fn div_ceil(&self, other: &DimExpr) -> DimExpr {
        Self::DivCeil(self.clone().into(), other.clone().into())
    }

    /// Round `self` up to the next multiple of `factor`.
    ///
    /// This produces the floor-division form
    /// `((self + (factor - 1)) // factor) * factor`, which is what placeholder
    /// construction expects for padded split shapes.
    ///
    /// ```
    /// use varshape::{DimExpr, SymbolMap};
    ///
    /// let padded = DimExpr::var("n").ceil_to_multiple(64);
    /// assert_eq!(padded.to_string(), "(n + 63) // 64 * 64");
    ///
    /// let values = SymbolMap::from_iter([("n", 65)]);
    /// assert_eq!(padded.eval(&values), Ok(128));
    /// ```
    pub fn ceil_to_multiple(&self, factor: i64) -> DimExpr {
        let addend = DimExpr::Value(factor - 1);
        let factor = DimExpr::Value(factor);
        ((self.clone() + addend) / factor.clone()) * factor
    }

    /// Return the range of values this expression may take, given the bounds
    /// of the variables it contains.
    pub fn bound(&self) -> Bound {
        let binary = |lhs: &DimExpr, rhs: &DimExpr| (lhs.bound(), rhs.bound());
        let checked = |lo: i64, hi: Option<i64>| {
            let lo = lo.max(0);
            Bound::new(lo, hi.map(|hi| hi.max(lo)))
        };
        let fallback = Bound::at_least(0);

        match self {
            Self::Value(x) => Bound::exact(*x),
            Self::Var(sym) => sym.bound,
            Self::Add(lhs, rhs) => {
                let (a, b) = binary(lhs, rhs);
                let hi = a.hi().zip(b.hi()).and_then(|(x, y)| x.checked_add(y));
                checked(a.lo().saturating_add(b.lo()), hi).unwrap_or(fallback)
            }
            Self::Sub(lhs, rhs) => {
                let (a, b) = binary(lhs, rhs);
                let lo = match b.hi() {
                    Some(b_hi) => a.lo() - b_hi,
                    None => 0,
                };
                checked(lo, a.hi().map(|hi| hi - b.lo())).unwrap_or(fallback)
            }
            Self::Mul(lhs, rhs) => {
                let (a, b) = binary(lhs, rhs);
                a.product(&b)
            }
            Self::Div(lhs, rhs) => {
                let (a, b) = binary(lhs, rhs);
                let lo = b.hi().filter(|hi| *hi > 0).map(|hi| a.lo() / hi).unwrap_or(0);
                let hi = a.hi().zip(Some(b.lo()).filter(|lo| *lo > 0)).map(|(x, y)| x / y);
                checked(lo, hi).unwrap_or(fallback)
            }
            Self::DivCeil(lhs, rhs) => {
                let (a, b) = binary(lhs, rhs);
                let lo = b
                    .hi()
                    .filter(|hi| *hi > 0)
                    .map(|hi| div_ceil(a.lo(), hi))
                    .unwrap_or(0);
                let hi = a
                    .hi()
                    .zip(Some(b.lo()).filter(|lo| *lo > 0))
                    .map(|(x, y)| div_ceil(x, y));
                checked(lo, hi).unwrap_or(fallback)
            }
            Self::Max(lhs, rhs) => {
                let (a, b) = binary(lhs, rhs);
                let hi = a.hi().zip(b.hi()).map(|(x, y)| x.max(y));
                checked(a.lo().max(b.lo()), hi).unwrap_or(fallback)
            }
            Self::Min(lhs, rhs) => {
                let (a, b) = binary(lhs, rhs);
                let hi = match (a.hi(), b.hi()) {
                    (Some(x), Some(y)) => Some(x.min(y)),
                    (Some(x), None) | (None, Some(x)) => Some(x),
                    (None, None) => None,
                };
                checked(a.lo().min(b.lo()), hi).unwrap_or(fallback)
            }
        }
    }

    /// Evaluate the expression given concrete values for its variables.
    pub fn eval(&self, values: &SymbolMap) -> Result<i64, EvalError> {
        let binary = |lhs: &DimExpr, rhs: &DimExpr| -> Result<(i64, i64), EvalError> {
            Ok((lhs.eval(values)?, rhs.eval(values)?))
        };
        match self {
            Self::Value(x) => Ok(*x),
            Self::Var(sym) => values
                .get(&sym.name)
                .ok_or_else(|| EvalError::UnknownSymbol(sym.name.clone())),
            Self::Add(lhs, rhs) => {
                let (x, y) = binary(lhs, rhs)?;
                x.checked_add(y).ok_or(EvalError::Overflow)
            }
            Self::Sub(lhs, rhs) => {
                let (x, y) = binary(lhs, rhs)?;
                x.checked_sub(y).ok_or(EvalError::Overflow)
            }
            Self::Mul(lhs, rhs) => {
                let (x, y) = binary(lhs, rhs)?;
                x.checked_mul(y).ok_or(EvalError::Overflow)
            }
            Self::Div(lhs, rhs) => {
                let (x, y) = binary(lhs, rhs)?;
                if y == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(x.div_euclid(y))
            }
            Self::DivCeil(lhs, rhs) => {
                let (x, y) = binary(lhs, rhs)?;
                if y == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(div_ceil(x, y))
            }
            Self::Max(lhs, rhs) => binary(lhs, rhs).map(|(x, y)| x.max(y)),
            Self::Min(lhs, rhs) => binary(lhs, rhs).map(|(x, y)| x.min(y)),
        }
    }

    /// Simplify an expression.
    ///
    /// This folds constant sub-expressions and removes identities such as
    /// `x + 0`, `x * 1` and `x // 1`. Sub-expressions involving variables are
    /// otherwise left in the order they were built, so that the structure
    /// of eg. [`ceil_to_multiple`](Self::ceil_to_multiple) is preserved.
    pub fn simplify(&self) -> DimExpr {
        match self {
            Self::Value(_) | Self::Var(_) => self.clone(),
            Self::Add(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (DimExpr::Value(0), rhs) => rhs,
                (lhs, DimExpr::Value(0)) => lhs,
                (DimExpr::Value(x), DimExpr::Value(y)) => DimExpr::Value(x + y),
                (lhs, rhs) => lhs + rhs,
            },
            Self::Sub(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (lhs, DimExpr::Value(0)) => lhs,
                (DimExpr::Value(x), DimExpr::Value(y)) => DimExpr::Value(x - y),
                (lhs, rhs) if lhs == rhs => DimExpr::Value(0),
                (lhs, rhs) => lhs - rhs,
            },
            Self::Mul(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (DimExpr::Value(1), rhs) => rhs,
                (lhs, DimExpr::Value(1)) => lhs,
                (DimExpr::Value(x), DimExpr::Value(y)) => DimExpr::Value(x * y),
                (lhs, rhs) => lhs * rhs,
            },
            Self::Div(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (lhs, DimExpr::Value(1)) => lhs,
                (DimExpr::Value(x), DimExpr::Value(y)) if y != 0 => DimExpr::Value(x.div_euclid(y)),
                (lhs, rhs) if lhs == rhs => DimExpr::Value(1),
                (lhs, rhs) => lhs / rhs,
            },
            Self::DivCeil(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (lhs, DimExpr::Value(1)) => lhs,
                (DimExpr::Value(x), DimExpr::Value(y)) if y != 0 => DimExpr::Value(div_ceil(x, y)),
                (lhs, rhs) if lhs == rhs => DimExpr::Value(1),
                (lhs, rhs) => lhs.div_ceil(&rhs),
            },
            Self::Max(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (DimExpr::Value(x), DimExpr::Value(y)) => DimExpr::Value(x.max(y)),
                (lhs, rhs) if lhs == rhs => lhs,
                (lhs, rhs) => lhs.max(&rhs),
            },
            Self::Min(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (DimExpr::Value(x), DimExpr::Value(y)) => DimExpr::Value(x.min(y)),
                (lhs, rhs) if lhs == rhs => lhs,
                (lhs, rhs) => lhs.min(&rhs),
            },
        }
    }

    /// Return the precedence of the operator.
    ///
    /// This is used to add parentheses when formatting an expression tree.
    fn precedence(&self) -> u8 {
        match self {
            Self::Value(_) | Self::Var(_) | Self::Max(..) | Self::Min(..) | Self::DivCeil(..) => 3,
            Self::Mul(..) | Self::Div(..) => 2,
            Self::Add(..) | Self::Sub(..) => 1,
        }
    }

    fn fmt_with(
        &self,
        f: &mut fmt::Formatter<'_>,
        fmt_var: &impl Fn(&mut fmt::Formatter<'_>, &Symbol) -> fmt::Result,
    ) -> fmt::Result {
        let operand = |f: &mut fmt::Formatter<'_>, expr: &DimExpr, strict: bool| {
            // The right operand of a non-commutative operator needs parens at
            // equal precedence, eg. `a - (b + c)`.
            let needs_parens = if strict {
                expr.precedence() <= self.precedence()
            } else {
                expr.precedence() < self.precedence()
            };
            if needs_parens {
                write!(f, "(")?;
                expr.fmt_with(f, fmt_var)?;
                write!(f, ")")
            } else {
                expr.fmt_with(f, fmt_var)
            }
        };
        let binop = |f: &mut fmt::Formatter<'_>, op: &str, lhs: &DimExpr, rhs: &DimExpr, strict| {
            operand(f, lhs, false)?;
            write!(f, " {op} ")?;
            operand(f, rhs, strict)
        };
        let func = |f: &mut fmt::Formatter<'_>, name: &str, lhs: &DimExpr, rhs: &DimExpr| {
            write!(f, "{name}(")?;
            lhs.fmt_with(f, fmt_var)?;
            write!(f, ", ")?;
            rhs.fmt_with(f, fmt_var)?;
            write!(f, ")")
        };

        match self {
            Self::Value(val) => write!(f, "{}", val),
            Self::Var(sym) => fmt_var(f, sym),
            Self::Add(lhs, rhs) => binop(f, "+", lhs, rhs, false),
            Self::Sub(lhs, rhs) => binop(f, "-", lhs, rhs, true),
            Self::Mul(lhs, rhs) => binop(f, "*", lhs, rhs, false),
            Self::Div(lhs, rhs) => binop(f, "//", lhs, rhs, true),
            Self::DivCeil(lhs, rhs) => func(f, "ceil_div", lhs, rhs),
            Self::Max(lhs, rhs) => func(f, "max", lhs, rhs),
            Self::Min(lhs, rhs) => func(f, "min", lhs, rhs),
        }
    }
}

impl PartialEq<DimExpr> for DimExpr {
    fn eq(&self, other: &DimExpr) -> bool {
        let commutative_eq = |self_lhs, self_rhs, other_lhs, other_rhs| {
            (self_lhs == other_lhs && self_rhs == other_rhs)
                || (self_lhs == other_rhs && self_rhs == other_lhs)
        };

        match (self, other) {
            (Self::Value(x), Self::Value(y)) => x == y,
            (Self::Var(x), Self::Var(y)) => x == y,
            (Self::Add(a, b), Self::Add(c, d))
            | (Self::Mul(a, b), Self::Mul(c, d))
            | (Self::Max(a, b), Self::Max(c, d))
            | (Self::Min(a, b), Self::Min(c, d)) => commutative_eq(a, b, c, d),
            (Self::Sub(a, b), Self::Sub(c, d))
            | (Self::Div(a, b), Self::Div(c, d))
            | (Self::DivCeil(a, b), Self::DivCeil(c, d)) => a == c && b == d,
            _ => false,
        }
    }
}

impl Add<DimExpr> for DimExpr {
    type Output = DimExpr;

    fn add(self, rhs: DimExpr) -> Self {
        Self::Add(self.into(), rhs.into())
    }
}

impl AddAssign<DimExpr> for DimExpr {
    fn add_assign(&mut self, rhs: DimExpr) {
        *self = Self::Add(self.clone().into(), rhs.into());
    }
}

impl Sub<DimExpr> for DimExpr {
    type Output = DimExpr;

    fn sub(self, rhs: DimExpr) -> Self {
        Self::Sub(self.into(), rhs.into())
    }
}

impl Mul<DimExpr> for DimExpr {
    type Output = DimExpr;

    fn mul(self, rhs: DimExpr) -> Self {
        Self::Mul(self.into(), rhs.into())
    }
}

impl Div<DimExpr> for DimExpr {
    type Output = DimExpr;

    fn div(self, rhs: DimExpr) -> Self {
        Self::Div(self.into(), rhs.into())
    }
}

impl From<Symbol> for DimExpr {
    fn from(val: Symbol) -> Self {
        Self::Var(val.into())
    }
}

impl From<Arc<Symbol>> for DimExpr {
    fn from(val: Arc<Symbol>) -> Self {
        Self::Var(val)
    }
}

impl From<i64> for DimExpr {
    fn from(val: i64) -> Self {
        DimExpr::Value(val)
    }
}

impl<'a> From<&'a str> for DimExpr {
    fn from(name: &'a str) -> Self {
        DimExpr::var(name)
    }
}

/// Debug output includes the bound and category of each variable, eg.
/// `_dim_0_0(1, None)` or `_dim_1_0(1, 16)!r` for a reduce axis.
impl fmt::Debug for DimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, &|f, sym| {
            write!(f, "{}{}", sym.name, sym.bound)?;
            if sym.category == DimCategory::Reduce {
                write!(f, "!r")?;
            }
            Ok(())
        })
    }
}

impl fmt::Display for DimExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, &|f, sym| write!(f, "{}", sym.name))
    }
}

/// Concrete values for symbolic variables, used by [`DimExpr::eval`].
#[derive(Clone, Debug, Default)]
pub struct SymbolMap {
    values: FxHashMap<String, i64>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: i64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.values.get(name).copied()
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for SymbolMap {
    fn from_iter<I: IntoIterator<Item = (S, i64)>>(iter: I) -> Self {
        let mut map = SymbolMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

/// Errors when evaluating a [`DimExpr`].
#[derive(Clone, Debug, PartialEq)]
pub enum EvalError {
    /// The expression contains a variable with no value in the map.
    UnknownSymbol(String),
    DivisionByZero,
    Overflow,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSymbol(name) => write!(f, "no value for symbol \"{}\"", name),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::Overflow => write!(f, "arithmetic overflow"),
        }
    }
}

impl Error for EvalError {}

/// Ceiling division for integers where `rhs` is non-zero.
pub const fn div_ceil(lhs: i64, rhs: i64) -> i64 {
    let d = lhs / rhs;
    let r = lhs % rhs;
    if (r > 0 && rhs > 0) || (r < 0 && rhs < 0) {
        d + 1
    } else {
        d
    }
}
