//! Allocation of named dimension variables.

use std::sync::Arc;

use log::trace;
use rustc_hash::FxHashMap;

use crate::bound::Bound;
use crate::sym_expr::{DimCategory, DimExpr, Symbol};

/// Name of the variable for axis `axis` of input `input`.
pub fn dim_name(axis: usize, input: usize) -> String {
    format!("_dim_{}_{}", axis, input)
}

/// Name of the variable for the `index`'th piece of a split.
pub fn split_name(index: usize) -> String {
    format!("_split_{}", index)
}

/// Pool of symbolic dimension variables for one variant.
///
/// Minting a name that is already in the pool returns the existing variable,
/// so every use of a name within a pool refers to the same allocation. Each
/// [`Context`](crate::Context) fork gets its own pool, so variables are never
/// shared between variants.
#[derive(Clone, Debug, Default)]
pub struct SymbolPool {
    by_name: FxHashMap<String, Arc<Symbol>>,

    // Symbols in the order they were minted.
    order: Vec<Arc<Symbol>>,
}

impl SymbolPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the variable called `name`, creating it with `bound` and
    /// `category` if it does not exist yet.
    pub fn mint(&mut self, name: String, bound: Bound, category: DimCategory) -> DimExpr {
        if let Some(sym) = self.by_name.get(&name) {
            return DimExpr::Var(sym.clone());
        }
        trace!("mint {}{} {:?}", name, bound, category);
        let sym = Arc::new(Symbol::new(name.clone(), bound, category));
        self.by_name.insert(name, sym.clone());
        self.order.push(sym.clone());
        DimExpr::Var(sym)
    }

    /// Mint the `_dim_<axis>_<input>` variable.
    pub fn mint_dim(
        &mut self,
        axis: usize,
        input: usize,
        bound: Bound,
        category: DimCategory,
    ) -> DimExpr {
        self.mint(dim_name(axis, input), bound, category)
    }

    /// Mint the `_split_<index>` variable.
    pub fn mint_split(&mut self, index: usize, bound: Bound) -> DimExpr {
        self.mint(split_name(index), bound, DimCategory::Normal)
    }

    pub fn get(&self, name: &str) -> Option<DimExpr> {
        self.by_name.get(name).cloned().map(DimExpr::Var)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Return the variables in the order they were minted.
    pub fn symbols(&self) -> impl ExactSizeIterator<Item = &Symbol> {
        self.order.iter().map(|sym| sym.as_ref())
    }
}
