//! Basis function tables and their classification.
//!
//! A table holds values of a modified terminal's basis functions, indexed by
//! `[entity, point, dof]`. Tables computed from several tables, such as pre-integrated
//! element tensor blocks, reuse the same type with the indices `[entity, dof_0, dof_1]`.
use crate::analysis::ModifiedTerminal;
use crate::config::Parameters;
use crate::integral::{Cell, EntityType, IntegralType};
use crate::quadrature::QuadratureRules;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Index, Range};

mod tabulated;

pub use tabulated::*;

/// Variability classification of a table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    /// All values are zero.
    Zeros,
    /// All values are one.
    Ones,
    /// Constant over both entities and points.
    Fixed,
    /// Constant over points, varying over entities.
    Piecewise,
    /// Constant over entities, varying over points.
    Uniform,
    Varying,
    /// Table of a quadrature element.
    Quadrature,
    /// Element tensor block integrated ahead of time.
    Preintegrated,
    /// Element tensor block multiplied ahead of time.
    Premultiplied,
}

impl TableType {
    pub fn is_piecewise(&self) -> bool {
        matches!(self, Self::Piecewise | Self::Fixed | Self::Ones | Self::Zeros)
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self, Self::Uniform | Self::Fixed | Self::Ones | Self::Zeros)
    }

    /// Whether values of tables of this type depend on the quadrature point.
    pub fn is_varying(&self) -> bool {
        matches!(self, Self::Varying | Self::Uniform | Self::Quadrature)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Zeros => "zeros",
            Self::Ones => "ones",
            Self::Fixed => "fixed",
            Self::Piecewise => "piecewise",
            Self::Uniform => "uniform",
            Self::Varying => "varying",
            Self::Quadrature => "quadrature",
            Self::Preintegrated => "preintegrated",
            Self::Premultiplied => "premultiplied",
        }
    }
}

impl Display for TableType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A half-open range `[begin, end)` of dofs in a named table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRange {
    pub name: String,
    pub begin: usize,
    pub end: usize,
}

impl TableRange {
    pub fn new(name: impl Into<String>, begin: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            begin,
            end,
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.end - self.begin
    }
}

/// A table range together with the classification of the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableData {
    pub name: String,
    pub begin: usize,
    pub end: usize,
    pub ttype: TableType,
    pub is_piecewise: bool,
    pub is_uniform: bool,
}

impl TableData {
    pub fn new(range: &TableRange, ttype: TableType) -> Self {
        Self {
            name: range.name.clone(),
            begin: range.begin,
            end: range.end,
            ttype,
            is_piecewise: ttype.is_piecewise(),
            is_uniform: ttype.is_uniform(),
        }
    }

    pub fn dof_range(&self) -> (usize, usize) {
        (self.begin, self.end)
    }
}

/// Dense rank-3 table, stored as one matrix per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    entities: Vec<DMatrix<f64>>,
}

impl Table {
    /// Creates a table from one `rows x cols` matrix per entity.
    ///
    /// # Panics
    ///
    /// Panics if there are no entities or if the matrices do not all have the same shape.
    pub fn from_entities(entities: Vec<DMatrix<f64>>) -> Self {
        assert!(!entities.is_empty(), "Table must have at least one entity.");
        let shape = entities[0].shape();
        assert!(
            entities.iter().all(|m| m.shape() == shape),
            "All entities of a table must have the same shape."
        );
        Self { entities }
    }

    /// # Panics
    ///
    /// Panics if `num_entities` is zero.
    pub fn zeros(num_entities: usize, num_rows: usize, num_cols: usize) -> Self {
        Self::from_fn(num_entities, num_rows, num_cols, |_, _, _| 0.0)
    }

    pub fn from_fn(
        num_entities: usize,
        num_rows: usize,
        num_cols: usize,
        mut f: impl FnMut(usize, usize, usize) -> f64,
    ) -> Self {
        assert!(num_entities > 0, "Table must have at least one entity.");
        let entities = (0..num_entities)
            .map(|e| DMatrix::from_fn(num_rows, num_cols, |r, c| f(e, r, c)))
            .collect();
        Self { entities }
    }

    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    pub fn num_rows(&self) -> usize {
        self.entities[0].nrows()
    }

    pub fn num_cols(&self) -> usize {
        self.entities[0].ncols()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.num_entities(), self.num_rows(), self.num_cols())
    }

    pub fn entity(&self, entity: usize) -> &DMatrix<f64> {
        &self.entities[entity]
    }

    pub fn entity_mut(&mut self, entity: usize) -> &mut DMatrix<f64> {
        &mut self.entities[entity]
    }

    pub fn entities(&self) -> &[DMatrix<f64>] {
        &self.entities
    }

    pub fn get(&self, entity: usize, row: usize, col: usize) -> Option<f64> {
        self.entities
            .get(entity)
            .and_then(|m| m.get((row, col)))
            .copied()
    }

    /// Returns the table restricted to the given entities, rows and columns.
    pub fn select(&self, entities: &[usize], rows: &[usize], cols: Range<usize>) -> Self {
        let entities = entities
            .iter()
            .map(|&e| {
                let m = &self.entities[e];
                DMatrix::from_fn(rows.len(), cols.len(), |r, c| m[(rows[r], cols.start + c)])
            })
            .collect();
        Self { entities }
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = f64> {
        self.entities.iter().flat_map(|m| m.iter().copied())
    }
}

impl Index<(usize, usize, usize)> for Table {
    type Output = f64;

    fn index(&self, (entity, row, col): (usize, usize, usize)) -> &f64 {
        &self.entities[entity][(row, col)]
    }
}

/// Compares two tables of the same shape entrywise with absolute tolerance `eps`.
///
/// Tables of different shapes are never equal.
pub fn equal_tables(a: &Table, b: &Table, eps: f64) -> bool {
    a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= eps)
}

/// Optimized tables for the modified terminals of one integrand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSet {
    pub unique_tables: BTreeMap<String, Table>,
    pub table_types: BTreeMap<String, TableType>,
    /// Table range of every modified terminal that has a table.
    pub ranges: BTreeMap<ModifiedTerminal, TableRange>,
    /// Number of dofs in the range of each table.
    pub table_num_dofs: BTreeMap<String, usize>,
}

/// Context of a table request.
#[derive(Debug, Clone, Copy)]
pub struct TableRequest<'a> {
    /// Number of quadrature points, or `None` for expressions evaluated outside of integrals.
    pub num_points: Option<usize>,
    pub quadrature_rules: &'a QuadratureRules,
    pub cell: &'a Cell,
    pub integral_type: IntegralType,
    pub entity_type: EntityType,
    pub parameters: &'a Parameters,
}

/// Source of basis function tables for modified terminals.
///
/// Terminals without a table, such as geometric quantities, are simply left out of
/// [`TableSet::ranges`].
pub trait TableProvider {
    fn build_optimized_tables(
        &self,
        request: &TableRequest,
        modified_terminals: &[ModifiedTerminal],
    ) -> eyre::Result<TableSet>;
}

impl<P: TableProvider + ?Sized> TableProvider for &P {
    fn build_optimized_tables(
        &self,
        request: &TableRequest,
        modified_terminals: &[ModifiedTerminal],
    ) -> eyre::Result<TableSet> {
        (**self).build_optimized_tables(request, modified_terminals)
    }
}
