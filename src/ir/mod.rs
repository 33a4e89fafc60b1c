//! Intermediate representation of integrals.
use crate::analysis::ModifiedTerminal;
use crate::blocks::{BlockContributions, BlockMode};
use crate::expr::Expr;
use crate::graph::{Vertex, VertexArena};
use crate::integral::{Cell, EntityType, IntegralType};
use crate::tables::{Table, TableData, TableType};
use std::collections::BTreeMap;

mod build;

pub use build::*;

/// Integrands of an integral.
#[derive(Debug, Clone, PartialEq)]
pub enum Integrands {
    /// Expressions evaluated outside of an integral, processed together without quadrature.
    Expression(Vec<Expr>),
    /// One integrand per number of quadrature points.
    Quadrature(BTreeMap<usize, Expr>),
}

/// Input to IR construction for one integral.
#[derive(Debug, Clone)]
pub struct IntegralData {
    pub cell: Cell,
    pub integral_type: IntegralType,
    pub entity_type: EntityType,
    pub integrands: Integrands,
    /// Shape of the element tensor. Its length is the rank of the form.
    pub tensor_shape: Vec<usize>,
    /// Coefficient count to the number of the coefficient in the form.
    pub coefficient_numbering: BTreeMap<usize, usize>,
}

/// IR of the integrand for one number of quadrature points.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprIr {
    /// Vertices of the factorized graph.
    pub vertices: Vec<Vertex>,
    /// Vertices computing the monomial factors.
    pub targets: Vec<usize>,
    /// Table of each modified terminal vertex.
    pub table_data: Vec<Option<TableData>>,
    pub modified_arguments: Vec<ModifiedTerminal>,
    pub block_contributions: BlockContributions,
    /// Whether each vertex depends on the quadrature point.
    pub varying: Vec<bool>,
    pub need_points: bool,
    pub need_weights: bool,
}

impl ExprIr {
    /// Number of contributions of each block mode.
    pub fn block_mode_counts(&self) -> BTreeMap<BlockMode, usize> {
        count_block_modes(&self.block_contributions)
    }
}

pub(crate) fn count_block_modes(contributions: &BlockContributions) -> BTreeMap<BlockMode, usize> {
    let mut counts = BTreeMap::new();
    for contribution in contributions.values().flatten() {
        *counts.entry(contribution.block_mode()).or_insert(0) += 1;
    }
    counts
}

/// IR shared by the integrands of all quadrature rules.
///
/// Holds the piecewise constant vertices and the modified arguments of all integrands without
/// duplicates, the blocks computed once per element and caches of generated tables.
#[derive(Debug, Clone, Default)]
pub struct PiecewiseIr {
    arena: VertexArena,
    table_data: Vec<Option<TableData>>,
    modified_arguments: Vec<ModifiedTerminal>,
    modified_argument_indices: BTreeMap<ModifiedTerminal, usize>,
    /// Argument table names to the name of their preintegrated table.
    pub preintegrated_blocks: BTreeMap<Vec<String>, String>,
    /// Argument table names to the name of their premultiplied table.
    pub premultiplied_blocks: BTreeMap<Vec<String>, String>,
    pub block_contributions: BlockContributions,
}

impl PiecewiseIr {
    pub fn vertices(&self) -> &[Vertex] {
        self.arena.vertices()
    }

    /// Table of each vertex, aligned with [`PiecewiseIr::vertices`].
    pub fn table_data(&self) -> &[Option<TableData>] {
        &self.table_data
    }

    pub fn modified_arguments(&self) -> &[ModifiedTerminal] {
        &self.modified_arguments
    }

    pub fn modified_argument_index(&self, mt: &ModifiedTerminal) -> Option<usize> {
        self.modified_argument_indices.get(mt).copied()
    }

    pub fn block_mode_counts(&self) -> BTreeMap<BlockMode, usize> {
        count_block_modes(&self.block_contributions)
    }

    /// Inserts a vertex whose operands are already in the piecewise numbering.
    ///
    /// Renumbering may reorder the operands of commutative operators, so they are put back in
    /// canonical order before lookup.
    fn insert_vertex(&mut self, vertex: Vertex, table_data: Option<TableData>) -> usize {
        let len = self.arena.len();
        let index = self.arena.insert_canonical(vertex);
        if index == len {
            self.table_data.push(table_data);
        }
        index
    }

    fn insert_modified_argument(&mut self, mt: &ModifiedTerminal) -> usize {
        if let Some(&index) = self.modified_argument_indices.get(mt) {
            return index;
        }
        let index = self.modified_arguments.len();
        self.modified_arguments.push(mt.clone());
        self.modified_argument_indices.insert(mt.clone(), index);
        index
    }
}

/// IR of an integral.
#[derive(Debug, Clone)]
pub struct IntegralIr {
    pub coefficient_numbering: BTreeMap<usize, usize>,
    /// Tables referenced by any integrand, shared between quadrature rules.
    pub unique_tables: BTreeMap<String, Table>,
    /// Types of all tables seen during construction, including pruned ones.
    pub unique_table_types: BTreeMap<String, TableType>,
    pub piecewise_ir: PiecewiseIr,
    pub varying_irs: BTreeMap<Option<usize>, ExprIr>,
    /// Processed numbers of quadrature points, `None` for expressions.
    pub all_num_points: Vec<Option<usize>>,
    pub expect_weight: bool,
}
