use crate::analysis::{analyse_modified_terminal, ModifiedTerminal};
use crate::error::FormError;
use crate::expr::{balance_modifiers, Expr};
use crate::tables::{equal_tables, Table, TableProvider, TableRange, TableRequest, TableSet, TableType};
use eyre::bail;
use log::debug;
use std::collections::BTreeMap;

/// Table provider backed by tables tabulated ahead of time.
///
/// Raw tables are registered per number of quadrature points and modified terminal, indexed
/// `[entity, point, dof]`. On request they are stripped of zero dofs at both ends, classified
/// and compacted: tables constant over points keep a single point, tables constant over
/// entities keep a single entity.
#[derive(Debug, Clone, Default)]
pub struct TabulatedTables {
    tables: BTreeMap<Option<usize>, BTreeMap<ModifiedTerminal, (String, Table)>>,
}

impl TabulatedTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the raw table of a modified terminal expression under the given table name.
    pub fn insert(
        &mut self,
        num_points: Option<usize>,
        expr: &Expr,
        name: impl Into<String>,
        table: Table,
    ) -> Result<(), FormError> {
        let mt = analyse_modified_terminal(&balance_modifiers(expr))?;
        self.tables
            .entry(num_points)
            .or_default()
            .insert(mt, (name.into(), table));
        Ok(())
    }

    pub fn with_table(
        mut self,
        num_points: Option<usize>,
        expr: &Expr,
        name: impl Into<String>,
        table: Table,
    ) -> Result<Self, FormError> {
        self.insert(num_points, expr, name, table)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TableProvider for TabulatedTables {
    fn build_optimized_tables(
        &self,
        request: &TableRequest,
        modified_terminals: &[ModifiedTerminal],
    ) -> eyre::Result<TableSet> {
        let eps = request.parameters.table_tolerance;
        let mut set = TableSet::default();
        let Some(registered) = self.tables.get(&request.num_points) else {
            return Ok(set);
        };

        for mt in modified_terminals {
            let Some((name, raw)) = registered.get(mt) else {
                continue;
            };
            if let Some(num_points) = request.num_points {
                if raw.num_rows() != num_points {
                    bail!(
                        "Table {} has {} points, expected {}.",
                        name,
                        raw.num_rows(),
                        num_points
                    );
                }
            }

            let is_quadrature = mt
                .terminal
                .element()
                .map_or(false, |element| element.is_quadrature());
            let (begin, end) = strip_zero_columns(raw, eps);
            let stripped = raw.select(
                &(0..raw.num_entities()).collect::<Vec<_>>(),
                &(0..raw.num_rows()).collect::<Vec<_>>(),
                begin..end,
            );
            let ttype = classify_table(&stripped, is_quadrature, eps);
            let table = compact_table(&stripped, ttype);

            if let Some(existing) = set.unique_tables.get(name) {
                if !equal_tables(existing, &table, eps) {
                    bail!("Terminals sharing table {} have different table values.", name);
                }
            }
            set.unique_tables.insert(name.clone(), table);
            set.table_types.insert(name.clone(), ttype);
            let range = TableRange::new(name.clone(), begin, end);
            set.table_num_dofs.insert(name.clone(), range.num_dofs());
            set.ranges.insert(mt.clone(), range);
        }

        debug!(
            "Built {} optimized tables for {} modified terminals.",
            set.unique_tables.len(),
            modified_terminals.len()
        );
        Ok(set)
    }
}

/// Finds the smallest range of dofs outside of which all table values are zero.
///
/// Returns `(0, 0)` if the table is zero everywhere.
pub fn strip_zero_columns(table: &Table, eps: f64) -> (usize, usize) {
    let is_nonzero_column = |c: usize| {
        table
            .entities()
            .iter()
            .any(|m| m.column(c).iter().any(|v| v.abs() > eps))
    };
    let num_cols = table.num_cols();
    match (0..num_cols).find(|&c| is_nonzero_column(c)) {
        Some(begin) => {
            let end = (begin..num_cols)
                .rev()
                .find(|&c| is_nonzero_column(c))
                .map_or(begin, |c| c + 1);
            (begin, end)
        }
        None => (0, 0),
    }
}

/// Classifies the variability of a table indexed `[entity, point, dof]`.
pub fn classify_table(table: &Table, is_quadrature: bool, eps: f64) -> TableType {
    let close = |a: f64, b: f64| (a - b).abs() <= eps;
    if table.iter().all(|v| close(v, 0.0)) {
        return TableType::Zeros;
    }
    if table.iter().all(|v| close(v, 1.0)) {
        return TableType::Ones;
    }
    if is_quadrature {
        return TableType::Quadrature;
    }

    let is_piecewise = table.entities().iter().all(|m| {
        (1..m.nrows()).all(|r| {
            m.row(r)
                .iter()
                .zip(m.row(0).iter())
                .all(|(&a, &b)| close(a, b))
        })
    });
    let first = table.entity(0);
    let is_uniform = table
        .entities()
        .iter()
        .all(|m| m.iter().zip(first.iter()).all(|(&a, &b)| close(a, b)));

    match (is_piecewise, is_uniform) {
        (true, true) => TableType::Fixed,
        (true, false) => TableType::Piecewise,
        (false, true) => TableType::Uniform,
        (false, false) => TableType::Varying,
    }
}

/// Drops the points and entities a table of the given type does not vary over.
pub fn compact_table(table: &Table, ttype: TableType) -> Table {
    if ttype == TableType::Zeros {
        return Table::zeros(1, 1, 0);
    }
    let entities: Vec<usize> = if ttype.is_uniform() {
        vec![0]
    } else {
        (0..table.num_entities()).collect()
    };
    let rows: Vec<usize> = if ttype.is_piecewise() {
        vec![0]
    } else {
        (0..table.num_rows()).collect()
    };
    table.select(&entities, &rows, 0..table.num_cols())
}
