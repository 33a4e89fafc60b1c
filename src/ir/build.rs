use crate::analysis::{analyse_dependencies, analyse_modified_terminal, DependencyAnalysis, ModifiedTerminal};
use crate::blocks::{
    classify_block, integrate_block, multiply_block, BlockCommon, BlockContribution, BlockContributions, BlockMode,
    DofBlock, ModifiedArgumentData,
};
use crate::config::Parameters;
use crate::error::FormError;
use crate::expr::{balance_modifiers, Expr, Terminal};
use crate::factorization::{ArgumentFactorizer, MonomialFactorizer};
use crate::graph::{build_scalar_graph, rebuild_with_substitutions, ScalarGraph, Vertex};
use crate::integral::{expects_quadrature_weight, IntegralType};
use crate::ir::{count_block_modes, ExprIr, IntegralData, IntegralIr, Integrands, PiecewiseIr};
use crate::quadrature::QuadratureRules;
use crate::tables::{equal_tables, TableData, TableProvider, TableRequest, TableSet, TableType};
use itertools::Itertools;
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Builds the IR of an integral using the default [`MonomialFactorizer`].
pub fn build_integral_ir<P>(
    data: &IntegralData,
    quadrature_rules: &QuadratureRules,
    tables: &P,
    parameters: &Parameters,
) -> Result<IntegralIr, FormError>
where
    P: TableProvider + ?Sized,
{
    build_integral_ir_with(data, quadrature_rules, tables, &MonomialFactorizer, parameters)
}

/// Builds the IR of an integral.
///
/// Integrands are processed in increasing order of their number of quadrature points. For each,
/// the integrand is expanded into a scalar graph, its modified terminals are resolved against
/// tables, terminals with zero tables and quadrature weights are folded away, and the result is
/// factorized into argument monomials. Every monomial is then assigned a [`BlockMode`].
/// Piecewise constant vertices, modified arguments and generated tables are shared between
/// integrands through [`IntegralIr::piecewise_ir`], so generated table names depend on the
/// processing order.
pub fn build_integral_ir_with<P, F>(
    data: &IntegralData,
    quadrature_rules: &QuadratureRules,
    tables: &P,
    factorizer: &F,
    parameters: &Parameters,
) -> Result<IntegralIr, FormError>
where
    P: TableProvider + ?Sized,
    F: ArgumentFactorizer + ?Sized,
{
    let expect_weight = expects_quadrature_weight(&data.cell, data.integral_type, data.entity_type);
    if !parameters.enable_preintegration {
        warn!("Preintegration is disabled, all blocks are integrated at runtime.");
    }

    let cases = integrand_cases(data)?;
    let mut ir = IntegralIr {
        coefficient_numbering: data.coefficient_numbering.clone(),
        unique_tables: BTreeMap::new(),
        unique_table_types: BTreeMap::new(),
        piecewise_ir: PiecewiseIr::default(),
        varying_irs: BTreeMap::new(),
        all_num_points: cases.iter().map(|(num_points, _)| *num_points).collect(),
        expect_weight,
    };

    let context = CaseContext {
        data,
        quadrature_rules,
        parameters,
        expect_weight,
    };
    for (num_points, expressions) in cases {
        debug!("Building IR for {} quadrature points.", describe_num_points(num_points));
        let expr_ir = build_case(&mut ir, &context, num_points, &expressions, tables, factorizer)?;
        ir.varying_irs.insert(num_points, expr_ir);
    }
    Ok(ir)
}

#[derive(Debug, Clone, Copy)]
struct CaseContext<'a> {
    data: &'a IntegralData,
    quadrature_rules: &'a QuadratureRules,
    parameters: &'a Parameters,
    expect_weight: bool,
}

fn describe_num_points(num_points: Option<usize>) -> String {
    num_points.map_or_else(|| "no".to_string(), |n| n.to_string())
}

fn integrand_cases(data: &IntegralData) -> Result<Vec<(Option<usize>, Vec<Expr>)>, FormError> {
    match (&data.integrands, data.integral_type) {
        (Integrands::Expression(expressions), IntegralType::Expression) => Ok(vec![(None, expressions.clone())]),
        (Integrands::Quadrature(integrands), integral_type) if integral_type != IntegralType::Expression => {
            Ok(integrands
                .iter()
                .map(|(&num_points, integrand)| (Some(num_points), vec![integrand.clone()]))
                .collect())
        }
        _ => Err(FormError::InconsistentForm(
            "Expression integrals take a list of expressions, other integrals one integrand per quadrature rule."
                .to_string(),
        )),
    }
}

fn analyse_terminals(graph: &ScalarGraph, indices: &[usize]) -> Result<Vec<ModifiedTerminal>, FormError> {
    indices
        .iter()
        .map(|&i| match &graph.vertices[i] {
            Vertex::Terminal(expr) => analyse_modified_terminal(expr),
            other => Err(FormError::InvalidModifier(format!(
                "Vertex {i} is not a modified terminal: {other:?}"
            ))),
        })
        .collect()
}

fn table_type(table_types: &BTreeMap<String, TableType>, name: &str) -> Result<TableType, FormError> {
    table_types
        .get(name)
        .copied()
        .ok_or_else(|| FormError::InconsistentForm(format!("No table type registered for table {name}.")))
}

fn build_case<P, F>(
    ir: &mut IntegralIr,
    context: &CaseContext,
    num_points: Option<usize>,
    expressions: &[Expr],
    tables: &P,
    factorizer: &F,
) -> Result<ExprIr, FormError>
where
    P: TableProvider + ?Sized,
    F: ArgumentFactorizer + ?Sized,
{
    let expressions: Vec<Expr> = expressions.iter().map(balance_modifiers).collect();
    let (graph, mut table_set) = resolve_tables(context, num_points, &expressions, tables)?;

    let rank = context.data.tensor_shape.len();
    let factorization = factorizer.factorize(&graph, rank)?;
    let argument_factorization = match factorization.argument_factorizations.as_slice() {
        [single] => single,
        other => {
            return Err(FormError::InconsistentForm(format!(
                "Expected exactly one target after factorization, got {}.",
                other.len()
            )))
        }
    };
    let modified_arguments = factorization
        .modified_arguments
        .iter()
        .map(analyse_modified_terminal)
        .collect::<Result<Vec<_>, _>>()?;

    let factorized = &factorization.graph;
    let modified_terminal_indices = factorized.modified_terminal_indices();
    let modified_terminals = analyse_terminals(factorized, &modified_terminal_indices)?;
    let dependencies = analyse_dependencies(
        factorized,
        &modified_terminal_indices,
        &modified_terminals,
        &table_set.ranges,
        &table_set.table_types,
    )?;

    let mut table_data = vec![None; factorized.len()];
    for (&i, mt) in modified_terminal_indices.iter().zip(&modified_terminals) {
        if let Some(range) = table_set.ranges.get(mt) {
            let ttype = table_type(&table_set.table_types, &range.name)?;
            table_data[i] = Some(TableData::new(range, ttype));
        }
    }

    let piecewise_indices = extend_piecewise_ir(
        &mut ir.piecewise_ir,
        factorized,
        &dependencies,
        &table_data,
        &modified_arguments,
    )?;

    let mut block_contributions = BlockContributions::new();
    for (ma_indices, &factor) in argument_factorization {
        let monomial = Monomial {
            ma_indices,
            factor,
            modified_arguments: &modified_arguments,
            factor_is_piecewise: dependencies.piecewise[factor],
            piecewise_indices: &piecewise_indices,
        };
        let (dofblock, contribution, block_is_piecewise) =
            build_block(context, num_points, &monomial, &mut table_set, &mut ir.piecewise_ir)?;
        if block_is_piecewise {
            ir.piecewise_ir
                .block_contributions
                .entry(dofblock)
                .or_default()
                .push(contribution);
        } else {
            block_contributions
                .entry(dofblock)
                .or_default()
                .push(contribution);
        }
    }

    // Tables referenced by active terminals and by blocks
    let mut active_table_names = BTreeSet::new();
    for (&i, mt) in modified_terminal_indices.iter().zip(&modified_terminals) {
        if dependencies.active[i] {
            if let Some(range) = table_set.ranges.get(mt) {
                active_table_names.insert(range.name.clone());
            }
        }
    }
    for contribution in block_contributions
        .values()
        .chain(ir.piecewise_ir.block_contributions.values())
        .flatten()
    {
        active_table_names.extend(contribution.referenced_table_names().into_iter().map(str::to_string));
    }
    merge_tables(ir, table_set, &active_table_names, context.parameters.table_tolerance)?;

    let active_terminals: Vec<&ModifiedTerminal> = modified_terminal_indices
        .iter()
        .zip(&modified_terminals)
        .filter(|&(&i, _)| dependencies.active[i])
        .map(|(_, mt)| mt)
        .collect();
    let need_points = match context.data.integral_type {
        IntegralType::Cell => active_terminals
            .iter()
            .any(|mt| matches!(mt.terminal, Terminal::CellCoordinate { .. })),
        integral_type if integral_type.is_facet() => active_terminals
            .iter()
            .any(|mt| matches!(mt.terminal, Terminal::FacetCoordinate { .. })),
        _ => false,
    };

    let block_modes = count_block_modes(&block_contributions);
    debug!(
        "Blocks of each mode: \n{}",
        block_modes
            .iter()
            .map(|(mode, count)| format!("  {count}\t{mode}"))
            .join("\n")
    );
    let need_weights = context.expect_weight && block_modes.keys().any(|&mode| mode != BlockMode::Preintegrated);

    Ok(ExprIr {
        vertices: factorized.vertices.clone(),
        targets: factorized.targets.clone(),
        table_data,
        modified_arguments,
        block_contributions,
        varying: dependencies.varying,
        need_points,
        need_weights,
    })
}

/// Builds the scalar graph of the expressions, fetches tables for its modified terminals and
/// folds away quadrature weights and terminals with zero tables.
fn resolve_tables<P>(
    context: &CaseContext,
    num_points: Option<usize>,
    expressions: &[Expr],
    tables: &P,
) -> Result<(ScalarGraph, TableSet), FormError>
where
    P: TableProvider + ?Sized,
{
    let graph = build_scalar_graph(expressions)?;
    let terminal_indices = graph.modified_terminal_indices();
    let terminals = analyse_terminals(&graph, &terminal_indices)?;

    let request = TableRequest {
        num_points,
        quadrature_rules: context.quadrature_rules,
        cell: &context.data.cell,
        integral_type: context.data.integral_type,
        entity_type: context.data.entity_type,
        parameters: context.parameters,
    };
    let table_set = tables.build_optimized_tables(&request, &terminals)?;

    let mut substitutions = FxHashMap::default();
    for (&i, mt) in terminal_indices.iter().zip(&terminals) {
        if mt.terminal == Terminal::QuadratureWeight {
            // Weights are applied uniformly to the blocks that need them
            substitutions.insert(i, 1.0);
        } else if let Some(range) = table_set.ranges.get(mt) {
            if table_type(&table_set.table_types, &range.name)? == TableType::Zeros {
                substitutions.insert(i, 0.0);
            }
        }
    }
    Ok((rebuild_with_substitutions(&graph, &substitutions), table_set))
}

/// Adds the piecewise vertices and the modified arguments of an integrand to the shared IR.
///
/// Returns the piecewise index of every piecewise vertex.
fn extend_piecewise_ir(
    piecewise: &mut PiecewiseIr,
    graph: &ScalarGraph,
    dependencies: &DependencyAnalysis,
    table_data: &[Option<TableData>],
    modified_arguments: &[ModifiedTerminal],
) -> Result<Vec<Option<usize>>, FormError> {
    let mut piecewise_indices = vec![None; graph.len()];
    for (i, vertex) in graph.vertices.iter().enumerate() {
        if !dependencies.piecewise[i] {
            continue;
        }
        // Operands of piecewise vertices are piecewise
        let operands = vertex
            .operands()
            .iter()
            .map(|&j| {
                piecewise_indices[j].ok_or_else(|| {
                    FormError::InconsistentForm(format!("Piecewise vertex {i} depends on varying vertex {j}."))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let translated = match vertex {
            Vertex::Operator { op, .. } => Vertex::Operator { op: *op, operands },
            other => other.clone(),
        };
        piecewise_indices[i] = Some(piecewise.insert_vertex(translated, table_data[i].clone()));
    }

    for mt in modified_arguments {
        piecewise.insert_modified_argument(mt);
    }
    Ok(piecewise_indices)
}

/// A monomial of the argument factorization together with what is known about its factor.
struct Monomial<'a> {
    ma_indices: &'a [usize],
    factor: usize,
    modified_arguments: &'a [ModifiedTerminal],
    factor_is_piecewise: bool,
    piecewise_indices: &'a [Option<usize>],
}

/// Classifies a monomial and builds its contribution.
///
/// Returns the dof block, the contribution and whether it belongs to the piecewise IR.
fn build_block(
    context: &CaseContext,
    num_points: Option<usize>,
    monomial: &Monomial,
    table_set: &mut TableSet,
    piecewise: &mut PiecewiseIr,
) -> Result<(DofBlock, BlockContribution, bool), FormError> {
    let rank = monomial.ma_indices.len();
    let mut tds = Vec::with_capacity(rank);
    for &ma in monomial.ma_indices {
        let mt = &monomial.modified_arguments[ma];
        let range = table_set.ranges.get(mt).ok_or_else(|| {
            FormError::InconsistentForm(format!("No table for modified argument {}.", mt.expr))
        })?;
        let ttype = table_type(&table_set.table_types, &range.name)?;
        tds.push(TableData::new(range, ttype));
    }

    let table_names: Vec<String> = tds.iter().map(|td| td.name.clone()).collect();
    let ttypes: Vec<TableType> = tds.iter().map(|td| td.ttype).collect();
    let dofblock: DofBlock = tds.iter().map(TableData::dof_range).collect();
    if ttypes.contains(&TableType::Zeros) {
        return Err(FormError::InconsistentForm(format!(
            "Monomial retains an argument with a zero table, tables {table_names:?}."
        )));
    }

    // Sides of interior facet integrals are only relevant for tables that differ between entities
    let restrictions = monomial
        .ma_indices
        .iter()
        .zip(&tds)
        .map(|(&ma, td)| {
            if td.is_uniform {
                None
            } else {
                monomial.modified_arguments[ma].restriction
            }
        })
        .collect();

    let factor_is_piecewise = monomial.factor_is_piecewise;
    let factor_index = if factor_is_piecewise {
        monomial.piecewise_indices[monomial.factor].ok_or_else(|| {
            FormError::InconsistentForm(format!(
                "Piecewise factor {} is missing from the piecewise IR.",
                monomial.factor
            ))
        })?
    } else {
        monomial.factor
    };

    let block_mode = classify_block(
        &ttypes,
        factor_is_piecewise,
        context.data.integral_type,
        context.parameters,
    );
    let mut common = BlockCommon {
        block_mode,
        ttypes: ttypes.clone(),
        factor_index,
        factor_is_piecewise,
        table_names: Vec::new(),
        restrictions,
    };

    match block_mode {
        BlockMode::Preintegrated => {
            if !factor_is_piecewise {
                return Err(FormError::InvalidBlockMode(
                    "Preintegrated block with varying factor.".to_string(),
                ));
            }
            let name = match piecewise.preintegrated_blocks.get(&table_names) {
                Some(name) => name.clone(),
                None => {
                    let rule = num_points
                        .and_then(|n| context.quadrature_rules.get(n))
                        .ok_or_else(|| {
                            FormError::InconsistentForm(format!(
                                "No quadrature rule with {} points to preintegrate with.",
                                describe_num_points(num_points)
                            ))
                        })?;
                    let table = integrate_block(
                        rule.weights(),
                        &table_names,
                        &ttypes,
                        &table_set.unique_tables,
                        &table_set.table_num_dofs,
                    )?;
                    let name = format!("PI{}", piecewise.preintegrated_blocks.len());
                    piecewise
                        .preintegrated_blocks
                        .insert(table_names.clone(), name.clone());
                    table_set.unique_tables.insert(name.clone(), table);
                    table_set
                        .table_types
                        .insert(name.clone(), TableType::Preintegrated);
                    name
                }
            };
            common.table_names = vec![name.clone()];
            Ok((dofblock, BlockContribution::Preintegrated { common, name }, true))
        }
        BlockMode::Premultiplied => {
            if factor_is_piecewise {
                return Err(FormError::InvalidBlockMode(
                    "Premultiplied block with piecewise factor.".to_string(),
                ));
            }
            let name = match piecewise.premultiplied_blocks.get(&table_names) {
                Some(name) => name.clone(),
                None => {
                    let table = multiply_block(
                        0,
                        &table_names,
                        &ttypes,
                        &table_set.unique_tables,
                        &table_set.table_num_dofs,
                    )?;
                    let name = format!("PM{}", piecewise.premultiplied_blocks.len());
                    piecewise
                        .premultiplied_blocks
                        .insert(table_names.clone(), name.clone());
                    table_set.unique_tables.insert(name.clone(), table);
                    table_set
                        .table_types
                        .insert(name.clone(), TableType::Premultiplied);
                    name
                }
            };
            common.table_names = vec![name.clone()];
            Ok((dofblock, BlockContribution::Premultiplied { common, name }, false))
        }
        BlockMode::Partial | BlockMode::Full | BlockMode::Safe => {
            let mut block_is_piecewise = factor_is_piecewise && !context.expect_weight;
            let mut ma_data = Vec::with_capacity(rank);
            for (&ma, td) in monomial.ma_indices.iter().zip(&tds) {
                let ma_index = if td.is_piecewise {
                    let mt = &monomial.modified_arguments[ma];
                    piecewise.modified_argument_index(mt).ok_or_else(|| {
                        FormError::InconsistentForm(format!(
                            "Modified argument {} is missing from the piecewise IR.",
                            mt.expr
                        ))
                    })?
                } else {
                    block_is_piecewise = false;
                    ma
                };
                ma_data.push(ModifiedArgumentData {
                    ma_index,
                    table_data: td.clone(),
                });
            }

            let contribution = if block_mode == BlockMode::Partial {
                let piecewise_ma_index = tds
                    .iter()
                    .position(|td| td.is_piecewise)
                    .filter(|_| rank == 2)
                    .ok_or_else(|| {
                        FormError::InvalidBlockMode(format!(
                            "Partial block requires two arguments, one of them piecewise, got {ttypes:?}."
                        ))
                    })?;
                common.table_names = vec![table_names[1 - piecewise_ma_index].clone()];
                BlockContribution::Partial {
                    common,
                    ma_data,
                    piecewise_ma_index,
                }
            } else {
                common.table_names = table_names;
                BlockContribution::Full { common, ma_data }
            };
            Ok((dofblock, contribution, block_is_piecewise))
        }
    }
}

/// Records the table types of an integrand and adds its referenced tables to the shared tables.
///
/// Tables of zeros, ones and quadrature elements are never stored.
fn merge_tables(
    ir: &mut IntegralIr,
    table_set: TableSet,
    active_table_names: &BTreeSet<String>,
    eps: f64,
) -> Result<(), FormError> {
    ir.unique_table_types.extend(table_set.table_types);
    let mut unique_tables = table_set.unique_tables;
    for name in active_table_names {
        let unused = match ir.unique_table_types.get(name) {
            Some(ttype) => matches!(ttype, TableType::Zeros | TableType::Ones | TableType::Quadrature),
            None => true,
        };
        if unused {
            continue;
        }
        if let Some(table) = unique_tables.remove(name) {
            if let Some(existing) = ir.unique_tables.get(name) {
                if !equal_tables(existing, &table, eps) {
                    return Err(FormError::TableMismatch { name: name.clone() });
                }
            }
            ir.unique_tables.insert(name.clone(), table);
        }
    }
    Ok(())
}
