use crate::analysis::ModifiedTerminal;
use crate::error::FormError;
use crate::graph::ScalarGraph;
use crate::tables::{TableRange, TableType};
use fenris_nested_vec::NestedVec;
use log::warn;
use std::collections::BTreeMap;

/// Counts, for every vertex, how many vertices use it as an operand.
pub fn compute_dependency_count(dependencies: &NestedVec<usize>) -> Vec<usize> {
    let mut counts = vec![0; dependencies.len()];
    for row in dependencies.iter() {
        for &j in row {
            counts[j] += 1;
        }
    }
    counts
}

/// Builds the inverse dependency lists: for every vertex, the vertices that use it as an operand.
///
/// Each inverse list is in ascending order.
pub fn invert_dependencies(dependencies: &NestedVec<usize>, dependency_count: &[usize]) -> NestedVec<usize> {
    let mut dependents: Vec<Vec<usize>> = dependency_count
        .iter()
        .map(|&count| Vec::with_capacity(count))
        .collect();
    for (i, row) in dependencies.iter().enumerate() {
        for &j in row {
            // A vertex may use the same operand twice, as in `a * a`
            if dependents[j].last() != Some(&i) {
                dependents[j].push(i);
            }
        }
    }
    NestedVec::from(dependents)
}

/// Marks the vertices the targets are computed from, including the targets themselves.
///
/// Relies on operands always preceding the vertices that use them.
pub fn mark_active(dependencies: &NestedVec<usize>, targets: &[usize]) -> (Vec<bool>, usize) {
    let mut active = vec![false; dependencies.len()];
    for &t in targets {
        active[t] = true;
    }
    for i in (0..dependencies.len()).rev() {
        if active[i] {
            for &j in dependencies.get(i).unwrap_or(&[]) {
                active[j] = true;
            }
        }
    }
    let num_active = active.iter().filter(|&&a| a).count();
    (active, num_active)
}

/// Marks the image of the seed vertices: the seeds and every vertex computed from them.
pub fn mark_image(inverse_dependencies: &NestedVec<usize>, seeds: &[usize]) -> (Vec<bool>, usize) {
    let mut image = vec![false; inverse_dependencies.len()];
    for &s in seeds {
        image[s] = true;
    }
    for i in 0..inverse_dependencies.len() {
        if image[i] {
            for &j in inverse_dependencies.get(i).unwrap_or(&[]) {
                image[j] = true;
            }
        }
    }
    let num_marked = image.iter().filter(|&&m| m).count();
    (image, num_marked)
}

/// Result of the dependency analysis of a factorized graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyAnalysis {
    pub inverse_dependencies: NestedVec<usize>,
    pub active: Vec<bool>,
    /// Active vertices that are constant over the quadrature points of an element.
    pub piecewise: Vec<bool>,
    /// Active vertices that depend on the quadrature point.
    pub varying: Vec<bool>,
}

/// Partitions the active vertices of the graph into piecewise constant and varying vertices.
///
/// A modified terminal is varying if its table is varying over points (`varying`, `uniform` or
/// `quadrature`). Terminals without a table are varying unless they are cellwise constant.
/// Everything computed from a varying vertex is varying, the remaining active vertices are
/// piecewise.
pub fn analyse_dependencies(
    graph: &ScalarGraph,
    modified_terminal_indices: &[usize],
    modified_terminals: &[ModifiedTerminal],
    table_ranges: &BTreeMap<ModifiedTerminal, TableRange>,
    table_types: &BTreeMap<String, TableType>,
) -> Result<DependencyAnalysis, FormError> {
    let dependency_count = compute_dependency_count(&graph.dependencies);
    let inverse_dependencies = invert_dependencies(&graph.dependencies, &dependency_count);
    let (active, _) = mark_active(&graph.dependencies, &graph.targets);

    let mut seeds = Vec::new();
    for (&i, mt) in modified_terminal_indices.iter().zip(modified_terminals) {
        match table_ranges.get(mt) {
            Some(range) => {
                let ttype = table_types.get(&range.name).ok_or_else(|| {
                    FormError::InconsistentForm(format!("No table type registered for table {}.", range.name))
                })?;
                if ttype.is_varying() {
                    seeds.push(i);
                }
            }
            None => {
                if !mt.is_cellwise_constant() {
                    if mt.terminal.is_form_argument() {
                        warn!("Modified terminal {} has no table, treating it as varying.", mt.expr);
                    }
                    seeds.push(i);
                }
            }
        }
    }

    let (varying_image, _) = mark_image(&inverse_dependencies, &seeds);
    let varying: Vec<bool> = varying_image
        .iter()
        .zip(&active)
        .map(|(&v, &a)| v && a)
        .collect();
    let piecewise: Vec<bool> = varying_image
        .iter()
        .zip(&active)
        .map(|(&v, &a)| !v && a)
        .collect();

    Ok(DependencyAnalysis {
        inverse_dependencies,
        active,
        piecewise,
        varying,
    })
}
