//! Factorization of integrands into monomials of modified arguments.
use crate::analysis::{analyse_modified_terminal, ModifiedTerminal};
use crate::error::FormError;
use crate::expr::{Expr, ScalarOp};
use crate::graph::{ScalarGraph, Vertex, VertexArena};
use itertools::Itertools;
use std::collections::BTreeMap;

/// Sorted modified argument indices mapped to the vertex computing their scalar factor.
pub type ArgumentFactorization = BTreeMap<Vec<usize>, usize>;

/// An integrand written as a sum of argument monomials.
#[derive(Debug, Clone, PartialEq)]
pub struct Factorization {
    /// One factorization per target of the input graph.
    pub argument_factorizations: Vec<ArgumentFactorization>,
    /// Modified argument expressions, indexed by the entries of the monomial keys.
    pub modified_arguments: Vec<Expr>,
    /// Graph computing the monomial factors. Its targets are the factors of all monomials.
    pub graph: ScalarGraph,
}

/// Decomposition of a scalar graph into argument monomials.
pub trait ArgumentFactorizer {
    /// Factorizes each target of the graph for a form of the given rank.
    fn factorize(&self, graph: &ScalarGraph, rank: usize) -> Result<Factorization, FormError>;
}

/// Factorizer that expands sums and products of arguments.
///
/// The integrand must be linear in each argument: arguments may only be combined through
/// sums, products and division by argument-free expressions.
#[derive(Debug, Copy, Clone, Default)]
pub struct MonomialFactorizer;

type Monomials = BTreeMap<Vec<usize>, usize>;

impl ArgumentFactorizer for MonomialFactorizer {
    fn factorize(&self, graph: &ScalarGraph, rank: usize) -> Result<Factorization, FormError> {
        let (argument_indices, modified_arguments) = collect_modified_arguments(graph)?;

        let mut arena = VertexArena::new();
        let mut monomials: Vec<Monomials> = Vec::with_capacity(graph.len());
        for (i, vertex) in graph.vertices.iter().enumerate() {
            let vertex_monomials = match vertex {
                Vertex::Literal(value) => {
                    let index = arena.literal(value.0);
                    argument_free_monomials(&arena, index)
                }
                Vertex::Terminal(expr) => match argument_indices.get(&i) {
                    Some(&ma) => {
                        let one = arena.literal(1.0);
                        Monomials::from([(vec![ma], one)])
                    }
                    None => {
                        let index = arena.terminal(expr.clone());
                        Monomials::from([(vec![], index)])
                    }
                },
                Vertex::Operator { op, operands } => {
                    let operand_monomials: Vec<&Monomials> = operands.iter().map(|&j| &monomials[j]).collect();
                    combine(&mut arena, *op, &operand_monomials, i)?
                }
            };
            monomials.push(vertex_monomials);
        }

        let mut argument_factorizations = Vec::with_capacity(graph.targets.len());
        let mut factor_targets = Vec::new();
        for &target in &graph.targets {
            let factorization = monomials[target].clone();
            for key in factorization.keys() {
                check_monomial_arguments(key, &modified_arguments, rank)?;
            }
            factor_targets.extend(factorization.values().copied());
            argument_factorizations.push(factorization);
        }

        let modified_arguments = modified_arguments.into_iter().map(|mt| mt.expr).collect();
        Ok(Factorization {
            argument_factorizations,
            modified_arguments,
            graph: ScalarGraph::from_arena(arena, factor_targets),
        })
    }
}

/// Finds the modified arguments of the graph and orders them by argument ordering key.
///
/// Returns the modified argument index of every argument vertex and the analysed arguments.
fn collect_modified_arguments(
    graph: &ScalarGraph,
) -> Result<(BTreeMap<usize, usize>, Vec<ModifiedTerminal>), FormError> {
    let mut argument_vertices = Vec::new();
    for (i, vertex) in graph.vertices.iter().enumerate() {
        if let Vertex::Terminal(expr) = vertex {
            let mt = analyse_modified_terminal(expr)?;
            if mt.terminal.is_argument() {
                argument_vertices.push((i, mt));
            }
        }
    }

    let unique: Vec<ModifiedTerminal> = argument_vertices
        .iter()
        .map(|(_, mt)| mt.clone())
        .sorted_by(|a, b| {
            a.argument_ordering_key()
                .cmp(&b.argument_ordering_key())
                .then_with(|| a.cmp(b))
        })
        .dedup()
        .collect();

    let mut indices = BTreeMap::new();
    for (i, mt) in &argument_vertices {
        // Present since unique contains every analysed argument
        if let Some(ma) = unique.iter().position(|u| u == mt) {
            indices.insert(*i, ma);
        }
    }
    Ok((indices, unique))
}

fn combine(
    arena: &mut VertexArena,
    op: ScalarOp,
    operands: &[&Monomials],
    vertex_index: usize,
) -> Result<Monomials, FormError> {
    match (op, operands) {
        (ScalarOp::Sum, [a, b]) => {
            let mut result = (*a).clone();
            for (key, &factor) in b.iter() {
                add_term(arena, &mut result, key.clone(), factor);
            }
            Ok(result)
        }
        (ScalarOp::Product, [a, b]) => {
            let mut result = Monomials::new();
            for ((key_a, &fa), (key_b, &fb)) in a.iter().cartesian_product(b.iter()) {
                let key: Vec<usize> = key_a.iter().chain(key_b).copied().sorted().collect();
                let factor = arena.operator(ScalarOp::Product, vec![fa, fb]);
                add_term(arena, &mut result, key, factor);
            }
            Ok(result)
        }
        (ScalarOp::Division, [numerator, denominator]) => {
            let denominator = argument_free_factor(arena, denominator).ok_or_else(|| {
                FormError::InconsistentForm(format!(
                    "Division by an expression depending on arguments at vertex {vertex_index}."
                ))
            })?;
            let mut result = Monomials::new();
            for (key, &factor) in numerator.iter() {
                let quotient = arena.operator(ScalarOp::Division, vec![factor, denominator]);
                add_term(arena, &mut result, key.clone(), quotient);
            }
            Ok(result)
        }
        _ => {
            let factors = operands
                .iter()
                .map(|monomials| argument_free_factor(arena, monomials))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    FormError::InconsistentForm(format!(
                        "Nonlinear operator {op:?} applied to arguments at vertex {vertex_index}."
                    ))
                })?;
            let index = arena.operator(op, factors);
            Ok(argument_free_monomials(arena, index))
        }
    }
}

/// Adds `factor` to the monomial with the given key, dropping monomials that fold to zero.
fn add_term(arena: &mut VertexArena, monomials: &mut Monomials, key: Vec<usize>, factor: usize) {
    let factor = match monomials.get(&key) {
        Some(&existing) => arena.operator(ScalarOp::Sum, vec![existing, factor]),
        None => factor,
    };
    if arena.vertex(factor).as_literal() == Some(0.0) {
        monomials.remove(&key);
    } else {
        monomials.insert(key, factor);
    }
}

/// The factor of an argument-free expression, or `None` if the expression depends on arguments.
fn argument_free_factor(arena: &mut VertexArena, monomials: &Monomials) -> Option<usize> {
    match monomials.len() {
        0 => Some(arena.literal(0.0)),
        1 => monomials.get(&Vec::new()).copied(),
        _ => None,
    }
}

fn argument_free_monomials(arena: &VertexArena, index: usize) -> Monomials {
    if arena.vertex(index).as_literal() == Some(0.0) {
        Monomials::new()
    } else {
        Monomials::from([(vec![], index)])
    }
}

/// Checks that a monomial contains exactly one argument of each number `0..rank`.
fn check_monomial_arguments(
    key: &[usize],
    modified_arguments: &[ModifiedTerminal],
    rank: usize,
) -> Result<(), FormError> {
    let numbers: Vec<usize> = key
        .iter()
        .filter_map(|&ma| modified_arguments[ma].argument_ordering_key())
        .map(|ordering_key| ordering_key.0)
        .collect();
    if numbers.iter().copied().eq(0..rank) {
        Ok(())
    } else {
        Err(FormError::InconsistentForm(format!(
            "Monomial with argument numbers {numbers:?} in a form of rank {rank}."
        )))
    }
}
