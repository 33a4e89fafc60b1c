use crate::{coefficient, scalar_expression};
use formir::expr::{Expr, FiniteElement, ScalarOp};
use formir::graph::{
    build_scalar_graph, components_of_shape, flat_index, rebuild_with_substitutions, Vertex, VertexArena,
};
use formir::FormError;
use proptest::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::HashSet;

fn vector_coefficient(count: usize, dim: usize) -> Expr {
    Expr::coefficient(count, FiniteElement::new("Lagrange", 1, vec![dim]))
}

#[test]
fn flat_indices_are_row_major() {
    assert_eq!(flat_index(&[], &[]), 0);
    assert_eq!(flat_index(&[1], &[3]), 1);
    assert_eq!(flat_index(&[1, 2], &[2, 3]), 5);
    assert_eq!(components_of_shape(&[]), vec![Vec::<usize>::new()]);
    assert_eq!(
        components_of_shape(&[2, 2]),
        vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
    );
}

#[test]
fn vertex_arena_folds_and_deduplicates() {
    let mut arena = VertexArena::new();
    let f = arena.terminal(coefficient(0));
    let g = arena.terminal(coefficient(1));
    assert_eq!(arena.terminal(coefficient(0)), f);

    let fg = arena.operator(ScalarOp::Product, vec![f, g]);
    assert_eq!(arena.operator(ScalarOp::Product, vec![g, f]), fg);
    // Division is not commutative
    assert_ne!(
        arena.operator(ScalarOp::Division, vec![f, g]),
        arena.operator(ScalarOp::Division, vec![g, f])
    );

    let zero = arena.literal(0.0);
    assert_eq!(arena.literal(-0.0), zero);
    let one = arena.literal(1.0);
    assert_eq!(arena.operator(ScalarOp::Product, vec![f, one]), f);
    assert_eq!(arena.operator(ScalarOp::Product, vec![zero, g]), zero);
    assert_eq!(arena.operator(ScalarOp::Sum, vec![zero, g]), g);

    let two = arena.literal(2.0);
    let three = arena.literal(3.0);
    let six = arena.operator(ScalarOp::Product, vec![two, three]);
    assert_eq!(arena.vertex(six).as_literal(), Some(6.0));
}

#[test]
fn build_scalar_graph_shares_structurally_equal_subexpressions() {
    let f = coefficient(0);
    let g = coefficient(1);
    let expr = &f * &g + &g * &f;
    let graph = build_scalar_graph(&[expr]).unwrap();

    assert_eq!(graph.len(), 4);
    assert_eq!(graph.vertices[0], Vertex::Terminal(f));
    assert_eq!(graph.vertices[1], Vertex::Terminal(g));
    assert_eq!(
        graph.vertices[2],
        Vertex::Operator {
            op: ScalarOp::Product,
            operands: vec![0, 1]
        }
    );
    assert_eq!(
        graph.vertices[3],
        Vertex::Operator {
            op: ScalarOp::Sum,
            operands: vec![2, 2]
        }
    );
    assert_eq!(graph.targets, vec![3]);
    assert_eq!(graph.dependencies.get(2), Some(&[0, 1][..]));
    assert_eq!(graph.dependencies.get(0), Some(&[][..]));
    assert_eq!(graph.modified_terminal_indices(), vec![0, 1]);
}

#[test]
fn build_scalar_graph_expands_tensor_components() {
    let w = vector_coefficient(0, 3);
    let f = coefficient(1);
    let graph = build_scalar_graph(&[w.clone() * f.clone()]).unwrap();

    assert_eq!(graph.targets.len(), 3);
    for (i, &target) in graph.targets.iter().enumerate() {
        let operands = graph.vertices[target].operands();
        let terminals: Vec<_> = operands
            .iter()
            .filter_map(|&j| graph.vertices[j].as_terminal())
            .collect();
        assert!(terminals.contains(&&w.index(&[i])));
        assert!(terminals.contains(&&f));
    }
}

#[test]
fn build_scalar_graph_indexes_computed_tensors() {
    let w = vector_coefficient(0, 3);
    let f = coefficient(1);
    let graph = build_scalar_graph(&[(w.clone() * f).index(&[1])]).unwrap();

    assert_eq!(graph.targets.len(), 1);
    let target = &graph.vertices[graph.targets[0]];
    let terminals: Vec<_> = target
        .operands()
        .iter()
        .filter_map(|&j| graph.vertices[j].as_terminal())
        .collect();
    assert!(terminals.contains(&&w.index(&[1])));
}

#[test]
fn build_scalar_graph_expands_inner_products() {
    let a = vector_coefficient(0, 2);
    let b = vector_coefficient(1, 2);
    let graph = build_scalar_graph(&[Expr::inner(&a, &b)]).unwrap();

    // Two components of each operand, two products and one sum
    assert_eq!(graph.len(), 7);
    assert_eq!(graph.targets.len(), 1);
    assert!(matches!(
        graph.vertices[graph.targets[0]],
        Vertex::Operator { op: ScalarOp::Sum, .. }
    ));
}

#[test]
fn build_scalar_graph_folds_literals() {
    let f = coefficient(0);
    let g = coefficient(1);
    let graph = build_scalar_graph(&[f * Expr::zero() + g.clone()]).unwrap();
    assert_eq!(graph.vertices[graph.targets[0]], Vertex::Terminal(g));
}

#[test]
fn build_scalar_graph_rejects_invalid_expressions() {
    let w = vector_coefficient(0, 3);
    let f = coefficient(1);

    let out_of_range = (w * f.clone()).index(&[5]);
    assert!(matches!(
        build_scalar_graph(&[out_of_range]),
        Err(FormError::ComponentRange { .. })
    ));

    let gradient_of_product = (f.clone() * coefficient(2)).grad(2).index(&[0]);
    assert!(matches!(
        build_scalar_graph(&[gradient_of_product]),
        Err(FormError::InvalidModifier(_))
    ));
}

#[test]
fn rebuild_substitutes_and_drops_dead_vertices() {
    let f = coefficient(0);
    let g = coefficient(1);
    let h = coefficient(2);
    let graph = build_scalar_graph(&[f * g + h.clone()]).unwrap();
    assert_eq!(graph.len(), 5);

    let substitutions = FxHashMap::from_iter([(0, 0.0)]);
    let rebuilt = rebuild_with_substitutions(&graph, &substitutions);
    assert_eq!(rebuilt.vertices, vec![Vertex::Terminal(h)]);
    assert_eq!(rebuilt.targets, vec![0]);
}

#[test]
fn rebuild_with_unit_substitution_removes_factor() {
    let f = coefficient(0);
    let graph = build_scalar_graph(&[f.clone() * Expr::quadrature_weight()]).unwrap();
    let weight = graph
        .vertices
        .iter()
        .position(|v| v.as_terminal() == Some(&Expr::quadrature_weight()))
        .unwrap();

    let substitutions = FxHashMap::from_iter([(weight, 1.0)]);
    let rebuilt = rebuild_with_substitutions(&graph, &substitutions);
    assert_eq!(rebuilt.vertices, vec![Vertex::Terminal(f)]);
}

#[test]
fn rebuild_without_substitutions_preserves_graph() {
    let expr = coefficient(0) * coefficient(1) + coefficient(2);
    let graph = build_scalar_graph(&[expr]).unwrap();
    let rebuilt = rebuild_with_substitutions(&graph, &FxHashMap::default());
    assert_eq!(rebuilt, graph);
}

#[test]
fn deeply_nested_sums_build_and_rebuild() {
    let n = 3000;
    let sum = (1..n).fold(coefficient(0), |acc, i| acc + coefficient(i));
    let graph = build_scalar_graph(&[sum]).unwrap();
    assert_eq!(graph.len(), 2 * n - 1);
    assert_eq!(graph.targets, vec![2 * n - 2]);
    assert_eq!(
        graph.vertices[2 * n - 2],
        Vertex::Operator {
            op: ScalarOp::Sum,
            operands: vec![2 * n - 4, 2 * n - 3]
        }
    );

    let substitutions = FxHashMap::from_iter([(0, 0.0)]);
    let rebuilt = rebuild_with_substitutions(&graph, &substitutions);
    assert_eq!(rebuilt.len(), 2 * n - 3);
    assert_eq!(rebuilt.vertices[0], Vertex::Terminal(coefficient(1)));
    assert_eq!(rebuilt.targets, vec![2 * n - 4]);
}

proptest! {
    #[test]
    fn scalar_graphs_are_topologically_ordered_and_unique(expr in scalar_expression(3)) {
        let graph = build_scalar_graph(&[expr]).unwrap();
        prop_assert_eq!(graph.targets.len(), 1);

        let unique: HashSet<&Vertex> = graph.vertices.iter().collect();
        prop_assert_eq!(unique.len(), graph.len());
        for (i, vertex) in graph.vertices.iter().enumerate() {
            prop_assert!(vertex.operands().iter().all(|&j| j < i));
        }
    }

    #[test]
    fn rebuilt_graphs_only_contain_reachable_vertices(expr in scalar_expression(3)) {
        let graph = build_scalar_graph(&[expr]).unwrap();
        let substitutions = FxHashMap::from_iter([(0, 0.0)]);
        let rebuilt = rebuild_with_substitutions(&graph, &substitutions);

        let mut reachable = vec![false; rebuilt.len()];
        for &t in &rebuilt.targets {
            reachable[t] = true;
        }
        for i in (0..rebuilt.len()).rev() {
            if reachable[i] {
                for &j in rebuilt.vertices[i].operands() {
                    reachable[j] = true;
                }
            }
        }
        prop_assert!(reachable.iter().all(|&r| r));
    }
}
