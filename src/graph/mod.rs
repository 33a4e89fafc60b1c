//! Scalar computational graphs.
//!
//! A [`ScalarGraph`] is a list of vertices, each computing one scalar value, in an order where
//! every vertex appears after its operands.
use crate::expr::{strip_modified_terminal, Expr, ScalarOp, Terminal};
use fenris_nested_vec::NestedVec;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

mod builder;
mod rebuild;

pub use builder::*;
pub use rebuild::*;

/// A single scalar operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Vertex {
    Literal(OrderedFloat<f64>),
    /// A scalar modified terminal.
    Terminal(Expr),
    Operator { op: ScalarOp, operands: Vec<usize> },
}

impl Vertex {
    pub fn operands(&self) -> &[usize] {
        match self {
            Self::Operator { operands, .. } => operands,
            _ => &[],
        }
    }

    pub fn as_literal(&self) -> Option<f64> {
        match self {
            Self::Literal(value) => Some(value.0),
            _ => None,
        }
    }

    pub fn as_terminal(&self) -> Option<&Expr> {
        match self {
            Self::Terminal(expr) => Some(expr),
            _ => None,
        }
    }

    /// The core terminal of a modified terminal vertex.
    pub fn terminal(&self) -> Option<&Terminal> {
        self.as_terminal().and_then(strip_modified_terminal)
    }

    /// Returns the same vertex with its operands renumbered.
    pub fn map_operands(&self, mut f: impl FnMut(usize) -> usize) -> Self {
        match self {
            Self::Operator { op, operands } => Self::Operator {
                op: *op,
                operands: operands.iter().map(|&i| f(i)).collect(),
            },
            other => other.clone(),
        }
    }
}

/// Append-only storage of vertices in which structurally equal vertices share one index.
///
/// Operator vertices are identified by their operator and operand indices, so identity is only
/// meaningful within one arena.
#[derive(Debug, Clone, Default)]
pub struct VertexArena {
    vertices: Vec<Vertex>,
    index: FxHashMap<Vertex, usize>,
}

impl VertexArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertex(&self, index: usize) -> &Vertex {
        &self.vertices[index]
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Inserts the vertex as is, returning the index of an existing equal vertex if present.
    pub fn insert(&mut self, vertex: Vertex) -> usize {
        if let Some(&index) = self.index.get(&vertex) {
            return index;
        }
        let index = self.vertices.len();
        self.vertices.push(vertex.clone());
        self.index.insert(vertex, index);
        index
    }

    /// Inserts the vertex with the operands of commutative operators in canonical order, without
    /// folding.
    pub fn insert_canonical(&mut self, mut vertex: Vertex) -> usize {
        if let Vertex::Operator { op, operands } = &mut vertex {
            if op.is_commutative() {
                operands.sort_unstable();
            }
        }
        self.insert(vertex)
    }

    pub fn literal(&mut self, value: f64) -> usize {
        // Avoid distinct vertices for 0.0 and -0.0
        let value = if value == 0.0 { 0.0 } else { value };
        self.insert(Vertex::Literal(OrderedFloat(value)))
    }

    pub fn terminal(&mut self, expr: Expr) -> usize {
        self.insert(Vertex::Terminal(expr))
    }

    fn literal_value(&self, index: usize) -> Option<f64> {
        self.vertices[index].as_literal()
    }

    /// Inserts an operator vertex, folding literal operands and zero/one identities.
    ///
    /// Operands of commutative operators are put in canonical order, so `a + b` and `b + a`
    /// resolve to the same vertex.
    pub fn operator(&mut self, op: ScalarOp, mut operands: Vec<usize>) -> usize {
        let values: Vec<_> = operands.iter().map(|&i| self.literal_value(i)).collect();
        match (op, values.as_slice()) {
            (ScalarOp::Sum, [Some(a), Some(b)]) => return self.literal(a + b),
            (ScalarOp::Sum, [Some(a), _]) if *a == 0.0 => return operands[1],
            (ScalarOp::Sum, [_, Some(b)]) if *b == 0.0 => return operands[0],
            (ScalarOp::Product, [Some(a), Some(b)]) => return self.literal(a * b),
            (ScalarOp::Product, [Some(a), _]) if *a == 0.0 => return self.literal(0.0),
            (ScalarOp::Product, [_, Some(b)]) if *b == 0.0 => return self.literal(0.0),
            (ScalarOp::Product, [Some(a), _]) if *a == 1.0 => return operands[1],
            (ScalarOp::Product, [_, Some(b)]) if *b == 1.0 => return operands[0],
            (ScalarOp::Division, [Some(a), Some(b)]) if *b != 0.0 => return self.literal(a / b),
            (ScalarOp::Division, [Some(a), _]) if *a == 0.0 => return self.literal(0.0),
            (ScalarOp::Division, [_, Some(b)]) if *b == 1.0 => return operands[0],
            (ScalarOp::Power, [Some(a), Some(b)]) => return self.literal(a.powf(*b)),
            (ScalarOp::Power, [_, Some(b)]) if *b == 0.0 => return self.literal(1.0),
            (ScalarOp::Power, [_, Some(b)]) if *b == 1.0 => return operands[0],
            (ScalarOp::Abs, [Some(a)]) => return self.literal(a.abs()),
            (ScalarOp::Math(function), [Some(a)]) => return self.literal(function.apply(*a)),
            _ => {}
        }
        if op.is_commutative() {
            operands.sort_unstable();
        }
        self.insert(Vertex::Operator { op, operands })
    }

    /// Inserts a vertex from another graph whose operands have already been renumbered,
    /// applying the same folding as [`VertexArena::operator`].
    pub fn reinsert(&mut self, vertex: Vertex) -> usize {
        match vertex {
            Vertex::Literal(value) => self.literal(value.0),
            Vertex::Terminal(expr) => self.terminal(expr),
            Vertex::Operator { op, operands } => self.operator(op, operands),
        }
    }

    pub fn into_vertices(self) -> Vec<Vertex> {
        self.vertices
    }
}

/// A list-based graph of scalar subexpressions.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarGraph {
    pub vertices: Vec<Vertex>,
    /// Direct operands of each vertex.
    pub dependencies: NestedVec<usize>,
    /// Vertex computing each scalar component of each input expression, in row-major order.
    pub targets: Vec<usize>,
}

impl ScalarGraph {
    pub fn from_arena(arena: VertexArena, targets: Vec<usize>) -> Self {
        let vertices = arena.into_vertices();
        let dependencies = compute_dependencies(&vertices);
        Self {
            vertices,
            dependencies,
            targets,
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Indices of all modified terminal vertices, in vertex order.
    pub fn modified_terminal_indices(&self) -> Vec<usize> {
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v, Vertex::Terminal(_)))
            .map(|(i, _)| i)
            .collect()
    }
}

pub fn compute_dependencies(vertices: &[Vertex]) -> NestedVec<usize> {
    let mut dependencies = NestedVec::new();
    for vertex in vertices {
        dependencies.push(vertex.operands());
    }
    dependencies
}
