use crate::error::FormError;
use crate::expr::{is_modified_terminal, Expr, ExprNode, Modifier, ScalarOp};
use crate::graph::{ScalarGraph, VertexArena};
use rustc_hash::FxHashMap;

/// Builds a graph of scalar subexpressions covering all components of the given expressions.
///
/// Structurally equal scalar subexpressions share a vertex. Vertices are numbered in order of
/// first discovery in a left-to-right, operands-first traversal. The targets list the vertex of
/// every scalar component of every expression, in row-major order.
pub fn build_scalar_graph(expressions: &[Expr]) -> Result<ScalarGraph, FormError> {
    let mut builder = ScalarGraphBuilder::default();
    let mut targets = Vec::new();
    for expr in expressions {
        let components = builder.expand(expr)?;
        if components.len() != expr.value_size() {
            return Err(FormError::InconsistentForm(format!(
                "Expression {} of shape {:?} expanded to {} scalar components.",
                expr,
                expr.shape(),
                components.len()
            )));
        }
        targets.extend(components);
    }
    Ok(ScalarGraph::from_arena(builder.arena, targets))
}

#[derive(Default)]
struct ScalarGraphBuilder {
    arena: VertexArena,
    expanded: FxHashMap<Expr, Vec<usize>>,
}

impl ScalarGraphBuilder {
    fn expand(&mut self, expr: &Expr) -> Result<Vec<usize>, FormError> {
        if let Some(components) = self.expanded.get(expr) {
            return Ok(components.clone());
        }
        self.expand_subexpressions(expr)?;
        let components = self.expand_uncached(expr)?;
        self.expanded.insert(expr.clone(), components.clone());
        Ok(components)
    }

    /// Expands the subexpressions of `expr` in the order [`ScalarGraphBuilder::expand`] would
    /// discover them, using an explicit stack. Nested expansion then only hits the cache.
    fn expand_subexpressions(&mut self, expr: &Expr) -> Result<(), FormError> {
        let mut stack: Vec<Expr> = expanded_operands(expr).into_iter().rev().cloned().collect();
        while let Some(current) = stack.last() {
            if self.expanded.contains_key(current) {
                stack.pop();
                continue;
            }
            let unexpanded: Vec<Expr> = expanded_operands(current)
                .into_iter()
                .filter(|operand| !self.expanded.contains_key(*operand))
                .cloned()
                .collect();
            if unexpanded.is_empty() {
                let current = current.clone();
                let components = self.expand_uncached(&current)?;
                self.expanded.insert(current, components);
                stack.pop();
            } else {
                stack.extend(unexpanded.into_iter().rev());
            }
        }
        Ok(())
    }

    fn expand_uncached(&mut self, expr: &Expr) -> Result<Vec<usize>, FormError> {
        if is_modified_terminal(expr) {
            return Ok(scalar_modified_terminals(expr)
                .into_iter()
                .map(|component| self.arena.terminal(component))
                .collect());
        }

        match expr.node() {
            ExprNode::Literal(value) => Ok(vec![self.arena.literal(value.0)]),
            ExprNode::Terminal(_) => unreachable!("Terminals are modified terminals"),
            ExprNode::Modified {
                modifier: Modifier::Indexed(indices),
                operand,
            } => {
                let components = self.expand(operand)?;
                let shape = operand.shape();
                if indices.iter().zip(shape).any(|(&i, &dim)| i >= dim) {
                    return Err(FormError::ComponentRange {
                        component: indices.clone(),
                        shape: shape.to_vec(),
                    });
                }
                let block_size: usize = shape[indices.len()..].iter().product();
                let offset = flat_index(indices, &shape[..indices.len()]) * block_size;
                Ok(components[offset..offset + block_size].to_vec())
            }
            ExprNode::Modified { modifier, operand } => Err(FormError::InvalidModifier(format!(
                "{:?} applied to non-terminal expression {}.",
                modifier, operand
            ))),
            ExprNode::Operator { op, operands } => self.expand_operator(*op, operands),
            ExprNode::Inner(a, b) => {
                let a = self.expand(a)?;
                let b = self.expand(b)?;
                let products: Vec<_> = a
                    .into_iter()
                    .zip(b)
                    .map(|(ai, bi)| self.arena.operator(ScalarOp::Product, vec![ai, bi]))
                    .collect();
                let sum = products
                    .into_iter()
                    .reduce(|acc, p| self.arena.operator(ScalarOp::Sum, vec![acc, p]))
                    .unwrap_or_else(|| self.arena.literal(0.0));
                Ok(vec![sum])
            }
            ExprNode::ListTensor(items) => {
                let mut components = Vec::new();
                for item in items {
                    components.extend(self.expand(item)?);
                }
                Ok(components)
            }
        }
    }

    fn expand_operator(&mut self, op: ScalarOp, operands: &[Expr]) -> Result<Vec<usize>, FormError> {
        let expanded = operands
            .iter()
            .map(|operand| self.expand(operand))
            .collect::<Result<Vec<_>, _>>()?;
        let components = match (op, expanded.as_slice()) {
            (ScalarOp::Sum, [a, b]) => a
                .iter()
                .zip(b)
                .map(|(&ai, &bi)| self.arena.operator(op, vec![ai, bi]))
                .collect(),
            (ScalarOp::Product, [a, b]) if a.len() == 1 => b
                .iter()
                .map(|&bi| self.arena.operator(op, vec![a[0], bi]))
                .collect(),
            (ScalarOp::Product | ScalarOp::Division, [a, b]) if b.len() == 1 => a
                .iter()
                .map(|&ai| self.arena.operator(op, vec![ai, b[0]]))
                .collect(),
            (_, scalars) if scalars.iter().all(|c| c.len() == 1) => {
                let scalars = scalars.iter().map(|c| c[0]).collect();
                vec![self.arena.operator(op, scalars)]
            }
            _ => {
                return Err(FormError::InconsistentForm(format!(
                    "Operands of {:?} have incompatible shapes.",
                    op
                )))
            }
        };
        Ok(components)
    }
}

/// Subexpressions expanded when expanding `expr`.
fn expanded_operands(expr: &Expr) -> Vec<&Expr> {
    if is_modified_terminal(expr) {
        return vec![];
    }
    match expr.node() {
        ExprNode::Modified {
            modifier: Modifier::Indexed(_),
            operand,
        } => vec![operand],
        ExprNode::Modified { .. } => vec![],
        _ => expr.operands(),
    }
}

/// Row-major flat index of a multi-index.
pub fn flat_index(component: &[usize], shape: &[usize]) -> usize {
    component
        .iter()
        .zip(shape)
        .fold(0, |flat, (&i, &dim)| flat * dim + i)
}

/// All multi-indices of the shape in row-major order.
pub fn components_of_shape(shape: &[usize]) -> Vec<Vec<usize>> {
    let mut components = vec![vec![]];
    for &dim in shape {
        components = components
            .into_iter()
            .flat_map(|prefix| {
                (0..dim).map(move |i| {
                    let mut component = prefix.clone();
                    component.push(i);
                    component
                })
            })
            .collect();
    }
    components
}

/// Splits a tensor valued modified terminal into scalar modified terminals, one per component.
///
/// A partially indexed terminal is completed by appending the remaining indices to its
/// existing index, so that every scalar component is indexed exactly once.
fn scalar_modified_terminals(expr: &Expr) -> Vec<Expr> {
    if expr.is_scalar() {
        return vec![expr.clone()];
    }
    let (base, prefix): (&Expr, &[usize]) = match expr.node() {
        ExprNode::Modified {
            modifier: Modifier::Indexed(indices),
            operand,
        } => (operand, indices),
        _ => (expr, &[]),
    };
    components_of_shape(expr.shape())
        .into_iter()
        .map(|component| {
            let mut full = prefix.to_vec();
            full.extend(component);
            base.index(&full)
        })
        .collect()
}
