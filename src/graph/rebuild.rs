use crate::graph::{ScalarGraph, Vertex, VertexArena};
use rustc_hash::FxHashMap;

/// Replaces the given vertices by literal values and rebuilds the graph.
///
/// Every vertex is first reconstructed from its possibly rewritten operands, in vertex order, so
/// that substitutions propagate and the resulting zero/one identities fold away. The graph is then
/// rebuilt from the targets, dropping vertices that are no longer reachable. This is a single pass;
/// it does not iterate to a fixed point.
pub fn rebuild_with_substitutions(graph: &ScalarGraph, substitutions: &FxHashMap<usize, f64>) -> ScalarGraph {
    // Reconstruct in vertex order
    let mut reconstructed = VertexArena::new();
    let mut mapping = Vec::with_capacity(graph.len());
    for (i, vertex) in graph.vertices.iter().enumerate() {
        let new_index = match substitutions.get(&i) {
            Some(&value) => reconstructed.literal(value),
            None => reconstructed.reinsert(vertex.map_operands(|j| mapping[j])),
        };
        mapping.push(new_index);
    }
    let targets: Vec<_> = graph.targets.iter().map(|&t| mapping[t]).collect();

    // Rebuild from targets to drop dead vertices and renumber in discovery order
    let mut compactor = Compactor {
        source: reconstructed.vertices(),
        arena: VertexArena::new(),
        mapping: vec![None; reconstructed.len()],
    };
    let targets = targets.into_iter().map(|t| compactor.visit(t)).collect();
    ScalarGraph::from_arena(compactor.arena, targets)
}

struct Compactor<'a> {
    source: &'a [Vertex],
    arena: VertexArena,
    mapping: Vec<Option<usize>>,
}

impl<'a> Compactor<'a> {
    /// Copies the vertex and everything it is computed from, operands first and left to right.
    fn visit(&mut self, root: usize) -> usize {
        let source = self.source;
        let mut stack = vec![root];
        while let Some(&index) = stack.last() {
            if self.mapping[index].is_some() {
                stack.pop();
                continue;
            }
            let vertex = &source[index];
            let unvisited: Vec<usize> = vertex
                .operands()
                .iter()
                .copied()
                .filter(|&operand| self.mapping[operand].is_none())
                .collect();
            if unvisited.is_empty() {
                let mapping = &self.mapping;
                let copied = vertex.map_operands(|operand| {
                    mapping[operand].expect("Must succeed since operands are visited first")
                });
                self.mapping[index] = Some(self.arena.insert(copied));
                stack.pop();
            } else {
                stack.extend(unvisited.into_iter().rev());
            }
        }
        self.mapping[root].expect("Must succeed since the root is visited last")
    }
}
