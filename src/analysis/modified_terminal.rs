use crate::error::FormError;
use crate::expr::{Averaging, Expr, ExprNode, Modifier, Restriction, Terminal};
use crate::graph::components_of_shape;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Canonical description of a terminal wrapped in modifiers.
///
/// Equality, hashing and ordering consider every field except `expr` and the redundant
/// `base_shape`.
#[derive(Debug, Clone)]
pub struct ModifiedTerminal {
    /// The analysed expression.
    pub expr: Expr,
    pub terminal: Terminal,
    /// Whether the terminal is seen in the reference frame.
    pub reference_value: bool,
    /// Shape of the terminal or of its reference value, the shape `component` refers to.
    pub base_shape: Vec<usize>,
    pub component: Vec<usize>,
    /// Flattened `component`, with symmetric components mapped to the same value.
    pub flat_component: usize,
    /// Sorted directions of derivatives in physical coordinates.
    pub global_derivatives: Vec<usize>,
    /// Sorted directions of derivatives in reference coordinates.
    pub local_derivatives: Vec<usize>,
    pub averaged: Option<Averaging>,
    pub restriction: Option<Restriction>,
}

type ModifiedTerminalKey<'a> = (
    &'a Terminal,
    bool,
    &'a [usize],
    usize,
    &'a [usize],
    &'a [usize],
    Option<Averaging>,
    Option<Restriction>,
);

/// Sort key for modified arguments.
pub type ArgumentOrderingKey<'a> = (
    usize,
    Option<usize>,
    bool,
    usize,
    &'a [usize],
    &'a [usize],
    Option<Averaging>,
    Option<Restriction>,
);

impl ModifiedTerminal {
    fn key(&self) -> ModifiedTerminalKey {
        (
            &self.terminal,
            self.reference_value,
            self.component.as_slice(),
            self.flat_component,
            self.global_derivatives.as_slice(),
            self.local_derivatives.as_slice(),
            self.averaged,
            self.restriction,
        )
    }

    /// Key for deterministic ordering of modified arguments, leading with the argument number.
    ///
    /// Returns `None` if the terminal is not an argument.
    pub fn argument_ordering_key(&self) -> Option<ArgumentOrderingKey> {
        match &self.terminal {
            Terminal::Argument { number, part, .. } => Some((
                *number,
                *part,
                self.reference_value,
                self.flat_component,
                self.global_derivatives.as_slice(),
                self.local_derivatives.as_slice(),
                self.averaged,
                self.restriction,
            )),
            _ => None,
        }
    }

    pub fn is_cellwise_constant(&self) -> bool {
        self.averaged.is_some() || self.terminal.is_cellwise_constant()
    }
}

impl PartialEq for ModifiedTerminal {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ModifiedTerminal {}

impl Hash for ModifiedTerminal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl PartialOrd for ModifiedTerminal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModifiedTerminal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Analyses a modified terminal expression.
///
/// Modifiers are stripped outermost first. The expression may contain at most one index, one
/// reference value, one restriction and one averaging modifier, and any number of gradients.
/// Every gradient consumes the last remaining component index as its direction, so gradients
/// must be indexed.
pub fn analyse_modified_terminal(expr: &Expr) -> Result<ModifiedTerminal, FormError> {
    let mut component: Option<Vec<usize>> = None;
    let mut global_derivatives = Vec::new();
    let mut local_derivatives = Vec::new();
    let mut reference_value = false;
    let mut restriction = None;
    let mut averaged = None;

    let mut current = expr;
    let terminal = loop {
        let (modifier, operand) = match current.node() {
            ExprNode::Terminal(terminal) => break terminal,
            ExprNode::Modified { modifier, operand } => (modifier, operand),
            _ => {
                return Err(FormError::InvalidModifier(format!(
                    "Expected a modified terminal, found operator in {expr}."
                )))
            }
        };

        match modifier {
            Modifier::Indexed(indices) => {
                if component.is_some() {
                    return Err(invalid(expr, "Got twice indexed terminal."));
                }
                component = Some(indices.clone());
            }
            Modifier::ReferenceValue => {
                if reference_value {
                    return Err(invalid(expr, "Got twice pulled back terminal."));
                }
                reference_value = true;
            }
            Modifier::ReferenceGrad(_) => {
                let direction = pop_direction(&mut component)
                    .ok_or_else(|| invalid(expr, "Got local gradient of terminal without prior indexing."))?;
                local_derivatives.push(direction);
            }
            Modifier::Grad(_) => {
                let direction = pop_direction(&mut component)
                    .ok_or_else(|| invalid(expr, "Got gradient of terminal without prior indexing."))?;
                global_derivatives.push(direction);
            }
            Modifier::Restricted(side) => {
                if restriction.is_some() {
                    return Err(invalid(expr, "Got twice restricted terminal."));
                }
                restriction = Some(*side);
            }
            Modifier::CellAvg | Modifier::FacetAvg => {
                if averaged.is_some() {
                    return Err(invalid(expr, "Got twice averaged terminal."));
                }
                averaged = Some(match modifier {
                    Modifier::CellAvg => Averaging::Cell,
                    _ => Averaging::Facet,
                });
            }
        }
        current = operand;
    };

    global_derivatives.sort_unstable();
    local_derivatives.sort_unstable();

    if !local_derivatives.is_empty() && !reference_value {
        return Err(invalid(expr, "Local derivatives of non-local value is not legal."));
    }
    if !global_derivatives.is_empty() && reference_value {
        return Err(invalid(expr, "Global derivatives of local value is not legal."));
    }

    let component = component.unwrap_or_default();
    let (base_shape, symmetry) = if reference_value {
        // Symmetries are already applied in the mapping to the reference frame
        (terminal.reference_value_shape(), BTreeMap::new())
    } else {
        let symmetry = terminal
            .element()
            .map(|element| element.symmetry().clone())
            .unwrap_or_default();
        (terminal.shape(), symmetry)
    };

    let in_range = component.len() == base_shape.len()
        && component
            .iter()
            .zip(&base_shape)
            .all(|(&c, &dim)| c < dim);
    if !in_range {
        return Err(FormError::ComponentRange {
            component,
            shape: base_shape,
        });
    }

    let flat_component = flatten_component(&component, &base_shape, &symmetry);

    Ok(ModifiedTerminal {
        expr: expr.clone(),
        terminal: terminal.clone(),
        reference_value,
        base_shape,
        component,
        flat_component,
        global_derivatives,
        local_derivatives,
        averaged,
        restriction,
    })
}

fn invalid(expr: &Expr, message: &str) -> FormError {
    FormError::InvalidModifier(format!("{message} Expression: {expr}"))
}

fn pop_direction(component: &mut Option<Vec<usize>>) -> Option<usize> {
    component.as_mut().and_then(|indices| indices.pop())
}

/// Flattens a multi-index within the given shape to a single integer.
///
/// Components are numbered in row-major order, skipping components that the symmetry maps to
/// another component. Those share the number of the component they map to.
pub fn flatten_component(component: &[usize], shape: &[usize], symmetry: &BTreeMap<Vec<usize>, Vec<usize>>) -> usize {
    let mut numbering = BTreeMap::new();
    for c in components_of_shape(shape) {
        if !symmetry.contains_key(&c) {
            let next = numbering.len();
            numbering.insert(c, next);
        }
    }
    let target = symmetry.get(component).map(Vec::as_slice).unwrap_or(component);
    numbering.get(target).copied().unwrap_or(0)
}
