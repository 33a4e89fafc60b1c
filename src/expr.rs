//! Symbolic expression trees for form integrands.
//!
//! Expressions are immutable and shared through reference counting. Equality and hashing are
//! structural, so two independently constructed but identical expressions compare equal.
use itertools::Itertools;
use ordered_float::OrderedFloat;
use rustc_hash::FxHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

/// A finite element, as far as the IR construction is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiniteElement {
    family: String,
    degree: usize,
    value_shape: Vec<usize>,
    reference_value_shape: Vec<usize>,
    /// Maps a component to the component it is identical to.
    symmetry: BTreeMap<Vec<usize>, Vec<usize>>,
}

impl FiniteElement {
    pub fn new(family: impl Into<String>, degree: usize, value_shape: Vec<usize>) -> Self {
        Self {
            family: family.into(),
            degree,
            reference_value_shape: value_shape.clone(),
            value_shape,
            symmetry: BTreeMap::new(),
        }
    }

    /// A scalar Lagrange element of the given degree.
    pub fn lagrange(degree: usize) -> Self {
        Self::new("Lagrange", degree, vec![])
    }

    /// A scalar element of quadrature point values.
    pub fn quadrature(degree: usize) -> Self {
        Self::new("Quadrature", degree, vec![])
    }

    pub fn with_reference_value_shape(mut self, shape: Vec<usize>) -> Self {
        self.reference_value_shape = shape;
        self
    }

    pub fn with_symmetry(mut self, symmetry: BTreeMap<Vec<usize>, Vec<usize>>) -> Self {
        self.symmetry = symmetry;
        self
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn value_shape(&self) -> &[usize] {
        &self.value_shape
    }

    pub fn reference_value_shape(&self) -> &[usize] {
        &self.reference_value_shape
    }

    pub fn symmetry(&self) -> &BTreeMap<Vec<usize>, Vec<usize>> {
        &self.symmetry
    }

    pub fn is_quadrature(&self) -> bool {
        self.family == "Quadrature"
    }

    pub fn is_cellwise_constant(&self) -> bool {
        self.degree == 0 && !self.is_quadrature()
    }
}

/// Leaf symbols of an integrand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Terminal {
    /// A test or trial function. `number` is the position of the argument in the form.
    Argument {
        number: usize,
        part: Option<usize>,
        element: FiniteElement,
    },
    Coefficient {
        count: usize,
        element: FiniteElement,
    },
    SpatialCoordinate {
        gdim: usize,
    },
    CellCoordinate {
        tdim: usize,
    },
    FacetCoordinate {
        tdim: usize,
    },
    QuadratureWeight,
    Jacobian {
        gdim: usize,
        tdim: usize,
        affine: bool,
    },
    FacetNormal {
        gdim: usize,
        affine: bool,
    },
    CellVolume,
}

impl Terminal {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Argument { element, .. } | Self::Coefficient { element, .. } => element.value_shape().to_vec(),
            Self::SpatialCoordinate { gdim } => vec![*gdim],
            Self::CellCoordinate { tdim } => vec![*tdim],
            Self::FacetCoordinate { tdim } => vec![tdim.saturating_sub(1)],
            Self::QuadratureWeight | Self::CellVolume => vec![],
            Self::Jacobian { gdim, tdim, .. } => vec![*gdim, *tdim],
            Self::FacetNormal { gdim, .. } => vec![*gdim],
        }
    }

    pub fn element(&self) -> Option<&FiniteElement> {
        match self {
            Self::Argument { element, .. } | Self::Coefficient { element, .. } => Some(element),
            _ => None,
        }
    }

    /// The shape of the value in the reference frame. Only form arguments have a reference value
    /// that differs from their physical value.
    pub fn reference_value_shape(&self) -> Vec<usize> {
        match self.element() {
            Some(element) => element.reference_value_shape().to_vec(),
            None => self.shape(),
        }
    }

    pub fn is_form_argument(&self) -> bool {
        self.element().is_some()
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, Self::Argument { .. })
    }

    pub fn is_cellwise_constant(&self) -> bool {
        match self {
            Self::Argument { element, .. } | Self::Coefficient { element, .. } => element.is_cellwise_constant(),
            Self::SpatialCoordinate { .. }
            | Self::CellCoordinate { .. }
            | Self::FacetCoordinate { .. }
            | Self::QuadratureWeight => false,
            Self::Jacobian { affine, .. } | Self::FacetNormal { affine, .. } => *affine,
            Self::CellVolume => true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Restriction {
    Plus,
    Minus,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Averaging {
    Cell,
    Facet,
}

/// Operators that may wrap a terminal without turning it into a computed quantity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    /// Fixed component indexing, possibly of only the leading axes.
    Indexed(Vec<usize>),
    /// Pull-back of a form argument to its reference value.
    ReferenceValue,
    /// Gradient with respect to reference coordinates of the given topological dimension.
    ReferenceGrad(usize),
    /// Gradient with respect to physical coordinates of the given geometric dimension.
    Grad(usize),
    Restricted(Restriction),
    CellAvg,
    FacetAvg,
}

impl Modifier {
    /// Canonical nesting order of modifiers, innermost first.
    fn precedence(&self) -> usize {
        match self {
            Self::ReferenceValue => 0,
            Self::ReferenceGrad(_) => 1,
            Self::Grad(_) => 2,
            Self::CellAvg => 3,
            Self::FacetAvg => 4,
            Self::Restricted(_) => 5,
            Self::Indexed(_) => 6,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MathFunction {
    Sqrt,
    Exp,
    Ln,
    Sin,
    Cos,
}

impl MathFunction {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Self::Sqrt => x.sqrt(),
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Sin => "sin",
            Self::Cos => "cos",
        }
    }
}

/// Operators acting on scalars, or elementwise on tensors where the shape rules allow it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarOp {
    Sum,
    Product,
    Division,
    Power,
    Abs,
    Math(MathFunction),
}

impl ScalarOp {
    pub fn is_commutative(&self) -> bool {
        matches!(self, Self::Sum | Self::Product)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprNode {
    Literal(OrderedFloat<f64>),
    Terminal(Terminal),
    Modified { modifier: Modifier, operand: Expr },
    Operator { op: ScalarOp, operands: Vec<Expr> },
    /// Full contraction of two tensors of equal shape.
    Inner(Expr, Expr),
    /// Stacks expressions of equal shape along a new leading axis.
    ListTensor(Vec<Expr>),
}

/// Capability tag of an expression node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    Terminal,
    TerminalModifier,
    Operator,
}

#[derive(Debug)]
struct ExprData {
    node: ExprNode,
    shape: Vec<usize>,
    /// Structural hash, computed once from the node and shape. Children contribute their own
    /// cached hash.
    hash: u64,
}

/// An immutable, structurally compared expression.
#[derive(Debug, Clone)]
pub struct Expr(Rc<ExprData>);

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
            || (self.0.hash == other.0.hash && self.0.shape == other.0.shape && self.0.node == other.0.node)
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl Expr {
    fn from_parts(node: ExprNode, shape: Vec<usize>) -> Self {
        let mut hasher = FxHasher::default();
        node.hash(&mut hasher);
        shape.hash(&mut hasher);
        let hash = hasher.finish();
        Self(Rc::new(ExprData { node, shape, hash }))
    }

    pub fn literal(value: f64) -> Self {
        Self::from_parts(ExprNode::Literal(OrderedFloat(value)), vec![])
    }

    pub fn zero() -> Self {
        Self::literal(0.0)
    }

    pub fn one() -> Self {
        Self::literal(1.0)
    }

    pub fn terminal(terminal: Terminal) -> Self {
        let shape = terminal.shape();
        Self::from_parts(ExprNode::Terminal(terminal), shape)
    }

    pub fn argument(number: usize, element: FiniteElement) -> Self {
        Self::terminal(Terminal::Argument {
            number,
            part: None,
            element,
        })
    }

    pub fn coefficient(count: usize, element: FiniteElement) -> Self {
        Self::terminal(Terminal::Coefficient { count, element })
    }

    pub fn quadrature_weight() -> Self {
        Self::terminal(Terminal::QuadratureWeight)
    }

    pub fn node(&self) -> &ExprNode {
        &self.0.node
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    pub fn is_scalar(&self) -> bool {
        self.shape().is_empty()
    }

    /// Number of scalar components.
    pub fn value_size(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn kind(&self) -> ExprKind {
        match self.node() {
            ExprNode::Literal(_) | ExprNode::Terminal(_) => ExprKind::Terminal,
            ExprNode::Modified { .. } => ExprKind::TerminalModifier,
            ExprNode::Operator { .. } | ExprNode::Inner(..) | ExprNode::ListTensor(_) => ExprKind::Operator,
        }
    }

    pub fn as_literal(&self) -> Option<f64> {
        match self.node() {
            ExprNode::Literal(value) => Some(value.0),
            _ => None,
        }
    }

    /// Direct operands, in order.
    pub fn operands(&self) -> Vec<&Expr> {
        match self.node() {
            ExprNode::Literal(_) | ExprNode::Terminal(_) => vec![],
            ExprNode::Modified { operand, .. } => vec![operand],
            ExprNode::Operator { operands, .. } => operands.iter().collect(),
            ExprNode::Inner(a, b) => vec![a, b],
            ExprNode::ListTensor(items) => items.iter().collect(),
        }
    }

    /// Wraps the expression in a modifier.
    ///
    /// # Panics
    ///
    /// Panics if the modifier cannot be applied to an expression of this shape.
    pub fn modified(&self, modifier: Modifier) -> Self {
        let shape = match &modifier {
            Modifier::Indexed(indices) => {
                assert!(
                    indices.len() <= self.shape().len(),
                    "Cannot index expression of shape {:?} with {} indices.",
                    self.shape(),
                    indices.len()
                );
                self.shape()[indices.len()..].to_vec()
            }
            Modifier::ReferenceValue => match self.node() {
                ExprNode::Terminal(terminal) if terminal.is_form_argument() => terminal.reference_value_shape(),
                _ => panic!("Reference value can only be taken of form arguments."),
            },
            Modifier::ReferenceGrad(dim) | Modifier::Grad(dim) => {
                let mut shape = self.shape().to_vec();
                shape.push(*dim);
                shape
            }
            Modifier::Restricted(_) | Modifier::CellAvg | Modifier::FacetAvg => self.shape().to_vec(),
        };
        Self::from_parts(
            ExprNode::Modified {
                modifier,
                operand: self.clone(),
            },
            shape,
        )
    }

    pub fn index(&self, indices: &[usize]) -> Self {
        self.modified(Modifier::Indexed(indices.to_vec()))
    }

    pub fn grad(&self, gdim: usize) -> Self {
        self.modified(Modifier::Grad(gdim))
    }

    pub fn reference_grad(&self, tdim: usize) -> Self {
        self.modified(Modifier::ReferenceGrad(tdim))
    }

    pub fn reference_value(&self) -> Self {
        self.modified(Modifier::ReferenceValue)
    }

    pub fn restricted(&self, side: Restriction) -> Self {
        self.modified(Modifier::Restricted(side))
    }

    pub fn cell_avg(&self) -> Self {
        self.modified(Modifier::CellAvg)
    }

    pub fn facet_avg(&self) -> Self {
        self.modified(Modifier::FacetAvg)
    }

    /// # Panics
    ///
    /// Panics if the operand shapes are incompatible with the operator.
    pub fn operator(op: ScalarOp, operands: Vec<Expr>) -> Self {
        let shape = match (op, operands.as_slice()) {
            (ScalarOp::Sum, [a, b]) => {
                assert_eq!(a.shape(), b.shape(), "Sum of expressions with different shapes.");
                a.shape().to_vec()
            }
            (ScalarOp::Product, [a, b]) => {
                assert!(
                    a.is_scalar() || b.is_scalar(),
                    "Product of two non-scalar expressions, use an inner product instead."
                );
                if a.is_scalar() {
                    b.shape().to_vec()
                } else {
                    a.shape().to_vec()
                }
            }
            (ScalarOp::Division, [a, b]) => {
                assert!(b.is_scalar(), "Division by non-scalar expression.");
                a.shape().to_vec()
            }
            (ScalarOp::Power, [a, b]) => {
                assert!(a.is_scalar() && b.is_scalar(), "Power of non-scalar expressions.");
                vec![]
            }
            (ScalarOp::Abs | ScalarOp::Math(_), [a]) => {
                assert!(a.is_scalar(), "{:?} of non-scalar expression.", op);
                vec![]
            }
            _ => panic!("Wrong number of operands ({}) for {:?}.", operands.len(), op),
        };
        Self::from_parts(ExprNode::Operator { op, operands }, shape)
    }

    pub fn inner(a: &Expr, b: &Expr) -> Self {
        assert_eq!(a.shape(), b.shape(), "Inner product of expressions with different shapes.");
        Self::from_parts(ExprNode::Inner(a.clone(), b.clone()), vec![])
    }

    /// # Panics
    ///
    /// Panics if `items` is empty or the items have different shapes.
    pub fn list_tensor(items: Vec<Expr>) -> Self {
        let first = items.first().expect("List tensor must have at least one item.");
        assert!(
            items.iter().all(|item| item.shape() == first.shape()),
            "List tensor items must have equal shapes."
        );
        let mut shape = vec![items.len()];
        shape.extend_from_slice(first.shape());
        Self::from_parts(ExprNode::ListTensor(items), shape)
    }

    pub fn pow(&self, exponent: &Expr) -> Self {
        Self::operator(ScalarOp::Power, vec![self.clone(), exponent.clone()])
    }

    pub fn abs(&self) -> Self {
        Self::operator(ScalarOp::Abs, vec![self.clone()])
    }

    pub fn apply(&self, function: MathFunction) -> Self {
        Self::operator(ScalarOp::Math(function), vec![self.clone()])
    }

    /// Rebuilds the node with new operands, keeping the operator.
    fn reconstruct(&self, operands: Vec<Expr>) -> Self {
        match self.node() {
            ExprNode::Literal(_) | ExprNode::Terminal(_) => self.clone(),
            ExprNode::Modified { modifier, .. } => operands[0].modified(modifier.clone()),
            ExprNode::Operator { op, .. } => Self::operator(*op, operands),
            ExprNode::Inner(..) => Self::inner(&operands[0], &operands[1]),
            ExprNode::ListTensor(_) => Self::list_tensor(operands),
        }
    }
}

/// Returns true if the expression is a terminal wrapped in zero or more modifiers.
///
/// Literals are terminals too, but carry no table and are never considered modified terminals.
pub fn is_modified_terminal(expr: &Expr) -> bool {
    strip_modified_terminal(expr).is_some()
}

/// Extracts the core terminal of a modified terminal.
pub fn strip_modified_terminal(expr: &Expr) -> Option<&Terminal> {
    let mut current = expr;
    loop {
        match current.node() {
            ExprNode::Terminal(terminal) => return Some(terminal),
            ExprNode::Modified { operand, .. } => current = operand,
            _ => return None,
        }
    }
}

/// Reorders the modifiers of every modified terminal in the expression into canonical order.
///
/// The order is, innermost first: reference value, reference gradients, gradients, cell average,
/// facet average, restriction and finally indexing. Modifiers of equal precedence keep their
/// relative order.
pub fn balance_modifiers(expr: &Expr) -> Expr {
    if is_modified_terminal(expr) {
        balance_modified_terminal(expr)
    } else {
        let operands = expr.operands();
        if operands.is_empty() {
            return expr.clone();
        }
        let balanced: Vec<_> = operands.into_iter().map(balance_modifiers).collect();
        expr.reconstruct(balanced)
    }
}

fn balance_modified_terminal(expr: &Expr) -> Expr {
    let mut layers = Vec::new();
    let mut current = expr;
    while let ExprNode::Modified { modifier, operand } = current.node() {
        layers.push(modifier.clone());
        current = operand;
    }
    if layers.is_empty() {
        return expr.clone();
    }
    // Layers were collected outermost first
    layers.reverse();
    layers.sort_by_key(Modifier::precedence);
    let balanced = layers
        .into_iter()
        .fold(current.clone(), |operand, modifier| operand.modified(modifier));
    if &balanced == expr {
        expr.clone()
    } else {
        balanced
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::operator(ScalarOp::Sum, vec![self, rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::operator(ScalarOp::Product, vec![self, rhs])
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::operator(ScalarOp::Division, vec![self, rhs])
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::literal(-1.0) * self
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        self + (-rhs)
    }
}

impl<'a> Add for &'a Expr {
    type Output = Expr;

    fn add(self, rhs: &'a Expr) -> Expr {
        self.clone() + rhs.clone()
    }
}

impl<'a> Mul for &'a Expr {
    type Output = Expr;

    fn mul(self, rhs: &'a Expr) -> Expr {
        self.clone() * rhs.clone()
    }
}

impl Display for Terminal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument { number, part, .. } => match part {
                Some(part) => write!(f, "v_{number}^{part}"),
                None => write!(f, "v_{number}"),
            },
            Self::Coefficient { count, .. } => write!(f, "w_{count}"),
            Self::SpatialCoordinate { .. } => write!(f, "x"),
            Self::CellCoordinate { .. } => write!(f, "X"),
            Self::FacetCoordinate { .. } => write!(f, "Xf"),
            Self::QuadratureWeight => write!(f, "weight"),
            Self::Jacobian { .. } => write!(f, "J"),
            Self::FacetNormal { .. } => write!(f, "n"),
            Self::CellVolume => write!(f, "volume"),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.node() {
            ExprNode::Literal(value) => write!(f, "{}", value.0),
            ExprNode::Terminal(terminal) => write!(f, "{terminal}"),
            ExprNode::Modified { modifier, operand } => match modifier {
                Modifier::Indexed(indices) => write!(f, "{operand}[{}]", indices.iter().join(", ")),
                Modifier::ReferenceValue => write!(f, "reference_value({operand})"),
                Modifier::ReferenceGrad(_) => write!(f, "reference_grad({operand})"),
                Modifier::Grad(_) => write!(f, "grad({operand})"),
                Modifier::Restricted(Restriction::Plus) => write!(f, "{operand}('+')"),
                Modifier::Restricted(Restriction::Minus) => write!(f, "{operand}('-')"),
                Modifier::CellAvg => write!(f, "cell_avg({operand})"),
                Modifier::FacetAvg => write!(f, "facet_avg({operand})"),
            },
            ExprNode::Operator { op, operands } => match (op, operands.as_slice()) {
                (ScalarOp::Sum, [a, b]) => write!(f, "({a} + {b})"),
                (ScalarOp::Product, [a, b]) => write!(f, "{a} * {b}"),
                (ScalarOp::Division, [a, b]) => write!(f, "{a} / {b}"),
                (ScalarOp::Power, [a, b]) => write!(f, "{a}**{b}"),
                (ScalarOp::Abs, [a]) => write!(f, "|{a}|"),
                (ScalarOp::Math(function), [a]) => write!(f, "{}({a})", function.name()),
                _ => write!(f, "{:?}({})", op, operands.iter().join(", ")),
            },
            ExprNode::Inner(a, b) => write!(f, "inner({a}, {b})"),
            ExprNode::ListTensor(items) => write!(f, "[{}]", items.iter().join(", ")),
        }
    }
}
