use nalgebra::DVector;
use std::collections::BTreeMap;

/// A quadrature rule on a reference entity.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule {
    weights: Vec<f64>,
    points: Vec<DVector<f64>>,
}

impl QuadratureRule {
    /// Creates a rule from weights and points.
    ///
    /// # Panics
    ///
    /// Panics if the number of weights and points differ.
    pub fn new(weights: Vec<f64>, points: Vec<DVector<f64>>) -> Self {
        assert_eq!(
            weights.len(),
            points.len(),
            "Number of weights and points must be the same."
        );
        Self { weights, points }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn points(&self) -> &[DVector<f64>] {
        &self.points
    }

    pub fn num_points(&self) -> usize {
        self.weights.len()
    }
}

/// Quadrature rules of an integral, keyed by their number of points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuadratureRules {
    rules: BTreeMap<usize, QuadratureRule>,
}

impl QuadratureRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule, replacing any previous rule with the same number of points.
    pub fn insert(&mut self, rule: QuadratureRule) {
        self.rules.insert(rule.num_points(), rule);
    }

    pub fn with_rule(mut self, rule: QuadratureRule) -> Self {
        self.insert(rule);
        self
    }

    pub fn get(&self, num_points: usize) -> Option<&QuadratureRule> {
        self.rules.get(&num_points)
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (usize, &QuadratureRule)> {
        self.rules.iter().map(|(&n, rule)| (n, rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
