//! Integral kinds and the entities they are evaluated on.
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegralType {
    Cell,
    ExteriorFacet,
    InteriorFacet,
    Vertex,
    Custom,
    /// Evaluation of expressions at points, outside of any integral.
    Expression,
}

impl IntegralType {
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom)
    }

    pub fn is_facet(&self) -> bool {
        matches!(self, Self::ExteriorFacet | Self::InteriorFacet)
    }

    /// Integral types for which tables are never integrated ahead of time.
    pub fn skips_preintegration(&self) -> bool {
        matches!(self, Self::Vertex | Self::Custom | Self::InteriorFacet | Self::Expression)
    }

    /// Integral types for which argument tables are never multiplied ahead of time.
    pub fn skips_premultiplication(&self) -> bool {
        matches!(self, Self::Vertex | Self::Custom | Self::InteriorFacet | Self::Expression)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Cell,
    Facet,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    name: String,
    topological_dimension: usize,
}

impl Cell {
    pub fn new(name: impl Into<String>, topological_dimension: usize) -> Self {
        Self {
            name: name.into(),
            topological_dimension,
        }
    }

    pub fn interval() -> Self {
        Self::new("interval", 1)
    }

    pub fn triangle() -> Self {
        Self::new("triangle", 2)
    }

    pub fn tetrahedron() -> Self {
        Self::new("tetrahedron", 3)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topological_dimension(&self) -> usize {
        self.topological_dimension
    }
}

/// Whether the integrand of the integral is expected to be scaled by the quadrature weight.
///
/// In the remaining cases the weight is one and is left out of the integral scaling entirely.
pub fn expects_quadrature_weight(cell: &Cell, integral_type: IntegralType, entity_type: EntityType) -> bool {
    let tdim = cell.topological_dimension();
    !matches!(integral_type, IntegralType::Expression | IntegralType::Vertex)
        && (entity_type == EntityType::Cell
            || (entity_type == EntityType::Facet && tdim > 1)
            || integral_type.is_custom())
}
