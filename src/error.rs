//! Errors produced while building the intermediate representation.
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Fatal, structural failures of IR construction.
///
/// Every failure aborts construction for the whole integral; there is no partially built IR.
#[derive(Debug)]
pub enum FormError {
    /// The integrand does not have the structure the pipeline requires, e.g. more than one
    /// target after factorization, or a monomial retaining an argument with a zero table.
    InconsistentForm(String),
    /// A modified terminal has an illegal modifier stack.
    InvalidModifier(String),
    /// A fixed component index lies outside the (reference) value shape of its terminal.
    ComponentRange {
        component: Vec<usize>,
        shape: Vec<usize>,
    },
    /// Two quadrature degrees registered the same table name with different values.
    TableMismatch { name: String },
    /// No block mode could be assigned to a monomial. Indicates a logic error.
    InvalidBlockMode(String),
    /// The table provider failed.
    TableService(eyre::Report),
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InconsistentForm(msg) => write!(f, "Inconsistent form: {msg}"),
            Self::InvalidModifier(msg) => write!(f, "Invalid terminal modifier: {msg}"),
            Self::ComponentRange { component, shape } => write!(
                f,
                "Component indices {:?} are outside value shape {:?}",
                component, shape
            ),
            Self::TableMismatch { name } => write!(f, "Table values mismatch with same name {name}"),
            Self::InvalidBlockMode(msg) => write!(f, "Invalid block mode: {msg}"),
            Self::TableService(report) => write!(f, "Table construction failed: {report}"),
        }
    }
}

impl Error for FormError {}

impl From<eyre::Report> for FormError {
    fn from(report: eyre::Report) -> Self {
        Self::TableService(report)
    }
}
