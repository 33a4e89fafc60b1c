//! Construction of the intermediate representation used to generate element tensor kernels
//! from finite element forms.
//!
//! The pipeline takes a symbolic integrand per quadrature rule, expands it into a graph of scalar
//! operations, resolves modified terminals against basis function tables, factors the integrand
//! into argument monomials and decides for every monomial how its contribution to the element
//! tensor is computed. See [`ir::build_integral_ir`] for the entry point.

pub mod analysis;
pub mod blocks;
pub mod config;
pub mod error;
pub mod expr;
pub mod factorization;
pub mod graph;
pub mod integral;
pub mod ir;
pub mod quadrature;
pub mod tables;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;

pub use config::Parameters;
pub use error::FormError;
pub use ir::{build_integral_ir, build_integral_ir_with, IntegralData, IntegralIr, Integrands};
