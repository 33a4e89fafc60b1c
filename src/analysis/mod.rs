//! Analysis of modified terminals and of the dependency structure of scalar graphs.
mod dependencies;
mod modified_terminal;

pub use dependencies::*;
pub use modified_terminal::*;
