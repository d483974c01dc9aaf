//! Core traits: operator application, inner products, linear-system access.

pub mod traits;
pub mod wrappers;

pub use traits::{Indexing, InnerProduct, LinearSystem, MatVec, ReservoirSystem};
