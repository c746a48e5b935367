//! Theory plugins for the mcsat solver.
//!
//! Two theories cooperate on the shared trail:
//! - [`BoolTheory`]: two-watched-literal Boolean constraint propagation
//!   with phase caching
//! - [`LraTheory`]: linear real arithmetic with watched variables,
//!   per-variable bound sets and Fourier–Motzkin conflict derivation

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bool_theory;
pub mod lra;

pub use bool_theory::BoolTheory;
pub use lra::bounds::{BoundRecord, VariableBounds};
pub use lra::constraint::{ConstraintRepository, Predicate, SignedConstraint};
pub use lra::{LraOptions, LraTheory, Models};
