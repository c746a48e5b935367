//! MCSat search loop and supporting engines.
//!
//! The [`Solver`] drives propagate → analyze → learn → backtrack/restart
//! → decide over a [`TheoryCombination`] of plugins sharing one trail.
//! Conflict analysis performs first-UIP resolution over Boolean reasons;
//! learned clauses are minimized by self-subsuming resolution before
//! they are added to the database.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod analysis;
pub mod combination;
pub mod internalize;
pub mod order;
pub mod restart;
pub mod solver;
pub mod subsumption;

pub use analysis::ConflictAnalysis;
pub use combination::TheoryCombination;
pub use internalize::Internalizer;
pub use order::FirstUnassigned;
pub use restart::{LubyRestart, NoRestart};
pub use solver::{Solver, SolverResult, Statistics};
pub use subsumption::Subsumption;
