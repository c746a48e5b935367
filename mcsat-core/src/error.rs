//! Error types.

use crate::variable::VarKind;
use thiserror::Error;

/// Errors surfaced by the solver and its front ends.
///
/// Runtime outcomes (`sat`, `unsat`, `unknown`) are not errors; these
/// variants cover I/O, parse failures, and programmer errors such as a
/// malformed clause or a type-mismatched variable, which abort solving.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading input.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Syntax error in an input script.
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        /// 1-based line of the offending token.
        line: usize,
        /// 1-based column of the offending token.
        column: usize,
        /// Description of the failure.
        message: String,
    },

    /// A clause refers to a variable that was never created.
    #[error("literal refers to Boolean variable {ord}, but only {num_vars} exist")]
    UnknownVariable {
        /// Offending ordinal.
        ord: u32,
        /// Number of Boolean variables known to the solver.
        num_vars: usize,
    },

    /// A variable was used where a different kind is required.
    #[error("variable kind mismatch: expected {expected:?}, found {found:?}")]
    KindMismatch {
        /// Required kind.
        expected: VarKind,
        /// Actual kind.
        found: VarKind,
    },

    /// A linear constraint with no variables or a zero leading coefficient.
    #[error("malformed linear constraint: {0}")]
    MalformedConstraint(String),

    /// Input uses a feature outside the supported QF_LRA fragment.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;
