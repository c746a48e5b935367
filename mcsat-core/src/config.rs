//! Solver configuration.

use serde::{Deserialize, Serialize};

/// Polarity used when the Boolean theory decides a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStrategy {
    /// Always decide `true`.
    Positive,
    /// Always decide `false`.
    Negative,
    /// Reuse the last value the variable had before backtracking.
    #[default]
    Cache,
}

/// Tunable knobs of the solver and its theories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Boolean decision polarity.
    pub phase: PhaseStrategy,
    /// Derive new bounds by eliminating bounded variables from constraints
    /// whose atom is already assigned.
    pub prop_bounds: bool,
    /// Semantically propagate unassigned atoms entailed by current bounds.
    pub prop_unassigned: bool,
    /// Report every conflict found in one propagation pass instead of
    /// stopping at the first.
    pub return_all_conflicts: bool,
    /// Abort with `Unknown` after this many conflicts.
    pub max_conflicts: Option<u64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            phase: PhaseStrategy::Cache,
            prop_bounds: true,
            prop_unassigned: true,
            return_all_conflicts: false,
            max_conflicts: None,
        }
    }
}
