//! Plugin traits: theories, variable order, restart policy, events.
//!
//! The solver owns its collaborators and drives them through dynamic
//! dispatch over this capability set. Lifecycle events are broadcast to
//! every listener in registration order; each trait method defaults to a
//! no-op so listeners implement only what they need.

use crate::clause::Clause;
use crate::database::{ClauseRef, Database};
use crate::trail::Trail;
use crate::variable::{Value, VarKind, Variable};
use std::any::Any;

/// Lifecycle events broadcast by the solver.
pub trait EventListener {
    /// Called once at the start of every `check()`.
    fn on_init(&mut self, _db: &mut Database, _trail: &mut Trail) {}

    /// Called before the trail backtracks to `level`. The trail still
    /// holds the assignments about to be dropped.
    fn on_before_backtrack(&mut self, _db: &mut Database, _trail: &mut Trail, _level: u32) {}

    /// Called when the number of variables of `kind` grows to `num_vars`.
    fn on_variable_resize(&mut self, _kind: VarKind, _num_vars: usize) {}

    /// Called after a clause has been added to the learned segment.
    fn on_learned_clause(&mut self, _db: &mut Database, _trail: &mut Trail, _learned: ClauseRef) {}

    /// Called for each clause resolved with the current conflict during
    /// conflict analysis.
    fn on_conflict_resolved(&mut self, _db: &mut Database, _trail: &mut Trail, _other: &Clause) {}

    /// Called after the trail has been cleared by a restart.
    fn on_restart(&mut self, _db: &mut Database, _trail: &mut Trail) {}
}

/// A theory plugin: propagates consequences of trail assignments and
/// decides values for the variables it owns.
pub trait Theory: EventListener {
    /// Propagate all consequences of new trail entries. Returns the
    /// conflict clauses found (each false in the Boolean model), or an
    /// empty vector if the trail is consistent.
    fn propagate(&mut self, db: &mut Database, trail: &mut Trail) -> Vec<Clause>;

    /// Decide a value for `var`. A theory ignores variables it does not
    /// own.
    fn decide(&mut self, db: &mut Database, trail: &mut Trail, var: Variable);

    /// Decide `var` to a caller-supplied value. A theory ignores
    /// variables it does not own and values of the wrong kind.
    fn decide_to_value(&mut self, trail: &mut Trail, var: Variable, value: &Value);

    /// Downcasting hook used to reach a concrete theory registered in a
    /// theory combination.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Variable-order heuristic plug-point.
pub trait VariableOrder: EventListener {
    /// Next variable to decide, or `None` when every variable is
    /// assigned.
    fn pick(&mut self, db: &Database, trail: &Trail) -> Option<Variable>;

    /// Check whether `a` is preferred over `b` in the decision order.
    fn is_before(&self, a: Variable, b: Variable) -> bool;
}

/// Restart-policy plug-point.
pub trait RestartPolicy: EventListener {
    /// Consulted after each conflict; `true` requests a restart instead
    /// of a backtrack.
    fn should_restart(&self) -> bool;
}
