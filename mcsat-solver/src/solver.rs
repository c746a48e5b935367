//! The MCSat main loop.

use crate::analysis::ConflictAnalysis;
use crate::combination::TheoryCombination;
use crate::order::FirstUnassigned;
use crate::restart::NoRestart;
use crate::subsumption::Subsumption;
use mcsat_core::{
    Clause, ClauseRef, Database, Error, EventListener, Lit, Rational, RestartPolicy, Result,
    SolverConfig, Theory, Trail, Value, VariableOrder, VarKind, Variable,
};
use mcsat_theories::lra::constraint::{Predicate, SignedConstraint};
use mcsat_theories::lra::{LraOptions, LraTheory};
use mcsat_theories::BoolTheory;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Outcome of a `check()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverResult {
    /// The asserted clauses are satisfiable; the trail holds a model.
    Sat,
    /// The asserted clauses are unsatisfiable.
    Unsat,
    /// Solving was cancelled or hit the conflict cap.
    Unknown,
}

/// Search counters of the last `check()`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Statistics {
    /// Conflict rounds analyzed.
    pub conflicts: u64,
    /// Conflict clauses fed to analysis.
    pub conflict_clauses: u64,
    /// Clauses added to the learned segment.
    pub learned_clauses: u64,
    /// Restarts performed.
    pub restarts: u64,
    /// Decisions made.
    pub decisions: u64,
}

// broadcast an event to every listener the solver owns, in registration
// order: theories, variable order, restart policy, subsumption
macro_rules! broadcast {
    ($solver:ident, $method:ident $(, $arg:expr)*) => {{
        $solver.theory.$method(&mut $solver.db, &mut $solver.trail $(, $arg)*);
        $solver.variable_order.$method(&mut $solver.db, &mut $solver.trail $(, $arg)*);
        $solver.restart_policy.$method(&mut $solver.db, &mut $solver.trail $(, $arg)*);
        $solver.subsumption_listener(|listener, db, trail| {
            listener.$method(db, trail $(, $arg)*);
        });
    }};
}

/// The solver: owns the database, trail, analysis engines and theory
/// combination, and runs propagate → analyze → learn → backtrack →
/// decide to completion.
pub struct Solver {
    db: Database,
    trail: Trail,
    analysis: ConflictAnalysis,
    subsumption: Subsumption,
    theory: TheoryCombination,
    variable_order: Box<dyn VariableOrder>,
    restart_policy: Box<dyn RestartPolicy>,
    config: SolverConfig,
    stats: Statistics,
    cancel: Arc<AtomicBool>,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    /// Create a solver with no theories and the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SolverConfig::default())
    }

    /// Create a solver with no theories.
    #[must_use]
    pub fn with_config(config: SolverConfig) -> Self {
        Self {
            db: Database::new(),
            trail: Trail::new(),
            analysis: ConflictAnalysis::new(),
            subsumption: Subsumption::new(),
            theory: TheoryCombination::new(),
            variable_order: Box::new(FirstUnassigned::new()),
            restart_policy: Box::new(NoRestart::new()),
            config,
            stats: Statistics::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a solver for QF_LRA: Boolean theory plus linear real
    /// arithmetic, configured from `config`.
    #[must_use]
    pub fn for_qf_lra(config: SolverConfig) -> Self {
        let mut bool_theory = BoolTheory::new();
        bool_theory.set_phase(config.phase);
        let lra = LraTheory::with_options(LraOptions {
            prop_bounds: config.prop_bounds,
            prop_unassigned: config.prop_unassigned,
            return_all_conflicts: config.return_all_conflicts,
        });

        let mut solver = Self::with_config(config);
        solver.add_theory(Box::new(bool_theory));
        solver.add_theory(Box::new(lra));
        solver
    }

    /// Register a theory. Must be called before `check()`.
    pub fn add_theory(&mut self, theory: Box<dyn Theory>) {
        self.theory.add_theory(theory);
    }

    /// Replace the variable-order heuristic.
    pub fn set_variable_order(&mut self, order: Box<dyn VariableOrder>) {
        self.variable_order = order;
    }

    /// Replace the restart policy.
    pub fn set_restart_policy(&mut self, policy: Box<dyn RestartPolicy>) {
        self.restart_policy = policy;
    }

    /// Cooperative cancellation flag; set it to `true` from another
    /// context to make `check()` return `Unknown` at the next iteration.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Clause database.
    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Current trail (partial model).
    #[must_use]
    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    /// Counters of the last `check()`.
    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Create a fresh variable of `kind`.
    pub fn make_variable(&mut self, kind: VarKind) -> Variable {
        let ord = self.trail.num_vars(kind) as u32;
        self.trail.resize(kind, ord as usize + 1);
        self.notify_resize(kind);
        Variable::new(ord, kind)
    }

    /// Assert an input clause. Every literal must refer to an existing
    /// Boolean variable.
    pub fn assert_clause(&mut self, lits: impl IntoIterator<Item = Lit>) -> Result<ClauseRef> {
        let clause = Clause::new(lits);
        let num_vars = self.trail.num_vars(VarKind::Bool);
        for lit in clause.iter() {
            if lit.ord() as usize >= num_vars {
                return Err(Error::UnknownVariable {
                    ord: lit.ord(),
                    num_vars,
                });
            }
        }
        Ok(self.db.assert_clause(clause))
    }

    /// Intern a linear constraint in the arithmetic theory and return
    /// its signed handle. Requires an [`LraTheory`] to be registered.
    pub fn linear_constraint(
        &mut self,
        vars: impl IntoIterator<Item = u32>,
        coefs: impl IntoIterator<Item = Rational>,
        pred: Predicate,
        rhs: Rational,
    ) -> Result<SignedConstraint> {
        let trail = &mut self.trail;
        let lra = self
            .theory
            .theory_mut::<LraTheory>()
            .ok_or_else(|| Error::Unsupported("no arithmetic theory registered".into()))?;
        let cons = lra.new_constraint(trail, vars, coefs, pred, rhs)?;
        self.notify_resize(VarKind::Bool);
        Ok(cons)
    }

    /// Check satisfiability of the asserted clauses.
    pub fn check(&mut self) -> SolverResult {
        self.init();
        loop {
            if self.should_give_up() {
                return SolverResult::Unknown;
            }

            let conflicts = self.theory.propagate(&mut self.db, &mut self.trail);
            if !conflicts.is_empty() {
                if self.trail.decision_level() == 0 {
                    return SolverResult::Unsat;
                }
                let (learned, level) = self.analyze_conflicts(conflicts);
                if learned.iter().any(Clause::is_empty) {
                    return SolverResult::Unsat;
                }
                let refs = self.learn(learned);
                if self.restart_policy.should_restart() {
                    self.restart();
                } else {
                    self.backtrack_with(&refs, level);
                }
            } else {
                let Some(var) = self.variable_order.pick(&self.db, &self.trail) else {
                    return SolverResult::Sat;
                };
                self.decide(var);
            }
        }
    }

    /// Like [`check`](Self::check), but at every decision point prefer
    /// to decide an assumed variable to its assumed value. On `Unsat`
    /// the second component holds the final conflict clauses explaining
    /// why the assumption is inconsistent.
    pub fn check_with_model(
        &mut self,
        assumed: &FxHashMap<Variable, Value>,
    ) -> (SolverResult, Vec<Clause>) {
        self.init();
        let mut vars: Vec<Variable> = assumed.keys().copied().collect();
        vars.sort();

        loop {
            if self.should_give_up() {
                return (SolverResult::Unknown, Vec::new());
            }

            let conflicts = self.theory.propagate(&mut self.db, &mut self.trail);
            if !conflicts.is_empty() {
                if self.trail.decision_level() == 0 {
                    return (SolverResult::Unsat, Vec::new());
                }
                let originals = conflicts.clone();
                let (learned, level) = self.analyze_conflicts(conflicts);
                if learned.iter().any(Clause::is_empty) {
                    let explanation = self.analyze_final(originals, &vars);
                    return (SolverResult::Unsat, explanation);
                }
                let refs = self.learn(learned);
                if self.restart_policy.should_restart() {
                    self.restart();
                } else {
                    self.backtrack_with(&refs, level);
                }
            } else if let Some(var) = self.next_assumed(&vars) {
                self.stats.decisions += 1;
                if let Some(value) = assumed.get(&var) {
                    self.theory.decide_to_value(&mut self.trail, var, value);
                }
                if !self.is_defined(var) {
                    // the assumed value had the wrong kind; decide the
                    // variable normally so the search advances
                    self.theory.decide(&mut self.db, &mut self.trail, var);
                }
            } else {
                let Some(var) = self.variable_order.pick(&self.db, &self.trail) else {
                    return (SolverResult::Sat, Vec::new());
                };
                self.decide(var);
            }
        }
    }

    fn next_assumed(&self, vars: &[Variable]) -> Option<Variable> {
        vars.iter().copied().find(|var| !self.is_defined(*var))
    }

    fn is_defined(&self, var: Variable) -> bool {
        match var.kind() {
            VarKind::Bool => self.trail.bool_model().is_defined(var.ord()),
            VarKind::Rational => self.trail.rational_model().is_defined(var.ord()),
        }
    }

    fn should_give_up(&self) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            return true;
        }
        self.config
            .max_conflicts
            .is_some_and(|cap| self.stats.conflicts >= cap)
    }

    fn init(&mut self) {
        // start every check from a clean trail; assertions and learned
        // clauses re-propagate from the database
        broadcast!(self, on_before_backtrack, 0);
        self.trail.clear();
        self.stats = Statistics::default();
        for kind in VarKind::ALL {
            self.notify_resize(kind);
        }
        broadcast!(self, on_init);
    }

    /// Analyze each conflict clause and keep those asserting at the
    /// lowest level, preferring UIP clauses over semantic splits.
    fn analyze_conflicts(&mut self, conflicts: Vec<Clause>) -> (Vec<Clause>, u32) {
        self.stats.conflicts += 1;
        let mut learned: Vec<Clause> = Vec::new();
        let mut level = u32::MAX;
        for conflict in conflicts {
            self.stats.conflict_clauses += 1;

            let mut resolved: Vec<Clause> = Vec::new();
            let (mut clause, clause_level) =
                self.analysis
                    .analyze(&self.db, &self.trail, conflict, |other| {
                        resolved.push(other.clone());
                    });
            for other in &resolved {
                broadcast!(self, on_conflict_resolved, other);
            }
            if !clause.is_empty() {
                self.subsumption
                    .minimize(&self.db, &self.trail, &mut clause);
            }

            if clause_level < level {
                level = clause_level;
                learned.clear();
                learned.push(clause);
            } else if clause_level == level {
                learned.push(clause);
            }
        }
        (learned, level)
    }

    /// Final conflict analysis over the assumed variables.
    fn analyze_final(&mut self, conflicts: Vec<Clause>, vars: &[Variable]) -> Vec<Clause> {
        let mut extracted: Vec<Clause> = Vec::new();
        let mut level = u32::MAX;
        for conflict in conflicts {
            let mut resolved: Vec<Clause> = Vec::new();
            let (clause, clause_level) =
                self.analysis
                    .analyze_final(&self.db, &self.trail, conflict, vars, |other| {
                        resolved.push(other.clone());
                    });
            for other in &resolved {
                broadcast!(self, on_conflict_resolved, other);
            }
            if clause_level < level {
                level = clause_level;
                extracted.clear();
                extracted.push(clause);
            } else if clause_level == level {
                extracted.push(clause);
            }
        }
        extracted
    }

    /// Add learned clauses to the database, deduplicated by size and
    /// literal order, preferring UIP clauses over semantic splits.
    fn learn(&mut self, mut clauses: Vec<Clause>) -> Vec<ClauseRef> {
        clauses.sort();
        clauses.dedup();

        if clauses.iter().any(|clause| !self.is_semantic_split(clause)) {
            clauses.retain(|clause| !self.is_semantic_split(clause));
        }

        let mut refs = Vec::with_capacity(clauses.len());
        for clause in clauses {
            // learning an already-present clause leaves the database
            // unchanged; its watches are already installed
            if let Some(existing) = self.db.find(&clause) {
                refs.push(existing);
                continue;
            }
            self.stats.learned_clauses += 1;
            debug!(clause = %clause, "learned");
            let learned = self.db.learn_clause(clause);
            broadcast!(self, on_learned_clause, learned);
            refs.push(learned);
        }
        refs
    }

    // a semantic-split clause keeps two reason-free literals at its top
    // decision level
    fn is_semantic_split(&self, clause: &Clause) -> bool {
        clause.len() >= 2
            && self.trail.decision_level_of(clause[0].var())
                == self.trail.decision_level_of(clause[1].var())
    }

    fn backtrack_with(&mut self, refs: &[ClauseRef], level: u32) {
        debug_assert!(!refs.is_empty());
        broadcast!(self, on_before_backtrack, level);

        let first = self.db.clause(refs[0]).clone();
        if self.is_semantic_split(&first) {
            // pick the top-level literal whose variable the order
            // prefers, and decide it after backtracking
            let top_level = self.trail.decision_level_of(first[0].var());
            let mut best = first[0];
            for lit in first.iter().skip(1) {
                if self.trail.decision_level_of(lit.var()) != top_level {
                    break;
                }
                debug_assert!(self.trail.reason(lit.var()).is_none());
                if self.variable_order.is_before(lit.var(), best.var()) {
                    best = lit;
                }
            }

            self.trail.backtrack(level);
            self.trail
                .bool_model_mut()
                .set_value(best.ord(), !best.is_negation());
            self.trail.decide(best.var());
        } else {
            self.trail.backtrack(level);

            // propagate the asserting literal of every learned clause
            for cref in refs {
                let lit = self.db.clause(*cref)[0];
                debug_assert_ne!(lit.eval(self.trail.bool_model()), Some(false));
                if !self.trail.bool_model().is_defined(lit.ord()) {
                    self.trail
                        .bool_model_mut()
                        .set_value(lit.ord(), !lit.is_negation());
                    self.trail.propagate(lit.var(), Some(*cref), level);
                }
            }
        }
    }

    fn decide(&mut self, var: Variable) {
        self.stats.decisions += 1;
        self.theory.decide(&mut self.db, &mut self.trail, var);
    }

    fn restart(&mut self) {
        broadcast!(self, on_before_backtrack, 0);
        self.stats.restarts += 1;
        debug!(restarts = self.stats.restarts, "restart");
        self.trail.clear();
        broadcast!(self, on_restart);
    }

    fn notify_resize(&mut self, kind: VarKind) {
        let num_vars = self.trail.num_vars(kind);
        self.theory.on_variable_resize(kind, num_vars);
        self.variable_order.on_variable_resize(kind, num_vars);
        self.restart_policy.on_variable_resize(kind, num_vars);
        self.subsumption.on_variable_resize(kind, num_vars);
    }

    // helper granting the broadcast macro split-borrow access to the
    // subsumption listener
    fn subsumption_listener(
        &mut self,
        call: impl FnOnce(&mut Subsumption, &mut Database, &mut Trail),
    ) {
        call(&mut self.subsumption, &mut self.db, &mut self.trail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_problem_is_sat() {
        let mut solver = Solver::for_qf_lra(SolverConfig::default());
        assert_eq!(solver.check(), SolverResult::Sat);
    }

    #[test]
    fn test_cancellation_returns_unknown() {
        let mut solver = Solver::for_qf_lra(SolverConfig::default());
        let x = solver.make_variable(VarKind::Bool);
        solver
            .assert_clause([Lit::positive(x.ord())])
            .unwrap();
        solver.cancel_flag().store(true, Ordering::Relaxed);
        assert_eq!(solver.check(), SolverResult::Unknown);
    }

    #[test]
    fn test_unknown_variable_is_rejected() {
        let mut solver = Solver::for_qf_lra(SolverConfig::default());
        let result = solver.assert_clause([Lit::positive(3)]);
        assert!(matches!(result, Err(Error::UnknownVariable { .. })));
    }
}
