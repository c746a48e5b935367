//! Boolean theory: two-watched-literal unit propagation.
//!
//! Every clause watches the literals at positions 0 and 1. The watch map
//! associates each literal with the clauses watching it. When a literal
//! becomes false, each watching clause either migrates its watch to a
//! non-falsified literal found with a rotating cursor, propagates its
//! remaining watched literal as unit, is already satisfied, or is a
//! conflict.

use mcsat_core::config::PhaseStrategy;
use mcsat_core::{
    Clause, ClauseRef, Database, EventListener, Lit, Model, Theory, Trail, Value, VarKind,
    Variable,
};
use std::any::Any;
use std::collections::VecDeque;

// Watched literals live at clause positions 0 and 1; the rotating cursor
// scans positions >= 2 for a replacement.
#[derive(Debug, Clone, Copy)]
struct WatchedClause {
    clause: ClauseRef,
    index: usize,
}

impl WatchedClause {
    fn new(clause: ClauseRef, len: usize) -> Self {
        Self {
            clause,
            index: 2.min(len.saturating_sub(1)),
        }
    }
}

// queue entry: a satisfied literal, its reason clause, and the trail
// timestamp of its assignment once known; entries without a literal are
// cursor checkpoints for non-Boolean assignments
#[derive(Debug, Clone, Copy)]
struct SatisfiedLit {
    lit: Option<Lit>,
    reason: Option<ClauseRef>,
    timestamp: u64,
}

/// Two-watched-literal Boolean constraint propagation with phase caching.
pub struct BoolTheory {
    // map literal code -> clauses watching that literal
    watched: Vec<Vec<WatchedClause>>,
    // FIFO queue of satisfied literals with their reason clause
    satisfied: VecDeque<SatisfiedLit>,
    // last value of each variable before it was backtracked
    phase: Vec<bool>,
    strategy: PhaseStrategy,
    // timestamp up to which trail assignments are fully processed; a
    // conflict aborts the queue, so the cursor only advances past an
    // entry once its watch lists were walked to completion
    cursor: u64,
}

impl Default for BoolTheory {
    fn default() -> Self {
        Self::new()
    }
}

impl BoolTheory {
    /// Create the theory with the default (`cache`) phase strategy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            watched: Vec::new(),
            satisfied: VecDeque::new(),
            phase: Vec::new(),
            strategy: PhaseStrategy::default(),
            cursor: 0,
        }
    }

    /// Set the polarity strategy used by `decide`.
    pub fn set_phase(&mut self, strategy: PhaseStrategy) {
        self.strategy = strategy;
    }

    fn resize_to(&mut self, num_vars: usize) {
        if self.watched.len() < 2 * num_vars {
            self.watched.resize_with(2 * num_vars, Vec::new);
        }
        if self.phase.len() < num_vars {
            self.phase.resize(num_vars, true);
        }
    }

    /// Queue unit clauses and unprocessed trail assignments.
    fn initialize(&mut self, db: &mut Database, trail: &mut Trail) -> Option<Clause> {
        self.resize_to(trail.bool_model().num_vars());

        if trail.is_empty() {
            // (re)build the watch lists from scratch
            for list in &mut self.watched {
                list.clear();
            }
            self.cursor = trail.timestamp();
            let refs: Vec<ClauseRef> = db.refs().collect();
            for cref in refs {
                let clause = db.clause(cref);
                match clause.len() {
                    0 => return Some(clause.clone()),
                    1 => {
                        let lit = clause[0];
                        self.watched[lit.code()].push(WatchedClause::new(cref, 1));
                        self.satisfied.push_back(SatisfiedLit {
                            lit: Some(lit),
                            reason: Some(cref),
                            timestamp: 0,
                        });
                    }
                    len => {
                        self.watched[clause[0].code()].push(WatchedClause::new(cref, len));
                        self.watched[clause[1].code()].push(WatchedClause::new(cref, len));
                    }
                }
            }
        }

        for entry in trail.assigned_since(self.cursor) {
            if entry.var.kind() == VarKind::Bool {
                let defined = trail
                    .bool_model()
                    .value(entry.var.ord())
                    .copied()
                    .unwrap_or_default();
                let lit = if defined {
                    Lit::positive(entry.var.ord())
                } else {
                    Lit::negative(entry.var.ord())
                };
                self.satisfied.push_back(SatisfiedLit {
                    lit: Some(lit),
                    reason: entry.reason,
                    timestamp: entry.timestamp,
                });
            } else {
                // non-Boolean assignments need no BCP, but the cursor
                // may only move past them in queue order
                self.satisfied.push_back(SatisfiedLit {
                    lit: None,
                    reason: None,
                    timestamp: entry.timestamp,
                });
            }
        }
        None
    }

    /// Move the watch of `falsified_lit` in every watching clause.
    ///
    /// Clauses that become unit push their implied literal to the queue;
    /// a clause that becomes false is returned as a conflict.
    fn falsified(
        &mut self,
        db: &mut Database,
        trail: &mut Trail,
        falsified_lit: Lit,
    ) -> Option<Clause> {
        debug_assert_eq!(falsified_lit.eval(trail.bool_model()), Some(false));

        let mut list = std::mem::take(&mut self.watched[falsified_lit.code()]);
        let mut position = 0;
        let mut conflict = None;
        while position < list.len() {
            let mut watch = list[position];
            let clause = db.clause_mut(watch.clause);

            if clause.len() == 1 {
                // unit clause whose only literal became false
                conflict = Some(clause.clone());
                break;
            }

            // keep the falsified literal at position 1
            if clause[0] == falsified_lit {
                clause.swap(0, 1);
            }
            debug_assert_eq!(clause[1], falsified_lit);

            if clause[0].eval(trail.bool_model()) == Some(true) {
                position += 1;
                continue;
            }

            if self.replace_second_watch(db, trail.bool_model(), &mut watch) {
                list.swap_remove(position);
            } else {
                list[position] = watch;
                let unit = db.clause(watch.clause)[0];
                match unit.eval(trail.bool_model()) {
                    Some(false) => {
                        conflict = Some(db.clause(watch.clause).clone());
                        break;
                    }
                    Some(true) => {}
                    None => {
                        // propagate onto the trail right away so the
                        // entry survives a conflict abort of the queue
                        trail
                            .bool_model_mut()
                            .set_value(unit.ord(), !unit.is_negation());
                        let level = trail.decision_level();
                        trail.propagate(unit.var(), Some(watch.clause), level);
                        self.satisfied.push_back(SatisfiedLit {
                            lit: Some(unit),
                            reason: Some(watch.clause),
                            timestamp: trail.timestamp(),
                        });
                    }
                }
                position += 1;
            }
        }
        self.watched[falsified_lit.code()] = list;
        conflict
    }

    /// Try to move the watch at position 1 to a non-falsified literal,
    /// scanning positions >= 2 from the watch's rotating cursor.
    fn replace_second_watch(
        &mut self,
        db: &mut Database,
        model: &Model<bool>,
        watch: &mut WatchedClause,
    ) -> bool {
        let clause = db.clause_mut(watch.clause);
        let len = clause.len();
        debug_assert!(len >= 2);
        debug_assert_eq!(clause[1].eval(model), Some(false));

        if len > 2 {
            debug_assert!((2..len).contains(&watch.index));
            let start = watch.index;
            loop {
                if clause[watch.index].eval(model) != Some(false) {
                    clause.swap(1, watch.index);
                    self.watched[clause[1].code()].push(*watch);
                    return true;
                }
                watch.index += 1;
                if watch.index >= len {
                    watch.index = 2;
                }
                if watch.index == start {
                    break;
                }
            }
        }
        false
    }
}

impl EventListener for BoolTheory {
    fn on_before_backtrack(&mut self, _db: &mut Database, trail: &mut Trail, level: u32) {
        // remember the last value of every variable about to be dropped
        let mut current = trail.decision_level();
        while current > level {
            for entry in trail.assigned(current) {
                if entry.var.kind() == VarKind::Bool {
                    if let Some(value) = trail.bool_model().value(entry.var.ord()) {
                        self.phase[entry.var.index()] = *value;
                    }
                }
            }
            current -= 1;
        }
    }

    fn on_variable_resize(&mut self, kind: VarKind, num_vars: usize) {
        if kind == VarKind::Bool {
            self.resize_to(num_vars);
        }
    }

    fn on_learned_clause(&mut self, db: &mut Database, _trail: &mut Trail, learned: ClauseRef) {
        let clause = db.clause(learned);
        let len = clause.len();
        if len == 0 {
            return;
        }
        self.resize_to(clause.iter().map(|lit| lit.ord() as usize + 1).max().unwrap_or(0));
        self.watched[clause[0].code()].push(WatchedClause::new(learned, len));
        if len > 1 {
            self.watched[clause[1].code()].push(WatchedClause::new(learned, len));
        }
    }
}

impl Theory for BoolTheory {
    fn propagate(&mut self, db: &mut Database, trail: &mut Trail) -> Vec<Clause> {
        self.satisfied.clear();
        if let Some(conflict) = self.initialize(db, trail) {
            return vec![conflict];
        }

        while let Some(entry) = self.satisfied.pop_front() {
            let mut timestamp = entry.timestamp;
            if let Some(lit) = entry.lit {
                // propagate the literal if it is not on the trail yet
                if entry.reason.is_some() && !trail.bool_model().is_defined(lit.ord()) {
                    trail
                        .bool_model_mut()
                        .set_value(lit.ord(), !lit.is_negation());
                    let level = trail.decision_level();
                    trail.propagate(lit.var(), entry.reason, level);
                    timestamp = trail.timestamp();
                }
                debug_assert_eq!(lit.eval(trail.bool_model()), Some(true));

                if let Some(conflict) = self.falsified(db, trail, lit.negate()) {
                    return vec![conflict];
                }
            }
            self.cursor = self.cursor.max(timestamp);
        }
        Vec::new()
    }

    fn decide(&mut self, _db: &mut Database, trail: &mut Trail, var: Variable) {
        if var.kind() != VarKind::Bool {
            return;
        }
        let value = match self.strategy {
            PhaseStrategy::Positive => true,
            PhaseStrategy::Negative => false,
            PhaseStrategy::Cache => self.phase[var.index()],
        };
        trail.bool_model_mut().set_value(var.ord(), value);
        trail.decide(var);
    }

    fn decide_to_value(&mut self, trail: &mut Trail, var: Variable, value: &Value) {
        if var.kind() != VarKind::Bool {
            return;
        }
        if let Value::Bool(value) = value {
            if !trail.bool_model().is_defined(var.ord()) {
                trail.bool_model_mut().set_value(var.ord(), *value);
                trail.decide(var);
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(ord: u32) -> Lit {
        Lit::positive(ord)
    }

    fn neg(ord: u32) -> Lit {
        Lit::negative(ord)
    }

    fn bool_var(ord: u32) -> Variable {
        Variable::new(ord, VarKind::Bool)
    }

    fn setup(num_vars: usize) -> (Database, Trail, BoolTheory) {
        let mut trail = Trail::new();
        trail.resize(VarKind::Bool, num_vars);
        (Database::new(), trail, BoolTheory::new())
    }

    fn decide(trail: &mut Trail, theory: &mut BoolTheory, l: Lit, value: bool) {
        let _ = theory;
        trail.bool_model_mut().set_value(l.ord(), value);
        trail.decide(l.var());
    }

    #[test]
    fn test_propagate_unit_clauses_on_empty_trail() {
        let (mut db, mut trail, mut theory) = setup(10);
        let c0 = db.assert_clause(Clause::new([lit(0), lit(1), lit(2)]));
        let c1 = db.assert_clause(Clause::new([neg(0)]));
        let c2 = db.assert_clause(Clause::new([neg(1)]));

        let conflicts = theory.propagate(&mut db, &mut trail);
        assert!(conflicts.is_empty());

        let assigned = trail.assigned(0);
        assert_eq!(assigned.len(), 3);
        assert_eq!(assigned[0].var, bool_var(0));
        assert_eq!(assigned[0].reason, Some(c1));
        assert_eq!(assigned[1].var, bool_var(1));
        assert_eq!(assigned[1].reason, Some(c2));
        assert_eq!(assigned[2].var, bool_var(2));
        assert_eq!(assigned[2].reason, Some(c0));

        assert_eq!(trail.bool_model().value(0), Some(&false));
        assert_eq!(trail.bool_model().value(1), Some(&false));
        assert_eq!(trail.bool_model().value(2), Some(&true));
    }

    #[test]
    fn test_propagate_after_decision() {
        let (mut db, mut trail, mut theory) = setup(10);
        let c0 = db.assert_clause(Clause::new([lit(0), lit(1)]));
        db.assert_clause(Clause::new([neg(0), neg(2)]));
        let c2 = db.assert_clause(Clause::new([lit(0), lit(3)]));

        // initialize watch lists
        assert!(theory.propagate(&mut db, &mut trail).is_empty());
        assert!(trail.is_empty());

        decide(&mut trail, &mut theory, lit(0), false);
        assert!(theory.propagate(&mut db, &mut trail).is_empty());

        assert_eq!(trail.assigned(0).len(), 0);
        let assigned = trail.assigned(1);
        assert_eq!(assigned.len(), 3);
        assert_eq!(assigned[0].var, bool_var(0));
        assert_eq!(assigned[0].reason, None);
        assert_eq!(assigned[1].var, bool_var(1));
        assert_eq!(assigned[1].reason, Some(c0));
        assert_eq!(assigned[2].var, bool_var(3));
        assert_eq!(assigned[2].reason, Some(c2));

        assert_eq!(trail.bool_model().value(1), Some(&true));
        assert!(!trail.bool_model().is_defined(2));
        assert_eq!(trail.bool_model().value(3), Some(&true));
    }

    #[test]
    fn test_propagate_after_backtrack() {
        let (mut db, mut trail, mut theory) = setup(10);
        db.assert_clause(Clause::new([lit(0), lit(1)]));
        db.assert_clause(Clause::new([neg(0)]));
        db.assert_clause(Clause::new([neg(1), neg(2), lit(3)]));

        assert!(theory.propagate(&mut db, &mut trail).is_empty());

        decide(&mut trail, &mut theory, lit(2), true);
        trail.backtrack(0);
        assert!(theory.propagate(&mut db, &mut trail).is_empty());

        assert_eq!(trail.assigned(0).len(), 2);
        assert_eq!(trail.bool_model().value(0), Some(&false));
        assert_eq!(trail.bool_model().value(1), Some(&true));
        assert!(!trail.bool_model().is_defined(2));
        assert!(!trail.bool_model().is_defined(3));
    }

    #[test]
    fn test_skip_satisfied_clauses() {
        let (mut db, mut trail, mut theory) = setup(10);
        db.assert_clause(Clause::new([lit(0), lit(1)]));
        db.assert_clause(Clause::new([neg(0), lit(1), lit(2)]));

        assert!(theory.propagate(&mut db, &mut trail).is_empty());

        decide(&mut trail, &mut theory, lit(0), true);
        assert!(theory.propagate(&mut db, &mut trail).is_empty());
        assert!(!trail.bool_model().is_defined(1));
        assert!(!trail.bool_model().is_defined(2));

        decide(&mut trail, &mut theory, lit(1), false);
        assert!(theory.propagate(&mut db, &mut trail).is_empty());
        assert_eq!(trail.bool_model().value(2), Some(&true));
    }

    #[test]
    fn test_conflict_is_reported() {
        let (mut db, mut trail, mut theory) = setup(10);
        db.assert_clause(Clause::new([lit(0), lit(1)]));
        db.assert_clause(Clause::new([lit(0), neg(1)]));

        assert!(theory.propagate(&mut db, &mut trail).is_empty());

        decide(&mut trail, &mut theory, lit(0), false);
        let conflicts = theory.propagate(&mut db, &mut trail);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].eval(trail.bool_model()), Some(false));
    }

    #[test]
    fn test_phase_cache_remembers_backtracked_values() {
        let (mut db, mut trail, mut theory) = setup(4);
        theory.set_phase(PhaseStrategy::Cache);
        assert!(theory.propagate(&mut db, &mut trail).is_empty());

        decide(&mut trail, &mut theory, lit(1), false);
        theory.on_before_backtrack(&mut db, &mut trail, 0);
        trail.backtrack(0);

        theory.decide(&mut db, &mut trail, bool_var(1));
        assert_eq!(trail.bool_model().value(1), Some(&false));
    }

    #[test]
    fn test_learned_clause_watches() {
        let (mut db, mut trail, mut theory) = setup(4);
        assert!(theory.propagate(&mut db, &mut trail).is_empty());

        decide(&mut trail, &mut theory, lit(0), false);
        assert!(theory.propagate(&mut db, &mut trail).is_empty());

        // learn (x0 or x1): watch installed, then x1 propagates once x0 is false
        let learned = db.learn_clause(Clause::new([lit(1), lit(0)]));
        theory.on_learned_clause(&mut db, &mut trail, learned);
        trail.bool_model_mut().set_value(1, true);
        trail.propagate(bool_var(1), Some(learned), 1);

        assert!(theory.propagate(&mut db, &mut trail).is_empty());
        assert_eq!(trail.bool_model().value(1), Some(&true));
    }
}
