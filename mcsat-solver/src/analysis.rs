//! Conflict analysis by first-UIP resolution.
//!
//! Starting from a conflict clause (false in the Boolean model), the
//! engine walks the assignments of the clause's highest decision level
//! in reverse and resolves the conflict with the reason clause of every
//! Boolean propagation whose negation appears in it, until exactly one
//! literal of that level remains. Rational assignments and reason-free
//! entries (decisions, semantic propagations) are never resolved; a
//! conflict that keeps two reason-free literals at the top level comes
//! out as a semantic-split clause.

use mcsat_core::{Clause, Database, Lit, Trail, VarKind, Variable};
use rustc_hash::FxHashSet;

enum Guard<'a> {
    None,
    // never resolve entries of these variables; keep scanning
    Skip(&'a [Variable]),
    // stop and return the current conflict when one of these variables
    // would be resolved next
    Final(&'a [Variable]),
}

/// First-UIP conflict resolution engine.
#[derive(Debug, Default)]
pub struct ConflictAnalysis {
    // literals of the current conflict clause
    conflict: FxHashSet<Lit>,
    // highest decision level among them
    top_level: u32,
    // number of conflict literals at `top_level`
    num_top_level: usize,
}

impl ConflictAnalysis {
    /// Create an idle engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a clause suitable for backtracking from `conflict`.
    ///
    /// `on_resolve` is called with every reason clause resolved into the
    /// conflict. Returns the derived clause with literals ordered by
    /// descending decision level, and the asserting level.
    pub fn analyze(
        &mut self,
        db: &Database,
        trail: &Trail,
        conflict: Clause,
        on_resolve: impl FnMut(&Clause),
    ) -> (Clause, u32) {
        self.run(db, trail, conflict, Guard::None, on_resolve)
    }

    /// Like [`analyze`](Self::analyze), but entries of `vars_to_skip`
    /// are never resolved; scanning continues past them.
    pub fn analyze_skip(
        &mut self,
        db: &Database,
        trail: &Trail,
        conflict: Clause,
        vars_to_skip: &[Variable],
        on_resolve: impl FnMut(&Clause),
    ) -> (Clause, u32) {
        self.run(db, trail, conflict, Guard::Skip(vars_to_skip), on_resolve)
    }

    /// Like [`analyze`](Self::analyze), but resolution stops as soon as
    /// an entry of `vars` is reached and the conflict derived so far is
    /// returned. Used to extract an explanation of why an assumed
    /// assignment is inconsistent.
    pub fn analyze_final(
        &mut self,
        db: &Database,
        trail: &Trail,
        conflict: Clause,
        vars: &[Variable],
        on_resolve: impl FnMut(&Clause),
    ) -> (Clause, u32) {
        self.run(db, trail, conflict, Guard::Final(vars), on_resolve)
    }

    fn run(
        &mut self,
        db: &Database,
        trail: &Trail,
        conflict: Clause,
        guard: Guard<'_>,
        mut on_resolve: impl FnMut(&Clause),
    ) -> (Clause, u32) {
        debug_assert_eq!(conflict.eval(trail.bool_model()), Some(false));
        self.init(trail, &conflict);

        let assigned = trail.assigned(self.top_level);
        for entry in assigned.iter().rev() {
            if self.can_backtrack() {
                break;
            }
            match guard {
                Guard::Skip(vars) if vars.contains(&entry.var) => continue,
                Guard::Final(vars) if vars.contains(&entry.var) => {
                    return self.finish(trail);
                }
                _ => {}
            }
            let Some(reason) = entry.reason else {
                continue;
            };
            if entry.var.kind() != VarKind::Bool
                || trail.decision_level_of(entry.var) != Some(self.top_level)
            {
                continue;
            }

            // the literal of `var` that is false in the model
            let lit = match trail.bool_model().value(entry.var.ord()) {
                Some(true) => Lit::negative(entry.var.ord()),
                Some(false) => Lit::positive(entry.var.ord()),
                None => continue,
            };
            if self.can_resolve(lit) {
                let reason = db.clause(reason);
                on_resolve(reason);
                self.resolve(trail, reason, lit);
            }
        }

        self.finish(trail)
    }

    fn init(&mut self, trail: &Trail, conflict: &Clause) {
        self.conflict.clear();
        self.top_level = conflict
            .iter()
            .filter_map(|lit| trail.decision_level_of(lit.var()))
            .max()
            .unwrap_or(0);
        self.num_top_level = 0;
        for lit in conflict.iter() {
            if self.conflict.insert(lit)
                && trail.decision_level_of(lit.var()) == Some(self.top_level)
            {
                self.num_top_level += 1;
            }
        }
    }

    fn can_backtrack(&self) -> bool {
        self.num_top_level == 1 && self.conflict.len() > 1
    }

    fn can_resolve(&self, lit: Lit) -> bool {
        self.conflict.contains(&lit)
    }

    // resolve the conflict with `other` on `lit` (which is false in the
    // model; its negation is the propagated literal in `other`)
    fn resolve(&mut self, trail: &Trail, other: &Clause, lit: Lit) {
        debug_assert!(self.can_resolve(lit));
        debug_assert!(other.contains(lit.negate()));

        self.conflict.remove(&lit);
        if trail.decision_level_of(lit.var()) == Some(self.top_level) {
            self.num_top_level -= 1;
        }
        for other_lit in other.iter() {
            if other_lit == lit.negate() {
                continue;
            }
            if self.conflict.insert(other_lit)
                && trail.decision_level_of(other_lit.var()) == Some(self.top_level)
            {
                self.num_top_level += 1;
            }
        }
    }

    // order literals by descending decision level and report the
    // asserting level: the highest level strictly below the top. A UIP
    // clause becomes unit there; a semantic-split clause loses both of
    // its top literals so one of them can be decided.
    fn finish(&self, trail: &Trail) -> (Clause, u32) {
        let mut literals: Vec<Lit> = self.conflict.iter().copied().collect();
        literals.sort_by_key(|lit| {
            let level = trail.decision_level_of(lit.var()).unwrap_or(0);
            (std::cmp::Reverse(level), *lit)
        });
        let clause = Clause::new(literals);
        let level = clause
            .iter()
            .filter_map(|lit| trail.decision_level_of(lit.var()))
            .filter(|level| *level < self.top_level)
            .max()
            .unwrap_or(0);
        (clause, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcsat_core::{ClauseRef, Model};

    fn lit(ord: u32) -> Lit {
        Lit::positive(ord)
    }

    fn neg(ord: u32) -> Lit {
        Lit::negative(ord)
    }

    fn decide(trail: &mut Trail, l: Lit) {
        trail.bool_model_mut().set_value(l.ord(), !l.is_negation());
        trail.decide(l.var());
    }

    fn propagate(trail: &mut Trail, l: Lit, reason: ClauseRef) {
        trail.bool_model_mut().set_value(l.ord(), !l.is_negation());
        let level = trail.decision_level();
        trail.propagate(l.var(), Some(reason), level);
    }

    fn model_of(trail: &Trail) -> &Model<bool> {
        trail.bool_model()
    }

    fn setup() -> (Database, Trail) {
        let mut trail = Trail::new();
        trail.resize(mcsat_core::VarKind::Bool, 10);
        (Database::new(), trail)
    }

    #[test]
    fn test_first_uip_resolution() {
        let (mut db, mut trail) = setup();
        // x0 decided; x1 and x2 propagated from it; (not x1 or not x2)
        // is the conflict
        let r1 = db.assert_clause(Clause::new([lit(1), neg(0)]));
        let r2 = db.assert_clause(Clause::new([lit(2), neg(0)]));

        decide(&mut trail, lit(0));
        propagate(&mut trail, lit(1), r1);
        propagate(&mut trail, lit(2), r2);

        let conflict = Clause::new([neg(1), neg(2)]);
        assert_eq!(conflict.eval(model_of(&trail)), Some(false));

        let mut analysis = ConflictAnalysis::new();
        let mut resolved = 0;
        let (clause, level) =
            analysis.analyze(&db, &trail, conflict, |_| resolved += 1);

        // resolving both propagations leaves the single decision literal
        assert_eq!(resolved, 2);
        assert_eq!(clause.len(), 1);
        assert_eq!(clause[0], neg(0));
        assert_eq!(level, 0);
    }

    #[test]
    fn test_asserting_clause_is_sorted_by_level() {
        let (mut db, mut trail) = setup();
        let r = db.assert_clause(Clause::new([lit(2), neg(1)]));

        decide(&mut trail, lit(0));
        decide(&mut trail, lit(1));
        propagate(&mut trail, lit(2), r);

        // conflict mentions levels 1 and 2, with two literals at level 2
        let conflict = Clause::new([neg(0), neg(1), neg(2)]);
        let mut analysis = ConflictAnalysis::new();
        let (clause, level) = analysis.analyze(&db, &trail, conflict, |_| {});

        // resolution merges not(x2) into not(x1); the result asserts at
        // level 1
        assert_eq!(clause.len(), 2);
        assert_eq!(clause[0], neg(1));
        assert_eq!(clause[1], neg(0));
        assert_eq!(level, 1);
        assert_eq!(
            trail.decision_level_of(clause[0].var()),
            Some(2)
        );
    }

    #[test]
    fn test_semantic_split_keeps_two_top_literals() {
        let (db, mut trail) = setup();

        // two reason-free assignments at level 1 (as semantic
        // propagations of theory atoms), conflicting clause over both
        decide(&mut trail, lit(0));
        trail.bool_model_mut().set_value(1, true);
        trail.propagate(Variable::new(1, VarKind::Bool), None, 1);

        let conflict = Clause::new([neg(0), neg(1)]);
        let mut analysis = ConflictAnalysis::new();
        let (clause, level) = analysis.analyze(&db, &trail, conflict, |_| {});

        assert_eq!(clause.len(), 2);
        // both top literals sit at level 1, so the clause asserts below
        // them at the ground level
        assert_eq!(level, 0);
        assert_eq!(
            trail.decision_level_of(clause[0].var()),
            trail.decision_level_of(clause[1].var())
        );
    }

    #[test]
    fn test_analyze_skip_never_resolves_skipped_vars() {
        let (mut db, mut trail) = setup();
        let r1 = db.assert_clause(Clause::new([lit(1), neg(0)]));
        let r2 = db.assert_clause(Clause::new([lit(2), neg(0)]));

        decide(&mut trail, lit(0));
        propagate(&mut trail, lit(1), r1);
        propagate(&mut trail, lit(2), r2);

        let conflict = Clause::new([neg(1), neg(2)]);
        let skip = [Variable::new(2, VarKind::Bool)];
        let mut analysis = ConflictAnalysis::new();
        let (clause, _) =
            analysis.analyze_skip(&db, &trail, conflict, &skip, |_| {});

        // x2 was not resolved away, x1 was
        assert!(clause.contains(neg(2)));
        assert!(!clause.contains(neg(1)));
    }

    #[test]
    fn test_analyze_final_stops_at_watched_vars() {
        let (mut db, mut trail) = setup();
        let r1 = db.assert_clause(Clause::new([lit(1), neg(0)]));
        let r2 = db.assert_clause(Clause::new([lit(2), neg(1)]));

        decide(&mut trail, lit(0));
        propagate(&mut trail, lit(1), r1);
        propagate(&mut trail, lit(2), r2);

        let conflict = Clause::new([neg(2)]);
        let watched = [Variable::new(2, VarKind::Bool)];
        let mut analysis = ConflictAnalysis::new();
        let (clause, _) =
            analysis.analyze_final(&db, &trail, conflict, &watched, |_| {});

        // the scan stops at x2 before any resolution
        assert_eq!(clause.len(), 1);
        assert_eq!(clause[0], neg(2));
    }
}
