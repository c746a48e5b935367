//! Learned-clause minimization by self-subsuming resolution.

use mcsat_core::{Clause, Database, EventListener, Trail};

/// Drops literals from a learned clause whose complement is entailed by
/// the reason clauses already on the trail: a literal `l` is redundant
/// when the reason of `¬l` minus `¬l` is contained in the clause, so
/// resolving on `l` self-subsumes.
#[derive(Debug, Default)]
pub struct Subsumption {
    removed: u64,
}

impl Subsumption {
    /// Create the minimizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of literals removed so far.
    #[must_use]
    pub fn num_removed(&self) -> u64 {
        self.removed
    }

    /// Minimize `clause` in place. The asserting literal at position 0
    /// is never removed, so the clause stays suitable for backtracking.
    pub fn minimize(&mut self, db: &Database, trail: &Trail, clause: &mut Clause) {
        let mut position = clause.len();
        while position > 1 {
            position -= 1;
            let lit = clause[position];
            let Some(reason) = trail.reason(lit.var()) else {
                continue;
            };
            let reason = db.clause(reason);
            let redundant = reason
                .iter()
                .all(|other| other == lit.negate() || clause.contains(other));
            if redundant {
                clause.remove(position);
                self.removed += 1;
            }
        }
    }
}

impl EventListener for Subsumption {}

#[cfg(test)]
mod tests {
    use super::*;
    use mcsat_core::{Lit, VarKind};

    fn lit(ord: u32) -> Lit {
        Lit::positive(ord)
    }

    fn neg(ord: u32) -> Lit {
        Lit::negative(ord)
    }

    #[test]
    fn test_minimize_drops_entailed_literal() {
        let mut db = Database::new();
        let mut trail = Trail::new();
        trail.resize(VarKind::Bool, 4);

        // x0 decided; x1 propagated by (x1 or not x0)
        let reason = db.assert_clause(Clause::new([lit(1), neg(0)]));
        trail.bool_model_mut().set_value(0, true);
        trail.decide(lit(0).var());
        trail.bool_model_mut().set_value(1, true);
        trail.propagate(lit(1).var(), Some(reason), 1);

        // in (x2 or not x0 or not x1), not(x1) resolves against its
        // reason into not(x0), which is already present
        let mut clause = Clause::new([lit(2), neg(0), neg(1)]);
        let mut subsumption = Subsumption::new();
        subsumption.minimize(&db, &trail, &mut clause);

        assert_eq!(clause.len(), 2);
        assert!(clause.contains(lit(2)));
        assert!(clause.contains(neg(0)));
        assert!(!clause.contains(neg(1)));
        assert_eq!(subsumption.num_removed(), 1);
    }

    #[test]
    fn test_minimize_keeps_independent_literals() {
        let mut db = Database::new();
        let mut trail = Trail::new();
        trail.resize(VarKind::Bool, 4);

        let reason = db.assert_clause(Clause::new([lit(1), neg(3)]));
        trail.bool_model_mut().set_value(3, true);
        trail.decide(lit(3).var());
        trail.bool_model_mut().set_value(1, true);
        trail.propagate(lit(1).var(), Some(reason), 1);

        // not(x1)'s reason pulls in not(x3), which is not in the clause
        let mut clause = Clause::new([lit(2), neg(0), neg(1)]);
        let mut subsumption = Subsumption::new();
        subsumption.minimize(&db, &trail, &mut clause);
        assert_eq!(clause.len(), 3);
    }
}
