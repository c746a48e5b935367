//! Theory combination: fixpoint propagation and event fan-out.

use mcsat_core::{
    Clause, ClauseRef, Database, EventListener, Theory, Trail, Value, VarKind, Variable,
};
use std::any::Any;

/// An ordered list of theories sharing the trail.
///
/// Propagation round-robins the theories until a full pass adds no new
/// trail entry; the first non-empty conflict set encountered is
/// returned. Lifecycle events are broadcast to every theory in
/// registration order.
#[derive(Default)]
pub struct TheoryCombination {
    theories: Vec<Box<dyn Theory>>,
    num_vars: [usize; 2],
}

impl TheoryCombination {
    /// Create an empty combination.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a theory. Variable counts seen so far are replayed so
    /// late-added theories are sized correctly.
    pub fn add_theory(&mut self, mut theory: Box<dyn Theory>) {
        for (index, kind) in VarKind::ALL.iter().enumerate() {
            if self.num_vars[index] > 0 {
                theory.on_variable_resize(*kind, self.num_vars[index]);
            }
        }
        self.theories.push(theory);
    }

    /// Number of registered theories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.theories.len()
    }

    /// Check whether no theory is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.theories.is_empty()
    }

    /// Mutable access to the first registered theory of concrete type
    /// `T`.
    pub fn theory_mut<T: Theory + 'static>(&mut self) -> Option<&mut T> {
        self.theories
            .iter_mut()
            .find_map(|theory| theory.as_any_mut().downcast_mut::<T>())
    }
}

impl EventListener for TheoryCombination {
    fn on_init(&mut self, db: &mut Database, trail: &mut Trail) {
        for theory in &mut self.theories {
            theory.on_init(db, trail);
        }
    }

    fn on_before_backtrack(&mut self, db: &mut Database, trail: &mut Trail, level: u32) {
        for theory in &mut self.theories {
            theory.on_before_backtrack(db, trail, level);
        }
    }

    fn on_variable_resize(&mut self, kind: VarKind, num_vars: usize) {
        let index = match kind {
            VarKind::Bool => 0,
            VarKind::Rational => 1,
        };
        self.num_vars[index] = self.num_vars[index].max(num_vars);
        for theory in &mut self.theories {
            theory.on_variable_resize(kind, num_vars);
        }
    }

    fn on_learned_clause(&mut self, db: &mut Database, trail: &mut Trail, learned: ClauseRef) {
        for theory in &mut self.theories {
            theory.on_learned_clause(db, trail, learned);
        }
    }

    fn on_conflict_resolved(&mut self, db: &mut Database, trail: &mut Trail, other: &Clause) {
        for theory in &mut self.theories {
            theory.on_conflict_resolved(db, trail, other);
        }
    }

    fn on_restart(&mut self, db: &mut Database, trail: &mut Trail) {
        for theory in &mut self.theories {
            theory.on_restart(db, trail);
        }
    }
}

impl Theory for TheoryCombination {
    fn propagate(&mut self, db: &mut Database, trail: &mut Trail) -> Vec<Clause> {
        loop {
            let before = trail.num_assigned();
            for theory in &mut self.theories {
                let conflicts = theory.propagate(db, trail);
                if !conflicts.is_empty() {
                    return conflicts;
                }
            }
            if before == trail.num_assigned() {
                return Vec::new();
            }
        }
    }

    fn decide(&mut self, db: &mut Database, trail: &mut Trail, var: Variable) {
        for theory in &mut self.theories {
            theory.decide(db, trail, var);
        }
    }

    fn decide_to_value(&mut self, trail: &mut Trail, var: Variable, value: &Value) {
        for theory in &mut self.theories {
            theory.decide_to_value(trail, var, value);
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcsat_core::Lit;
    use mcsat_theories::{BoolTheory, LraTheory};

    #[test]
    fn test_fixpoint_across_theories() {
        let mut combination = TheoryCombination::new();
        combination.add_theory(Box::new(BoolTheory::new()));
        combination.add_theory(Box::new(LraTheory::new()));

        let mut db = Database::new();
        let mut trail = Trail::new();
        trail.resize(VarKind::Bool, 2);
        combination.on_variable_resize(VarKind::Bool, 2);

        // (x0) and (not x0 or x1): two rounds of BCP
        db.assert_clause(Clause::new([Lit::positive(0)]));
        db.assert_clause(Clause::new([Lit::negative(0), Lit::positive(1)]));

        let conflicts = combination.propagate(&mut db, &mut trail);
        assert!(conflicts.is_empty());
        assert_eq!(trail.bool_model().value(0), Some(&true));
        assert_eq!(trail.bool_model().value(1), Some(&true));

        // repeated propagation adds nothing
        let before = trail.num_assigned();
        assert!(combination.propagate(&mut db, &mut trail).is_empty());
        assert_eq!(trail.num_assigned(), before);
    }

    #[test]
    fn test_theory_mut_downcast() {
        let mut combination = TheoryCombination::new();
        combination.add_theory(Box::new(BoolTheory::new()));
        combination.add_theory(Box::new(LraTheory::new()));

        assert!(combination.theory_mut::<BoolTheory>().is_some());
        assert!(combination.theory_mut::<LraTheory>().is_some());
    }
}
