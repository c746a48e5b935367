//! Variable-order heuristics.

use mcsat_core::{Database, EventListener, Trail, VariableOrder, VarKind, Variable};

/// Picks the first unassigned variable, Boolean variables before
/// rational ones, lower ordinals first. Optionally restricted to one
/// variable kind.
#[derive(Debug, Default)]
pub struct FirstUnassigned {
    kind: Option<VarKind>,
}

impl FirstUnassigned {
    /// Order over all variables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Order restricted to variables of `kind`.
    #[must_use]
    pub fn of_kind(kind: VarKind) -> Self {
        Self { kind: Some(kind) }
    }

    fn rank(var: Variable) -> (u8, u32) {
        let kind = match var.kind() {
            VarKind::Bool => 0,
            VarKind::Rational => 1,
        };
        (kind, var.ord())
    }
}

impl EventListener for FirstUnassigned {}

impl VariableOrder for FirstUnassigned {
    fn pick(&mut self, _db: &Database, trail: &Trail) -> Option<Variable> {
        for kind in VarKind::ALL {
            if self.kind.is_some_and(|restricted| restricted != kind) {
                continue;
            }
            let unassigned = match kind {
                VarKind::Bool => trail.bool_model().first_unassigned(),
                VarKind::Rational => trail.rational_model().first_unassigned(),
            };
            if let Some(ord) = unassigned {
                return Some(Variable::new(ord, kind));
            }
        }
        None
    }

    fn is_before(&self, a: Variable, b: Variable) -> bool {
        Self::rank(a) < Self::rank(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_booleans_first() {
        let db = Database::new();
        let mut trail = Trail::new();
        trail.resize(VarKind::Bool, 2);
        trail.resize(VarKind::Rational, 2);

        let mut order = FirstUnassigned::new();
        assert_eq!(order.pick(&db, &trail), Some(Variable::new(0, VarKind::Bool)));

        trail.bool_model_mut().set_value(0, true);
        trail.bool_model_mut().set_value(1, false);
        assert_eq!(
            order.pick(&db, &trail),
            Some(Variable::new(0, VarKind::Rational))
        );
    }

    #[test]
    fn test_is_before_matches_pick_order() {
        let order = FirstUnassigned::new();
        let b0 = Variable::new(0, VarKind::Bool);
        let b1 = Variable::new(1, VarKind::Bool);
        let r0 = Variable::new(0, VarKind::Rational);
        assert!(order.is_before(b0, b1));
        assert!(order.is_before(b1, r0));
        assert!(!order.is_before(r0, b0));
    }

    #[test]
    fn test_exhausted_order_returns_none() {
        let db = Database::new();
        let mut trail = Trail::new();
        trail.resize(VarKind::Bool, 1);
        trail.bool_model_mut().set_value(0, true);

        let mut order = FirstUnassigned::new();
        assert_eq!(order.pick(&db, &trail), None);
    }
}
