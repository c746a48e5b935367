//! Per-variable bound sets with Fourier–Motzkin deduction.
//!
//! Each rational variable keeps sets of lower-bound, upper-bound and
//! disequality records. Records are stamped with the decision level at
//! which they were derived; lookups return the tightest record whose
//! reason atom (and every atom in its derivation chain) is true under
//! the current Boolean model. Records above a backtracked level are
//! removed and their reason constraints handed back for re-derivation,
//! since a surviving atom may still imply a bound from the remaining
//! assignment.

use crate::lra::constraint::{ConstraintRepository, Predicate, SignedConstraint};
use crate::lra::Models;
use mcsat_core::Rational;
use num_traits::Zero;
use rustc_hash::FxHashSet;

/// One bound used while deriving another bound by variable elimination.
#[derive(Debug, Clone)]
pub struct ChainBound {
    reason: SignedConstraint,
    value: Rational,
    strict: bool,
}

impl ChainBound {
    /// Constraint whose truth justified the eliminated bound.
    #[must_use]
    pub fn reason(&self) -> SignedConstraint {
        self.reason
    }

    /// Value of the eliminated bound.
    #[must_use]
    pub fn value(&self) -> &Rational {
        &self.value
    }

    /// Whether the eliminated bound was strict.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

/// A recorded bound (or disequality) on a rational variable.
#[derive(Debug, Clone)]
pub struct BoundRecord {
    value: Rational,
    reason: SignedConstraint,
    strict: bool,
    level: u32,
    chain: Vec<ChainBound>,
}

impl BoundRecord {
    /// Bound value.
    #[must_use]
    pub fn value(&self) -> &Rational {
        &self.value
    }

    /// Constraint whose truth implies this bound.
    #[must_use]
    pub fn reason(&self) -> SignedConstraint {
        self.reason
    }

    /// Whether the bound excludes its value.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Decision level at which the bound was derived.
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Bounds eliminated by Fourier–Motzkin to produce this bound.
    #[must_use]
    pub fn chain(&self) -> &[ChainBound] {
        &self.chain
    }

    fn is_current(&self, models: &Models<'_>) -> bool {
        self.reason.lit().eval(models.boolean) == Some(true)
            && self
                .chain
                .iter()
                .all(|entry| entry.reason.lit().eval(models.boolean) == Some(true))
    }

    // tighter-than comparison for lower bounds
    fn tighter_lower(&self, other: &BoundRecord) -> bool {
        self.value > other.value || (self.value == other.value && self.strict && !other.strict)
    }

    // tighter-than comparison for upper bounds
    fn tighter_upper(&self, other: &BoundRecord) -> bool {
        self.value < other.value || (self.value == other.value && self.strict && !other.strict)
    }
}

/// Bound records of a single rational variable.
#[derive(Debug, Default)]
pub struct BoundSet {
    lower: Vec<BoundRecord>,
    upper: Vec<BoundRecord>,
    disequalities: Vec<BoundRecord>,
}

impl BoundSet {
    /// Tightest lower bound whose reason is currently assigned.
    #[must_use]
    pub fn lower_bound(&self, models: &Models<'_>) -> Option<&BoundRecord> {
        let mut best: Option<&BoundRecord> = None;
        for record in self.lower.iter().filter(|record| record.is_current(models)) {
            if best.is_none_or(|current| record.tighter_lower(current)) {
                best = Some(record);
            }
        }
        best
    }

    /// Tightest upper bound whose reason is currently assigned.
    #[must_use]
    pub fn upper_bound(&self, models: &Models<'_>) -> Option<&BoundRecord> {
        let mut best: Option<&BoundRecord> = None;
        for record in self.upper.iter().filter(|record| record.is_current(models)) {
            if best.is_none_or(|current| record.tighter_upper(current)) {
                best = Some(record);
            }
        }
        best
    }

    /// Currently assigned disequality with the given value, if any.
    #[must_use]
    pub fn disequality(&self, models: &Models<'_>, value: &Rational) -> Option<&BoundRecord> {
        self.disequalities
            .iter()
            .find(|record| record.is_current(models) && record.value == *value)
    }

    /// Check whether `value` lies within the current bounds and is not
    /// excluded by a current disequality.
    #[must_use]
    pub fn is_allowed(&self, models: &Models<'_>, value: &Rational) -> bool {
        if let Some(lower) = self.lower_bound(models) {
            if *value < lower.value || (*value == lower.value && lower.strict) {
                return false;
            }
        }
        if let Some(upper) = self.upper_bound(models) {
            if *value > upper.value || (*value == upper.value && upper.strict) {
                return false;
            }
        }
        self.disequality(models, value).is_none()
    }
}

/// Bound sets of every rational variable plus the changed-variable queue
/// consumed by the arithmetic theory's conflict checks.
#[derive(Debug, Default)]
pub struct VariableBounds {
    sets: Vec<BoundSet>,
    changed: Vec<u32>,
    changed_set: FxHashSet<u32>,
}

impl VariableBounds {
    /// Create empty bound sets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow to `num_vars` rational variables.
    pub fn resize(&mut self, num_vars: usize) {
        if num_vars > self.sets.len() {
            self.sets.resize_with(num_vars, BoundSet::default);
        }
    }

    /// Bound set of the variable with ordinal `ord`.
    #[must_use]
    pub fn set(&self, ord: u32) -> &BoundSet {
        &self.sets[ord as usize]
    }

    /// Variables whose bound set received a new record since the last
    /// call. Draining resets the queue.
    pub fn changed(&mut self) -> Vec<u32> {
        self.changed_set.clear();
        std::mem::take(&mut self.changed)
    }

    /// Record the bound implied by the unit constraint `cons` (position
    /// 0 unassigned, all other variables assigned), whose atom is on the
    /// trail.
    pub fn update(
        &mut self,
        models: &Models<'_>,
        repo: &ConstraintRepository,
        cons: SignedConstraint,
        level: u32,
    ) {
        let data = repo.data(cons.id());
        let var = data.vars()[0];
        let leading = &data.coefs()[0];
        debug_assert!(!models.owned.is_defined(var));
        debug_assert!(!leading.is_zero());

        let Some(implied) = repo.implied_value(models.owned, cons.id()) else {
            return;
        };
        let value = implied / leading;

        // the constraint that actually holds, per the Boolean model
        let actual = match cons.lit().eval(models.boolean) {
            Some(true) => cons,
            Some(false) => cons.negate(),
            None => return,
        };

        let record = |strict: bool| BoundRecord {
            value: value.clone(),
            reason: actual,
            strict,
            level,
            chain: Vec::new(),
        };
        let positive_leading = *leading > Rational::zero();
        match (data.pred(), actual.is_negation()) {
            (Predicate::Eq, false) => {
                self.sets[var as usize].lower.push(record(false));
                self.sets[var as usize].upper.push(record(false));
            }
            (Predicate::Eq, true) => {
                self.sets[var as usize].disequalities.push(record(false));
            }
            (pred, false) => {
                let strict = pred.is_strict();
                if positive_leading {
                    self.sets[var as usize].upper.push(record(strict));
                } else {
                    self.sets[var as usize].lower.push(record(strict));
                }
            }
            (pred, true) => {
                // negated <= is >, negated < is >=
                let strict = !pred.is_strict();
                if positive_leading {
                    self.sets[var as usize].lower.push(record(strict));
                } else {
                    self.sets[var as usize].upper.push(record(strict));
                }
            }
        }
        self.mark_changed(var);
    }

    /// Derive a bound on the position-0 variable of `cons` (given in its
    /// actually-true sense) by eliminating the other unassigned
    /// variables with their current bounds. The new bound is recorded
    /// only if it is strictly tighter than the current one.
    ///
    /// Returns `true` if a bound was recorded.
    pub fn deduce(
        &mut self,
        models: &Models<'_>,
        repo: &ConstraintRepository,
        cons: SignedConstraint,
        level: u32,
    ) -> bool {
        let Some((pairs, rhs, strict)) = inequality_form(repo, cons) else {
            return false;
        };
        let (var, leading) = pairs[0].clone();
        if models.owned.is_defined(var) {
            return false;
        }

        let mut sum = rhs;
        let mut strict_total = strict;
        let mut chain = Vec::new();
        for (other, coef) in &pairs[1..] {
            if let Some(value) = models.owned.value(*other) {
                sum -= coef * value;
                continue;
            }
            // a sound elimination needs a lower bound on coef·other
            let record = if *coef > Rational::zero() {
                self.sets[*other as usize].lower_bound(models)
            } else {
                self.sets[*other as usize].upper_bound(models)
            };
            let Some(record) = record else {
                return false;
            };
            sum -= coef * &record.value;
            strict_total |= record.strict;
            chain.push(ChainBound {
                reason: record.reason,
                value: record.value.clone(),
                strict: record.strict,
            });
        }

        let value = sum / &leading;
        let record = BoundRecord {
            value,
            reason: cons,
            strict: strict_total,
            level,
            chain,
        };
        let set = &mut self.sets[var as usize];
        if leading > Rational::zero() {
            let tighter = set
                .upper_bound(models)
                .is_none_or(|current| record.tighter_upper(current));
            if !tighter {
                return false;
            }
            set.upper.push(record);
        } else {
            let tighter = set
                .lower_bound(models)
                .is_none_or(|current| record.tighter_lower(current));
            if !tighter {
                return false;
            }
            set.lower.push(record);
        }
        self.mark_changed(var);
        true
    }

    /// Check whether `cons` (in its signed sense) is entailed by the
    /// current bounds. Only unit constraints can be entailed; the values
    /// of assigned variables are taken from the model.
    #[must_use]
    pub fn is_implied(
        &self,
        models: &Models<'_>,
        repo: &ConstraintRepository,
        cons: SignedConstraint,
    ) -> bool {
        let data = repo.data(cons.id());
        let var = data.vars()[0];
        if models.owned.is_defined(var) {
            return false;
        }
        let Some(implied) = repo.implied_value(models.owned, cons.id()) else {
            return false;
        };
        let leading = &data.coefs()[0];
        let value = implied / leading;
        let set = &self.sets[var as usize];

        match (data.pred(), cons.is_negation()) {
            (Predicate::Eq, false) => {
                let (Some(lower), Some(upper)) =
                    (set.lower_bound(models), set.upper_bound(models))
                else {
                    return false;
                };
                !lower.strict && !upper.strict && lower.value == value && upper.value == value
            }
            (Predicate::Eq, true) => !set.is_allowed(models, &value),
            (pred, negated) => {
                // normalize to var <= value or var >= value
                let strict = if negated {
                    !pred.is_strict()
                } else {
                    pred.is_strict()
                };
                let upper_required = (*leading > Rational::zero()) != negated;
                if upper_required {
                    set.upper_bound(models).is_some_and(|upper| {
                        upper.value < value
                            || (upper.value == value && (!strict || upper.strict))
                    })
                } else {
                    set.lower_bound(models).is_some_and(|lower| {
                        lower.value > value
                            || (lower.value == value && (!strict || lower.strict))
                    })
                }
            }
        }
    }

    /// Remove records derived above `level` and return their reason
    /// constraints. An atom that survives the backtrack may still imply
    /// a bound; the theory re-checks the returned constraints on its
    /// next propagation.
    pub fn backtrack(&mut self, level: u32) -> Vec<SignedConstraint> {
        let mut requeue = Vec::new();
        let mut seen = FxHashSet::default();
        for set in &mut self.sets {
            for records in [&mut set.lower, &mut set.upper, &mut set.disequalities] {
                records.retain(|record| {
                    if record.level <= level {
                        return true;
                    }
                    if seen.insert(record.reason.lit()) {
                        requeue.push(record.reason);
                    }
                    false
                });
            }
        }
        requeue
    }

    fn mark_changed(&mut self, var: u32) {
        if self.changed_set.insert(var) {
            self.changed.push(var);
        }
    }
}

/// View `cons` as `Σ coefᵢ·varᵢ ≤ rhs` (or `<`), folding the negation of
/// the handle into the coefficients. `None` for equalities and
/// disequalities.
pub(crate) fn inequality_form(
    repo: &ConstraintRepository,
    cons: SignedConstraint,
) -> Option<(Vec<(u32, Rational)>, Rational, bool)> {
    let data = repo.data(cons.id());
    let pairs: Vec<(u32, Rational)> = data
        .vars()
        .iter()
        .copied()
        .zip(data.coefs().iter().cloned())
        .collect();
    match (data.pred(), cons.is_negation()) {
        (Predicate::Eq, _) => None,
        (pred, false) => Some((pairs, data.rhs().clone(), pred.is_strict())),
        (pred, true) => {
            // not(p <= r) is -p < -r; not(p < r) is -p <= -r
            let negated = pairs
                .into_iter()
                .map(|(var, coef)| (var, -coef))
                .collect();
            Some((negated, -data.rhs().clone(), !pred.is_strict()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcsat_core::rational::{ratio, rational};
    use mcsat_core::{Model, Trail, VarKind};

    struct Fixture {
        repo: ConstraintRepository,
        trail: Trail,
        bounds: VariableBounds,
        bool_model: Model<bool>,
        lra_model: Model<Rational>,
    }

    impl Fixture {
        fn new(num_vars: usize) -> Self {
            let mut trail = Trail::new();
            trail.resize(VarKind::Rational, num_vars);
            let mut bounds = VariableBounds::new();
            bounds.resize(num_vars);
            let mut bool_model = Model::new();
            bool_model.resize(32);
            let mut lra_model = Model::new();
            lra_model.resize(num_vars);
            Self {
                repo: ConstraintRepository::new(),
                trail,
                bounds,
                bool_model,
                lra_model,
            }
        }

        // intern `Σ coef·var pred rhs`; `ge` flips <=/< into the negated sense
        fn make(
            &mut self,
            pairs: &[(u32, i64)],
            pred: Predicate,
            rhs: i64,
            ge: bool,
        ) -> SignedConstraint {
            let (cons, _) = self
                .repo
                .intern(
                    &mut self.trail,
                    pairs.iter().map(|(var, _)| *var),
                    pairs.iter().map(|(_, coef)| rational(*coef)),
                    pred,
                    rational(rhs),
                )
                .unwrap();
            if ge {
                cons.negate()
            } else {
                cons
            }
        }

        // put the atom on the Boolean model so the handle is true
        fn assert_true(&mut self, cons: SignedConstraint) {
            self.bool_model
                .set_value(cons.lit().ord(), !cons.lit().is_negation());
        }
    }

    // borrow the models from the fixture's fields so the bound sets can
    // be mutated in the same expression
    macro_rules! models {
        ($fixture:expr) => {
            Models {
                boolean: &$fixture.bool_model,
                owned: &$fixture.lra_model,
            }
        };
    }

    #[test]
    fn test_deduce_by_eliminating_bounded_variables() {
        let mut f = Fixture::new(5);
        let (x, y, z, w, a) = (0, 1, 2, 3, 4);

        // 2y + w > 2, 3z + a <= 1, x + 3y - 2z <= 3
        let c0 = f.make(&[(y, 2), (w, 1)], Predicate::Le, 2, true);
        let c1 = f.make(&[(z, 3), (a, 1)], Predicate::Le, 1, false);
        let c2 = f.make(&[(x, 1), (y, 3), (z, -2)], Predicate::Le, 3, false);
        for cons in [c0, c1, c2] {
            f.assert_true(cons);
        }
        f.lra_model.set_value(w, rational(1));
        f.lra_model.set_value(a, rational(2));

        let models = models!(f);
        f.bounds.update(&models, &f.repo, c0, 0);
        f.bounds.update(&models, &f.repo, c1, 0);

        // upper bound on x by eliminating y and z
        let models = models!(f);
        assert!(f.bounds.deduce(&models, &f.repo, c2, 0));
        let models = models!(f);
        let upper = f.bounds.set(x).upper_bound(&models).unwrap();
        assert_eq!(*upper.value(), ratio(5, 6));
        assert_eq!(upper.reason().lit(), c2.lit());
        assert!(upper.is_strict());
        assert_eq!(upper.chain().len(), 2);
        assert_eq!(upper.chain()[0].reason().lit(), c0.lit());
        assert_eq!(upper.chain()[1].reason().lit(), c1.lit());
    }

    #[test]
    fn test_deduce_through_derived_bounds() {
        let mut f = Fixture::new(5);
        let (x, y, z, w, a) = (0, 1, 2, 3, 4);

        // 5z + 2a - 2w >= 2, 2y - 3z + 3w >= 3, x + 2y + 3z + w + a <= 2
        let c0 = f.make(&[(z, 5), (a, 2), (w, -2)], Predicate::Lt, 2, true);
        let c1 = f.make(&[(y, 2), (z, -3), (w, 3)], Predicate::Lt, 3, true);
        let c2 = f.make(
            &[(x, 1), (y, 2), (z, 3), (w, 1), (a, 1)],
            Predicate::Le,
            2,
            false,
        );
        for cons in [c0, c1, c2] {
            f.assert_true(cons);
        }
        f.lra_model.set_value(w, rational(1));
        f.lra_model.set_value(a, rational(2));

        // lower bound of z
        let models = models!(f);
        f.bounds.update(&models, &f.repo, c0, 0);

        // lower bound of y from the lower bound of z
        let models = models!(f);
        assert!(f.bounds.deduce(&models, &f.repo, c1, 0));
        let models = models!(f);
        let lower = f.bounds.set(y).lower_bound(&models).unwrap();
        assert_eq!(*lower.value(), rational(0));
        assert!(!lower.is_strict());
        assert_eq!(lower.reason().lit(), c1.lit());
        assert_eq!(lower.chain().len(), 1);
        assert_eq!(lower.chain()[0].reason().lit(), c0.lit());

        // upper bound of x from the lower bounds of y and z
        let models = models!(f);
        assert!(f.bounds.deduce(&models, &f.repo, c2, 0));
        let models = models!(f);
        let upper = f.bounds.set(x).upper_bound(&models).unwrap();
        assert_eq!(*upper.value(), rational(-1));
        assert_eq!(upper.reason().lit(), c2.lit());
        assert_eq!(upper.chain().len(), 2);
        assert_eq!(upper.chain()[0].reason().lit(), c1.lit());
        assert_eq!(upper.chain()[1].reason().lit(), c0.lit());
    }

    #[test]
    fn test_stale_records_are_skipped() {
        let mut f = Fixture::new(2);
        let x = 0;

        let c16 = f.make(&[(x, 1)], Predicate::Le, 16, false);
        let c4 = f.make(&[(x, 1)], Predicate::Le, 4, false);
        f.assert_true(c16);
        f.assert_true(c4);

        let models = models!(f);
        f.bounds.update(&models, &f.repo, c16, 1);
        let models = models!(f);
        f.bounds.update(&models, &f.repo, c4, 2);

        let models = models!(f);
        assert_eq!(
            *f.bounds.set(x).upper_bound(&models).unwrap().value(),
            rational(4)
        );

        // unassign the x <= 4 atom: the looser record is current again
        f.bool_model.clear_value(c4.lit().ord());
        let models = models!(f);
        assert_eq!(
            *f.bounds.set(x).upper_bound(&models).unwrap().value(),
            rational(16)
        );
    }

    #[test]
    fn test_backtrack_requeues_reasons() {
        let mut f = Fixture::new(2);
        let x = 0;

        let c16 = f.make(&[(x, 1)], Predicate::Le, 16, false);
        let c4 = f.make(&[(x, 1)], Predicate::Le, 4, false);
        f.assert_true(c16);
        f.assert_true(c4);

        let models = models!(f);
        f.bounds.update(&models, &f.repo, c16, 1);
        let models = models!(f);
        f.bounds.update(&models, &f.repo, c4, 3);

        let requeue = f.bounds.backtrack(1);
        assert_eq!(requeue.len(), 1);
        assert_eq!(requeue[0].lit(), c4.lit());

        let models = models!(f);
        assert_eq!(
            *f.bounds.set(x).upper_bound(&models).unwrap().value(),
            rational(16)
        );
    }

    #[test]
    fn test_is_allowed_respects_strictness_and_disequalities() {
        let mut f = Fixture::new(2);
        let x = 0;

        // x < 10, x >= 0, x != 5
        let upper = f.make(&[(x, 1)], Predicate::Lt, 10, false);
        let lower = f.make(&[(x, 1)], Predicate::Lt, 0, true);
        let diseq = f.make(&[(x, 1)], Predicate::Eq, 5, false).negate();
        for cons in [upper, lower, diseq] {
            f.assert_true(cons);
        }

        let models = models!(f);
        f.bounds.update(&models, &f.repo, upper, 0);
        let models = models!(f);
        f.bounds.update(&models, &f.repo, lower, 0);
        let models = models!(f);
        f.bounds.update(&models, &f.repo, diseq.negate(), 0);

        let models = models!(f);
        let set = f.bounds.set(x);
        assert!(set.is_allowed(&models, &rational(0)));
        assert!(set.is_allowed(&models, &rational(9)));
        assert!(!set.is_allowed(&models, &rational(10)));
        assert!(!set.is_allowed(&models, &rational(-1)));
        assert!(!set.is_allowed(&models, &rational(5)));
    }

    #[test]
    fn test_is_implied() {
        let mut f = Fixture::new(2);
        let x = 0;

        let c4 = f.make(&[(x, 1)], Predicate::Le, 4, false);
        f.assert_true(c4);
        let models = models!(f);
        f.bounds.update(&models, &f.repo, c4, 0);

        // x <= 4 implies x <= 8 but not x <= 2, and refutes x > 4
        let c8 = f.make(&[(x, 1)], Predicate::Le, 8, false);
        let c2 = f.make(&[(x, 1)], Predicate::Le, 2, false);
        let models = models!(f);
        assert!(f.bounds.is_implied(&models, &f.repo, c8));
        assert!(!f.bounds.is_implied(&models, &f.repo, c2));
        assert!(!f.bounds.is_implied(&models, &f.repo, c4.negate()));
    }
}
