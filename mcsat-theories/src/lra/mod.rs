//! Linear real arithmetic theory.
//!
//! Constraints watch two rational variables (positions 0 and 1 of their
//! variable list). Assigning a watched variable either migrates the
//! watch to another unassigned variable, makes the constraint unit
//! (bounds are updated for the remaining variable), or fully assigns it
//! (the atom is semantically propagated if it is not on the trail).
//! Conflicts between a lower and an upper bound are resolved by
//! Fourier–Motzkin elimination, producing a conflict clause that is
//! false in the Boolean model.

pub mod bounds;
pub mod constraint;

use self::bounds::{BoundRecord, VariableBounds};
use self::constraint::{ConstraintId, ConstraintRepository, Predicate, SignedConstraint};
use mcsat_core::{
    Clause, Database, EventListener, Lit, Model, Rational, Result, Theory, Trail, Value, VarKind,
    Variable,
};
use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};
use rustc_hash::FxHashSet;
use std::any::Any;
use tracing::trace;

/// Views of the two partial models the theory reads.
#[derive(Clone, Copy)]
pub struct Models<'a> {
    /// Boolean model (atom truth values).
    pub boolean: &'a Model<bool>,
    /// Rational model owned by this theory.
    pub owned: &'a Model<Rational>,
}

impl<'a> Models<'a> {
    /// Borrow both models from the trail.
    #[must_use]
    pub fn new(trail: &'a Trail) -> Self {
        Self {
            boolean: trail.bool_model(),
            owned: trail.rational_model(),
        }
    }
}

/// Knobs of the arithmetic theory.
#[derive(Debug, Clone)]
pub struct LraOptions {
    /// Derive new bounds from constraints over bounded variables.
    pub prop_bounds: bool,
    /// Semantically propagate atoms entailed by current bounds.
    pub prop_unassigned: bool,
    /// Report every conflict found in one pass.
    pub return_all_conflicts: bool,
}

impl Default for LraOptions {
    fn default() -> Self {
        Self {
            prop_bounds: true,
            prop_unassigned: true,
            return_all_conflicts: false,
        }
    }
}

// Watched constraint entry with a rotating scan cursor over positions >= 2.
#[derive(Debug, Clone, Copy)]
struct WatchedConstraint {
    cons: ConstraintId,
    index: usize,
}

impl WatchedConstraint {
    fn new(cons: ConstraintId, size: usize) -> Self {
        Self {
            cons,
            index: 2.min(size.saturating_sub(1)),
        }
    }
}

/// Linear-arithmetic theory plugin.
pub struct LraTheory {
    repo: ConstraintRepository,
    bounds: VariableBounds,
    // per rational ordinal: constraints watching that variable
    watched: Vec<Vec<WatchedConstraint>>,
    // per rational ordinal: every constraint mentioning that variable
    occur: Vec<Vec<SignedConstraint>>,
    // last decided value of each rational variable
    cached_values: Model<Rational>,
    // variables whose bounds need a conflict check
    to_check: Vec<u32>,
    // constraints to re-examine after a backtrack disturbed the watches
    requeue: Vec<SignedConstraint>,
    options: LraOptions,
    cursor: u64,
}

impl Default for LraTheory {
    fn default() -> Self {
        Self::new()
    }
}

impl LraTheory {
    /// Create the theory with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(LraOptions::default())
    }

    /// Create the theory with explicit options.
    #[must_use]
    pub fn with_options(options: LraOptions) -> Self {
        Self {
            repo: ConstraintRepository::new(),
            bounds: VariableBounds::new(),
            watched: Vec::new(),
            occur: Vec::new(),
            cached_values: Model::new(),
            to_check: Vec::new(),
            requeue: Vec::new(),
            options,
            cursor: 0,
        }
    }

    /// Constraint repository (for inspection).
    #[must_use]
    pub fn repository(&self) -> &ConstraintRepository {
        &self.repo
    }

    /// Bound sets (for inspection).
    #[must_use]
    pub fn bounds(&self) -> &VariableBounds {
        &self.bounds
    }

    /// Intern `Σ coefᵢ·varᵢ pred rhs` and set up its watches. All
    /// rational variables must already exist on the trail. Interning an
    /// existing constraint returns its atom without further effect.
    pub fn new_constraint(
        &mut self,
        trail: &mut Trail,
        vars: impl IntoIterator<Item = u32>,
        coefs: impl IntoIterator<Item = Rational>,
        pred: Predicate,
        rhs: Rational,
    ) -> Result<SignedConstraint> {
        let (cons, fresh) = self.repo.intern(trail, vars, coefs, pred, rhs)?;
        if !fresh {
            return Ok(cons);
        }
        self.resize_to(trail);

        // move up to two unassigned variables to the watched positions
        let id = cons.id();
        let size = self.repo.data(id).size();
        let watch_slots = 2.min(size);
        let mut out = 0;
        for position in 0..size {
            if out == watch_slots {
                break;
            }
            let var = self.repo.data(id).vars()[position];
            if !trail.rational_model().is_defined(var) {
                self.repo.data_mut(id).swap(out, position);
                out += 1;
            }
        }

        let data = self.repo.data(id);
        self.watched[data.vars()[0] as usize].push(WatchedConstraint::new(id, size));
        if size > 1 {
            self.watched[data.vars()[1] as usize].push(WatchedConstraint::new(id, size));
        }
        for var in data.vars() {
            self.occur[*var as usize].push(cons.positive());
        }
        Ok(cons)
    }

    /// Tightest current bound values of a variable (for tests and model
    /// inspection).
    #[must_use]
    pub fn find_bounds(&self, trail: &Trail, ord: u32) -> (Option<Rational>, Option<Rational>) {
        let models = Models::new(trail);
        let set = self.bounds.set(ord);
        (
            set.lower_bound(&models).map(|record| record.value().clone()),
            set.upper_bound(&models).map(|record| record.value().clone()),
        )
    }

    fn resize_to(&mut self, trail: &Trail) {
        let num_vars = trail.num_vars(VarKind::Rational);
        if self.watched.len() < num_vars {
            self.watched.resize_with(num_vars, Vec::new);
        }
        if self.occur.len() < num_vars {
            self.occur.resize_with(num_vars, Vec::new);
        }
        self.bounds.resize(num_vars);
    }

    fn is_unit(&self, model: &Model<Rational>, id: ConstraintId) -> bool {
        let data = self.repo.data(id);
        if model.is_defined(data.vars()[0]) {
            return false;
        }
        data.size() == 1 || model.is_defined(data.vars()[1])
    }

    fn is_fully_assigned(&self, model: &Model<Rational>, id: ConstraintId) -> bool {
        model.is_defined(self.repo.data(id).vars()[0])
    }

    // record the bound implied by a unit constraint whose atom is assigned
    fn unit(&mut self, trail: &Trail, cons: SignedConstraint) {
        let models = Models::new(trail);
        self.bounds
            .update(&models, &self.repo, cons, trail.decision_level());
    }

    /// Semantically propagate the atom of a fully assigned constraint:
    /// assign its Boolean variable the value the rational model implies,
    /// at the highest decision level among the constraint's variables.
    fn propagate_atom(&mut self, trail: &mut Trail, id: ConstraintId) {
        let atom_lit = self.repo.data(id).lit();
        debug_assert!(atom_lit.eval(trail.bool_model()).is_none());

        let positive = self.repo.handle(id);
        let Some(value) = self.repo.eval(trail.rational_model(), positive) else {
            return;
        };
        let Some(level) = self.repo.decision_level(trail, id) else {
            return;
        };
        trail.bool_model_mut().set_value(atom_lit.ord(), value);
        trail.propagate(atom_lit.var(), None, level);
    }

    /// Process the watch list of a newly assigned rational variable.
    fn process_assigned_var(&mut self, trail: &mut Trail, ord: u32) {
        debug_assert!(trail.rational_model().is_defined(ord));

        let mut list = std::mem::take(&mut self.watched[ord as usize]);
        let mut position = 0;
        while position < list.len() {
            let mut watch = list[position];
            if self.replace_watch(trail.rational_model(), &mut watch, ord) {
                list.swap_remove(position);
                continue;
            }
            list[position] = watch;

            // unit or fully assigned
            let id = watch.cons;
            let atom = self.repo.data(id).lit();
            if atom.eval(trail.bool_model()).is_some() {
                if self.is_fully_assigned(trail.rational_model(), id) {
                    debug_assert_eq!(
                        self.repo.eval(trail.rational_model(), self.repo.handle(id)),
                        atom.eval(trail.bool_model())
                    );
                } else {
                    debug_assert!(self.is_unit(trail.rational_model(), id));
                    let cons = self.repo.handle(id);
                    self.unit(trail, cons);
                }
            } else if self.is_fully_assigned(trail.rational_model(), id) {
                self.propagate_atom(trail, id);
            } else {
                debug_assert!(self.is_unit(trail.rational_model(), id));
            }
            position += 1;
        }
        let slot = &mut self.watched[ord as usize];
        debug_assert!(slot.is_empty());
        *slot = list;
    }

    /// Try to replace the watch on `ord` (which just became assigned)
    /// with another unassigned variable from positions >= 2.
    fn replace_watch(
        &mut self,
        model: &Model<Rational>,
        watch: &mut WatchedConstraint,
        ord: u32,
    ) -> bool {
        let id = watch.cons;
        if self.repo.data(id).size() <= 1 {
            debug_assert_eq!(self.repo.data(id).vars()[0], ord);
            return false;
        }

        // both watched variables assigned: the constraint is fully assigned
        {
            let data = self.repo.data(id);
            if model.is_defined(data.vars()[0]) && model.is_defined(data.vars()[1]) {
                return false;
            }
        }

        // move the assigned variable to position 1
        if self.repo.data(id).vars()[1] != ord {
            self.repo.data_mut(id).swap(0, 1);
        }
        debug_assert_eq!(self.repo.data(id).vars()[1], ord);

        let size = self.repo.data(id).size();
        if size > 2 {
            debug_assert!((2..size).contains(&watch.index));
            let start = watch.index;
            loop {
                let candidate = self.repo.data(id).vars()[watch.index];
                if !model.is_defined(candidate) {
                    self.repo.data_mut(id).swap(1, watch.index);
                    self.watched[candidate as usize].push(*watch);
                    break;
                }
                watch.index += 1;
                if watch.index >= size {
                    watch.index = 2;
                }
                if watch.index == start {
                    break;
                }
            }
        }
        self.repo.data(id).vars()[1] != ord
    }

    /// Re-examine a constraint whose watches or bounds a backtrack may
    /// have disturbed: repair the watched positions and re-derive the
    /// bound or atom value where applicable.
    fn reexamine(&mut self, trail: &mut Trail, cons: SignedConstraint) {
        let id = cons.id();
        let size = self.repo.data(id).size();

        // pull unassigned variables back into the watched positions
        let watch_slots = 2.min(size);
        let mut out = 0;
        let mut moved = Vec::new();
        for position in 0..size {
            if out == watch_slots {
                break;
            }
            let var = self.repo.data(id).vars()[position];
            if !trail.rational_model().is_defined(var) {
                if position != out {
                    let displaced = self.repo.data(id).vars()[out];
                    self.repo.data_mut(id).swap(out, position);
                    if out < 2 && position >= 2 {
                        moved.push((displaced, var));
                    }
                }
                out += 1;
            }
        }
        for (displaced, var) in moved {
            let list = &mut self.watched[displaced as usize];
            if let Some(slot) = list.iter().position(|watch| watch.cons == id) {
                let watch = list.swap_remove(slot);
                self.watched[var as usize].push(watch);
            }
        }

        let atom = self.repo.data(id).lit();
        if self.is_fully_assigned(trail.rational_model(), id) {
            if atom.eval(trail.bool_model()).is_none() {
                self.propagate_atom(trail, id);
            }
        } else if self.is_unit(trail.rational_model(), id)
            && atom.eval(trail.bool_model()).is_some()
        {
            let positive = self.repo.handle(id);
            self.unit(trail, positive);
        }
    }

    /// Fourier–Motzkin style bound propagation: derive new bounds from
    /// constraints whose atom is assigned, to a fixpoint (capped).
    fn propagate_bounds(&mut self, trail: &Trail) {
        let level = trail.decision_level();
        if !trail.is_empty() {
            if let Some(entry) = trail.assigned(level).first() {
                if entry.var.kind() == VarKind::Rational {
                    let decided = entry.var.ord();
                    self.to_check.push(decided);
                    self.deduce_from_occurrences(trail, decided, level);
                }
            }
        }

        let max_rounds = trail.num_vars(VarKind::Rational).max(1);
        for _ in 0..max_rounds {
            let changed = self.bounds.changed();
            if changed.is_empty() {
                break;
            }
            for var in changed {
                self.to_check.push(var);
                self.deduce_from_occurrences(trail, var, level);
            }
        }
        // anything still queued is re-marked for the conflict sweep
        for var in self.bounds.changed() {
            self.to_check.push(var);
        }
    }

    fn deduce_from_occurrences(&mut self, trail: &Trail, var: u32, level: u32) {
        let occurrences = self.occur[var as usize].clone();
        for cons in occurrences {
            let models = Models::new(trail);
            if let Some(value) = cons.lit().eval(models.boolean) {
                let actual = if value { cons } else { cons.negate() };
                self.bounds.deduce(&models, &self.repo, actual, level);
            }
        }
    }

    /// Semantically propagate unassigned atoms entailed by the current
    /// bounds after a rational decision.
    fn propagate_unassigned(&mut self, trail: &mut Trail) {
        let level = trail.decision_level();
        if level == 0 {
            return;
        }
        let Some(entry) = trail.assigned(level).first() else {
            return;
        };
        if entry.var.kind() != VarKind::Rational {
            return;
        }

        let occurrences = self.occur[entry.var.index()].clone();
        for cons in occurrences {
            if cons.lit().eval(trail.bool_model()).is_some() {
                continue;
            }
            for candidate in [cons, cons.negate()] {
                let models = Models::new(trail);
                if self.bounds.is_implied(&models, &self.repo, candidate) {
                    trail
                        .bool_model_mut()
                        .set_value(candidate.lit().ord(), !candidate.lit().is_negation());
                    trail.propagate(candidate.lit().var(), None, level);
                    break;
                }
            }
        }
    }

    /// Check queued variables for bound and disequality conflicts;
    /// propagate implied equalities along the way.
    fn finish(&mut self, trail: &mut Trail) -> Vec<Clause> {
        for var in self.bounds.changed() {
            self.to_check.push(var);
        }

        let queue = std::mem::take(&mut self.to_check);
        let mut checked = FxHashSet::default();
        let mut conflicts = Vec::new();
        for var in queue {
            if !checked.insert(var) {
                continue;
            }
            if let Some(conflict) = self.check_bounds(trail, var) {
                trace!(var, "arithmetic bound conflict");
                conflicts.push(conflict);
                if !self.options.return_all_conflicts {
                    break;
                }
            }
        }
        conflicts
    }

    /// Detect a bound or disequality conflict on `var`; otherwise
    /// propagate the implied equality if the bounds pin the variable.
    fn check_bounds(&mut self, trail: &mut Trail, var: u32) -> Option<Clause> {
        let (lower, upper) = {
            let models = Models::new(trail);
            let set = self.bounds.set(var);
            match (set.lower_bound(&models), set.upper_bound(&models)) {
                (Some(lower), Some(upper)) => (lower.clone(), upper.clone()),
                _ => return None,
            }
        };

        let either_strict = lower.is_strict() || upper.is_strict();
        if lower.value() > upper.value() || (lower.value() == upper.value() && either_strict) {
            return self.bound_conflict(trail, var, &lower, &upper, None);
        }

        if lower.value() == upper.value() {
            let disequality = {
                let models = Models::new(trail);
                self.bounds
                    .set(var)
                    .disequality(&models, lower.value())
                    .cloned()
            };
            if let Some(disequality) = disequality {
                return self.bound_conflict(trail, var, &lower, &upper, Some(&disequality));
            }
            if !trail.rational_model().is_defined(var) {
                // the bounds pin the variable: propagate its value
                let value = lower.value().clone();
                let level = trail.decision_level();
                trail.rational_model_mut().set_value(var, value);
                trail.propagate(Variable::new(var, VarKind::Rational), None, level);
            }
        }
        None
    }

    /// Build the conflict clause for a pair of contradicting bounds by
    /// eliminating the shared variable (and any variable still
    /// unassigned) with Fourier–Motzkin combination. With `disequality`
    /// present the combination is forced strict and the disequality
    /// reason joins the clause.
    fn bound_conflict(
        &mut self,
        trail: &mut Trail,
        var: u32,
        lower: &BoundRecord,
        upper: &BoundRecord,
        disequality: Option<&BoundRecord>,
    ) -> Option<Clause> {
        let coef_of = |data: &constraint::ConstraintData, target: u32| {
            data.vars()
                .iter()
                .position(|v| *v == target)
                .map(|position| data.coefs()[position].clone())
        };

        let lower_data = self.repo.data(lower.reason().id());
        let upper_data = self.repo.data(upper.reason().id());
        let lower_coef = coef_of(lower_data, var)?;
        let upper_coef = coef_of(upper_data, var)?;

        // multipliers chosen to cancel the shared variable; signs fold
        // the handles' negations into the combination
        let lower_mult = if lower_coef < Rational::zero() {
            Rational::one()
        } else {
            -Rational::one()
        };
        let upper_mult = lower_coef.abs() / &upper_coef;

        let mut poly: Vec<(u32, Rational)> = Vec::new();
        let mut rhs = Rational::zero();
        accumulate(&mut poly, &mut rhs, lower_data, &lower_mult, var);
        accumulate(&mut poly, &mut rhs, upper_data, &upper_mult, var);

        let mut strict =
            disequality.is_some() || lower.is_strict() || upper.is_strict();
        let mut atoms = vec![lower.reason(), upper.reason()];
        if let Some(disequality) = disequality {
            atoms.push(disequality.reason());
        }

        // eliminate variables that are still unassigned using their
        // current bounds; their reasons join the clause
        let max_rounds = 2 * trail.num_vars(VarKind::Rational).max(1);
        for _ in 0..max_rounds {
            poly.retain(|(_, coef)| !coef.is_zero());
            let unassigned = poly
                .iter()
                .find(|(v, _)| !trail.rational_model().is_defined(*v))
                .cloned();
            let Some((eliminate, coef)) = unassigned else {
                break;
            };
            let record = {
                let models = Models::new(trail);
                let set = self.bounds.set(eliminate);
                if coef > Rational::zero() {
                    set.lower_bound(&models).cloned()
                } else {
                    set.upper_bound(&models).cloned()
                }
            }?;
            let record_data = self.repo.data(record.reason().id());
            let record_coef = coef_of(record_data, eliminate)?;
            let mult = -coef / &record_coef;
            // drop the eliminated variable from the combination
            poly.retain(|(v, _)| *v != eliminate);
            accumulate(&mut poly, &mut rhs, record_data, &mult, eliminate);
            strict |= record.is_strict();
            atoms.push(record.reason());
        }
        poly.retain(|(_, coef)| !coef.is_zero());
        if poly
            .iter()
            .any(|(v, _)| !trail.rational_model().is_defined(*v))
        {
            return None;
        }

        let mut literals: Vec<Lit> = Vec::with_capacity(atoms.len() + 1);
        let mut seen = FxHashSet::default();
        for atom in &atoms {
            if seen.insert(atom.lit()) {
                literals.push(atom.lit().negate());
            }
        }

        let pred = if strict { Predicate::Lt } else { Predicate::Le };
        if poly.is_empty() {
            // the combination degenerated to `0 pred rhs`
            if pred.holds(&Rational::zero(), &rhs) {
                debug_assert!(false, "combined constant constraint is not falsified");
                return None;
            }
        } else {
            let combined = self
                .new_constraint(
                    trail,
                    poly.iter().map(|(v, _)| *v),
                    poly.iter().map(|(_, coef)| coef.clone()),
                    pred,
                    rhs,
                )
                .ok()?;
            match combined.lit().eval(trail.bool_model()) {
                None => {
                    // make the clause false in the Boolean model too
                    let truth = self.repo.eval(trail.rational_model(), combined)?;
                    if truth {
                        debug_assert!(false, "combined constraint holds in the model");
                        return None;
                    }
                    let atom_value = !combined.is_negation() == truth;
                    let level = self.repo.decision_level(trail, combined.id())?;
                    trail
                        .bool_model_mut()
                        .set_value(combined.lit().ord(), atom_value);
                    trail.propagate(combined.lit().var(), None, level);
                }
                Some(true) => {
                    debug_assert!(false, "combined constraint already true on the trail");
                    return None;
                }
                Some(false) => {}
            }
            literals.push(combined.lit());
        }
        Some(Clause::new(literals))
    }

    fn internal_decide(&mut self, trail: &mut Trail, var: Variable) {
        let cached = self
            .cached_values
            .value(var.ord())
            .cloned()
            .unwrap_or_else(Rational::zero);
        let value = {
            let models = Models::new(trail);
            let set = self.bounds.set(var.ord());
            if set.is_allowed(&models, &cached) {
                cached
            } else if let Some(integer) = find_integer(&models, set) {
                integer
            } else {
                // bisect from the upper bound toward the lower bound
                let lower = set
                    .lower_bound(&models)
                    .map(|record| record.value().clone());
                let upper = set
                    .upper_bound(&models)
                    .map(|record| record.value().clone());
                let (Some(lower), Some(upper)) = (lower, upper) else {
                    debug_assert!(false, "no integer value without both bounds");
                    return;
                };
                let two = Rational::from_integer(2.into());
                let mut value = upper;
                while !set.is_allowed(&models, &value) {
                    value = (&lower + &value) / &two;
                }
                value
            }
        };

        self.cached_values.set_value(var.ord(), value.clone());
        trail.rational_model_mut().set_value(var.ord(), value);
        trail.decide(var);
    }
}

// add `mult` times the constraint polynomial of `data` into the running
// combination, skipping the variable being eliminated
fn accumulate(
    poly: &mut Vec<(u32, Rational)>,
    rhs: &mut Rational,
    data: &constraint::ConstraintData,
    mult: &Rational,
    skip_var: u32,
) {
    for (v, coef) in data.vars().iter().zip(data.coefs()) {
        if *v == skip_var {
            continue;
        }
        match poly.iter().position(|(existing, _)| existing == v) {
            Some(slot) => poly[slot].1 = &poly[slot].1 + &(coef * mult),
            None => poly.push((*v, coef * mult)),
        }
    }
    *rhs += data.rhs() * mult;
}

/// Find the integer of smallest absolute value allowed by the bounds,
/// preferring positive values on ties.
fn find_integer(models: &Models<'_>, set: &bounds::BoundSet) -> Option<Rational> {
    // integer range implied by the bounds
    let lower = set.lower_bound(models).map(|record| {
        let mut bound = record.value().ceil();
        if record.is_strict() && bound == *record.value() {
            bound += Rational::one();
        }
        bound.to_integer()
    });
    let upper = set.upper_bound(models).map(|record| {
        let mut bound = record.value().floor();
        if record.is_strict() && bound == *record.value() {
            bound -= Rational::one();
        }
        bound.to_integer()
    });
    if let (Some(low), Some(high)) = (&lower, &upper) {
        if low > high {
            return None;
        }
    }

    let zero = BigInt::from(0);
    // a range entirely above zero: walk up from its smallest value
    if lower.as_ref().is_some_and(|low| *low > zero) {
        let mut candidate = lower.unwrap_or_default();
        loop {
            if upper.as_ref().is_some_and(|high| candidate > *high) {
                return None;
            }
            let value = Rational::from_integer(candidate.clone());
            if set.is_allowed(models, &value) {
                return Some(value);
            }
            candidate += BigInt::one();
        }
    }
    // a range entirely below zero: walk down from its largest value
    if upper.as_ref().is_some_and(|high| *high < zero) {
        let mut candidate = upper.unwrap_or_default();
        loop {
            if lower.as_ref().is_some_and(|low| candidate < *low) {
                return None;
            }
            let value = Rational::from_integer(candidate.clone());
            if set.is_allowed(models, &value) {
                return Some(value);
            }
            candidate -= BigInt::one();
        }
    }

    // zero lies within the bounds: zigzag outward, positives first
    let mut magnitude = zero;
    loop {
        let positive_alive = upper.as_ref().is_none_or(|high| magnitude <= *high);
        let negative_alive = lower.as_ref().is_none_or(|low| -&magnitude >= *low);
        if !positive_alive && !negative_alive {
            return None;
        }
        if positive_alive {
            let value = Rational::from_integer(magnitude.clone());
            if set.is_allowed(models, &value) {
                return Some(value);
            }
        }
        if negative_alive && !magnitude.is_zero() {
            let value = Rational::from_integer(-&magnitude);
            if set.is_allowed(models, &value) {
                return Some(value);
            }
        }
        magnitude += BigInt::one();
    }
}

impl EventListener for LraTheory {
    fn on_before_backtrack(&mut self, _db: &mut Database, trail: &mut Trail, level: u32) {
        // constraints touching unassigned variables get re-examined
        let mut queued: FxHashSet<Lit> = self.requeue.iter().map(|cons| cons.lit()).collect();
        let mut current = trail.decision_level();
        while current > level {
            for entry in trail.assigned(current) {
                if entry.var.kind() != VarKind::Rational {
                    continue;
                }
                if entry.var.index() >= self.occur.len() {
                    continue;
                }
                for cons in &self.occur[entry.var.index()] {
                    if queued.insert(cons.lit()) {
                        self.requeue.push(*cons);
                    }
                }
            }
            current -= 1;
        }
        for cons in self.bounds.backtrack(level) {
            if queued.insert(cons.lit()) {
                self.requeue.push(cons);
            }
        }
    }

    fn on_variable_resize(&mut self, kind: VarKind, num_vars: usize) {
        if kind == VarKind::Rational {
            if self.watched.len() < num_vars {
                self.watched.resize_with(num_vars, Vec::new);
            }
            if self.occur.len() < num_vars {
                self.occur.resize_with(num_vars, Vec::new);
            }
            self.bounds.resize(num_vars);
            self.cached_values.resize(num_vars);
        }
    }
}

impl Theory for LraTheory {
    fn propagate(&mut self, _db: &mut Database, trail: &mut Trail) -> Vec<Clause> {
        self.resize_to(trail);

        for cons in std::mem::take(&mut self.requeue) {
            self.reexamine(trail, cons);
        }

        let entries = trail.assigned_since(self.cursor);
        self.cursor = trail.timestamp();
        for entry in entries {
            match entry.var.kind() {
                VarKind::Bool => {
                    let Some(cons) = self.repo.constraint_of(entry.var.ord()) else {
                        continue;
                    };
                    if self.is_fully_assigned(trail.rational_model(), cons.id()) {
                        debug_assert_eq!(
                            self.repo.eval(trail.rational_model(), cons),
                            cons.lit().eval(trail.bool_model())
                        );
                    } else if self.is_unit(trail.rational_model(), cons.id()) {
                        self.unit(trail, cons);
                    }
                }
                VarKind::Rational => self.process_assigned_var(trail, entry.var.ord()),
            }
        }

        if self.options.prop_bounds {
            self.propagate_bounds(trail);
        }
        if self.options.prop_unassigned {
            self.propagate_unassigned(trail);
        }
        self.finish(trail)
    }

    fn decide(&mut self, _db: &mut Database, trail: &mut Trail, var: Variable) {
        if var.kind() != VarKind::Rational {
            return;
        }
        self.internal_decide(trail, var);
    }

    fn decide_to_value(&mut self, trail: &mut Trail, var: Variable, value: &Value) {
        if var.kind() != VarKind::Rational {
            return;
        }
        if trail.rational_model().is_defined(var.ord()) {
            return;
        }
        if let Value::Rational(value) = value {
            let allowed = {
                let models = Models::new(trail);
                self.bounds.set(var.ord()).is_allowed(&models, value)
            };
            if allowed {
                self.cached_values.set_value(var.ord(), value.clone());
                trail.rational_model_mut().set_value(var.ord(), value.clone());
                trail.decide(var);
            } else {
                // the assumed value contradicts current bounds; fall back
                // to a consistent decision
                self.internal_decide(trail, var);
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
