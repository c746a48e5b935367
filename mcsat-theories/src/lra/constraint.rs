//! Interned canonical linear constraints.
//!
//! A constraint is `Σ coefᵢ·varᵢ ⟨pred⟩ rhs` with `pred ∈ {≤, <, =}`.
//! Each interned constraint owns a dedicated Boolean variable (its
//! atom); a [`SignedConstraint`] pairs the constraint with a possibly
//! negated literal of that atom, so negating a constraint is negating
//! its literal. Negation flips the predicate semantics: `≤ ↔ >`,
//! `< ↔ ≥`, `= ↔ ≠`.
//!
//! Canonical form: variables sorted by ordinal, like terms merged, all
//! values scaled by the leading coefficient's magnitude, and the leading
//! coefficient made positive. Making the leading coefficient positive
//! may flip an inequality around (`p < r` becomes `¬(−p ≤ −r)`), which
//! is what lets `x ≤ y` and `y < x` share one atom.

use mcsat_core::{Error, Lit, Model, Rational, Result, Trail, VarKind};
use num_traits::Zero;
use rustc_hash::FxHashMap;
use std::fmt;

/// Order predicate of a canonical constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// `≤`
    Le,
    /// `<`
    Lt,
    /// `=`
    Eq,
}

impl Predicate {
    /// Check `lhs pred rhs`.
    #[must_use]
    pub fn holds(self, lhs: &Rational, rhs: &Rational) -> bool {
        match self {
            Predicate::Le => lhs <= rhs,
            Predicate::Lt => lhs < rhs,
            Predicate::Eq => lhs == rhs,
        }
    }

    /// Whether the satisfied region excludes the boundary.
    #[must_use]
    pub fn is_strict(self) -> bool {
        matches!(self, Predicate::Lt)
    }

    // The flipped predicate used when the leading coefficient changes
    // sign: p < r == not(-p <= -r), p <= r == not(-p < -r).
    fn complement_flip(self) -> Self {
        match self {
            Predicate::Le => Predicate::Lt,
            Predicate::Lt => Predicate::Le,
            Predicate::Eq => Predicate::Eq,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Le => write!(f, "<="),
            Predicate::Lt => write!(f, "<"),
            Predicate::Eq => write!(f, "="),
        }
    }
}

/// Index of an interned constraint in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(u32);

impl ConstraintId {
    /// Index into the repository.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A constraint together with a polarity: the positive literal denotes
/// the interned atom, the negative literal its negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignedConstraint {
    id: ConstraintId,
    lit: Lit,
}

impl SignedConstraint {
    /// Constraint id.
    #[must_use]
    pub const fn id(self) -> ConstraintId {
        self.id
    }

    /// Literal of this constraint sense.
    #[must_use]
    pub const fn lit(self) -> Lit {
        self.lit
    }

    /// Whether this handle denotes the negation of the atom.
    #[must_use]
    pub const fn is_negation(self) -> bool {
        self.lit.is_negation()
    }

    /// The opposite sense.
    #[must_use]
    pub const fn negate(self) -> Self {
        Self {
            id: self.id,
            lit: self.lit.negate(),
        }
    }

    /// The positive sense (the interned atom itself).
    #[must_use]
    pub const fn positive(self) -> Self {
        if self.lit.is_negation() {
            self.negate()
        } else {
            self
        }
    }
}

/// Stored data of one interned constraint (the positive atom).
#[derive(Debug)]
pub struct ConstraintData {
    lit: Lit,
    vars: Vec<u32>,
    coefs: Vec<Rational>,
    pred: Predicate,
    rhs: Rational,
}

impl ConstraintData {
    /// Literal of the positive atom.
    #[must_use]
    pub fn lit(&self) -> Lit {
        self.lit
    }

    /// Rational variable ordinals in watched order: positions 0 and 1
    /// are the watched positions.
    #[must_use]
    pub fn vars(&self) -> &[u32] {
        &self.vars
    }

    /// Coefficients, parallel to `vars`.
    #[must_use]
    pub fn coefs(&self) -> &[Rational] {
        &self.coefs
    }

    /// Predicate of the positive atom.
    #[must_use]
    pub fn pred(&self) -> Predicate {
        self.pred
    }

    /// Right-hand side of the positive atom.
    #[must_use]
    pub fn rhs(&self) -> &Rational {
        &self.rhs
    }

    /// Number of variables.
    #[must_use]
    pub fn size(&self) -> usize {
        self.vars.len()
    }

    /// Swap the variable/coefficient pairs at two positions.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.vars.swap(a, b);
        self.coefs.swap(a, b);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConstraintKey {
    vars: Vec<u32>,
    coefs: Vec<Rational>,
    pred: Predicate,
    rhs: Rational,
}

/// Repository of interned canonical constraints.
#[derive(Debug, Default)]
pub struct ConstraintRepository {
    constraints: Vec<ConstraintData>,
    interned: FxHashMap<ConstraintKey, ConstraintId>,
    // map Boolean ordinal -> constraint whose atom it is
    by_bool_var: FxHashMap<u32, ConstraintId>,
}

impl ConstraintRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Check whether no constraint has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Constraint data behind an id.
    #[must_use]
    pub fn data(&self, id: ConstraintId) -> &ConstraintData {
        &self.constraints[id.index()]
    }

    /// Mutable constraint data (for watched-position maintenance).
    #[must_use]
    pub fn data_mut(&mut self, id: ConstraintId) -> &mut ConstraintData {
        &mut self.constraints[id.index()]
    }

    /// Constraint owning the Boolean variable `ord`, if any.
    #[must_use]
    pub fn constraint_of(&self, ord: u32) -> Option<SignedConstraint> {
        self.by_bool_var.get(&ord).map(|id| self.handle(*id))
    }

    /// Positive handle of a constraint.
    #[must_use]
    pub fn handle(&self, id: ConstraintId) -> SignedConstraint {
        SignedConstraint {
            id,
            lit: self.constraints[id.index()].lit,
        }
    }

    /// Intern `Σ coefᵢ·varᵢ pred rhs` and return its signed handle.
    ///
    /// A constraint equal to an existing one after canonicalization
    /// returns the existing atom. Interning a new atom allocates a fresh
    /// Boolean variable on the trail. Returns `true` in the second
    /// component if a new atom was created.
    pub fn intern(
        &mut self,
        trail: &mut Trail,
        vars: impl IntoIterator<Item = u32>,
        coefs: impl IntoIterator<Item = Rational>,
        pred: Predicate,
        rhs: Rational,
    ) -> Result<(SignedConstraint, bool)> {
        let mut pairs: Vec<(u32, Rational)> = vars.into_iter().zip(coefs).collect();
        pairs.sort_by_key(|(var, _)| *var);

        // merge like terms, drop zero coefficients
        let mut merged: Vec<(u32, Rational)> = Vec::with_capacity(pairs.len());
        for (var, coef) in pairs {
            if merged.last().is_some_and(|(last, _)| *last == var) {
                if let Some((_, total)) = merged.last_mut() {
                    *total += coef;
                }
            } else {
                merged.push((var, coef));
            }
        }
        merged.retain(|(_, coef)| !coef.is_zero());
        if merged.is_empty() {
            return Err(Error::MalformedConstraint(
                "constraint has no variables".into(),
            ));
        }

        // scale by the leading coefficient's magnitude and orient the
        // leading coefficient positive, flipping into the negated sense
        // for inequalities
        let mut rhs = rhs;
        let mut pred = pred;
        let leading = merged[0].1.clone();
        let negated = leading < Rational::zero();
        let magnitude = if negated { -leading } else { leading };
        for (_, coef) in &mut merged {
            *coef = &*coef / &magnitude;
        }
        rhs /= &magnitude;
        if negated {
            for (_, coef) in &mut merged {
                *coef = -coef.clone();
            }
            rhs = -rhs;
            pred = pred.complement_flip();
        }
        // for an equality the sign flip stays in the same atom
        let lit_negated = negated && pred != Predicate::Eq;

        let key = ConstraintKey {
            vars: merged.iter().map(|(var, _)| *var).collect(),
            coefs: merged.iter().map(|(_, coef)| coef.clone()).collect(),
            pred,
            rhs: rhs.clone(),
        };
        if let Some(id) = self.interned.get(&key) {
            let lit = self.constraints[id.index()].lit;
            let handle = SignedConstraint {
                id: *id,
                lit: if lit_negated { lit.negate() } else { lit },
            };
            return Ok((handle, false));
        }

        // allocate the atom's Boolean variable
        let ord = trail.num_vars(VarKind::Bool) as u32;
        trail.resize(VarKind::Bool, ord as usize + 1);
        let lit = Lit::positive(ord);

        let id = ConstraintId(self.constraints.len() as u32);
        self.constraints.push(ConstraintData {
            lit,
            vars: key.vars.clone(),
            coefs: key.coefs.clone(),
            pred,
            rhs,
        });
        self.interned.insert(key, id);
        self.by_bool_var.insert(ord, id);

        let handle = SignedConstraint {
            id,
            lit: if lit_negated { lit.negate() } else { lit },
        };
        Ok((handle, true))
    }

    /// Truth value of `cons` (in its signed sense) under a full
    /// assignment of its variables; `None` if any variable is
    /// unassigned.
    #[must_use]
    pub fn eval(&self, model: &Model<Rational>, cons: SignedConstraint) -> Option<bool> {
        let data = self.data(cons.id());
        let mut sum = Rational::zero();
        for (var, coef) in data.vars.iter().zip(&data.coefs) {
            sum += coef * model.value(*var)?;
        }
        let atom = data.pred.holds(&sum, &data.rhs);
        Some(atom != cons.is_negation())
    }

    /// `rhs − Σᵢ≥₁ coefᵢ·value(varᵢ)` of the atom: the implied value of
    /// the position-0 term of a unit constraint, before dividing by the
    /// leading coefficient. All variables at positions ≥ 1 must be
    /// assigned.
    #[must_use]
    pub fn implied_value(&self, model: &Model<Rational>, id: ConstraintId) -> Option<Rational> {
        let data = self.data(id);
        let mut value = data.rhs.clone();
        for (var, coef) in data.vars.iter().zip(&data.coefs).skip(1) {
            value -= coef * model.value(*var)?;
        }
        Some(value)
    }

    /// Highest decision level among the constraint's variables. `None`
    /// if some variable is unassigned.
    #[must_use]
    pub fn decision_level(&self, trail: &Trail, id: ConstraintId) -> Option<u32> {
        use mcsat_core::Variable;
        let data = self.data(id);
        let mut level = 0;
        for var in &data.vars {
            level = level.max(
                trail.decision_level_of(Variable::new(*var, VarKind::Rational))?,
            );
        }
        Some(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcsat_core::rational::{ratio, rational};

    fn trail() -> Trail {
        let mut trail = Trail::new();
        trail.resize(VarKind::Rational, 10);
        trail
    }

    #[test]
    fn test_interning_is_canonical() {
        let mut repo = ConstraintRepository::new();
        let mut trail = trail();

        // 2x + 2y <= 4 and x + y <= 2 are the same constraint
        let (a, fresh_a) = repo
            .intern(
                &mut trail,
                [0, 1],
                [rational(2), rational(2)],
                Predicate::Le,
                rational(4),
            )
            .unwrap();
        let (b, fresh_b) = repo
            .intern(
                &mut trail,
                [1, 0],
                [rational(1), rational(1)],
                Predicate::Le,
                rational(2),
            )
            .unwrap();
        assert!(fresh_a);
        assert!(!fresh_b);
        assert_eq!(a, b);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_complementary_constraints_share_an_atom() {
        let mut repo = ConstraintRepository::new();
        let mut trail = trail();

        // x - y <= 0 (x <= y) and y - x < 0 (y < x) are complementary
        let (le, _) = repo
            .intern(
                &mut trail,
                [0, 1],
                [rational(1), rational(-1)],
                Predicate::Le,
                rational(0),
            )
            .unwrap();
        let (lt, fresh) = repo
            .intern(
                &mut trail,
                [0, 1],
                [rational(-1), rational(1)],
                Predicate::Lt,
                rational(0),
            )
            .unwrap();
        assert!(!fresh);
        assert_eq!(le.id(), lt.id());
        assert_eq!(le.lit(), lt.lit().negate());
    }

    #[test]
    fn test_eval_and_implied_value() {
        let mut repo = ConstraintRepository::new();
        let mut trail = trail();

        // x + 2y <= 5
        let (cons, _) = repo
            .intern(
                &mut trail,
                [0, 1],
                [rational(1), rational(2)],
                Predicate::Le,
                rational(5),
            )
            .unwrap();

        let mut model = Model::<Rational>::new();
        model.resize(2);
        model.set_value(1, rational(2));
        assert_eq!(repo.eval(&model, cons), None);
        // unit in x: x <= 5 - 2*2 = 1
        assert_eq!(repo.implied_value(&model, cons.id()), Some(rational(1)));

        model.set_value(0, rational(1));
        assert_eq!(repo.eval(&model, cons), Some(true));
        assert_eq!(repo.eval(&model, cons.negate()), Some(false));

        model.set_value(0, ratio(3, 2));
        assert_eq!(repo.eval(&model, cons), Some(false));
        assert_eq!(repo.eval(&model, cons.negate()), Some(true));
    }

    #[test]
    fn test_atom_owns_a_bool_var() {
        let mut repo = ConstraintRepository::new();
        let mut trail = trail();
        let before = trail.num_vars(VarKind::Bool);

        let (cons, _) = repo
            .intern(&mut trail, [0], [rational(1)], Predicate::Lt, rational(3))
            .unwrap();
        assert_eq!(trail.num_vars(VarKind::Bool), before + 1);
        assert_eq!(repo.constraint_of(cons.lit().ord()).map(|c| c.id()), Some(cons.id()));
    }

    #[test]
    fn test_empty_constraint_is_rejected() {
        let mut repo = ConstraintRepository::new();
        let mut trail = trail();
        let result = repo.intern(
            &mut trail,
            [0, 0],
            [rational(1), rational(-1)],
            Predicate::Le,
            rational(0),
        );
        assert!(matches!(result, Err(Error::MalformedConstraint(_))));
    }
}
