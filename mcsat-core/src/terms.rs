//! Interned term table for formula ingestion.
//!
//! Terms are hash-consed into a table and referenced by [`TermId`]. A
//! term id carries a polarity bit, so negation is free and only positive
//! terms are stored. The table distinguishes exactly the shapes the
//! internalizer consumes: the Boolean constant, uninterpreted atoms,
//! rational constants, products `c·v`, linear polynomials, the arithmetic
//! atoms `p ≥ 0`, `p = 0` and `a = b`, and the connectives `or`/`and`.
//!
//! Binary equality is canonicalized so the smaller operand (in term id
//! order) comes first; polynomials are canonicalized by combining like
//! monomials and sorting by variable, so syntactically different but
//! equal inputs intern to the same atom.

use crate::error::{Error, Result};
use crate::rational::Rational;
use num_traits::{One, Zero};
use rustc_hash::FxHashMap;
use std::fmt;

/// Sort of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    /// Propositional.
    Bool,
    /// Arithmetic.
    Real,
}

/// Reference to an interned term, with a polarity bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermId(u32);

impl TermId {
    fn positive_of(index: usize) -> Self {
        Self((index as u32) << 1)
    }

    /// Index into the term table.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 >> 1) as usize
    }

    /// Check whether this reference carries the negation bit.
    #[must_use]
    pub const fn is_negated(self) -> bool {
        (self.0 & 1) != 0
    }

    /// The same term without the negation bit.
    #[must_use]
    pub const fn positive(self) -> Self {
        Self(self.0 & !1)
    }

    /// Negation of this term reference.
    #[must_use]
    pub const fn negate(self) -> Self {
        Self(self.0 ^ 1)
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negated() {
            write!(f, "~t{}", self.index())
        } else {
            write!(f, "t{}", self.index())
        }
    }
}

/// Shape of an interned (positive) term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermKind {
    /// The Boolean constant `true`; `false` is its negation.
    True,
    /// Uninterpreted constant. The payload indexes the name table.
    Uninterpreted(u32),
    /// Rational constant.
    Constant(Rational),
    /// Product `coef · var` of a rational constant and a real variable.
    Product(Rational, TermId),
    /// Linear polynomial: monomials plus a constant offset. Monomials
    /// are `Uninterpreted` or `Product` terms sorted by variable id.
    Poly(Vec<TermId>, Rational),
    /// Atom `p ≥ 0` over a linear polynomial.
    GeAtom(TermId),
    /// Atom `p = 0` over a linear polynomial.
    EqAtom(TermId),
    /// Atom `a = b` between two real terms, `a < b` in term id order.
    BinEq(TermId, TermId),
    /// Disjunction.
    Or(Vec<TermId>),
    /// Conjunction.
    And(Vec<TermId>),
}

struct Term {
    kind: TermKind,
    sort: Sort,
}

/// Hash-consing term table.
pub struct TermManager {
    terms: Vec<Term>,
    interned: FxHashMap<TermKind, TermId>,
    names: Vec<String>,
}

impl Default for TermManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TermManager {
    /// Create a table holding the primitive terms.
    #[must_use]
    pub fn new() -> Self {
        let mut manager = Self {
            terms: Vec::new(),
            interned: FxHashMap::default(),
            names: Vec::new(),
        };
        manager.intern(TermKind::True, Sort::Bool);
        manager
    }

    /// The constant `true`.
    #[must_use]
    pub fn mk_true(&self) -> TermId {
        TermId::positive_of(0)
    }

    /// The constant `false`.
    #[must_use]
    pub fn mk_false(&self) -> TermId {
        self.mk_true().negate()
    }

    /// A fresh uninterpreted constant of the given sort. Names are not
    /// deduplicated; the parser keeps its own environment.
    pub fn mk_uninterpreted(&mut self, name: &str, sort: Sort) -> TermId {
        self.names.push(name.to_owned());
        let payload = (self.names.len() - 1) as u32;
        let index = self.terms.len();
        self.terms.push(Term {
            kind: TermKind::Uninterpreted(payload),
            sort,
        });
        TermId::positive_of(index)
    }

    /// A rational constant.
    pub fn mk_constant(&mut self, value: Rational) -> TermId {
        self.intern(TermKind::Constant(value), Sort::Real)
    }

    /// Kind of the positive part of `term`.
    #[must_use]
    pub fn kind(&self, term: TermId) -> &TermKind {
        &self.terms[term.index()].kind
    }

    /// Sort of `term`.
    #[must_use]
    pub fn sort(&self, term: TermId) -> Sort {
        self.terms[term.index()].sort
    }

    /// Name of an uninterpreted term.
    #[must_use]
    pub fn name(&self, term: TermId) -> Option<&str> {
        match self.kind(term) {
            TermKind::Uninterpreted(payload) => Some(&self.names[*payload as usize]),
            _ => None,
        }
    }

    /// Build the canonical polynomial `Σ coef·var + constant`.
    ///
    /// Like monomials are combined, zero coefficients dropped, monomials
    /// sorted by variable id. A polynomial that degenerates to a single
    /// monomial or a constant interns as that simpler term.
    pub fn mk_poly(
        &mut self,
        monomials: impl IntoIterator<Item = (TermId, Rational)>,
        constant: Rational,
    ) -> TermId {
        let mut combined: Vec<(TermId, Rational)> = Vec::new();
        for (var, coef) in monomials {
            debug_assert!(matches!(
                self.kind(var),
                TermKind::Uninterpreted(_)
            ));
            match combined.iter().position(|(other, _)| *other == var) {
                Some(slot) => combined[slot].1 = &combined[slot].1 + &coef,
                None => combined.push((var, coef)),
            }
        }
        combined.retain(|(_, coef)| !coef.is_zero());
        combined.sort_by_key(|(var, _)| *var);

        if combined.is_empty() {
            return self.mk_constant(constant);
        }
        if combined.len() == 1 && constant.is_zero() {
            let (var, coef) = combined.pop().unwrap_or_else(|| unreachable!());
            return self.mk_monomial(var, coef);
        }
        let args = combined
            .into_iter()
            .map(|(var, coef)| self.mk_monomial(var, coef))
            .collect();
        self.intern(TermKind::Poly(args, constant), Sort::Real)
    }

    fn mk_monomial(&mut self, var: TermId, coef: Rational) -> TermId {
        if coef.is_one() {
            var
        } else {
            self.intern(TermKind::Product(coef, var), Sort::Real)
        }
    }

    /// Decompose an arithmetic term into monomials and a constant.
    pub fn linear_view(&self, term: TermId) -> Result<(Vec<(TermId, Rational)>, Rational)> {
        match self.kind(term) {
            TermKind::Constant(value) => Ok((Vec::new(), value.clone())),
            TermKind::Uninterpreted(_) if self.sort(term) == Sort::Real => {
                Ok((vec![(term, Rational::one())], Rational::zero()))
            }
            TermKind::Product(coef, var) => Ok((vec![(*var, coef.clone())], Rational::zero())),
            TermKind::Poly(args, constant) => {
                let mut monomials = Vec::with_capacity(args.len());
                for arg in args {
                    match self.kind(*arg) {
                        TermKind::Uninterpreted(_) => monomials.push((*arg, Rational::one())),
                        TermKind::Product(coef, var) => monomials.push((*var, coef.clone())),
                        _ => {
                            return Err(Error::Unsupported(
                                "polynomial argument is not linear".into(),
                            ))
                        }
                    }
                }
                Ok((monomials, constant.clone()))
            }
            _ => Err(Error::Unsupported("term is not arithmetic".into())),
        }
    }

    /// Atom `lhs ≥ rhs` as `(lhs − rhs) ≥ 0`.
    pub fn mk_ge(&mut self, lhs: TermId, rhs: TermId) -> Result<TermId> {
        let difference = self.subtract(lhs, rhs)?;
        Ok(self.intern(TermKind::GeAtom(difference), Sort::Bool))
    }

    /// Atom `lhs ≤ rhs`, expressed as `(rhs − lhs) ≥ 0`.
    pub fn mk_le(&mut self, lhs: TermId, rhs: TermId) -> Result<TermId> {
        self.mk_ge(rhs, lhs)
    }

    /// Atom `lhs > rhs`, expressed as `¬(rhs − lhs ≥ 0)`.
    pub fn mk_gt(&mut self, lhs: TermId, rhs: TermId) -> Result<TermId> {
        Ok(self.mk_le(lhs, rhs)?.negate())
    }

    /// Atom `lhs < rhs`, expressed as `¬(lhs − rhs ≥ 0)`.
    pub fn mk_lt(&mut self, lhs: TermId, rhs: TermId) -> Result<TermId> {
        Ok(self.mk_ge(lhs, rhs)?.negate())
    }

    /// Arithmetic equality `lhs = rhs`.
    ///
    /// Equality between two plain variables, or between a variable and a
    /// constant, interns as a canonical [`TermKind::BinEq`]; anything
    /// else becomes `p = 0` over the difference polynomial with a
    /// positive leading coefficient.
    pub fn mk_arith_eq(&mut self, lhs: TermId, rhs: TermId) -> Result<TermId> {
        let plain_var = |manager: &Self, t: TermId| {
            matches!(manager.kind(t), TermKind::Uninterpreted(_)) && manager.sort(t) == Sort::Real
        };
        if plain_var(self, lhs) && plain_var(self, rhs) {
            if lhs == rhs {
                return Ok(self.mk_true());
            }
            let (a, b) = if lhs < rhs { (lhs, rhs) } else { (rhs, lhs) };
            return Ok(self.intern(TermKind::BinEq(a, b), Sort::Bool));
        }
        if plain_var(self, lhs) && matches!(self.kind(rhs), TermKind::Constant(_)) {
            return Ok(self.intern(TermKind::BinEq(lhs, rhs), Sort::Bool));
        }
        if plain_var(self, rhs) && matches!(self.kind(lhs), TermKind::Constant(_)) {
            return Ok(self.intern(TermKind::BinEq(rhs, lhs), Sort::Bool));
        }

        let difference = self.subtract(lhs, rhs)?;
        let (mut monomials, mut constant) = self.linear_view(difference)?;
        // orient the polynomial so equal equalities intern identically
        let negative_lead = monomials
            .first()
            .is_some_and(|(_, coef)| coef < &Rational::zero());
        if negative_lead {
            for (_, coef) in &mut monomials {
                *coef = -coef.clone();
            }
            constant = -constant;
        }
        let poly = self.mk_poly(monomials, constant);
        Ok(self.intern(TermKind::EqAtom(poly), Sort::Bool))
    }

    /// `lhs − rhs` as a canonical polynomial.
    pub fn subtract(&mut self, lhs: TermId, rhs: TermId) -> Result<TermId> {
        let (mut monomials, mut constant) = self.linear_view(lhs)?;
        let (rhs_monomials, rhs_constant) = self.linear_view(rhs)?;
        for (var, coef) in rhs_monomials {
            monomials.push((var, -coef));
        }
        constant -= rhs_constant;
        Ok(self.mk_poly(monomials, constant))
    }

    /// Disjunction of `args`.
    pub fn mk_or(&mut self, args: Vec<TermId>) -> TermId {
        self.mk_connective(args, false)
    }

    /// Conjunction of `args`.
    pub fn mk_and(&mut self, args: Vec<TermId>) -> TermId {
        self.mk_connective(args, true)
    }

    fn mk_connective(&mut self, mut args: Vec<TermId>, conjunction: bool) -> TermId {
        let absorbing = if conjunction { self.mk_false() } else { self.mk_true() };
        let neutral = absorbing.negate();
        if args.iter().any(|arg| *arg == absorbing) {
            return absorbing;
        }
        args.retain(|arg| *arg != neutral);
        args.sort();
        args.dedup();
        match args.len() {
            0 => neutral,
            1 => args[0],
            _ => {
                if conjunction {
                    self.intern(TermKind::And(args), Sort::Bool)
                } else {
                    self.intern(TermKind::Or(args), Sort::Bool)
                }
            }
        }
    }

    /// Implication `lhs ⇒ rhs` as `¬lhs ∨ rhs`.
    pub fn mk_implies(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        self.mk_or(vec![lhs.negate(), rhs])
    }

    /// Boolean equivalence as a conjunction of two implications.
    pub fn mk_iff(&mut self, lhs: TermId, rhs: TermId) -> TermId {
        let forward = self.mk_implies(lhs, rhs);
        let backward = self.mk_implies(rhs, lhs);
        self.mk_and(vec![forward, backward])
    }

    fn intern(&mut self, kind: TermKind, sort: Sort) -> TermId {
        if let Some(existing) = self.interned.get(&kind) {
            return *existing;
        }
        let index = self.terms.len();
        self.terms.push(Term {
            kind: kind.clone(),
            sort,
        });
        let id = TermId::positive_of(index);
        self.interned.insert(kind, id);
        id
    }
}
