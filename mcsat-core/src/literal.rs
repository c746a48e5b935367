//! Signed Boolean literals.
//!
//! A literal packs a Boolean variable ordinal and a sign into a single
//! `u32`: `ord << 1 | sign`. Negation is a XOR of the low bit, so
//! `negate` is an involution and `var` is a single shift.

use crate::model::Model;
use crate::variable::{VarKind, Variable};
use std::fmt;

/// A literal: a Boolean variable or its negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lit(u32);

impl Lit {
    /// Positive literal of the Boolean variable with ordinal `ord`.
    #[must_use]
    pub const fn positive(ord: u32) -> Self {
        Self(ord << 1)
    }

    /// Negative literal of the Boolean variable with ordinal `ord`.
    #[must_use]
    pub const fn negative(ord: u32) -> Self {
        Self((ord << 1) | 1)
    }

    /// Ordinal of the underlying Boolean variable.
    #[must_use]
    pub const fn ord(self) -> u32 {
        self.0 >> 1
    }

    /// The underlying Boolean [`Variable`].
    #[must_use]
    pub const fn var(self) -> Variable {
        Variable::new(self.ord(), VarKind::Bool)
    }

    /// Check whether this literal is the plain variable.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        (self.0 & 1) == 0
    }

    /// Check whether this literal is a negated variable.
    #[must_use]
    pub const fn is_negation(self) -> bool {
        (self.0 & 1) != 0
    }

    /// Negation of this literal. Involution: `l.negate().negate() == l`.
    #[must_use]
    pub const fn negate(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// Dense code usable as a watch-list index.
    #[must_use]
    pub const fn code(self) -> usize {
        self.0 as usize
    }

    /// Truth value of this literal under a partial Boolean assignment.
    ///
    /// `None` when the variable is unassigned.
    #[must_use]
    pub fn eval(self, model: &Model<bool>) -> Option<bool> {
        model
            .value(self.ord())
            .map(|value| *value != self.is_negation())
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negation() {
            write!(f, "not(b{})", self.ord())
        } else {
            write!(f, "b{}", self.ord())
        }
    }
}
