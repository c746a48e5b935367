//! Disjunctions of literals.

use crate::literal::Lit;
use crate::model::Model;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Index, IndexMut};

/// A clause: an ordered disjunction of literals.
///
/// Positions 0 and 1 are the watched positions maintained by the Boolean
/// theory. Clauses have no identity of their own; the database hands out
/// stable [`crate::ClauseRef`] addresses instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Clause {
    lits: SmallVec<[Lit; 4]>,
}

impl Clause {
    /// Create a clause from literals in the given order.
    #[must_use]
    pub fn new(lits: impl IntoIterator<Item = Lit>) -> Self {
        Self {
            lits: lits.into_iter().collect(),
        }
    }

    /// Number of literals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lits.len()
    }

    /// Check whether the clause is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lits.is_empty()
    }

    /// Iterate over the literals in clause order.
    pub fn iter(&self) -> impl Iterator<Item = Lit> + '_ {
        self.lits.iter().copied()
    }

    /// Literals as a slice.
    #[must_use]
    pub fn literals(&self) -> &[Lit] {
        &self.lits
    }

    /// Check whether the clause contains `lit`.
    #[must_use]
    pub fn contains(&self, lit: Lit) -> bool {
        self.lits.contains(&lit)
    }

    /// Swap the literals at positions `a` and `b`.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.lits.swap(a, b);
    }

    /// Remove the literal at `position`, preserving the order of the rest.
    pub fn remove(&mut self, position: usize) -> Lit {
        self.lits.remove(position)
    }

    /// Sort literals with a comparator.
    pub fn sort_by<F: FnMut(&Lit, &Lit) -> Ordering>(&mut self, cmp: F) {
        self.lits.sort_by(cmp);
    }

    /// Truth value of the clause under a partial Boolean assignment:
    /// `Some(true)` if some literal is true, `Some(false)` if all literals
    /// are false, `None` otherwise.
    #[must_use]
    pub fn eval(&self, model: &Model<bool>) -> Option<bool> {
        let mut all_false = true;
        for lit in self.iter() {
            match lit.eval(model) {
                Some(true) => return Some(true),
                Some(false) => {}
                None => all_false = false,
            }
        }
        if all_false {
            Some(false)
        } else {
            None
        }
    }
}

impl Index<usize> for Clause {
    type Output = Lit;

    fn index(&self, position: usize) -> &Lit {
        &self.lits[position]
    }
}

impl IndexMut<usize> for Clause {
    fn index_mut(&mut self, position: usize) -> &mut Lit {
        &mut self.lits[position]
    }
}

impl FromIterator<Lit> for Clause {
    fn from_iter<I: IntoIterator<Item = Lit>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl PartialOrd for Clause {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Clauses order by size first, then lexicographically by literal codes.
/// This is the order used to deduplicate learned clauses.
impl Ord for Clause {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.lits.cmp(&other.lits))
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (position, lit) in self.iter().enumerate() {
            if position > 0 {
                write!(f, " or ")?;
            }
            write!(f, "{lit}")?;
        }
        write!(f, ")")
    }
}
