//! Term-to-solver internalization.
//!
//! Walks asserted terms bottom-up, creating solver variables for
//! uninterpreted constants, interning linear constraints for arithmetic
//! atoms, and Tseitin-encoding `or`/`and` with a fresh variable, binary
//! clauses and one big clause. Top-level assertions become unit clauses.

use crate::solver::Solver;
use mcsat_core::terms::{Sort, TermId, TermKind, TermManager};
use mcsat_core::{Lit, Rational, Result, VarKind};
use mcsat_theories::lra::constraint::Predicate;
use num_traits::Zero;
use rustc_hash::{FxHashMap, FxHashSet};

/// Translates terms into clauses and linear constraints.
pub struct Internalizer<'a> {
    manager: &'a TermManager,
    // positive Boolean term -> its literal
    bool_map: FxHashMap<TermId, Lit>,
    // real uninterpreted term -> rational ordinal
    rational_map: FxHashMap<TermId, u32>,
}

impl<'a> Internalizer<'a> {
    /// Create an internalizer over a term table.
    #[must_use]
    pub fn new(manager: &'a TermManager) -> Self {
        Self {
            manager,
            bool_map: FxHashMap::default(),
            rational_map: FxHashMap::default(),
        }
    }

    /// Literal of a Boolean term internalized earlier.
    #[must_use]
    pub fn literal_for(&self, term: TermId) -> Option<Lit> {
        let lit = self.bool_map.get(&term.positive())?;
        Some(if term.is_negated() { lit.negate() } else { *lit })
    }

    /// Rational ordinal of a real uninterpreted term.
    #[must_use]
    pub fn rational_var(&self, term: TermId) -> Option<u32> {
        self.rational_map.get(&term).copied()
    }

    /// Internalize `assertions` and assert each as a unit clause.
    pub fn assert_formulas(&mut self, solver: &mut Solver, assertions: &[TermId]) -> Result<()> {
        for assertion in assertions {
            self.internalize_subterms(solver, assertion.positive())?;
        }
        for assertion in assertions {
            if assertion.positive() == self.manager.mk_true() {
                if assertion.is_negated() {
                    // `false` asserted: the empty clause
                    solver.assert_clause([])?;
                }
                continue;
            }
            let lit = self
                .literal_for(*assertion)
                .unwrap_or_else(|| unreachable!("assertion was internalized"));
            solver.assert_clause([lit])?;
        }
        Ok(())
    }

    // post-order walk over the positive subterms
    fn internalize_subterms(&mut self, solver: &mut Solver, root: TermId) -> Result<()> {
        debug_assert!(!root.is_negated());
        let mut visited: FxHashSet<TermId> = FxHashSet::default();
        let mut stack: Vec<(TermId, bool)> = vec![(root, false)];
        while let Some((term, expanded)) = stack.pop() {
            if expanded {
                self.internalize_term(solver, term)?;
                continue;
            }
            if !visited.insert(term) {
                continue;
            }
            stack.push((term, true));
            for child in self.children(term) {
                let child = child.positive();
                if !visited.contains(&child) {
                    stack.push((child, false));
                }
            }
        }
        Ok(())
    }

    fn children(&self, term: TermId) -> Vec<TermId> {
        match self.manager.kind(term) {
            TermKind::GeAtom(poly) | TermKind::EqAtom(poly) => vec![*poly],
            TermKind::BinEq(lhs, rhs) => vec![*lhs, *rhs],
            TermKind::Or(args) | TermKind::And(args) => args.clone(),
            TermKind::Poly(args, _) => args.clone(),
            TermKind::Product(_, var) => vec![*var],
            _ => Vec::new(),
        }
    }

    fn internalize_term(&mut self, solver: &mut Solver, term: TermId) -> Result<()> {
        match self.manager.kind(term) {
            TermKind::True
            | TermKind::Constant(_)
            | TermKind::Product(_, _)
            | TermKind::Poly(_, _) => Ok(()),
            TermKind::Uninterpreted(_) => {
                match self.manager.sort(term) {
                    Sort::Bool => {
                        let var = solver.make_variable(VarKind::Bool);
                        self.bool_map.insert(term, Lit::positive(var.ord()));
                    }
                    Sort::Real => {
                        let var = solver.make_variable(VarKind::Rational);
                        self.rational_map.insert(term, var.ord());
                    }
                }
                Ok(())
            }
            TermKind::GeAtom(poly) => {
                let (monomials, constant) = self.manager.linear_view(*poly)?;
                if monomials.is_empty() {
                    // a ground atom: pin a fresh variable to its truth
                    let truth = constant >= Rational::zero();
                    self.assert_ground_atom(solver, term, truth)
                } else {
                    // p >= 0 is -p <= constant
                    let vars = self.ordinals(&monomials);
                    let coefs = monomials.iter().map(|(_, coef)| -coef.clone());
                    let cons =
                        solver.linear_constraint(vars, coefs, Predicate::Le, constant)?;
                    self.bool_map.insert(term, cons.lit());
                    Ok(())
                }
            }
            TermKind::EqAtom(poly) => {
                let (monomials, constant) = self.manager.linear_view(*poly)?;
                if monomials.is_empty() {
                    let truth = constant.is_zero();
                    self.assert_ground_atom(solver, term, truth)
                } else {
                    let vars = self.ordinals(&monomials);
                    let coefs = monomials.iter().map(|(_, coef)| coef.clone());
                    let cons =
                        solver.linear_constraint(vars, coefs, Predicate::Eq, -constant)?;
                    self.bool_map.insert(term, cons.lit());
                    Ok(())
                }
            }
            TermKind::BinEq(lhs, rhs) => {
                let lhs_ord = self.rational_map[lhs];
                let cons = if let TermKind::Constant(value) = self.manager.kind(*rhs) {
                    solver.linear_constraint(
                        [lhs_ord],
                        [Rational::from_integer(1.into())],
                        Predicate::Eq,
                        value.clone(),
                    )?
                } else {
                    let rhs_ord = self.rational_map[rhs];
                    solver.linear_constraint(
                        [lhs_ord, rhs_ord],
                        [
                            Rational::from_integer(1.into()),
                            Rational::from_integer((-1).into()),
                        ],
                        Predicate::Eq,
                        Rational::zero(),
                    )?
                };
                self.bool_map.insert(term, cons.lit());
                Ok(())
            }
            TermKind::Or(args) => {
                let args = args.clone();
                let var = solver.make_variable(VarKind::Bool);
                let lit = Lit::positive(var.ord());
                self.bool_map.insert(term, lit);

                let mut big = Vec::with_capacity(args.len() + 1);
                for arg in args {
                    let arg_lit = self
                        .literal_for(arg)
                        .unwrap_or_else(|| unreachable!("children are internalized first"));
                    solver.assert_clause([lit, arg_lit.negate()])?;
                    big.push(arg_lit);
                }
                big.push(lit.negate());
                solver.assert_clause(big)?;
                Ok(())
            }
            TermKind::And(args) => {
                let args = args.clone();
                let var = solver.make_variable(VarKind::Bool);
                let lit = Lit::positive(var.ord());
                self.bool_map.insert(term, lit);

                let mut big = Vec::with_capacity(args.len() + 1);
                big.push(lit);
                for arg in args {
                    let arg_lit = self
                        .literal_for(arg)
                        .unwrap_or_else(|| unreachable!("children are internalized first"));
                    solver.assert_clause([lit.negate(), arg_lit])?;
                    big.push(arg_lit.negate());
                }
                solver.assert_clause(big)?;
                Ok(())
            }
        }
    }

    fn ordinals(&self, monomials: &[(TermId, Rational)]) -> Vec<u32> {
        monomials
            .iter()
            .map(|(var, _)| self.rational_map[var])
            .collect()
    }

    fn assert_ground_atom(
        &mut self,
        solver: &mut Solver,
        term: TermId,
        truth: bool,
    ) -> Result<()> {
        let var = solver.make_variable(VarKind::Bool);
        let lit = Lit::positive(var.ord());
        self.bool_map.insert(term, lit);
        solver.assert_clause([if truth { lit } else { lit.negate() }])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SolverResult;
    use mcsat_core::smtlib::parse_script;
    use mcsat_core::SolverConfig;

    fn solve(input: &str) -> SolverResult {
        let mut manager = TermManager::new();
        let script = parse_script(input, &mut manager).unwrap();
        let mut solver = Solver::for_qf_lra(SolverConfig::default());
        let mut internalizer = Internalizer::new(&manager);
        internalizer
            .assert_formulas(&mut solver, &script.assertions)
            .unwrap();
        solver.check()
    }

    #[test]
    fn test_boolean_sat() {
        let result = solve(
            "(declare-const p Bool) (declare-const q Bool)
             (assert (or p q)) (assert (not p))",
        );
        assert_eq!(result, SolverResult::Sat);
    }

    #[test]
    fn test_boolean_unsat() {
        let result = solve(
            "(declare-const p Bool)
             (assert p) (assert (not p))",
        );
        assert_eq!(result, SolverResult::Unsat);
    }

    #[test]
    fn test_arithmetic_sat() {
        let result = solve(
            "(declare-const x Real) (declare-const y Real)
             (assert (<= x y)) (assert (< y 3)) (assert (>= x 1))",
        );
        assert_eq!(result, SolverResult::Sat);
    }

    #[test]
    fn test_arithmetic_unsat() {
        let result = solve(
            "(declare-const x Real)
             (assert (< x 0)) (assert (> x 1))",
        );
        assert_eq!(result, SolverResult::Unsat);
    }

    #[test]
    fn test_ground_atoms() {
        assert_eq!(solve("(assert (>= 1 0))"), SolverResult::Sat);
        assert_eq!(solve("(assert (< 1 0))"), SolverResult::Unsat);
        assert_eq!(solve("(assert false)"), SolverResult::Unsat);
        assert_eq!(solve("(assert true)"), SolverResult::Sat);
    }
}
