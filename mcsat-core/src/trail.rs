//! The shared assignment trail.
//!
//! The trail is a totally ordered history of variable assignments,
//! partitioned into decision levels. Level 0 is the ground level; each
//! decision opens a new level. Every entry carries an optional reason
//! clause: `None` marks decisions and semantically propagated literals.
//!
//! Entries also carry a monotone timestamp. Theories remember the last
//! timestamp they processed and ask for everything newer, which is how
//! propagation picks up entries pushed at lower levels (semantic
//! propagation) as well as at the current one.
//!
//! The trail owns the partial models of both variable kinds. Callers set
//! the model value first and then push the trail entry, mirroring the
//! two-step protocol used by the theories.

use crate::database::ClauseRef;
use crate::model::Model;
use crate::rational::Rational;
use crate::variable::{VarKind, Variable};

/// One trail entry: an assigned variable and the clause that propagated
/// it (`None` for decisions and semantic propagations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// The assigned variable.
    pub var: Variable,
    /// Reason clause, or `None` for decisions and semantic propagations.
    pub reason: Option<ClauseRef>,
    /// Monotone insertion timestamp.
    pub timestamp: u64,
}

/// Totally ordered assignment history partitioned by decision level.
#[derive(Debug)]
pub struct Trail {
    levels: Vec<Vec<Assignment>>,
    bool_level: Vec<Option<u32>>,
    rational_level: Vec<Option<u32>>,
    bool_model: Model<bool>,
    rational_model: Model<Rational>,
    next_timestamp: u64,
    num_assigned: usize,
}

impl Default for Trail {
    fn default() -> Self {
        Self::new()
    }
}

impl Trail {
    /// Create an empty trail at decision level 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            levels: vec![Vec::new()],
            bool_level: Vec::new(),
            rational_level: Vec::new(),
            bool_model: Model::new(),
            rational_model: Model::new(),
            next_timestamp: 0,
            num_assigned: 0,
        }
    }

    /// Grow the model and level map of `kind` to `num_vars` variables.
    pub fn resize(&mut self, kind: VarKind, num_vars: usize) {
        match kind {
            VarKind::Bool => {
                self.bool_model.resize(num_vars);
                if num_vars > self.bool_level.len() {
                    self.bool_level.resize(num_vars, None);
                }
            }
            VarKind::Rational => {
                self.rational_model.resize(num_vars);
                if num_vars > self.rational_level.len() {
                    self.rational_level.resize(num_vars, None);
                }
            }
        }
    }

    /// Number of variables of `kind`.
    #[must_use]
    pub fn num_vars(&self, kind: VarKind) -> usize {
        match kind {
            VarKind::Bool => self.bool_model.num_vars(),
            VarKind::Rational => self.rational_model.num_vars(),
        }
    }

    /// Boolean model.
    #[must_use]
    pub fn bool_model(&self) -> &Model<bool> {
        &self.bool_model
    }

    /// Mutable Boolean model.
    pub fn bool_model_mut(&mut self) -> &mut Model<bool> {
        &mut self.bool_model
    }

    /// Rational model.
    #[must_use]
    pub fn rational_model(&self) -> &Model<Rational> {
        &self.rational_model
    }

    /// Mutable rational model.
    pub fn rational_model_mut(&mut self) -> &mut Model<Rational> {
        &mut self.rational_model
    }

    /// Current decision level.
    #[must_use]
    pub fn decision_level(&self) -> u32 {
        (self.levels.len() - 1) as u32
    }

    /// Decision level of `var`, or `None` if it is unassigned.
    #[must_use]
    pub fn decision_level_of(&self, var: Variable) -> Option<u32> {
        let map = match var.kind() {
            VarKind::Bool => &self.bool_level,
            VarKind::Rational => &self.rational_level,
        };
        map.get(var.index()).copied().flatten()
    }

    /// Reason clause of `var`, or `None` if it was decided, semantically
    /// propagated, or is unassigned.
    #[must_use]
    pub fn reason(&self, var: Variable) -> Option<ClauseRef> {
        let level = self.decision_level_of(var)?;
        self.levels[level as usize]
            .iter()
            .find(|entry| entry.var == var)
            .and_then(|entry| entry.reason)
    }

    /// Assignments at `level`, oldest first.
    #[must_use]
    pub fn assigned(&self, level: u32) -> &[Assignment] {
        &self.levels[level as usize]
    }

    /// Check whether the trail holds no assignments at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_assigned == 0
    }

    /// Total number of assignments currently on the trail. Theory
    /// combination compares this count across a propagation pass to
    /// detect the fixpoint.
    #[must_use]
    pub fn num_assigned(&self) -> usize {
        self.num_assigned
    }

    /// All assignments newer than `timestamp`, in insertion order.
    ///
    /// This is the per-theory cursor protocol: a theory keeps the largest
    /// timestamp it has processed and calls this at the start of each
    /// propagation round.
    #[must_use]
    pub fn assigned_since(&self, timestamp: u64) -> Vec<Assignment> {
        let mut entries: Vec<Assignment> = self
            .levels
            .iter()
            .flatten()
            .filter(|entry| entry.timestamp > timestamp)
            .copied()
            .collect();
        entries.sort_by_key(|entry| entry.timestamp);
        entries
    }

    /// Timestamp of the newest assignment made so far.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.next_timestamp
    }

    /// Open a new decision level and record the decision of `var`.
    ///
    /// The caller must have set the model value of `var` beforehand.
    pub fn decide(&mut self, var: Variable) {
        debug_assert!(self.is_model_defined(var));
        self.levels.push(Vec::new());
        let level = self.decision_level();
        self.push_entry(var, None, level);
    }

    /// Record the propagation of `var` with `reason` at `level`.
    ///
    /// `level` may be below the current decision level for semantic
    /// propagations. The caller must have set the model value of `var`.
    pub fn propagate(&mut self, var: Variable, reason: Option<ClauseRef>, level: u32) {
        debug_assert!(level <= self.decision_level());
        debug_assert!(self.is_model_defined(var));
        self.push_entry(var, reason, level);
    }

    /// Drop all assignments at levels above `level` and clear their model
    /// entries.
    pub fn backtrack(&mut self, level: u32) {
        while self.decision_level() > level {
            let entries = self.levels.pop().unwrap_or_default();
            for entry in &entries {
                self.clear_entry(entry.var);
            }
            self.num_assigned -= entries.len();
        }
    }

    /// Remove every assignment, including the ground level. Timestamps
    /// keep increasing across a clear so theory cursors stay valid.
    pub fn clear(&mut self) {
        self.backtrack(0);
        let ground = std::mem::take(&mut self.levels[0]);
        for entry in &ground {
            self.clear_entry(entry.var);
        }
        self.num_assigned = 0;
    }

    fn push_entry(&mut self, var: Variable, reason: Option<ClauseRef>, level: u32) {
        self.next_timestamp += 1;
        let entry = Assignment {
            var,
            reason,
            timestamp: self.next_timestamp,
        };
        self.levels[level as usize].push(entry);
        self.num_assigned += 1;
        match var.kind() {
            VarKind::Bool => self.bool_level[var.index()] = Some(level),
            VarKind::Rational => self.rational_level[var.index()] = Some(level),
        }
    }

    fn clear_entry(&mut self, var: Variable) {
        match var.kind() {
            VarKind::Bool => {
                self.bool_model.clear_value(var.ord());
                self.bool_level[var.index()] = None;
            }
            VarKind::Rational => {
                self.rational_model.clear_value(var.ord());
                self.rational_level[var.index()] = None;
            }
        }
    }

    fn is_model_defined(&self, var: Variable) -> bool {
        match var.kind() {
            VarKind::Bool => self.bool_model.is_defined(var.ord()),
            VarKind::Rational => self.rational_model.is_defined(var.ord()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rational::rational;

    fn bool_var(ord: u32) -> Variable {
        Variable::new(ord, VarKind::Bool)
    }

    fn real_var(ord: u32) -> Variable {
        Variable::new(ord, VarKind::Rational)
    }

    fn setup() -> Trail {
        let mut trail = Trail::new();
        trail.resize(VarKind::Bool, 10);
        trail.resize(VarKind::Rational, 10);
        trail
    }

    #[test]
    fn test_decide_opens_level() {
        let mut trail = setup();
        assert_eq!(trail.decision_level(), 0);

        trail.bool_model_mut().set_value(0, true);
        trail.decide(bool_var(0));
        assert_eq!(trail.decision_level(), 1);
        assert_eq!(trail.decision_level_of(bool_var(0)), Some(1));
        assert_eq!(trail.reason(bool_var(0)), None);
    }

    #[test]
    fn test_propagate_at_lower_level() {
        let mut trail = setup();
        trail.bool_model_mut().set_value(0, true);
        trail.decide(bool_var(0));
        trail.bool_model_mut().set_value(1, true);
        trail.decide(bool_var(1));

        // semantic propagation lands at level 1 while level 2 is current
        trail.bool_model_mut().set_value(2, false);
        trail.propagate(bool_var(2), None, 1);
        assert_eq!(trail.decision_level_of(bool_var(2)), Some(1));
        assert_eq!(trail.assigned(1).len(), 2);

        // the entry survives backtracking to its own level
        trail.backtrack(1);
        assert_eq!(trail.decision_level_of(bool_var(2)), Some(1));
        assert!(!trail.bool_model().is_defined(1));
    }

    #[test]
    fn test_backtrack_clears_models() {
        let mut trail = setup();
        trail.rational_model_mut().set_value(0, rational(3));
        trail.decide(real_var(0));
        trail.bool_model_mut().set_value(4, false);
        trail.decide(bool_var(4));

        assert_eq!(trail.num_assigned(), 2);
        trail.backtrack(0);
        assert_eq!(trail.num_assigned(), 0);
        assert!(!trail.rational_model().is_defined(0));
        assert!(!trail.bool_model().is_defined(4));
        assert_eq!(trail.decision_level_of(real_var(0)), None);
    }

    #[test]
    fn test_assigned_since_is_ordered() {
        let mut trail = setup();
        trail.bool_model_mut().set_value(0, true);
        trail.propagate(bool_var(0), None, 0);
        let mark = trail.timestamp();

        trail.bool_model_mut().set_value(1, true);
        trail.decide(bool_var(1));
        trail.bool_model_mut().set_value(2, true);
        trail.propagate(bool_var(2), None, 0);

        let fresh = trail.assigned_since(mark);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0].var, bool_var(1));
        assert_eq!(fresh[1].var, bool_var(2));
    }

    #[test]
    fn test_clear_keeps_timestamps_monotone() {
        let mut trail = setup();
        trail.bool_model_mut().set_value(0, true);
        trail.propagate(bool_var(0), None, 0);
        let before = trail.timestamp();

        trail.clear();
        assert!(trail.is_empty());
        trail.bool_model_mut().set_value(0, true);
        trail.propagate(bool_var(0), None, 0);
        assert!(trail.timestamp() > before);
    }
}
