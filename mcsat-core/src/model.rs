//! Partial assignment of one variable kind.

/// Dense partial assignment indexed by variable ordinal.
///
/// Separate models exist per variable kind; the Boolean model is
/// `Model<bool>` and the arithmetic model is `Model<Rational>`.
#[derive(Debug, Clone, Default)]
pub struct Model<T> {
    values: Vec<Option<T>>,
}

impl<T> Model<T> {
    /// Create an empty model with no variables.
    #[must_use]
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Number of variables tracked by this model.
    #[must_use]
    pub fn num_vars(&self) -> usize {
        self.values.len()
    }

    /// Grow the model to `num_vars` variables. Shrinking is not supported;
    /// a smaller size is ignored.
    pub fn resize(&mut self, num_vars: usize) {
        if num_vars > self.values.len() {
            self.values.resize_with(num_vars, || None);
        }
    }

    /// Check whether the variable with ordinal `ord` is assigned.
    #[must_use]
    pub fn is_defined(&self, ord: u32) -> bool {
        self.values
            .get(ord as usize)
            .is_some_and(|slot| slot.is_some())
    }

    /// Value of the variable with ordinal `ord`, if assigned.
    #[must_use]
    pub fn value(&self, ord: u32) -> Option<&T> {
        self.values.get(ord as usize).and_then(|slot| slot.as_ref())
    }

    /// Assign `value` to the variable with ordinal `ord`.
    pub fn set_value(&mut self, ord: u32, value: T) {
        if ord as usize >= self.values.len() {
            self.resize(ord as usize + 1);
        }
        self.values[ord as usize] = Some(value);
    }

    /// Remove the assignment of the variable with ordinal `ord`.
    pub fn clear_value(&mut self, ord: u32) {
        if let Some(slot) = self.values.get_mut(ord as usize) {
            *slot = None;
        }
    }

    /// Remove all assignments, keeping the variable count.
    pub fn clear(&mut self) {
        for slot in &mut self.values {
            *slot = None;
        }
    }

    /// Ordinal of the first unassigned variable, if any.
    #[must_use]
    pub fn first_unassigned(&self) -> Option<u32> {
        self.values
            .iter()
            .position(|slot| slot.is_none())
            .map(|index| index as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let mut model = Model::<bool>::new();
        model.resize(3);
        assert_eq!(model.num_vars(), 3);
        assert!(!model.is_defined(1));

        model.set_value(1, true);
        assert!(model.is_defined(1));
        assert_eq!(model.value(1), Some(&true));

        model.clear_value(1);
        assert!(!model.is_defined(1));
        assert_eq!(model.value(1), None);
    }

    #[test]
    fn test_set_value_grows() {
        let mut model = Model::<i32>::new();
        model.set_value(5, 42);
        assert_eq!(model.num_vars(), 6);
        assert_eq!(model.value(5), Some(&42));
        assert!(!model.is_defined(0));
    }

    #[test]
    fn test_first_unassigned() {
        let mut model = Model::<bool>::new();
        model.resize(2);
        assert_eq!(model.first_unassigned(), Some(0));
        model.set_value(0, false);
        assert_eq!(model.first_unassigned(), Some(1));
        model.set_value(1, true);
        assert_eq!(model.first_unassigned(), None);
    }
}
