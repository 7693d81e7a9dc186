use serde::{Deserialize, Serialize};

/// Smallest soft cap a user can configure.
pub const MIN_CAPACITY: usize = 5;
/// Fixed upper bound; the soft cap can never be raised past it.
pub const HARD_CAPACITY: usize = 500;
pub const DEFAULT_CAPACITY: usize = 50;

/// Soft cap of a store. The hard cap is the fixed [`HARD_CAPACITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    soft: usize,
}

impl Capacity {
    /// Build a capacity, clamping `soft` into `[1, HARD_CAPACITY]`.
    #[must_use]
    pub fn new(soft: usize) -> Self {
        Self {
            soft: soft.clamp(1, HARD_CAPACITY),
        }
    }

    /// Build a capacity from a user-entered value, clamping it into
    /// `[MIN_CAPACITY, HARD_CAPACITY]`.
    #[must_use]
    pub fn configured(soft: usize) -> Self {
        Self {
            soft: soft.clamp(MIN_CAPACITY, HARD_CAPACITY),
        }
    }

    #[must_use]
    pub fn soft(self) -> usize {
        self.soft
    }

    #[must_use]
    pub fn hard(self) -> usize {
        HARD_CAPACITY
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Self::configured(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::{Capacity, DEFAULT_CAPACITY, HARD_CAPACITY, MIN_CAPACITY};

    #[test]
    fn configured_clamps_into_user_bounds() {
        assert_eq!(Capacity::configured(0).soft(), MIN_CAPACITY);
        assert_eq!(Capacity::configured(10_000).soft(), HARD_CAPACITY);
        assert_eq!(Capacity::configured(120).soft(), 120);
    }

    #[test]
    fn new_only_enforces_structural_bounds() {
        assert_eq!(Capacity::new(0).soft(), 1);
        assert_eq!(Capacity::new(2).soft(), 2);
        assert_eq!(Capacity::new(HARD_CAPACITY + 1).soft(), HARD_CAPACITY);
    }

    #[test]
    fn default_uses_default_capacity() {
        let capacity = Capacity::default();
        assert_eq!(capacity.soft(), DEFAULT_CAPACITY);
        assert_eq!(capacity.hard(), HARD_CAPACITY);
    }
}
