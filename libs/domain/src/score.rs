//! Two-level score reported by the optimization engine.

use serde::{Deserialize, Serialize};

/// Hard/soft score, compared hard level first.
///
/// Both levels are penalties, so `0hard/0soft` is the best possible score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HardSoftScore {
    pub hard: i64,
    pub soft: i64,
}

impl HardSoftScore {
    pub const ZERO: Self = Self { hard: 0, soft: 0 };

    #[must_use]
    pub const fn of(hard: i64, soft: i64) -> Self {
        Self { hard, soft }
    }

    /// Returns true if no hard constraint is broken.
    #[must_use]
    pub fn is_feasible(&self) -> bool {
        self.hard >= 0
    }
}

impl std::fmt::Display for HardSoftScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}hard/{}soft", self.hard, self.soft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_level_dominates() {
        assert!(HardSoftScore::of(0, -1_000) > HardSoftScore::of(-1, 0));
        assert!(HardSoftScore::of(-1, -5) > HardSoftScore::of(-1, -6));
    }

    #[test]
    fn test_display() {
        assert_eq!(HardSoftScore::of(-2, -30).to_string(), "-2hard/-30soft");
        assert!(HardSoftScore::ZERO.is_feasible());
    }
}
