//! Identity types for the pipeline system.
//!
//! `StageId` is a newtype over `u32` handed out by the owning pipeline in
//! insertion order and never reused. `ConduitId` is process-unique so that two
//! conduits can be compared by identity across mutations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a stage within its pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StageId(pub u32);

impl StageId {
    pub const INVALID: StageId = StageId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "StageId(INVALID)")
        } else {
            write!(f, "StageId({})", self.0)
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

static NEXT_CONDUIT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a conduit. Never reused within a process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConduitId(u64);

impl ConduitId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONDUIT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ConduitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConduitId({})", self.0)
    }
}

impl fmt::Display for ConduitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id() {
        let id = StageId(42);
        assert!(id.is_valid());
        assert_eq!(format!("{}", id), "StageId(42)");
        assert!(!StageId::INVALID.is_valid());
    }

    #[test]
    fn test_conduit_ids_are_unique() {
        let a = ConduitId::next();
        let b = ConduitId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
