//! Wrapping tick comparison.
//!
//! Snapshots travel unreliably, so a peer may see tick 10 after tick 11.
//! Ticks wrap at 2^32; "newer" means ahead by less than half the range.

const HALF_RANGE: u32 = 1 << 31;

/// Returns whether tick `a` is newer than tick `b`.
/// tick_newer(2, 1) is true, tick_newer(0, u32::MAX) is true,
/// tick_newer(1, 1) is false.
#[must_use]
pub fn tick_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < HALF_RANGE
}

/// Drops snapshots whose tick is not newer than the last accepted one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickGate {
    last: Option<u32>,
}

impl TickGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `tick` and returns true if it is the first or newer than the last.
    pub fn accept(&mut self, tick: u32) -> bool {
        match self.last {
            Some(last) if !tick_newer(tick, last) => false,
            _ => {
                self.last = Some(tick);
                true
            }
        }
    }

    #[must_use]
    pub fn last(&self) -> Option<u32> {
        self.last
    }
}
