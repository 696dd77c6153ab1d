//! Per-volume tower-height generator.
//!
//! A small xorshift64* stream seeded from the wall clock and the current
//! thread id, so volumes created concurrently on different threads do not
//! produce correlated skip-list towers. Not cryptographic, and does not
//! need to be.

use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub(crate) struct TowerRng {
    state: u64,
}

impl TowerRng {
    pub fn seeded() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0) as u64;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        let state = nanos ^ hasher.finish();
        Self {
            // xorshift has a single absorbing zero state
            state: if state == 0 { 0x9E37_79B9_7F4A_7C15 } else { state },
        }
    }

    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        (self.state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 32) as u32
    }

    /// Skip-list tower height: one plus the number of trailing one bits of
    /// a uniform draw, capped at `max`. Halves the population per level.
    pub fn tower_height(&mut self, max: usize) -> usize {
        let mut value = self.next_u32();
        let mut height = 1;
        while value & 1 == 1 && height < max {
            height += 1;
            value >>= 1;
        }
        height
    }
}
