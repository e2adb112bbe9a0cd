//! Tower-height sampling.
//!
//! Heights follow a geometric distribution with p = 1/2, obtained by
//! counting the trailing zeros of a uniform 64-bit draw. Generation must
//! not serialize concurrent writers on a shared seed, so the default mode
//! keeps one generator per thread; a seeded mode produces a reproducible
//! stream for tests.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::node::MAX_LEVEL;

/// Used when the system clock reports zero nanoseconds.
const FALLBACK_SEED: u64 = 0xdead_beef_cafe_babe;

/// Stream increment for the seeded mode (the 64-bit golden ratio).
const STREAM_STEP: u64 = 0x9e37_79b9_7f4a_7c15;

thread_local! {
    static THREAD_RNG: RefCell<Option<fastrand::Rng>> = const { RefCell::new(None) };
}

pub(crate) struct LevelRng {
    /// `Some` pins the generator to a deterministic stream.
    seed: Option<u64>,
    stream: AtomicU64,
}

impl LevelRng {
    pub(crate) fn new() -> Self {
        LevelRng {
            seed: None,
            stream: AtomicU64::new(0),
        }
    }

    pub(crate) fn with_seed(seed: u64) -> Self {
        LevelRng {
            seed: Some(seed),
            stream: AtomicU64::new(0),
        }
    }

    /// Samples a tower height in `[1, MAX_LEVEL]`.
    pub(crate) fn random_level(&self) -> usize {
        let r = self.next_u64();
        ((r.trailing_zeros() as usize) + 1).min(MAX_LEVEL)
    }

    fn next_u64(&self) -> u64 {
        match self.seed {
            // One draw per stream point: reproducible single-threaded,
            // still lock-free when tests run concurrent operations.
            Some(seed) => {
                let n = self.stream.fetch_add(1, Ordering::Relaxed);
                fastrand::Rng::with_seed(seed.wrapping_add(n.wrapping_mul(STREAM_STEP))).u64(..)
            }
            None => THREAD_RNG.with(|cell| {
                let mut slot = cell.borrow_mut();
                let rng = slot.get_or_insert_with(|| fastrand::Rng::with_seed(clock_seed()));
                rng.u64(..)
            }),
        }
    }
}

fn clock_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    if nanos == 0 { FALLBACK_SEED } else { nanos }
}
