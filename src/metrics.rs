//! Counter shards and the metric keys emitted through the `metrics` facade.
//!
//! The live length and the insert CAS tallies sit on the hottest paths of
//! the map, so they are partitioned across cache-padded shards indexed by a
//! per-thread tag and only aggregated on read.

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::thread::available_parallelism;

use crossbeam_utils::CachePadded;

// --- Metric keys ---

/// Tracks the total number of public map operations.
///
/// Labels:
/// - `type`: "get", "contains", "put", "remove", "seek"
pub const OPERATIONS_TOTAL: &str = "towermap_operations_total";

// --- Label keys ---

pub const LABEL_OPERATION_TYPE: &str = "type";

/// Aggregated insert CAS counters, exposed for contention analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CasStats {
    /// Failed base-level and upper-level CAS attempts during inserts.
    pub retries: u64,
    /// Successful base-level insertions.
    pub successes: u64,
}

#[derive(Default)]
struct Shard {
    len: AtomicI64,
    cas_retries: AtomicU64,
    cas_successes: AtomicU64,
}

static NEXT_THREAD_TAG: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static THREAD_TAG: Cell<u64> = const { Cell::new(u64::MAX) };
}

fn thread_tag() -> u64 {
    THREAD_TAG.with(|tag| {
        let mut t = tag.get();
        if t == u64::MAX {
            t = NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed);
            tag.set(t);
        }
        t
    })
}

pub(crate) struct Counters {
    shards: Box<[CachePadded<Shard>]>,
    mask: usize,
}

impl Counters {
    pub(crate) fn new() -> Self {
        let shards = available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .next_power_of_two();
        Counters {
            shards: (0..shards)
                .map(|_| CachePadded::new(Shard::default()))
                .collect(),
            mask: shards - 1,
        }
    }

    fn shard(&self) -> &Shard {
        &self.shards[thread_tag() as usize & self.mask]
    }

    pub(crate) fn add_len(&self, delta: i64) {
        self.shard().len.fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn inc_insert_cas_retry(&self) {
        self.shard().cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_insert_cas_success(&self) {
        self.shard().cas_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Sums the shards. In-flight operations may leave the reading
    /// transiently stale; it is exact once the map is quiescent.
    pub(crate) fn len(&self) -> i64 {
        self.shards
            .iter()
            .map(|shard| shard.len.load(Ordering::Relaxed))
            .sum()
    }

    pub(crate) fn cas_stats(&self) -> CasStats {
        let mut stats = CasStats::default();
        for shard in self.shards.iter() {
            stats.retries += shard.cas_retries.load(Ordering::Relaxed);
            stats.successes += shard.cas_successes.load(Ordering::Relaxed);
        }
        stats
    }
}
