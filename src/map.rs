//! The map façade: construction, lookups, counters, and teardown.

use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic};
use crossbeam_utils::CachePadded;
use log::debug;
use metrics::counter;

use crate::metrics::{CasStats, Counters, LABEL_OPERATION_TYPE, OPERATIONS_TOTAL};
use crate::node::{Node, MAX_LEVEL};
use crate::rng::LevelRng;

/// A lock-free, concurrent, ordered map backed by a probabilistic skip
/// list.
///
/// Keys are ordered by the caller-supplied strict-less predicate, which
/// must be a pure total order that agrees with the key's [`Eq`]
/// implementation. All operations take `&self` and may be called from any
/// number of threads; none of them block on another thread.
pub struct SkipListMap<K, V, F = fn(&K, &K) -> bool> {
    pub(crate) head: CachePadded<Atomic<Node<K, V>>>,
    pub(crate) less: F,
    pub(crate) rng: LevelRng,
    pub(crate) counters: Counters,
}

impl<K, V, F> SkipListMap<K, V, F>
where
    K: Clone + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K, &K) -> bool,
{
    /// Creates an empty map ordered by `less`.
    ///
    /// # Examples
    ///
    /// ```
    /// use towermap::SkipListMap;
    ///
    /// let map = SkipListMap::new(|a: &i32, b: &i32| a < b);
    /// map.put(1, "one");
    /// map.put(2, "two");
    /// assert_eq!(map.len(), 2);
    /// ```
    pub fn new(less: F) -> Self {
        Self::build(less, LevelRng::new())
    }

    /// Creates an empty map whose tower heights come from a deterministic
    /// stream, for reproducible tests.
    pub fn with_seed(less: F, seed: u64) -> Self {
        Self::build(less, LevelRng::with_seed(seed))
    }

    fn build(less: F, rng: LevelRng) -> Self {
        debug!("skip list created, max level {MAX_LEVEL}");
        SkipListMap {
            head: CachePadded::new(Atomic::from(Node::head())),
            less,
            rng,
            counters: Counters::new(),
        }
    }

    /// Returns the value stored under `key`, if the key is live.
    ///
    /// # Examples
    ///
    /// ```
    /// use towermap::SkipListMap;
    ///
    /// let map = SkipListMap::new(|a: &i32, b: &i32| a < b);
    /// map.put(1, "one");
    /// assert_eq!(map.get(&1), Some("one"));
    /// assert_eq!(map.get(&2), None);
    /// ```
    pub fn get(&self, key: &K) -> Option<V> {
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "get").increment(1);
        let guard = &epoch::pin();
        let search = self.find(key, guard);
        if !search.found {
            return None;
        }
        // SAFETY: a found base successor is a data node protected by the
        // guard for the duration of this call.
        let node = unsafe { search.succs[0].deref() };
        #[cfg(test)]
        crate::hooks::GET_AFTER_FIND.fire();
        // This load is the linearization point: a delete racing with us may
        // have tombstoned the slot after the descent observed it live.
        let value = node.value.load(Ordering::Acquire, guard);
        // SAFETY: a non-null cell stays allocated while the guard is held.
        unsafe { value.as_ref() }.cloned()
    }

    /// Reports whether `key` is live in the map.
    pub fn contains(&self, key: &K) -> bool {
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "contains").increment(1);
        let guard = &epoch::pin();
        self.find(key, guard).found
    }

    /// Returns the number of live entries.
    ///
    /// Concurrent mutators may leave the reading transiently stale; it is
    /// exact once outstanding operations have completed.
    pub fn len(&self) -> usize {
        self.counters.len().max(0) as usize
    }

    /// Returns `true` if the map holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reports the insertion path's CAS retry and success tallies.
    pub fn insert_cas_stats(&self) -> CasStats {
        self.counters.cas_stats()
    }

    /// Structural checks for a quiescent map: the base level is strictly
    /// sorted and free of markers and tombstones, every upper-level chain
    /// is a subsequence of the base level, and the counter matches the
    /// reachable live nodes.
    #[cfg(test)]
    pub(crate) fn check_integrity(&self) {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);
        // SAFETY: quiescent map; every reachable node is protected by the
        // guard and no slot changes underneath the walk.
        unsafe {
            let mut base: Vec<usize> = Vec::new();
            let mut previous: Option<&K> = None;
            let mut node = head.deref().next[0].load(Ordering::Acquire, guard);
            while let Some(node_ref) = node.as_ref() {
                assert!(!node_ref.marker, "marker reachable after quiescence");
                assert!(
                    !node_ref.value.load(Ordering::Acquire, guard).is_null(),
                    "tombstone reachable after quiescence"
                );
                if let Some(prev) = previous {
                    assert!(
                        (self.less)(prev, node_ref.key()),
                        "base level out of order"
                    );
                }
                previous = Some(node_ref.key());
                base.push(node.as_raw() as usize);
                node = node_ref.next[0].load(Ordering::Acquire, guard);
            }
            assert_eq!(self.len(), base.len(), "length counter drifted");

            for level in 1..MAX_LEVEL {
                let mut position = 0;
                let mut node = head.deref().next[level].load(Ordering::Acquire, guard);
                while let Some(node_ref) = node.as_ref() {
                    let raw = node.as_raw() as usize;
                    while position < base.len() && base[position] != raw {
                        position += 1;
                    }
                    assert!(
                        position < base.len(),
                        "node linked at level {level} is not on the base level"
                    );
                    node = node_ref.next[level].load(Ordering::Acquire, guard).with_tag(0);
                }
            }
        }
    }
}

impl<K, V, F> Drop for SkipListMap<K, V, F> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent access, so walking the
        // base level reaches every node still owned by the map, including
        // markers and tombstones abandoned mid-delete, and frees each
        // exactly once. Nodes already unlinked from every level were
        // retired by their deleters and are not reachable from the head.
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            while !node.is_null() {
                let node_ref = node.deref();
                let next = node_ref.next[0].load(Ordering::Relaxed, guard).with_tag(0);
                let value = node_ref.value.load(Ordering::Relaxed, guard);
                if !value.is_null() {
                    drop(value.into_owned());
                }
                drop(node.into_owned());
                node = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[test]
    fn empty_map_has_no_entries() {
        let map: SkipListMap<i32, i32, _> = SkipListMap::new(|a: &i32, b: &i32| a < b);
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());
        assert_eq!(map.insert_cas_stats(), CasStats::default());
    }

    #[test]
    fn get_observes_tombstone_after_descent() {
        let _serial = hooks::HOOK_TESTS.lock().unwrap_or_else(|e| e.into_inner());

        let map = Arc::new(SkipListMap::new(|a: &i32, b: &i32| a < b));
        map.put(7, 70);

        let racer = map.clone();
        let once = Mutex::new(Some(()));
        hooks::GET_AFTER_FIND.set(move || {
            if once.lock().unwrap().take().is_some() {
                assert_eq!(racer.remove(&7), Some(70));
            }
        });

        // The descent found the key live, but the value load that follows
        // the hook is the linearization point and must see the delete.
        assert_eq!(map.get(&7), None);
        hooks::GET_AFTER_FIND.clear();

        assert!(!map.contains(&7));
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn storm_preserves_structure() {
        let _serial = hooks::HOOK_TESTS.lock().unwrap_or_else(|e| e.into_inner());

        let map = SkipListMap::new(|a: &i32, b: &i32| a < b);
        std::thread::scope(|s| {
            for worker in 0..4u64 {
                let map = &map;
                s.spawn(move || {
                    let mut state = 0x9e37_79b9_u64.wrapping_add(worker);
                    for _ in 0..2_000 {
                        state ^= state << 13;
                        state ^= state >> 7;
                        state ^= state << 17;
                        let key = (state % 64) as i32;
                        if state & 1 == 0 {
                            map.put(key, key);
                        } else {
                            map.remove(&key);
                        }
                    }
                });
            }
        });
        map.check_integrity();
    }
}
