//! The insert and delete protocols.
//!
//! An insert is linearized by a single CAS on the predecessor's base-level
//! forward pointer; the upper tower levels are linked opportunistically
//! afterwards and only accelerate searches. A delete runs in phases:
//! tombstone the value cell, splice a marker behind the dead node, freeze
//! its upper tower slots, unlink it level by level, then re-descend to
//! verify the key is gone before the node is handed to the collector.

use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Guard, Owned, Shared};
use log::trace;
use metrics::counter;

use crate::map::SkipListMap;
use crate::metrics::{LABEL_OPERATION_TYPE, OPERATIONS_TOTAL};
use crate::node::{Node, MAX_LEVEL};
use crate::traverse::FindResult;

impl<K, V, F> SkipListMap<K, V, F>
where
    K: Clone + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K, &K) -> bool,
{
    /// Inserts `value` under `key`, returning the previous value when an
    /// existing live entry was replaced.
    ///
    /// # Examples
    ///
    /// ```
    /// use towermap::SkipListMap;
    ///
    /// let map = SkipListMap::new(|a: &i32, b: &i32| a < b);
    /// assert_eq!(map.put(1, "one"), None);
    /// assert_eq!(map.put(1, "uno"), Some("one"));
    /// assert_eq!(map.get(&1), Some("uno"));
    /// ```
    pub fn put(&self, key: K, value: V) -> Option<V> {
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "put").increment(1);
        let guard = &epoch::pin();
        let mut new_value = Owned::new(value);

        loop {
            let search = self.find(&key, guard);

            if search.found {
                let target = search.succs[0];
                // SAFETY: a found base successor is protected by the guard.
                let target_ref = unsafe { target.deref() };
                let mut current = target_ref.value.load(Ordering::Acquire, guard);
                loop {
                    if current.is_null() {
                        // A racing delete won between the descent and this
                        // load; help retire the node, then start over.
                        let marker = self.ensure_marker(target, guard);
                        self.physical_delete(&search.preds, target, marker, guard);
                        break;
                    }
                    match target_ref.value.compare_exchange(
                        current,
                        new_value,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    ) {
                        Ok(_) => {
                            // SAFETY: the slot held this cell until our CAS
                            // and the guard keeps it readable until retire.
                            let old = unsafe { current.deref() }.clone();
                            unsafe { guard.defer_destroy(current) };
                            return Some(old);
                        }
                        Err(e) => {
                            // A concurrent update won; retry against the
                            // value it installed.
                            new_value = e.new;
                            current = e.current;
                        }
                    }
                }
                continue;
            }

            let height = self.rng.random_level();
            let node = Node::new(key.clone(), new_value, height);
            let succ = search.succs[0];
            node.next[0].store(succ, Ordering::Relaxed);

            // SAFETY: preds[0] is the head or was adopted live during the
            // descent; the guard protects it.
            let pred = unsafe { search.preds[0].deref() };
            match pred.next[0].compare_exchange(
                succ,
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(inserted) => {
                    // The key is visible to every subsequent lookup from
                    // here on, whether or not the tower ever completes.
                    self.counters.inc_insert_cas_success();
                    self.counters.add_len(1);
                    if height > 1 {
                        self.finish_levels(&key, inserted, search, 1, guard);
                    }
                    return None;
                }
                Err(e) => {
                    self.counters.inc_insert_cas_retry();
                    new_value = Node::into_value(e.new);
                }
            }
        }
    }

    /// Links a freshly inserted node at the levels above the base, from
    /// `level` up to its tower height.
    ///
    /// The node is already reachable on the base level, so when a snapshot
    /// goes stale the key is re-sought and linking resumes at the failing
    /// level: the new descent must hand back this same node, never a
    /// reallocation. Linking stops for good once a deleter has frozen the
    /// tower.
    fn finish_levels<'g>(
        &self,
        key: &K,
        pending: Shared<'g, Node<K, V>>,
        mut search: FindResult<'g, K, V>,
        mut level: usize,
        guard: &'g Guard,
    ) {
        // SAFETY: `pending` was linked at the base level under this guard.
        let pending_ref = unsafe { pending.deref() };
        let height = pending_ref.height();
        while level < height {
            let slot = pending_ref.next[level].load(Ordering::Acquire, guard);
            if slot.tag() != 0 {
                return;
            }
            let succ = search.succs[level];

            #[cfg(test)]
            crate::hooks::BEFORE_LEVEL_CAS.fire();

            if pending_ref.next[level]
                .compare_exchange(slot, succ, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_err()
            {
                // Only a tower freeze writes this slot concurrently.
                return;
            }
            // SAFETY: recorded predecessors are protected by the guard.
            let pred_ref = unsafe { search.preds[level].deref() };
            if level < pred_ref.height()
                && pred_ref.next[level]
                    .compare_exchange(succ, pending, Ordering::AcqRel, Ordering::Acquire, guard)
                    .is_ok()
            {
                level += 1;
                continue;
            }
            self.counters.inc_insert_cas_retry();
            search = self.find(key, guard);
            if search.succs[0] != pending {
                // The node was deleted while its tower was under
                // construction; the remaining levels stay unlinked.
                return;
            }
        }
    }

    /// Removes `key`, returning its value when this call observed the key
    /// live and transitioned it to deleted.
    ///
    /// # Examples
    ///
    /// ```
    /// use towermap::SkipListMap;
    ///
    /// let map = SkipListMap::new(|a: &i32, b: &i32| a < b);
    /// map.put(42, 1);
    /// assert_eq!(map.remove(&42), Some(1));
    /// assert_eq!(map.remove(&42), None);
    /// ```
    pub fn remove(&self, key: &K) -> Option<V> {
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "remove").increment(1);
        let guard = &epoch::pin();
        // Nodes this call tombstoned and unlinked, awaiting a descent that
        // reports the key absent. Until then a revived same-key node ahead
        // of them can hide them from the verification descent, so they are
        // not yet provably unreachable.
        let mut retired: Vec<(Shared<'_, Node<K, V>>, Shared<'_, Node<K, V>>)> = Vec::new();
        loop {
            let search = self.find(key, guard);
            if !search.found {
                self.release_retired(&mut retired, guard);
                return None;
            }
            let target = search.succs[0];

            let old = match self.logical_delete(target, guard) {
                Some(old) => old,
                None => {
                    if retired.is_empty() {
                        return None;
                    }
                    // Another delete won this round; keep descending until
                    // the key is absent so the earlier generations can be
                    // handed to the collector.
                    continue;
                }
            };
            let marker = self.ensure_marker(target, guard);

            let mut preds = search.preds;
            let verify = loop {
                let retry = self.physical_delete(&preds, target, marker, guard);
                // The descent helps unlink the target and its marker from
                // every level they still occupy, and the frozen tower keeps
                // any in-flight insert from linking them again.
                let verify = self.find(key, guard);
                if !retry {
                    break verify;
                }
                preds = verify.preds;
            };
            retired.push((marker, target));
            if verify.found {
                // A concurrent insert brought the key back before the
                // unlink finished; only report success once it is gone.
                trace!("key revived during removal, retrying delete");
                continue;
            }
            self.release_retired(&mut retired, guard);
            return Some(old);
        }
    }

    /// Hands this call's unlinked nodes to the collector. Only called right
    /// after a descent reported the key absent: the base chain stays sorted
    /// apart from same-key runs, so an absent key means every dead node
    /// carrying it sat in front of the stop point and was helped off every
    /// level.
    fn release_retired<'g>(
        &self,
        retired: &mut Vec<(Shared<'g, Node<K, V>>, Shared<'g, Node<K, V>>)>,
        guard: &'g Guard,
    ) {
        for (marker, target) in retired.drain(..) {
            // SAFETY: both nodes are unreachable from the head on every
            // level and this delete is their single owner (it won their
            // logical-delete CAS); readers still holding them are pinned
            // and keep them alive until their guards drop.
            unsafe {
                guard.defer_destroy(marker);
                guard.defer_destroy(target);
            }
        }
    }

    /// Tombstones the target's value cell. Returns the old value only to
    /// the caller whose CAS performed the transition.
    fn logical_delete<'g>(
        &self,
        target: Shared<'g, Node<K, V>>,
        guard: &'g Guard,
    ) -> Option<V> {
        // SAFETY: the target came out of a descent under this guard.
        let target_ref = unsafe { target.deref() };
        loop {
            let current = target_ref.value.load(Ordering::Acquire, guard);
            if current.is_null() {
                return None;
            }
            if target_ref
                .value
                .compare_exchange(
                    current,
                    Shared::null(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                )
                .is_ok()
            {
                self.counters.add_len(-1);
                // SAFETY: we just unlinked this cell from the slot; the
                // guard keeps it readable until the collector takes it.
                let old = unsafe { current.deref() }.clone();
                unsafe { guard.defer_destroy(current) };
                return Some(old);
            }
        }
    }

    /// Splices a marker between `target` and its base-level successor. At
    /// most one marker ever wins; racing callers converge on it. Once in
    /// place the marker pins the dead node's base slot: the slot is never
    /// rewritten again, so a stale insert CAS against this node can only
    /// fail.
    pub(crate) fn ensure_marker<'g>(
        &self,
        target: Shared<'g, Node<K, V>>,
        guard: &'g Guard,
    ) -> Shared<'g, Node<K, V>> {
        // SAFETY: the target came out of a descent under this guard.
        let target_ref = unsafe { target.deref() };
        let mut spare: Option<Owned<Node<K, V>>> = None;
        loop {
            let next = target_ref.next[0].load(Ordering::Acquire, guard);
            if let Some(next_ref) = unsafe { next.as_ref() } {
                if next_ref.marker {
                    return next;
                }
            }
            let marker = spare
                .take()
                .unwrap_or_else(|| Node::marker(target_ref.key().clone()));
            marker.next[0].store(next, Ordering::Relaxed);
            match target_ref.next[0].compare_exchange(
                next,
                marker,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(spliced) => {
                    #[cfg(test)]
                    crate::hooks::AFTER_MARKER.fire();
                    return spliced;
                }
                Err(e) => spare = Some(e.new),
            }
        }
    }

    /// Freezes the target's upper tower slots, then unlinks the target
    /// from every level top-down (stepping over the marker at the base
    /// level). Returns true when the base-level predecessor still observes
    /// the target or a marker, in which case the caller retries with fresh
    /// predecessors (the predecessor may itself have been unlinked).
    pub(crate) fn physical_delete<'g>(
        &self,
        preds: &[Shared<'g, Node<K, V>>; MAX_LEVEL],
        target: Shared<'g, Node<K, V>>,
        marker: Shared<'g, Node<K, V>>,
        guard: &'g Guard,
    ) -> bool {
        // SAFETY: target and marker came out of a descent under this guard.
        let target_ref = unsafe { target.deref() };
        let height = target_ref.height();

        for level in (1..height).rev() {
            loop {
                let slot = target_ref.next[level].load(Ordering::Acquire, guard);
                if slot.tag() != 0 {
                    break;
                }
                if target_ref.next[level]
                    .compare_exchange(
                        slot,
                        slot.with_tag(1),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    )
                    .is_ok()
                {
                    break;
                }
            }
        }

        // SAFETY: markers are immutable once spliced; see `ensure_marker`.
        let marker_ref = unsafe { marker.deref() };
        let succ0 = marker_ref.next[0].load(Ordering::Acquire, guard).with_tag(0);

        for level in (0..height).rev() {
            let succ = if level == 0 {
                succ0
            } else {
                target_ref.next[level].load(Ordering::Acquire, guard).with_tag(0)
            };
            // SAFETY: recorded predecessors are protected by the guard.
            let pred_ref = unsafe { preds[level].deref() };
            if level >= pred_ref.height() {
                continue;
            }
            loop {
                let current = pred_ref.next[level].load(Ordering::Acquire, guard);
                if current.tag() != 0 || current.with_tag(0) != target {
                    // Someone else unlinked this level, or the predecessor
                    // is itself being retired; the next descent helps.
                    break;
                }
                if pred_ref.next[level]
                    .compare_exchange(current, succ, Ordering::AcqRel, Ordering::Acquire, guard)
                    .is_ok()
                {
                    break;
                }
            }
        }

        // SAFETY: as above.
        let pred0_ref = unsafe { preds[0].deref() };
        let next = pred0_ref.next[0].load(Ordering::Acquire, guard);
        match unsafe { next.as_ref() } {
            Some(next_ref) => next == target || next_ref.marker,
            None => false,
        }
    }
}
