//! The level-wise descent and its cooperative unlinking duties.

use std::sync::atomic::Ordering;

use crossbeam_epoch::{Guard, Shared};

use crate::map::SkipListMap;
use crate::node::{Node, MAX_LEVEL};

/// Snapshot of one descent: the observed predecessor and successor at every
/// level, and whether the base successor carries the sought key with a live
/// value. The snapshot may be invalidated by concurrent mutators the moment
/// it is returned; callers revalidate through CAS.
pub(crate) struct FindResult<'g, K, V> {
    pub(crate) preds: [Shared<'g, Node<K, V>>; MAX_LEVEL],
    pub(crate) succs: [Shared<'g, Node<K, V>>; MAX_LEVEL],
    pub(crate) found: bool,
}

impl<K, V, F> SkipListMap<K, V, F>
where
    K: Clone + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K, &K) -> bool,
{
    /// Descends from the head, recording the predecessor and successor at
    /// each level and unlinking every marker or tombstone encountered on
    /// the way.
    ///
    /// A dead successor is unlinked behind its marker; the marker is
    /// spliced first when missing, so a node never leaves the base chain
    /// without one. If the descent finds itself standing on a node that is
    /// being retired (its slot is frozen or already holds a marker), it
    /// restarts from the top rather than mutate a retired tower.
    pub(crate) fn find<'g>(&self, key: &K, guard: &'g Guard) -> FindResult<'g, K, V> {
        'restart: loop {
            let mut preds = [Shared::null(); MAX_LEVEL];
            let mut succs = [Shared::null(); MAX_LEVEL];

            let mut x = self.head.load(Ordering::Acquire, guard);
            for level in (0..MAX_LEVEL).rev() {
                loop {
                    // SAFETY: `x` is the head or a node adopted while live;
                    // the guard keeps it allocated.
                    let x_ref = unsafe { x.deref() };
                    let raw = x_ref.next[level].load(Ordering::Acquire, guard);
                    if raw.tag() != 0 {
                        continue 'restart;
                    }
                    let next_ref = match unsafe { raw.as_ref() } {
                        Some(next) => next,
                        None => {
                            preds[level] = x;
                            succs[level] = Shared::null();
                            break;
                        }
                    };
                    if next_ref.marker {
                        // A marker only ever follows its own dead target,
                        // so `x` is dying under us.
                        continue 'restart;
                    }
                    if next_ref.value.load(Ordering::Acquire, guard).is_null() {
                        if level == 0 {
                            self.ensure_marker(raw, guard);
                        }
                        let succ = self.load_next(raw, level, guard);
                        // On failure the slot is reloaded without
                        // descending; someone else unlinked first.
                        let _ = x_ref.next[level].compare_exchange(
                            raw,
                            succ,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            guard,
                        );
                        continue;
                    }
                    if (self.less)(next_ref.key(), key) {
                        x = raw;
                        continue;
                    }
                    preds[level] = x;
                    succs[level] = raw;
                    break;
                }
            }

            // SAFETY: recorded successors are protected by the guard.
            let found = match unsafe { succs[0].as_ref() } {
                Some(candidate) => {
                    candidate.key() == key
                        && !candidate.value.load(Ordering::Acquire, guard).is_null()
                }
                None => false,
            };
            return FindResult { preds, succs, found };
        }
    }

    /// Picks the pointer to install when unlinking `n` at `level`,
    /// stepping over `n`'s base marker so a predecessor slot never ends up
    /// holding one.
    pub(crate) fn load_next<'g>(
        &self,
        n: Shared<'g, Node<K, V>>,
        level: usize,
        guard: &'g Guard,
    ) -> Shared<'g, Node<K, V>> {
        // SAFETY: callers hand in a non-null node protected by the guard.
        let n_ref = unsafe { n.deref() };
        if level >= n_ref.height() {
            return Shared::null();
        }
        let succ = n_ref.next[level].load(Ordering::Acquire, guard).with_tag(0);
        let succ_ref = match unsafe { succ.as_ref() } {
            Some(s) => s,
            None => return Shared::null(),
        };
        if !succ_ref.marker {
            return succ;
        }
        succ_ref.next[0].load(Ordering::Acquire, guard).with_tag(0)
    }

    /// Steps to the next live node on the base level. Dead territory is
    /// crossed read-only: a tombstoned successor triggers a full descent,
    /// which marks it and unlinks it from every level it still occupies,
    /// and the walk then continues over the node and its marker, one node
    /// per step. Null means the end of the list.
    pub(crate) fn advance_from<'g>(
        &self,
        start: Shared<'g, Node<K, V>>,
        guard: &'g Guard,
    ) -> Shared<'g, Node<K, V>> {
        let mut base = if start.is_null() {
            self.head.load(Ordering::Acquire, guard)
        } else {
            start
        };
        loop {
            // SAFETY: `base` is the head, a cursor position, or a dead node
            // or marker reached below; all are protected by the guard.
            let base_ref = unsafe { base.deref() };
            let next = base_ref.next[0].load(Ordering::Acquire, guard);
            let next_ref = match unsafe { next.as_ref() } {
                Some(n) => n,
                None => return Shared::null(),
            };
            if next_ref.marker {
                base = next;
                continue;
            }
            if next_ref.value.load(Ordering::Acquire, guard).is_null() {
                // The descent leaves the node marked and off the chain; its
                // slot now holds the marker the next step walks across.
                self.find(next_ref.key(), guard);
                base = next;
                continue;
            }
            return next;
        }
    }
}
