//! Forward cursors over the map.

use std::ptr;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Guard, Shared};
use metrics::counter;

use crate::map::SkipListMap;
use crate::metrics::{LABEL_OPERATION_TYPE, OPERATIONS_TOTAL};
use crate::node::Node;

/// A forward-only cursor over the map.
///
/// A cursor starts before the first element, moves with [`next`](Iter::next)
/// and [`seek_ge`](Iter::seek_ge), and exposes snapshots of the element it
/// sits on. Keys observed by one cursor are strictly increasing, but the
/// cursor is not a snapshot of the map: entries inserted ahead of it may be
/// observed and entries deleted under it are skipped. The cursor is bound
/// to the thread using it; the underlying map stays fully mutable.
///
/// # Examples
///
/// ```
/// use towermap::SkipListMap;
///
/// let map = SkipListMap::new(|a: &i32, b: &i32| a < b);
/// map.put(3, "three");
/// map.put(1, "one");
///
/// let mut it = map.iter();
/// assert!(it.next());
/// assert_eq!(it.key(), Some(&1));
/// assert!(it.next());
/// assert_eq!(it.key(), Some(&3));
/// assert!(!it.next());
/// ```
pub struct Iter<'a, K, V, F = fn(&K, &K) -> bool> {
    map: &'a SkipListMap<K, V, F>,
    /// Keeps every node the cursor can reach alive for the cursor's
    /// lifetime; repinned whenever the cursor holds no position.
    guard: Guard,
    current: *const Node<K, V>,
    key: Option<K>,
    value: Option<V>,
}

impl<K, V, F> SkipListMap<K, V, F>
where
    K: Clone + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K, &K) -> bool,
{
    /// Returns a cursor positioned before the first element.
    pub fn iter(&self) -> Iter<'_, K, V, F> {
        Iter {
            map: self,
            guard: epoch::pin(),
            current: ptr::null(),
            key: None,
            value: None,
        }
    }

    /// Returns a cursor at the first element whose key is greater than or
    /// equal to `key`, or an exhausted cursor when no such element exists.
    ///
    /// # Examples
    ///
    /// ```
    /// use towermap::SkipListMap;
    ///
    /// let map = SkipListMap::new(|a: &i32, b: &i32| a < b);
    /// map.put(1, "one");
    /// map.put(3, "three");
    /// map.put(5, "five");
    ///
    /// let mut it = map.seek_ge(&2);
    /// assert_eq!(it.key(), Some(&3));
    /// assert!(it.next());
    /// assert_eq!(it.key(), Some(&5));
    /// ```
    pub fn seek_ge(&self, key: &K) -> Iter<'_, K, V, F> {
        let mut it = self.iter();
        it.seek_ge(key);
        it
    }
}

impl<K, V, F> Iter<'_, K, V, F>
where
    K: Clone + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(&K, &K) -> bool,
{
    /// Reports whether the cursor currently sits on an element.
    pub fn valid(&self) -> bool {
        self.key.is_some()
    }

    /// The key at the cursor's position, or `None` when the cursor is not
    /// positioned.
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// The value snapshot taken when the cursor chose its position, or
    /// `None` when the cursor is not positioned.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// Positions the cursor at the first element with key ≥ `key`,
    /// reporting whether one was found.
    pub fn seek_ge(&mut self, key: &K) -> bool {
        counter!(OPERATIONS_TOTAL, LABEL_OPERATION_TYPE => "seek").increment(1);
        self.current = ptr::null();
        self.key = None;
        self.value = None;
        self.guard.repin();

        let search = self.map.find(key, &self.guard);
        let mut current = search.succs[0];
        let mut snapshot = None;
        loop {
            if current.is_null() {
                break;
            }
            // SAFETY: the cursor's own guard protects every node handed
            // back by the descent and by `advance_from`.
            let node = unsafe { current.deref() };
            let value = node.value.load(Ordering::Acquire, &self.guard);
            if let Some(value) = unsafe { value.as_ref() } {
                snapshot = Some((current.as_raw(), node.key().clone(), value.clone()));
                break;
            }
            current = self.map.advance_from(current, &self.guard);
        }
        self.publish(snapshot)
    }

    /// Advances to the next live element, reporting whether the cursor
    /// moved onto one. A cursor that is not positioned (fresh or
    /// exhausted) starts from the beginning.
    pub fn next(&mut self) -> bool {
        if self.key.is_none() {
            self.current = ptr::null();
            self.guard.repin();
        }
        let mut start: Shared<'_, Node<K, V>> = if self.current.is_null() {
            Shared::null()
        } else {
            Shared::from(self.current)
        };
        let mut snapshot = None;
        loop {
            let next = self.map.advance_from(start, &self.guard);
            if next.is_null() {
                break;
            }
            // SAFETY: see `seek_ge`.
            let node = unsafe { next.deref() };
            let value = node.value.load(Ordering::Acquire, &self.guard);
            match unsafe { value.as_ref() } {
                Some(value) => {
                    snapshot = Some((next.as_raw(), node.key().clone(), value.clone()));
                    break;
                }
                // Deleted between the step and the read; keep walking from
                // where we stand.
                None => start = next,
            }
        }
        self.publish(snapshot)
    }

    fn publish(&mut self, snapshot: Option<(*const Node<K, V>, K, V)>) -> bool {
        match snapshot {
            Some((node, key, value)) => {
                self.current = node;
                self.key = Some(key);
                self.value = Some(value);
                true
            }
            None => {
                self.current = ptr::null();
                self.key = None;
                self.value = None;
                false
            }
        }
    }
}
