//! Node layout: data nodes, marker nodes, and the head sentinel.

use crossbeam_epoch::{Atomic, Owned};

/// Maximum tower height of any node. The head sentinel spans every level.
pub const MAX_LEVEL: usize = 32;

/// Promotion probability of the level generator: a tower reaches level `k`
/// with probability `P^k`.
pub const P: f64 = 0.5;

/// A single entry in the skip list.
///
/// The value cell is the node's lifecycle: it is non-null from construction
/// until a delete tombstones it, and a tombstoned cell is never revived;
/// re-inserting the same key allocates a fresh node. A null forward pointer
/// means the chain ends there.
pub(crate) struct Node<K, V> {
    /// `None` only for the head sentinel. Markers carry the key of the node
    /// they shadow, for diagnostics.
    pub(crate) key: Option<K>,
    /// Atomically swappable value slot; null is the tombstone.
    pub(crate) value: Atomic<V>,
    /// Forward pointers, one per tower level. Slots above the base level
    /// are tagged when the node is being retired, which stops a pending
    /// insert from linking them.
    pub(crate) next: Vec<Atomic<Node<K, V>>>,
    /// Set only on marker nodes, which interpose between a logically
    /// deleted node and its base-level successor.
    pub(crate) marker: bool,
}

impl<K, V> Node<K, V> {
    pub(crate) fn head() -> Owned<Self> {
        Owned::new(Node {
            key: None,
            value: Atomic::null(),
            next: (0..MAX_LEVEL).map(|_| Atomic::null()).collect(),
            marker: false,
        })
    }

    pub(crate) fn new(key: K, value: Owned<V>, height: usize) -> Owned<Self> {
        Owned::new(Node {
            key: Some(key),
            value: Atomic::from(value),
            next: (0..height).map(|_| Atomic::null()).collect(),
            marker: false,
        })
    }

    /// Markers never hold a value and have a single forward slot.
    pub(crate) fn marker(key: K) -> Owned<Self> {
        Owned::new(Node {
            key: Some(key),
            value: Atomic::null(),
            next: vec![Atomic::null()],
            marker: true,
        })
    }

    pub(crate) fn height(&self) -> usize {
        self.next.len()
    }

    /// Borrows the key of a non-head node.
    pub(crate) fn key(&self) -> &K {
        // SAFETY: only the head sentinel lacks a key, and the head is never
        // handed out as a successor.
        unsafe { self.key.as_ref().unwrap_unchecked() }
    }

    /// Tears a node that was never published back into its value cell.
    pub(crate) fn into_value(node: Owned<Self>) -> Owned<V> {
        let Node { value, .. } = *node.into_box();
        // SAFETY: data nodes are constructed with a live value cell and this
        // runs only before publication, so the cell is still in place.
        unsafe { value.into_owned() }
    }
}
