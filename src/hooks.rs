//! Interleaving hooks, compiled only into test builds.
//!
//! Tests install a callback at one of the fixed points below to force a
//! specific interleaving (pause a delete right after its marker lands, run
//! a racing operation between a descent and a value load, and so on).

use std::sync::{Arc, Mutex, RwLock};

type Hook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct HookSlot(RwLock<Option<Hook>>);

impl HookSlot {
    const fn new() -> Self {
        HookSlot(RwLock::new(None))
    }

    pub(crate) fn set(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.0.write().unwrap() = Some(Arc::new(hook));
    }

    pub(crate) fn clear(&self) {
        *self.0.write().unwrap() = None;
    }

    pub(crate) fn fire(&self) {
        let hook = self.0.read().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Fired in `get` between the descent and the value load.
pub(crate) static GET_AFTER_FIND: HookSlot = HookSlot::new();

/// Fired after a marker wins its splice CAS.
pub(crate) static AFTER_MARKER: HookSlot = HookSlot::new();

/// Fired before each upper-level link CAS of an insert.
pub(crate) static BEFORE_LEVEL_CAS: HookSlot = HookSlot::new();

/// Serializes tests that install hooks; the slots are process-global.
pub(crate) static HOOK_TESTS: Mutex<()> = Mutex::new(());
