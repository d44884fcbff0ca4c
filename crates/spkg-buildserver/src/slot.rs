//! Build admission slot.
//!
//! A build server runs one build at a time. The slot is taken for the whole
//! time a session is building and released when the guard drops, so slot
//! queries from other sessions observe `full` for exactly that interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared single-build admission flag.
#[derive(Debug, Clone, Default)]
pub struct BuildSlot {
    busy: Arc<AtomicBool>,
}

impl BuildSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a build currently holds the slot.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Take the slot if it is free.
    pub fn try_acquire(&self) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Holds the slot until dropped.
#[derive(Debug)]
pub struct SlotGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
