//! Indexing/checkout exclusion gate.
//!
//! Indexing and checkout never run at the same time. Runs of the same
//! process may overlap; only the pairwise conflict is modeled. A waiter
//! sleeps on a condition variable and wakes on release, or every poll
//! interval to report that it is still waiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use super::RoutineProcess;

/// How often a blocked routine reports that it is still waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Occupancy {
    process: Option<RoutineProcess>,
    holders: usize,
}

#[derive(Debug)]
pub struct ExclusionGate {
    occupancy: Mutex<Occupancy>,
    released: Condvar,
    poll: Duration,
    waits: AtomicUsize,
}

impl Default for ExclusionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExclusionGate {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll: Duration) -> Self {
        Self {
            occupancy: Mutex::new(Occupancy::default()),
            released: Condvar::new(),
            poll,
            waits: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Occupancy> {
        self.occupancy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until `process` may run, then hold the gate until the guard drops.
    pub fn enter(&self, process: RoutineProcess) -> ExclusionGuard<'_> {
        let mut occupancy = self.lock();
        while let Some(active) = occupancy.process.filter(|active| active.conflicts_with(process)) {
            let (guard, timeout) = self
                .released
                .wait_timeout(occupancy, self.poll)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            occupancy = guard;
            if timeout.timed_out() {
                self.waits.fetch_add(1, Ordering::Relaxed);
                debug!(%process, %active, "waiting for conflicting routine to finish");
            }
        }

        occupancy.process = Some(process);
        occupancy.holders += 1;
        ExclusionGuard { gate: self }
    }

    /// Process currently holding the gate.
    pub fn active(&self) -> Option<RoutineProcess> {
        self.lock().process
    }

    /// Number of poll intervals routines have spent blocked so far.
    pub fn wait_count(&self) -> usize {
        self.waits.load(Ordering::Relaxed)
    }

    fn release(&self) {
        let mut occupancy = self.lock();
        occupancy.holders = occupancy.holders.saturating_sub(1);
        if occupancy.holders == 0 {
            occupancy.process = None;
            drop(occupancy);
            self.released.notify_all();
        }
    }
}

/// Holds the gate for one routine run.
#[derive(Debug)]
pub struct ExclusionGuard<'a> {
    gate: &'a ExclusionGate,
}

impl Drop for ExclusionGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
