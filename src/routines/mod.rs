//! Routine scheduler
//!
//! Every configured routine runs on its own thread: it runs its process
//! once at startup, then again each time its interval has elapsed since
//! the previous run finished. Indexing and checkout are serialized through
//! the [`ExclusionGate`]; nothing else blocks a routine.

pub mod exclusion;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, info_span, warn};

pub use exclusion::{ExclusionGate, ExclusionGuard};

use crate::config::RoutineEntry;

/// Polling granularity of routine timers.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Process a routine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutineProcess {
    /// Scan the package tree for new descriptors
    Indexing,
    /// Poll upstream and update packages
    Checkout,
}

impl RoutineProcess {
    /// Whether the two processes must not run at the same time.
    pub fn conflicts_with(self, other: RoutineProcess) -> bool {
        self != other
    }
}

impl fmt::Display for RoutineProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexing => write!(f, "indexing"),
            Self::Checkout => write!(f, "checkout"),
        }
    }
}

/// Executes the work behind a routine process.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, process: RoutineProcess);
}

/// Observable state of one routine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutineState {
    pub running: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub runs: u64,
}

pub struct Scheduler {
    routines: Vec<RoutineEntry>,
    runner: Arc<dyn ProcessRunner>,
    gate: Arc<ExclusionGate>,
    tick: Duration,
    states: Mutex<BTreeMap<String, RoutineState>>,
}

impl Scheduler {
    pub fn new(routines: Vec<RoutineEntry>, runner: Arc<dyn ProcessRunner>) -> Self {
        let states = routines
            .iter()
            .map(|r| (r.name.clone(), RoutineState::default()))
            .collect();
        Self {
            routines,
            runner,
            gate: Arc::new(ExclusionGate::new()),
            tick: DEFAULT_TICK,
            states: Mutex::new(states),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_gate(mut self, gate: Arc<ExclusionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &Arc<ExclusionGate> {
        &self.gate
    }

    pub fn state(&self, name: &str) -> Option<RoutineState> {
        self.lock_states().get(name).cloned()
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, RoutineState>> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_state(&self, name: &str, f: impl FnOnce(&mut RoutineState)) {
        if let Some(state) = self.lock_states().get_mut(name) {
            f(state);
        }
    }

    /// Run every routine until `stop` is set, then wait for all of them.
    pub fn run(&self, stop: &AtomicBool) {
        if self.routines.is_empty() {
            info!("no routines configured");
        }
        thread::scope(|scope| {
            for routine in &self.routines {
                scope.spawn(move || self.routine_loop(routine, stop));
            }
        });
        info!("scheduler stopped");
    }

    fn routine_loop(&self, routine: &RoutineEntry, stop: &AtomicBool) {
        let span = info_span!("routine", name = %routine.name, process = %routine.process);
        let _enter = span.enter();
        let interval = routine.every.as_duration();
        info!(every = %routine.every, "routine started");

        let mut next_run = Instant::now();
        while !stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= next_run {
                self.execute(routine);
                let Some(next) = Instant::now().checked_add(interval) else {
                    warn!(every = %routine.every, "next run is out of clock range, routine stopped");
                    self.update_state(&routine.name, |state| state.next_run_at = None);
                    return;
                };
                next_run = next;
                let next_run_at = chrono::Duration::from_std(interval)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d));
                self.update_state(&routine.name, |state| state.next_run_at = next_run_at);
                debug!(next_run_at = ?next_run_at, "routine rescheduled");
                continue;
            }
            thread::sleep(self.tick.min(next_run - now));
        }
    }

    fn execute(&self, routine: &RoutineEntry) {
        let _guard = self.gate.enter(routine.process);
        self.update_state(&routine.name, |state| state.running = true);
        let started = Instant::now();
        info!("running");

        self.runner.run(routine.process);

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "finished");
        self.update_state(&routine.name, |state| {
            state.running = false;
            state.runs += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Interval;

    struct CountingRunner {
        runs: Mutex<Vec<RoutineProcess>>,
    }

    impl ProcessRunner for CountingRunner {
        fn run(&self, process: RoutineProcess) {
            self.runs.lock().unwrap().push(process);
        }
    }

    fn entry(name: &str, process: RoutineProcess, every: Duration) -> RoutineEntry {
        RoutineEntry {
            name: name.to_string(),
            process,
            every: Interval::from(every),
        }
    }

    #[test]
    fn test_process_names() {
        let process: RoutineProcess = serde_json::from_str("\"checkout\"").unwrap();
        assert_eq!(process, RoutineProcess::Checkout);
        assert_eq!(RoutineProcess::Indexing.to_string(), "indexing");
        assert!(RoutineProcess::Indexing.conflicts_with(RoutineProcess::Checkout));
        assert!(!RoutineProcess::Checkout.conflicts_with(RoutineProcess::Checkout));
    }

    #[test]
    fn test_routine_reruns_after_interval() {
        let runner = Arc::new(CountingRunner { runs: Mutex::new(Vec::new()) });
        let scheduler = Arc::new(
            Scheduler::new(
                vec![entry("fast", RoutineProcess::Indexing, Duration::from_millis(50))],
                runner.clone(),
            )
            .with_tick(Duration::from_millis(5)),
        );
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let scheduler = Arc::clone(&scheduler);
            let stop = Arc::clone(&stop);
            thread::spawn(move || scheduler.run(&stop))
        };
        thread::sleep(Duration::from_millis(300));
        stop.store(true, Ordering::Release);
        handle.join().expect("Thread panicked");

        let runs = runner.runs.lock().unwrap().len();
        assert!(runs >= 3, "runs: {}", runs);
        let state = scheduler.state("fast").unwrap();
        assert!(!state.running);
        assert_eq!(state.runs as usize, runs);
        assert!(state.next_run_at.is_some());
    }

    #[test]
    fn test_unreachable_next_run_stops_only_that_routine() {
        let runner = Arc::new(CountingRunner { runs: Mutex::new(Vec::new()) });
        let scheduler = Arc::new(
            Scheduler::new(
                vec![
                    entry("forever", RoutineProcess::Checkout, Duration::MAX),
                    entry("fast", RoutineProcess::Checkout, Duration::from_millis(30)),
                ],
                runner.clone(),
            )
            .with_tick(Duration::from_millis(5)),
        );
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let scheduler = Arc::clone(&scheduler);
            let stop = Arc::clone(&stop);
            thread::spawn(move || scheduler.run(&stop))
        };
        thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::Release);
        handle.join().expect("Thread panicked");

        let forever = scheduler.state("forever").unwrap();
        assert_eq!(forever.runs, 1);
        assert!(forever.next_run_at.is_none());
        assert!(scheduler.state("fast").unwrap().runs >= 2);
    }

    #[test]
    fn test_stop_before_start_runs_nothing() {
        let runner = Arc::new(CountingRunner { runs: Mutex::new(Vec::new()) });
        let scheduler = Scheduler::new(
            vec![entry("idle", RoutineProcess::Checkout, Duration::from_secs(60))],
            runner.clone(),
        );
        let stop = AtomicBool::new(true);
        scheduler.run(&stop);
        assert!(runner.runs.lock().unwrap().is_empty());
    }
}
