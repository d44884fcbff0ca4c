//! Routine Scheduling Tests
//!
//! Indexing and checkout routines scheduled together never run at the
//! same time, and a blocked routine keeps polling until it may start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use spkg_compose::config::{Interval, RoutineEntry};
use spkg_compose::routines::ProcessRunner;
use spkg_compose::{ExclusionGate, RoutineProcess, Scheduler};

/// Records the wall-clock span of every run.
struct RecordingRunner {
    work: Duration,
    runs: Mutex<Vec<(RoutineProcess, Instant, Instant)>>,
}

impl ProcessRunner for RecordingRunner {
    fn run(&self, process: RoutineProcess) {
        let started = Instant::now();
        thread::sleep(self.work);
        self.runs.lock().unwrap().push((process, started, Instant::now()));
    }
}

fn routine(name: &str, process: RoutineProcess, every: Duration) -> RoutineEntry {
    RoutineEntry {
        name: name.to_string(),
        process,
        every: Interval::from(every),
    }
}

fn run_for(scheduler: Arc<Scheduler>, duration: Duration) {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        let stop = Arc::clone(&stop);
        thread::spawn(move || scheduler.run(&stop))
    };
    thread::sleep(duration);
    stop.store(true, Ordering::Release);
    handle.join().expect("scheduler thread panicked");
}

#[test]
fn test_indexing_and_checkout_never_overlap() {
    let runner = Arc::new(RecordingRunner {
        work: Duration::from_millis(80),
        runs: Mutex::new(Vec::new()),
    });
    let scheduler = Arc::new(
        Scheduler::new(
            vec![
                routine("indexing", RoutineProcess::Indexing, Duration::from_millis(30)),
                routine("checkout", RoutineProcess::Checkout, Duration::from_millis(30)),
            ],
            runner.clone(),
        )
        .with_tick(Duration::from_millis(5))
        .with_gate(Arc::new(ExclusionGate::with_poll_interval(Duration::from_millis(20)))),
    );

    run_for(Arc::clone(&scheduler), Duration::from_millis(800));

    let runs = runner.runs.lock().unwrap().clone();
    let indexing: Vec<_> = runs.iter().filter(|r| r.0 == RoutineProcess::Indexing).collect();
    let checkout: Vec<_> = runs.iter().filter(|r| r.0 == RoutineProcess::Checkout).collect();
    assert!(!indexing.is_empty(), "indexing never ran");
    assert!(!checkout.is_empty(), "checkout never ran");

    for (_, i_start, i_end) in &indexing {
        for (_, c_start, c_end) in &checkout {
            let disjoint = i_end <= c_start || c_end <= i_start;
            assert!(disjoint, "indexing and checkout overlapped");
        }
    }

    // Both routines are due at startup, so one of them had to wait.
    assert!(scheduler.gate().wait_count() > 0);
    assert_eq!(scheduler.gate().active(), None);
}

#[test]
fn test_routine_state_tracks_runs() {
    let runner = Arc::new(RecordingRunner {
        work: Duration::from_millis(10),
        runs: Mutex::new(Vec::new()),
    });
    let scheduler = Arc::new(
        Scheduler::new(
            vec![routine("index-often", RoutineProcess::Indexing, Duration::from_millis(40))],
            runner.clone(),
        )
        .with_tick(Duration::from_millis(5)),
    );

    run_for(Arc::clone(&scheduler), Duration::from_millis(300));

    let state = scheduler.state("index-often").unwrap();
    assert!(!state.running);
    assert!(state.runs >= 2, "runs: {}", state.runs);
    assert_eq!(state.runs as usize, runner.runs.lock().unwrap().len());
    assert!(state.next_run_at.is_some());
    assert!(scheduler.state("missing").is_none());
}
