use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use sightd_runtime::{ExecutorError, SerialExecutor};

#[test]
fn runs_jobs_and_returns_results() {
    let exec = SerialExecutor::spawn("test-exec", || Ok(0u64)).expect("spawn");

    let doubled = exec.run(|state| {
        *state += 21;
        *state * 2
    });
    assert_eq!(doubled, Ok(42));

    // State persists between jobs.
    assert_eq!(exec.run(|state| *state), Ok(21));
}

#[test]
fn init_failure_surfaces_to_spawner() {
    let result = SerialExecutor::<u64>::spawn("test-exec", || anyhow::bail!("no device"));
    let err = result.err().expect("init should fail");
    assert!(err.to_string().contains("no device"));
}

#[test]
fn preserves_submission_order() {
    let exec = SerialExecutor::spawn("test-exec", || Ok(Vec::new())).expect("spawn");

    for i in 0..32 {
        exec.run(move |seen: &mut Vec<usize>| seen.push(i)).unwrap();
    }

    let seen = exec.run(|seen| seen.clone()).unwrap();
    assert_eq!(seen, (0..32).collect::<Vec<_>>());
}

#[test]
fn jobs_never_overlap_across_threads() {
    let exec = Arc::new(SerialExecutor::spawn("test-exec", || Ok(())).expect("spawn"));
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    thread::scope(|scope| {
        for _ in 0..4 {
            let exec = Arc::clone(&exec);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            scope.spawn(move || {
                for _ in 0..25 {
                    let active = Arc::clone(&active);
                    let max_active = Arc::clone(&max_active);
                    exec.run(move |_state: &mut ()| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(50));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            });
        }
    });

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[test]
fn panicked_job_cancels_instead_of_hanging() {
    let exec = SerialExecutor::spawn("test-exec", || Ok(())).expect("spawn");

    let panicked: Result<(), _> = exec.run(|_state: &mut ()| panic!("boom"));
    assert_eq!(panicked, Err(ExecutorError::Canceled));
    // The worker is gone; later submissions fail rather than queue
    // forever.
    assert_eq!(exec.run(|_state: &mut ()| 1), Err(ExecutorError::Canceled));
}
