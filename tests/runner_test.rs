/// Property-based tests for the bounded runner
///
/// For random item counts, concurrency limits and per-item delays, verify:
/// - Never more than `concurrency` items are in flight
/// - Every item completes exactly once
/// - Results come back in input order
use proptest::prelude::*;
use stackup::runner::{run_bounded, RunOptions, TaskError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

struct Tracker {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    runs: Vec<AtomicUsize>,
}

impl Tracker {
    fn new(items: usize) -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            runs: (0..items).map(|_| AtomicUsize::new(0)).collect(),
        })
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_bounded_exactly_once_in_order(
        delays in prop::collection::vec(0u64..8, 0..24),
        concurrency in 1usize..6,
    ) {
        let tracker = Tracker::new(delays.len());
        let items: Vec<(usize, u64)> = delays.iter().copied().enumerate().collect();

        let worker_tracker = Arc::clone(&tracker);
        let results = runtime().block_on(run_bounded(
            items,
            &RunOptions::new(concurrency),
            move |(index, delay)| {
                let tracker = Arc::clone(&worker_tracker);
                async move {
                    let now = tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    tracker.peak.fetch_max(now, Ordering::SeqCst);
                    tracker.runs[index].fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<usize, String>(index)
                }
            },
        ));

        prop_assert_eq!(results.len(), delays.len());
        prop_assert!(tracker.peak.load(Ordering::SeqCst) <= concurrency);
        for (position, result) in results.iter().enumerate() {
            prop_assert_eq!(result.as_ref().ok().copied(), Some(position));
            prop_assert_eq!(tracker.runs[position].load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn prop_failures_stay_in_their_slot(
        failing in prop::collection::vec(any::<bool>(), 1..16),
        concurrency in 1usize..4,
    ) {
        let items: Vec<(usize, bool)> = failing.iter().copied().enumerate().collect();
        let results = runtime().block_on(run_bounded(
            items,
            &RunOptions::new(concurrency),
            |(index, fail)| async move {
                if fail { Err(format!("item {} failed", index)) } else { Ok(index) }
            },
        ));

        for (index, (result, fail)) in results.iter().zip(&failing).enumerate() {
            match result {
                Ok(value) => prop_assert!(!fail && *value == index),
                Err(TaskError::Failed(message)) => {
                    prop_assert!(*fail);
                    prop_assert_eq!(message, &format!("item {} failed", index));
                }
                Err(other) => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}

#[tokio::test]
async fn test_zero_concurrency_runs_one_at_a_time() {
    let tracker = Tracker::new(5);
    let worker_tracker = Arc::clone(&tracker);
    let results = run_bounded((0..5).collect(), &RunOptions::new(0), move |index: usize| {
        let tracker = Arc::clone(&worker_tracker);
        async move {
            let now = tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            tracker.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok::<usize, ()>(index)
        }
    })
    .await;

    assert_eq!(results.len(), 5);
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeout_fails_only_the_slow_item() {
    let options = RunOptions::new(2).with_timeout(Some(Duration::from_millis(50)));
    let results = run_bounded(vec![0u64, 500, 0], &options, |delay| async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<u64, ()>(delay)
    })
    .await;

    assert!(matches!(results[0], Ok(0)));
    assert!(matches!(results[1], Err(TaskError::TimedOut(_))));
    assert!(matches!(results[2], Ok(0)));
}

#[tokio::test]
async fn test_cancel_marks_unstarted_items_aborted() {
    let cancel = CancellationToken::new();
    let options = RunOptions::new(1).with_cancel(cancel.clone());
    let started = Arc::new(AtomicUsize::new(0));

    let worker_started = Arc::clone(&started);
    let results = run_bounded((0..4).collect(), &options, move |index: usize| {
        let started = Arc::clone(&worker_started);
        let cancel = cancel.clone();
        async move {
            started.fetch_add(1, Ordering::SeqCst);
            if index == 1 {
                cancel.cancel();
            }
            Ok::<usize, ()>(index)
        }
    })
    .await;

    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert!(matches!(results[0], Ok(0)));
    assert!(matches!(results[1], Ok(1)));
    assert!(matches!(results[2], Err(TaskError::Aborted)));
    assert!(matches!(results[3], Err(TaskError::Aborted)));
}

#[tokio::test]
async fn test_panicking_worker_is_contained() {
    let results = run_bounded(vec![1, 2], &RunOptions::new(2), |n: i32| async move {
        if n == 2 {
            panic!("boom");
        }
        Ok::<i32, ()>(n)
    })
    .await;

    assert!(matches!(results[0], Ok(1)));
    assert!(matches!(results[1], Err(TaskError::Panicked(_))));
}
