//! Parallel batch tests
//!
//! Pool sizing, completion waits and cancellation for batches above the
//! threshold

use adaptive_batch::utils::testing::CallLog;
use adaptive_batch::{BatchError, BatchExecutor, CancellationToken, DispatchMode};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Test scenario B: 3000 items on the default threshold
#[test]
fn test_large_batch_increments_shared_counter() {
    let counter = Arc::new(AtomicUsize::new(0));
    let executor = BatchExecutor::new();

    let count = {
        let counter = Arc::clone(&counter);
        executor
            .execute((0..3000).collect::<Vec<u32>>(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("Parallel execution should succeed")
    };

    assert_eq!(count, 3000);
    assert_eq!(counter.load(Ordering::SeqCst), 3000);
}

/// Test every item is processed exactly once
#[test]
fn test_each_item_invoked_exactly_once() {
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(50)
        .with_worker_threads(4);
    let log = CallLog::new();

    {
        let log = log.clone();
        executor
            .execute((0..500).collect::<Vec<u32>>(), move |n| log.record(n))
            .expect("Parallel execution should succeed");
    }

    let mut items = log.items();
    assert_eq!(items.len(), 500);
    items.sort_unstable();
    assert_eq!(items, (0..500).collect::<Vec<u32>>());
}

/// Test the call does not return before slow actions finish
#[test]
fn test_waits_for_all_actions() {
    let finished = Arc::new(AtomicUsize::new(0));
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(0)
        .with_worker_threads(4);

    {
        let finished = Arc::clone(&finished);
        executor
            .execute((0..24).collect::<Vec<u64>>(), move |n| {
                thread::sleep(Duration::from_millis(5 + n % 3));
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .expect("Parallel execution should succeed");
    }

    assert_eq!(finished.load(Ordering::SeqCst), 24);
}

/// Test the pool never runs more actions at once than it has workers
#[test]
fn test_concurrency_bounded_by_pool_size() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(0)
        .with_worker_threads(3);

    {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        executor
            .execute((0..30).collect::<Vec<u32>>(), move |_| {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                current.fetch_sub(1, Ordering::SeqCst);
            })
            .expect("Parallel execution should succeed");
    }

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "Peak concurrency was {}, expected <= 3", peak);
    assert!(peak > 1, "Expected actions to overlap, peak was {}", peak);
}

/// Test actions run on named pool threads and the caller stays out of it
#[test]
fn test_actions_run_on_named_worker_threads() {
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(0)
        .with_worker_threads(2)
        .with_thread_name("dml-worker");
    let log = CallLog::new();

    {
        let log = log.clone();
        executor
            .execute((0..16).collect::<Vec<u32>>(), move |n| log.record(n))
            .expect("Parallel execution should succeed");
    }

    let caller = thread::current().id();
    let calls = log.calls();
    assert!(calls.iter().all(|c| c.thread != caller));
    assert!(calls
        .iter()
        .all(|c| c.thread_name.as_deref() == Some("dml-worker")));

    let threads: HashSet<_> = calls.iter().map(|c| c.thread).collect();
    assert!(threads.len() <= 2);
}

/// Test each call starts its own pool
#[test]
fn test_pool_not_shared_between_calls() {
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(0)
        .with_worker_threads(1);
    let first = CallLog::new();
    let second = CallLog::new();

    {
        let first = first.clone();
        executor.execute(vec![1, 2, 3], move |n| first.record(n)).unwrap();
    }
    {
        let second = second.clone();
        executor.execute(vec![4, 5, 6], move |n| second.record(n)).unwrap();
    }

    let first_threads: HashSet<_> = first.calls().iter().map(|c| c.thread).collect();
    let second_threads: HashSet<_> = second.calls().iter().map(|c| c.thread).collect();
    assert!(first_threads.is_disjoint(&second_threads));
}

/// Test cancelling the token mid-wait surfaces an interruption
#[test]
fn test_cancellation_interrupts_wait() {
    let token = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(0)
        .with_worker_threads(2)
        .with_cancellation_token(token.clone());

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };

    let start = Instant::now();
    let result = {
        let calls = Arc::clone(&calls);
        executor.execute((0..200).collect::<Vec<u32>>(), move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
        })
    };
    let elapsed = start.elapsed();
    canceller.join().unwrap();

    match result {
        Err(BatchError::Interrupted { completed, total }) => {
            assert_eq!(total, 200);
            assert!(completed < 200);
        }
        other => panic!("Expected interruption, got {:?}", other),
    }

    // 200 items over 2 workers would take ~2s
    assert!(elapsed < Duration::from_secs(1), "Took {:?}", elapsed);

    // Queued items never start once the pool has shut down
    let after_return = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), after_return);
    assert!(after_return < 200);
}

/// Test in-flight actions longer than the shutdown timeout are detached
#[test]
fn test_shutdown_timeout_detaches_slow_actions() {
    let token = CancellationToken::new();
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(0)
        .with_worker_threads(2)
        .with_shutdown_timeout(Duration::from_millis(100))
        .with_cancellation_token(token.clone());

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };

    let start = Instant::now();
    let result = executor.execute((0..10).collect::<Vec<u32>>(), |_| {
        thread::sleep(Duration::from_secs(3));
    });
    let elapsed = start.elapsed();
    canceller.join().unwrap();

    assert!(
        matches!(result, Err(BatchError::Interrupted { completed: 0, total: 10 })),
        "Expected interruption, got {:?}",
        result
    );
    assert!(elapsed < Duration::from_secs(1), "Took {:?}", elapsed);
}

/// Test large batches can be started from a current-thread runtime
#[tokio::test]
async fn test_parallel_batch_inside_current_thread_runtime() {
    let counter = Arc::new(AtomicUsize::new(0));
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(2)
        .with_worker_threads(2);

    let small = {
        let counter = Arc::clone(&counter);
        executor.execute(vec![1, 2], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };
    let large = {
        let counter = Arc::clone(&counter);
        executor.execute(vec![1, 2, 3], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert_eq!(small.unwrap(), 2);
    assert_eq!(large.unwrap(), 3);
    assert_eq!(counter.load(Ordering::SeqCst), 5);
}

/// Test large batches can be started from a multi-thread runtime
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallel_batch_inside_multi_thread_runtime() {
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(2)
        .with_worker_threads(2);
    let log = CallLog::new();

    let report = {
        let log = log.clone();
        executor
            .execute_with_report((0..20).collect::<Vec<u32>>(), move |n| {
                log.record(n);
                Ok::<(), String>(())
            })
            .expect("Parallel execution should succeed")
    };

    assert_eq!(report.mode, DispatchMode::Parallel);
    assert_eq!(report.completed, 20);
    assert_eq!(log.len(), 20);
}

/// Test cancellation still interrupts a batch started from async code
#[tokio::test]
async fn test_cancellation_inside_runtime() {
    let token = CancellationToken::new();
    token.cancel();
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(0)
        .with_worker_threads(2)
        .with_cancellation_token(token);

    let result = executor.execute((0..10).collect::<Vec<u32>>(), |_| {});
    assert!(matches!(result, Err(BatchError::Interrupted { total: 10, .. })));
}

/// Test a token cancelled up front invokes nothing
#[test]
fn test_precancelled_token_skips_all_items() {
    let token = CancellationToken::new();
    token.cancel();
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(0)
        .with_worker_threads(2)
        .with_cancellation_token(token);

    let result = {
        let calls = Arc::clone(&calls);
        executor.execute((0..100).collect::<Vec<u32>>(), move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    assert!(matches!(result, Err(BatchError::Interrupted { total: 100, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_report_for_parallel_batch() {
    let executor = BatchExecutor::new()
        .with_multi_thread_limit(5)
        .with_worker_threads(2);

    let report = executor
        .execute_with_report((0..40).collect::<Vec<u32>>(), |_| Ok::<(), String>(()))
        .expect("Parallel execution should succeed");

    assert_eq!(report.mode, DispatchMode::Parallel);
    assert_eq!(report.workers, Some(2));
    assert_eq!(report.total, 40);
    assert_eq!(report.completed, 40);
    assert_eq!(report.succeeded(), 40);
    assert_eq!(report.skipped, 0);
    assert!(report.is_success());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_count_equals_input_length(
        len in 0usize..48,
        limit in 0usize..48,
        workers in 1usize..4,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = BatchExecutor::new()
            .with_multi_thread_limit(limit)
            .with_worker_threads(workers);

        let count = {
            let calls = Arc::clone(&calls);
            executor
                .execute(vec![0u8; len], move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };

        prop_assert_eq!(count, len);
        prop_assert_eq!(calls.load(Ordering::SeqCst), len);
        prop_assert_eq!(
            executor.dispatch_mode(len),
            if len > limit { DispatchMode::Parallel } else { DispatchMode::Sequential }
        );
    }
}
