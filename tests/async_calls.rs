//! Asynchronous-path behavior: the timeout race, single-completion
//! guarantees and thread-safety under concurrent callers.

mod common;

use anyhow::anyhow;
use common::CountingListener;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tripswitch::api::CircuitBreakerBuilder;
use tripswitch::{BreakerError, CircuitBreaker, Error, State, StateChangeListener};

fn breaker(max_failures: u32, invocation_timeout_ms: u64, reset_timeout_ms: u64) -> CircuitBreaker {
    CircuitBreakerBuilder::new("dependency".into())
        .with_max_failures(max_failures)
        .with_invocation_timeout_ms(invocation_timeout_ms)
        .with_reset_timeout_ms(reset_timeout_ms)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pending_result_losing_the_race_times_out() {
    let listener = Arc::new(CountingListener::new());
    let sut = CircuitBreakerBuilder::new("dependency".into())
        .with_max_failures(100)
        .with_invocation_timeout_ms(100)
        .with_reset_timeout_ms(60_000)
        .with_listener(listener.clone() as Arc<dyn StateChangeListener>)
        .build()
        .unwrap();

    let completed = Arc::new(AtomicBool::new(false));
    let witness = Arc::clone(&completed);
    let err = sut
        .execute_async(move || async move {
            // resolves 50ms after the deadline
            tokio::time::sleep(Duration::from_millis(150)).await;
            witness.store(true, Ordering::SeqCst);
            Ok::<_, Error>(1)
        })
        .await
        .unwrap_err();
    assert_eq!(err, BreakerError::Timeout);
    assert_eq!(sut.failures(), 1);

    // the loser resolves later, unobserved: no second report, no state change
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(completed.load(Ordering::SeqCst));
    assert_eq!(sut.failures(), 1);
    assert_eq!(sut.current_state(), State::Closed);
    assert_eq!(listener.opened(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pending_result_winning_the_race_cancels_the_timer() {
    let sut = breaker(2, 60_000, 60_000);

    let value = sut
        .execute_async(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, Error>(5)
        })
        .await
        .unwrap();
    assert_eq!(value, 5);

    // were the losing timer still alive it would report a failure later
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sut.failures(), 0);
    assert_eq!(sut.current_state(), State::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hundred_concurrent_async_calls_all_succeed() {
    let sut = breaker(3, 1000, 60_000);

    let successes = Arc::new(AtomicUsize::new(0));
    let mut calls = Vec::new();
    for _ in 0..100 {
        let jitter = rand::thread_rng().gen_range(1..15);
        let sut = sut.clone();
        let successes = Arc::clone(&successes);
        calls.push(tokio::spawn(async move {
            let outcome = sut
                .execute_async(move || async move {
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                    Ok::<_, Error>("success")
                })
                .await;
            if outcome.is_ok() {
                successes.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for call in calls {
        call.await.unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 100);
    assert_eq!(sut.current_state(), State::Closed);
    assert_eq!(sut.failures(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_failures_trip_exactly_once() {
    let listener = Arc::new(CountingListener::new());
    let sut = CircuitBreakerBuilder::new("dependency".into())
        .with_max_failures(3)
        .with_reset_timeout_ms(60_000)
        .with_listener(listener.clone() as Arc<dyn StateChangeListener>)
        .build()
        .unwrap();

    let mut calls = Vec::new();
    for _ in 0..20 {
        let sut = sut.clone();
        calls.push(tokio::spawn(async move {
            let _ = sut
                .execute_async(|| async { Err::<u32, _>(anyhow!("intentional failure")) })
                .await;
        }));
    }
    for call in calls {
        call.await.unwrap();
    }

    assert_eq!(sut.current_state(), State::Open);
    assert_eq!(listener.opened(), 1);

    let err = sut
        .execute_async(|| async { Ok::<_, Error>("test") })
        .await
        .unwrap_err();
    assert_eq!(err, BreakerError::CircuitOpen);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn circuit_recovers_under_concurrent_probes() {
    let sut = breaker(3, 1000, 100);

    for _ in 0..3 {
        let _ = sut
            .execute_async(|| async { Err::<u32, _>(anyhow!("fail")) })
            .await;
    }
    assert_eq!(sut.current_state(), State::Open);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let successes = Arc::new(AtomicUsize::new(0));
    let mut calls = Vec::new();
    for _ in 0..10 {
        let sut = sut.clone();
        let successes = Arc::clone(&successes);
        calls.push(tokio::spawn(async move {
            // some are rejected while the single probe is deciding
            let outcome = sut
                .execute_async(|| async { Ok::<_, Error>("success") })
                .await;
            if outcome.is_ok() {
                successes.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for call in calls {
        call.await.unwrap();
    }

    assert!(successes.load(Ordering::SeqCst) > 0);
    assert_eq!(sut.current_state(), State::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_timeout_load_is_classified_per_call() {
    let sut = breaker(100, 100, 60_000);

    let timeouts = Arc::new(AtomicUsize::new(0));
    let successes = Arc::new(AtomicUsize::new(0));
    let mut calls = Vec::new();
    for i in 0..30 {
        let sut = sut.clone();
        let timeouts = Arc::clone(&timeouts);
        let successes = Arc::clone(&successes);
        calls.push(tokio::spawn(async move {
            let outcome = sut
                .execute_async(move || async move {
                    if i % 2 == 0 {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    Ok::<_, Error>(i)
                })
                .await;
            match outcome {
                Ok(_) => {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) if err.is_timeout() => {
                    timeouts.fetch_add(1, Ordering::SeqCst);
                }
                Err(_) => {}
            }
        }));
    }
    for call in calls {
        call.await.unwrap();
    }

    assert_eq!(timeouts.load(Ordering::SeqCst), 15);
    assert_eq!(successes.load(Ordering::SeqCst), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abort_on_timeout_stops_the_losing_work() {
    let abandoned = Arc::new(AtomicBool::new(false));
    let witness = Arc::clone(&abandoned);
    let lenient = breaker(100, 50, 60_000);
    let _ = lenient
        .execute_async(move || async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            witness.store(true, Ordering::SeqCst);
            Ok::<_, Error>(1)
        })
        .await;

    let aborted = Arc::new(AtomicBool::new(false));
    let witness = Arc::clone(&aborted);
    let strict = CircuitBreakerBuilder::new("dependency".into())
        .with_max_failures(100)
        .with_invocation_timeout_ms(50)
        .with_reset_timeout_ms(60_000)
        .with_abort_on_timeout(true)
        .build()
        .unwrap();
    let _ = strict
        .execute_async(move || async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            witness.store(true, Ordering::SeqCst);
            Ok::<_, Error>(1)
        })
        .await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    // fire-and-forget lets the loser finish unobserved; abort stops it
    assert!(abandoned.load(Ordering::SeqCst));
    assert!(!aborted.load(Ordering::SeqCst));
}
