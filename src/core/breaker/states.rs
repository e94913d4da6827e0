use super::{CallFuture, CircuitBreaker, State};
use crate::{utils, BreakerError, Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// `ClosedState` represents the normal state where the circuit is closed
/// and requests flow through. It tracks failures and trips the circuit
/// when the failure threshold is reached.
pub struct ClosedState {
    /// threshold before opening the circuit
    max_failures: u32,
    /// max time for each invocation; `None` disables the deadline
    invocation_timeout: Option<Duration>,
    /// concurrency-safe failure counter, `[0, max_failures]`
    failures: AtomicU32,
}

impl ClosedState {
    pub(crate) fn new(max_failures: u32, invocation_timeout: Option<Duration>) -> Self {
        ClosedState {
            max_failures,
            invocation_timeout,
            failures: AtomicU32::new(0),
        }
    }

    /// Called when entering Closed. Resets the failure counter to 0.
    pub(crate) fn enter(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Called when an invocation succeeds. Resets the failure counter.
    pub(crate) fn on_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Called when an invocation fails. Atomically increments the failure
    /// count; the increment that reaches `max_failures` requests the
    /// transition to Open. The first thread to cross wins, any duplicate
    /// request dies on the transition compare-exchange.
    pub(crate) fn on_failure(&self, breaker: &CircuitBreaker) {
        if self.failures.fetch_add(1, Ordering::SeqCst) + 1 >= self.max_failures {
            breaker.open_circuit(State::Closed);
        }
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub(crate) fn invoke<T, F>(&self, breaker: &CircuitBreaker, func: F) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        breaker
            .invoker()
            .invoke_through(&breaker.sink(State::Closed), func, self.invocation_timeout)
    }

    pub(crate) fn invoke_async<T, F, Fut>(&self, breaker: &CircuitBreaker, func: F) -> CallFuture<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        breaker.invoker().invoke_through_async(
            breaker.sink(State::Closed),
            func(),
            self.invocation_timeout,
        )
    }
}

/// `OpenState` represents the tripped state. Every call is rejected
/// without touching the scheduler or the underlying work; on entry a
/// single delayed callback is scheduled to request HalfOpen once the
/// reset timeout elapses.
pub struct OpenState {
    reset_timeout: Duration,
    /// unix ms at which the scheduled probe request fires
    next_probe_timestamp_ms: AtomicU64,
}

impl OpenState {
    pub(crate) fn new(reset_timeout: Duration) -> Self {
        OpenState {
            reset_timeout,
            next_probe_timestamp_ms: AtomicU64::new(0),
        }
    }

    /// Called when entering Open. Schedules exactly one delayed
    /// request-half-open callback; scheduling replaces any prior pending
    /// one. The callback holds a weak handle so a pending timer never
    /// keeps a dropped breaker alive.
    pub(crate) fn enter(&self, breaker: &CircuitBreaker) {
        self.next_probe_timestamp_ms.store(
            utils::curr_time_millis() + self.reset_timeout.as_millis() as u64,
            Ordering::SeqCst,
        );
        let weak = breaker.downgrade();
        breaker.invoker().invoke_scheduled(
            move || {
                if let Some(breaker) = CircuitBreaker::upgrade(&weak) {
                    breaker.attempt_half_open(State::Open);
                }
            },
            self.reset_timeout,
        );
    }

    pub(crate) fn next_probe_timestamp_ms(&self) -> u64 {
        self.next_probe_timestamp_ms.load(Ordering::SeqCst)
    }
}

/// `HalfOpenState` represents the probationary state, where a single
/// trial request decides whether the circuit can safely close again.
pub struct HalfOpenState {
    invocation_timeout: Option<Duration>,
    /// single-flight flag, free (`false`) -> busy (`true`)
    probing: AtomicBool,
}

impl HalfOpenState {
    pub(crate) fn new(invocation_timeout: Option<Duration>) -> Self {
        HalfOpenState {
            invocation_timeout,
            probing: AtomicBool::new(false),
        }
    }

    /// Called when entering HalfOpen. Resets the single-flight flag.
    pub(crate) fn enter(&self) {
        self.probing.store(false, Ordering::SeqCst);
    }

    /// A probe outcome does not release the flag: the completion itself
    /// requests the transition that replaces this state.
    pub(crate) fn on_success(&self, breaker: &CircuitBreaker) {
        breaker.close_circuit(State::HalfOpen);
    }

    pub(crate) fn on_failure(&self, breaker: &CircuitBreaker) {
        breaker.open_circuit(State::HalfOpen);
    }

    /// Admission: only the caller that wins the free -> busy exchange may
    /// probe; everyone else is rejected as if the circuit were open.
    fn try_acquire_probe(&self) -> bool {
        self.probing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn invoke<T, F>(&self, breaker: &CircuitBreaker, func: F) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        if self.try_acquire_probe() {
            breaker.invoker().invoke_through(
                &breaker.sink(State::HalfOpen),
                func,
                self.invocation_timeout,
            )
        } else {
            Err(BreakerError::CircuitOpen)
        }
    }

    pub(crate) fn invoke_async<T, F, Fut>(&self, breaker: &CircuitBreaker, func: F) -> CallFuture<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        if self.try_acquire_probe() {
            breaker.invoker().invoke_through_async(
                breaker.sink(State::HalfOpen),
                func(),
                self.invocation_timeout,
            )
        } else {
            CallFuture::rejected()
        }
    }
}
