//!  Circuit Breaker State Machine:
//!
//!                                trip on failure threshold
//!
//!             +-----------------------------------------------------------------------+
//!             |                                                                       |
//!             |                                                                       v
//!     +----------------+                   +----------------+      Probe      +----------------+
//!     |                |                   |                |<----------------|                |
//!     |                |   Probe succeed   |                |                 |                |
//!     |     Closed     |<------------------|    HalfOpen    |                 |      Open      |
//!     |                |                   |                |   Probe failed  |                |
//!     |                |                   |                +---------------->|                |
//!     +----------------+                   +----------------+                 +----------------+
//!

pub mod invoker;
pub mod states;

pub use invoker::*;
pub use states::*;

use crate::core::config::BreakerConfig;
use crate::{logging, BreakerError, Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

/// States of Circuit Breaker State Machine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl Default for State {
    fn default() -> State {
        State::Closed
    }
}

impl From<u8> for State {
    fn from(value: u8) -> State {
        match value {
            0 => State::Closed,
            1 => State::Open,
            2 => State::HalfOpen,
            _ => unreachable!("invalid state discriminant {}", value),
        }
    }
}

/// `StateChangeListener` listens on the circuit breaker state change event.
/// Every callback fires at most once per actual transition, synchronously
/// in the thread that won the transition, before that thread returns from
/// the transition call. Notification order therefore matches transition
/// order.
pub trait StateChangeListener: Send + Sync {
    /// `on_opened` is triggered when the breaker transformed to Open.
    fn on_opened(&self, breaker: &CircuitBreaker);

    /// `on_closed` is triggered when the breaker transformed to Closed.
    fn on_closed(&self, breaker: &CircuitBreaker);

    /// `on_half_opened` is triggered when the breaker transformed to
    /// HalfOpen for a trial request.
    fn on_half_opened(&self, breaker: &CircuitBreaker);
}

/// `BreakerBase` encompasses the shared innards of a circuit breaker:
/// one instance of each state, the atomic current-state cell and the
/// invocation engine.
pub(crate) struct BreakerBase {
    pub(crate) config: BreakerConfig,
    pub(crate) closed: ClosedState,
    pub(crate) open: OpenState,
    pub(crate) half_open: HalfOpenState,
    /// state machine cell; the single synchronization point for
    /// transitions. The hot invoke path only ever loads it.
    current: AtomicU8,
    pub(crate) invoker: Invoker,
    listeners: Vec<Arc<dyn StateChangeListener>>,
}

/// The circuit breaker facade. Cheap to clone; all clones share one state
/// machine. Route every call to the protected resource through
/// [`execute`](CircuitBreaker::execute) /
/// [`run`](CircuitBreaker::run) (blocking) or
/// [`execute_async`](CircuitBreaker::execute_async) (non-blocking).
#[derive(Clone)]
pub struct CircuitBreaker {
    base: Arc<BreakerBase>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("resource", &self.base.config.resource)
            .field("state", &self.current_state())
            .finish()
    }
}

impl CircuitBreaker {
    pub(crate) fn new(
        config: BreakerConfig,
        handle: Handle,
        listeners: Vec<Arc<dyn StateChangeListener>>,
    ) -> Result<CircuitBreaker> {
        config.is_valid()?;
        let invocation_timeout = config.invocation_timeout();
        let base = Arc::new(BreakerBase {
            closed: ClosedState::new(config.max_failures, invocation_timeout),
            open: OpenState::new(config.reset_timeout()),
            half_open: HalfOpenState::new(invocation_timeout),
            current: AtomicU8::new(State::default() as u8),
            invoker: Invoker::new(handle, config.abort_on_timeout),
            listeners,
            config,
        });
        Ok(CircuitBreaker { base })
    }

    /// `current_state` returns current state of the circuit breaker.
    #[inline]
    pub fn current_state(&self) -> State {
        State::from(self.base.current.load(Ordering::SeqCst))
    }

    /// The number of counted failures since the breaker last entered
    /// Closed (or since the last success while Closed).
    #[inline]
    pub fn failures(&self) -> u32 {
        self.base.closed.failures()
    }

    /// The unix timestamp (ms) at which an Open breaker will probe, 0 if
    /// it has never opened.
    #[inline]
    pub fn next_probe_timestamp_ms(&self) -> u64 {
        self.base.open.next_probe_timestamp_ms()
    }

    /// `config` returns the associated breaker configuration.
    #[inline]
    pub fn config(&self) -> &BreakerConfig {
        &self.base.config
    }

    /// Runs a side-effecting unit of work through the breaker, blocking
    /// the caller until the work finishes or the invocation timeout
    /// elapses.
    pub fn run<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() -> std::result::Result<(), Error> + Send + 'static,
    {
        self.execute(action)
    }

    /// Runs a value-returning unit of work through the breaker, blocking
    /// the caller until the work finishes or the invocation timeout
    /// elapses, whichever comes first. On timeout the work is abandoned,
    /// not stopped.
    ///
    /// Calls are admitted by the current state: always while Closed,
    /// never while Open, and only a single trial call while HalfOpen.
    pub fn execute<T, F>(&self, func: F) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        match self.current_state() {
            State::Closed => self.base.closed.invoke(self, func),
            State::Open => Err(BreakerError::CircuitOpen),
            State::HalfOpen => self.base.half_open.invoke(self, func),
        }
    }

    /// Admits an asynchronous unit of work through the breaker. Never
    /// blocks: returns a pending [`CallFuture`] immediately, which later
    /// resolves with the work's value or a [`BreakerError`], completed by
    /// whichever side wins the race between the work and its deadline.
    pub fn execute_async<T, F, Fut>(&self, func: F) -> CallFuture<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        match self.current_state() {
            State::Closed => self.base.closed.invoke_async(self, func),
            State::Open => CallFuture::rejected(),
            State::HalfOpen => self.base.half_open.invoke_async(self, func),
        }
    }

    /// Attempts the Closed -> Open or HalfOpen -> Open transition.
    /// Returns true only if the current caller accomplished it.
    pub(crate) fn open_circuit(&self, from: State) -> bool {
        if !self.try_transition(from, State::Open) {
            return false;
        }
        logging::info!(
            "[CircuitBreaker] resource {} transformed {:?} -> Open",
            self.base.config.resource,
            from,
        );
        for listener in &self.base.listeners {
            listener.on_opened(self);
        }
        true
    }

    /// Attempts the HalfOpen -> Closed transition after a successful probe.
    pub(crate) fn close_circuit(&self, from: State) -> bool {
        if !self.try_transition(from, State::Closed) {
            return false;
        }
        logging::info!(
            "[CircuitBreaker] resource {} transformed {:?} -> Closed",
            self.base.config.resource,
            from,
        );
        for listener in &self.base.listeners {
            listener.on_closed(self);
        }
        true
    }

    /// Attempts the Open -> HalfOpen transition once the reset timeout
    /// has elapsed.
    pub(crate) fn attempt_half_open(&self, from: State) -> bool {
        if !self.try_transition(from, State::HalfOpen) {
            return false;
        }
        logging::info!(
            "[CircuitBreaker] resource {} transformed {:?} -> HalfOpen",
            self.base.config.resource,
            from,
        );
        for listener in &self.base.listeners {
            listener.on_half_opened(self);
        }
        true
    }

    /// The transition protocol. A request is valid only while the
    /// requesting state is still current; a stale request dies on the
    /// compare-exchange and is a benign no-op. The target's `enter()`
    /// hook runs strictly after the exchange so it always observes itself
    /// as current.
    fn try_transition(&self, from: State, to: State) -> bool {
        let exchanged = self
            .base
            .current
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if exchanged {
            match to {
                State::Closed => self.base.closed.enter(),
                State::Open => self.base.open.enter(self),
                State::HalfOpen => self.base.half_open.enter(),
            }
        }
        exchanged
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: State) {
        self.base.current.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn invoker(&self) -> &Invoker {
        &self.base.invoker
    }

    /// Outcome sink handed to the invoker, routing completion back to the
    /// state that admitted the call.
    pub(crate) fn sink(&self, origin: State) -> OutcomeSink {
        OutcomeSink {
            breaker: self.clone(),
            origin,
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<BreakerBase> {
        Arc::downgrade(&self.base)
    }

    pub(crate) fn upgrade(weak: &Weak<BreakerBase>) -> Option<CircuitBreaker> {
        weak.upgrade().map(|base| CircuitBreaker { base })
    }
}

/// `OutcomeSink` reports an invocation outcome to the state that
/// initiated the call. The invoker calls exactly one of the two methods,
/// exactly once, before the caller can observe the outcome, so state
/// bookkeeping is never skipped even when the caller drops the error.
pub(crate) struct OutcomeSink {
    breaker: CircuitBreaker,
    origin: State,
}

impl OutcomeSink {
    pub(crate) fn on_success(&self) {
        match self.origin {
            State::Closed => self.breaker.base.closed.on_success(),
            State::HalfOpen => self.breaker.base.half_open.on_success(&self.breaker),
            // Open admits no calls, there is nothing to report
            State::Open => {}
        }
    }

    pub(crate) fn on_failure(&self) {
        match self.origin {
            State::Closed => self.breaker.base.closed.on_failure(&self.breaker),
            State::HalfOpen => self.breaker.base.half_open.on_failure(&self.breaker),
            State::Open => {}
        }
    }
}
