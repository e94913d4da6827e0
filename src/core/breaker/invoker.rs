use super::OutcomeSink;
use crate::{logging, BreakerError, Error, Result};
use anyhow::anyhow;
use lazy_static::lazy_static;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

lazy_static! {
    /// Shared scheduler used when no runtime is injected and none is
    /// ambient, the analog of a default daemon timer pool.
    static ref FALLBACK_SCHEDULER: Runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("tripswitch-scheduler")
        .enable_time()
        .build()
        .unwrap();
}

pub(crate) fn fallback_handle() -> Handle {
    FALLBACK_SCHEDULER.handle().clone()
}

/// `Invoker` executes units of work under a deadline on the injected
/// scheduler, classifies the outcome and reports it to the state that
/// admitted the call, always before the caller can observe the error, so
/// state bookkeeping is never skipped.
pub(crate) struct Invoker {
    handle: Handle,
    /// async timeout policy: abort the still-running work when the timer
    /// wins the race, instead of letting it finish unobserved
    abort_on_timeout: bool,
    /// the one pending delayed action; scheduling replaces it
    scheduled: Mutex<Option<JoinHandle<()>>>,
}

impl Invoker {
    pub(crate) fn new(handle: Handle, abort_on_timeout: bool) -> Self {
        Invoker {
            handle,
            abort_on_timeout,
            scheduled: Mutex::new(None),
        }
    }

    /// Schedules `action` to run once after `delay`. At most one
    /// scheduled action is pending per invoker; a new one replaces (and
    /// cancels) any prior pending one, it never queues behind it.
    pub(crate) fn invoke_scheduled<F>(&self, action: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });
        let mut slot = self.scheduled.lock().unwrap();
        if let Some(prev) = slot.replace(task) {
            prev.abort();
        }
    }

    /// Runs `func` to completion or until `timeout` elapses, whichever
    /// comes first, reporting the outcome to `sink` before returning.
    /// The work runs on the scheduler's blocking pool; on timeout it is
    /// abandoned: the caller is released, the worker cannot be stopped.
    pub(crate) fn invoke_through<T, F>(
        &self,
        sink: &OutcomeSink,
        func: F,
        timeout: Option<Duration>,
    ) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        match self.invoke(func, timeout) {
            Ok(value) => {
                sink.on_success();
                Ok(value)
            }
            Err(err) => {
                sink.on_failure();
                Err(err)
            }
        }
    }

    fn invoke<T, F>(&self, func: F, timeout: Option<Duration>) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.handle.spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(func));
            let _ = tx.send(outcome);
        });
        let received = match timeout {
            // a zero timeout means "already timed out": the work was
            // issued, the deadline has expired
            Some(timeout) => rx.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => {
                    logging::debug!("[Invoker] invocation abandoned after {:?}", timeout);
                    BreakerError::Timeout
                }
                RecvTimeoutError::Disconnected => scheduler_gone(),
            })?,
            None => rx.recv().map_err(|_| scheduler_gone())?,
        };
        match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => Err(BreakerError::Execution(cause)),
            Err(payload) => Err(BreakerError::Execution(anyhow!(
                "invocation panicked: {}",
                panic_message(&payload)
            ))),
        }
    }

    /// Spawns the pending result as its own task and races it against a
    /// timer of length `timeout`: whichever resolves first determines the
    /// outcome and the loser is canceled. The timer is dropped when the
    /// work wins; when the timer wins the work is aborted only under
    /// `abort_on_timeout`, otherwise it finishes unobserved. `sink` is
    /// reported exactly once, matching the race winner.
    pub(crate) fn invoke_through_async<T, Fut>(
        &self,
        sink: OutcomeSink,
        fut: Fut,
        timeout: Option<Duration>,
    ) -> CallFuture<T>
    where
        Fut: Future<Output = std::result::Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut work = self.handle.spawn(fut);
        let abort_on_timeout = self.abort_on_timeout;
        self.handle.spawn(async move {
            let outcome: Result<T> = match timeout {
                None => classify_join(work.await),
                Some(timeout) if timeout.is_zero() => {
                    // "already timed out"; the work was still issued
                    if abort_on_timeout {
                        work.abort();
                    }
                    Err(BreakerError::Timeout)
                }
                Some(timeout) => {
                    tokio::select! {
                        joined = &mut work => classify_join(joined),
                        _ = tokio::time::sleep(timeout) => {
                            if abort_on_timeout {
                                work.abort();
                            }
                            logging::debug!(
                                "[Invoker] pending result lost the race after {:?}",
                                timeout
                            );
                            Err(BreakerError::Timeout)
                        }
                    }
                }
            };
            match &outcome {
                Ok(_) => sink.on_success(),
                Err(_) => sink.on_failure(),
            }
            let _ = tx.send(outcome);
        });
        CallFuture { rx }
    }
}

fn scheduler_gone() -> BreakerError {
    logging::FREQUENT_ERROR_ONCE.call_once(|| {
        logging::error!("[Invoker] scheduler dropped an invocation in flight");
    });
    BreakerError::Interrupted
}

fn classify_join<T>(
    joined: std::result::Result<std::result::Result<T, Error>, JoinError>,
) -> Result<T> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(cause)) => Err(BreakerError::Execution(cause)),
        Err(join_err) => {
            if join_err.is_panic() {
                let payload = join_err.into_panic();
                Err(BreakerError::Execution(anyhow!(
                    "invocation panicked: {}",
                    panic_message(&payload)
                )))
            } else {
                Err(BreakerError::Interrupted)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).into()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "opaque panic payload".into()
    }
}

/// The pending result of [`execute_async`](super::CircuitBreaker::execute_async).
/// Resolves with the work's value, or with the [`BreakerError`]
/// classifying why no value was produced. Dropping it does not cancel
/// the admitted work; outcome reporting to the breaker happens either way.
pub struct CallFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> CallFuture<T> {
    /// A call rejected without running; resolves immediately.
    pub(crate) fn rejected() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(BreakerError::CircuitOpen));
        CallFuture { rx }
    }
}

impl<T> Future for CallFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            // the race task was torn down before completing the call
            Err(_) => Err(BreakerError::Interrupted),
        })
    }
}
