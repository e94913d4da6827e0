use crate::core::breaker::invoker::fallback_handle;
use crate::{BreakerConfig, CircuitBreaker, Result, StateChangeListener};
use std::sync::Arc;
use tokio::runtime::Handle;

// CircuitBreakerBuilder is the basic API of Tripswitch.
pub struct CircuitBreakerBuilder {
    config: BreakerConfig,
    scheduler: Option<Handle>,
    listeners: Vec<Arc<dyn StateChangeListener>>,
}

impl CircuitBreakerBuilder {
    pub fn new(resource: String) -> Self {
        CircuitBreakerBuilder {
            config: BreakerConfig::new(resource),
            scheduler: None,
            listeners: Vec::new(),
        }
    }

    /// Replaces the whole configuration, e.g. one loaded via
    /// [`BreakerConfig::from_yaml_file`].
    pub fn with_config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.config.max_failures = max_failures;
        self
    }

    pub fn with_invocation_timeout_ms(mut self, invocation_timeout_ms: u64) -> Self {
        self.config.invocation_timeout_ms = invocation_timeout_ms;
        self
    }

    pub fn with_reset_timeout_ms(mut self, reset_timeout_ms: u64) -> Self {
        self.config.reset_timeout_ms = reset_timeout_ms;
        self
    }

    pub fn with_abort_on_timeout(mut self, abort_on_timeout: bool) -> Self {
        self.config.abort_on_timeout = abort_on_timeout;
        self
    }

    /// Injects the scheduler the breaker runs work and timers on. Without
    /// it, the ambient tokio runtime is used when present, the crate's
    /// shared fallback scheduler otherwise.
    pub fn with_scheduler(mut self, handle: Handle) -> Self {
        self.scheduler = Some(handle);
        self
    }

    /// Registers a listener notified on each state transition. May be
    /// called repeatedly; listeners are notified in registration order.
    pub fn with_listener(mut self, listener: Arc<dyn StateChangeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// `build()` would consume CircuitBreakerBuilder
    pub fn build(self) -> Result<CircuitBreaker> {
        let scheduler = self
            .scheduler
            .or_else(|| Handle::try_current().ok())
            .unwrap_or_else(fallback_handle);
        CircuitBreaker::new(self.config, scheduler, self.listeners)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::BreakerError;

    #[test]
    fn build_validates_config() {
        let err = CircuitBreakerBuilder::new("abc".into())
            .with_max_failures(0)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BreakerError::invalid_argument("max_failures must be positive")
        );

        let err = CircuitBreakerBuilder::new("  ".into()).build().unwrap_err();
        assert_eq!(err, BreakerError::invalid_argument("empty resource name"));
    }

    #[test]
    fn build_without_scheduler_uses_fallback() {
        let breaker = CircuitBreakerBuilder::new("abc".into()).build().unwrap();
        assert_eq!(breaker.config().resource, "abc");
    }
}
