use crate::Error;
use std::error;
use std::fmt;

/// `BreakerError` indicates why an invocation routed through the breaker
/// did not produce a value. The classification is load-bearing for
/// callers: `CircuitOpen` means the work never started, `Timeout` means
/// the outcome of the work is unknown, `Execution` means the work
/// definitely failed.
#[derive(Debug)]
pub enum BreakerError {
    /// The breaker rejected the invocation without running the work.
    /// Recoverable by the caller, typically via a fallback.
    CircuitOpen,
    /// The deadline elapsed before the work completed. The work has been
    /// abandoned by the breaker but may still finish on its own.
    Timeout,
    /// The work ran and failed; the original error is attached as cause.
    Execution(Error),
    /// The wait for an outcome was severed externally, e.g. the scheduler
    /// shut down while the invocation was in flight.
    Interrupted,
    /// A construction-time contract violation.
    InvalidArgument(String),
}

impl BreakerError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        BreakerError::InvalidArgument(msg.into())
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout)
    }

    /// The attached cause, present only for `Execution`.
    pub fn cause(&self) -> Option<&Error> {
        match self {
            BreakerError::Execution(cause) => Some(cause),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            BreakerError::CircuitOpen => "CircuitOpen",
            BreakerError::Timeout => "Timeout",
            BreakerError::Execution(_) => "Execution",
            BreakerError::Interrupted => "Interrupted",
            BreakerError::InvalidArgument(_) => "InvalidArgument",
        }
    }
}

// Equality on the classification only; an attached cause never takes part.
impl PartialEq for BreakerError {
    fn eq(&self, other: &BreakerError) -> bool {
        match (self, other) {
            (BreakerError::InvalidArgument(a), BreakerError::InvalidArgument(b)) => a == b,
            _ => self.kind() == other.kind(),
        }
    }
}

impl fmt::Display for BreakerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::CircuitOpen => write!(f, "circuit is open, invocation rejected"),
            BreakerError::Timeout => write!(f, "invocation timed out"),
            BreakerError::Execution(cause) => write!(f, "invocation failed: {}", cause),
            BreakerError::Interrupted => write!(f, "invocation interrupted"),
            BreakerError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl error::Error for BreakerError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            BreakerError::Execution(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}
