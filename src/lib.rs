#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # Tripswitch
//!
//! Tripswitch wraps calls to an unreliable dependency behind a circuit
//! breaker, so that callers fail fast instead of queueing load behind a
//! degraded downstream resource.
//!
//! ```text
//!                               trip on failure threshold
//!
//!            +-----------------------------------------------------------------------+
//!            |                                                                       |
//!            |                                                                       v
//!    +----------------+                   +----------------+      Probe      +----------------+
//!    |                |                   |                |<----------------|                |
//!    |                |   Probe succeed   |                |                 |                |
//!    |     Closed     |<------------------|    HalfOpen    |                 |      Open      |
//!    |                |                   |                |   Probe failed  |                |
//!    |                |                   |                +---------------->|                |
//!    +----------------+                   +----------------+                 +----------------+
//! ```
//!
//! While `Closed`, invocations pass through and failures are counted; the
//! failure that reaches `max_failures` trips the breaker. While `Open`,
//! every invocation is rejected immediately with
//! [`BreakerError::CircuitOpen`] and the underlying work never runs; after
//! `reset_timeout_ms` the breaker moves to `HalfOpen` and admits exactly
//! one trial invocation, which decides whether traffic resumes.
//!
//! Generally, there are several steps when using Tripswitch:
//! 1. Build a [`CircuitBreaker`] for the resource to be protected.
//! 2. Route every call to that resource through [`CircuitBreaker::execute`]
//!    (blocking) or [`CircuitBreaker::execute_async`] (non-blocking).
//! 3. Handle [`BreakerError::CircuitOpen`] with a fallback.
//!
//! ## Add Dependency
//!
//! Add the dependency in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tripswitch = { version = "0.1.0" }
//! ```
//!
//! Optional features:
//! - logger_env: Use `env_logger` to initialize logging.
//! - logger_log4rs: Use `log4rs` to initialize logging.
//!
//! ## Build a breaker
//!
//! ```rust
//! use tripswitch::api::CircuitBreakerBuilder;
//!
//! let breaker = CircuitBreakerBuilder::new("remote_quote_service".into())
//!     .with_max_failures(3)
//!     .with_invocation_timeout_ms(100)
//!     .with_reset_timeout_ms(1000)
//!     .build()
//!     .unwrap();
//!
//! match breaker.execute(|| Ok(fetch_quote()?)) {
//!     Ok(quote) => serve(quote),
//!     Err(err) if err.is_circuit_open() => serve_cached(),
//!     Err(err) => report(err),
//! }
//! ```
//!
//! The scheduler capability (delayed probe timers, worker threads for
//! deadline enforcement) is an injected `tokio::runtime::Handle`. If none
//! is provided, the builder uses the ambient runtime when there is one and
//! otherwise falls back to a small shared scheduler owned by the crate.

/// Tripswitch construction API
pub mod api;
/// Core implementation of the circuit breaker: the configuration entity,
/// the error taxonomy, the state machine and the invocation engine.
pub mod core;
/// Adapters for different logging crates.
pub mod logging;
// Utility functions for Tripswitch.
pub mod utils;

// re-export precludes
pub use crate::core::*;
pub use api::CircuitBreakerBuilder;

/// The cause type carried by failed invocations. Work closures handed to
/// the breaker return `std::result::Result<T, Error>`.
pub type Error = anyhow::Error;
/// Breaker-level result: every rejected, failed or timed-out invocation
/// surfaces as a [`BreakerError`].
pub type Result<T> = std::result::Result<T, BreakerError>;
