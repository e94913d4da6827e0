use crate::{logging, utils, BreakerError, Result};
use serde::{Deserialize, Serialize};
use serde_json;
use serde_yaml;
use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::time::Duration;

/// Timeout value (in milliseconds) that disables the deadline entirely,
/// on both the blocking and the asynchronous path.
pub const NO_TIMEOUT_MS: u64 = u64::MAX;

/// `BreakerConfig` encompasses the construction-time parameters of a
/// circuit breaker.
///
/// Timeout policy: a zero `invocation_timeout_ms` means "already timed
/// out", the work is still issued but the invocation classifies as
/// [`BreakerError::Timeout`](crate::BreakerError) immediately. The
/// sentinel [`NO_TIMEOUT_MS`] disables the deadline. The same policy
/// applies to the blocking and the asynchronous path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// unique id
    pub id: String,
    /// name of the protected dependency, used in logs and notifications
    pub resource: String,
    /// `max_failures` represents the number of counted failures that trips
    /// the breaker from Closed to Open. Must be positive.
    pub max_failures: u32,
    /// `invocation_timeout_ms` represents the per-call deadline (in
    /// milliseconds) enforced on work admitted while Closed or HalfOpen.
    pub invocation_timeout_ms: u64,
    /// `reset_timeout_ms` represents the recovery timeout (in milliseconds)
    /// after the breaker opens. During the open period no requests are
    /// permitted; once it elapses the breaker transforms to half-open for
    /// a single "trial" request.
    pub reset_timeout_ms: u64,
    /// When true, an asynchronous invocation that hits its deadline has
    /// its still-running work aborted best-effort. When false (default),
    /// the work is left to finish unobserved and only the breaker moves on.
    pub abort_on_timeout: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            id: uuid::Uuid::new_v4().to_string(),
            resource: String::default(),
            max_failures: 5,
            invocation_timeout_ms: 1000,
            reset_timeout_ms: 10000,
            abort_on_timeout: false,
        }
    }
}

impl BreakerConfig {
    pub fn new(resource: String) -> Self {
        BreakerConfig {
            resource,
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> Result<()> {
        if utils::is_blank(&self.resource) {
            return Err(BreakerError::invalid_argument("empty resource name"));
        }
        if self.max_failures == 0 {
            return Err(BreakerError::invalid_argument(
                "max_failures must be positive",
            ));
        }
        Ok(())
    }

    /// The per-call deadline; `None` disables it.
    pub fn invocation_timeout(&self) -> Option<Duration> {
        Self::timeout_from_ms(self.invocation_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    fn timeout_from_ms(ms: u64) -> Option<Duration> {
        if ms == NO_TIMEOUT_MS {
            None
        } else {
            Some(Duration::from_millis(ms))
        }
    }

    /// Loads a breaker configuration from the YAML file under the given
    /// path and validates it.
    pub fn from_yaml_file(path_str: &str) -> Result<Self> {
        let path = Path::new(path_str);
        if !path.exists() {
            return Err(BreakerError::invalid_argument(format!(
                "configuration file does not exist: {}",
                path_str
            )));
        }
        let mut content = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut content))
            .map_err(|e| BreakerError::invalid_argument(format!("cannot read {}: {}", path_str, e)))?;
        let config: BreakerConfig = serde_yaml::from_str(&content)
            .map_err(|e| BreakerError::invalid_argument(format!("malformed {}: {}", path_str, e)))?;
        config.is_valid()?;
        logging::info!(
            "[Config] Resolving breaker config from file, file {}",
            path_str
        );
        Ok(config)
    }
}

impl fmt::Display for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmtted = serde_json::to_string_pretty(self).unwrap();
        write!(f, "{}", fmtted)
    }
}

// PartialEq ignores the generated id, like-for-like configs compare equal.
impl PartialEq for BreakerConfig {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource
            && self.max_failures == other.max_failures
            && self.invocation_timeout_ms == other.invocation_timeout_ms
            && self.reset_timeout_ms == other.reset_timeout_ms
            && self.abort_on_timeout == other.abort_on_timeout
    }
}
