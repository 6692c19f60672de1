//! # Timeout Guard
//!
//! Deadline-bounded execution. When the deadline wins the race the
//! operation's future is dropped, which releases whatever it owned; nothing
//! keeps polling it in the background.

use crate::config::TimeoutConfig;
use crate::error::{DataAccessError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Run `operation`, failing with [`DataAccessError::Timeout`] if it has not
/// settled within `duration`.
pub async fn with_timeout<T, Fut>(operation: &str, duration: Duration, future: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    debug!(operation = operation, timeout_ms = duration.as_millis() as u64, "Executing with timeout");

    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(operation = operation, "Operation timed out after {:?}", duration);
            Err(DataAccessError::timeout(operation, duration))
        }
    }
}

/// Per-operation-class deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    pub read: Duration,
    pub write: Duration,
    pub health_check: Duration,
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

impl TimeoutGuard {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            read: config.read_timeout(),
            write: config.write_timeout(),
            health_check: config.health_check_timeout(),
        }
    }

    /// Deadline for a read (`is_write == false`) or a write
    pub fn for_operation(&self, is_write: bool) -> Duration {
        if is_write {
            self.write
        } else {
            self.read
        }
    }

    pub async fn read<T, Fut>(&self, operation: &str, future: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        with_timeout(operation, self.read, future).await
    }

    pub async fn write<T, Fut>(&self, operation: &str, future: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        with_timeout(operation, self.write, future).await
    }

    pub async fn health_check<T, Fut>(&self, operation: &str, future: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        with_timeout(operation, self.health_check, future).await
    }
}
