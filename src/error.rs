//! # Data Access Error Types
//!
//! Typed failures returned by the facade. Callers get structured errors, never
//! formatted end-user messages.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`crate::facade::DataAccessFacade`] operations
///
/// `Clone` is required because every caller coalesced onto one in-flight
/// remote call receives the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataAccessError {
    /// Caller exceeded its sliding-window request budget
    #[error("Rate limit exceeded for client {client_id}: retry after {}ms", retry_after.as_millis())]
    RateLimitExceeded {
        client_id: String,
        retry_after: Duration,
    },

    /// Upstream presumed unhealthy, call rejected without dispatch
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Parameters matched an attack signature, call rejected without dispatch
    #[error("Suspicious input rejected: {signature}")]
    SuspiciousInput { signature: String },

    /// Operation did not settle before its deadline
    #[error("Operation {operation} timed out after {}ms", timeout.as_millis())]
    Timeout { operation: String, timeout: Duration },

    /// Both the full and the reduced projection were rejected by the store
    #[error("Schema mismatch on {resource} persisted after fallback: {message}")]
    SchemaMismatchExhausted { resource: String, message: String },

    /// Remote executor reported a non-schema failure
    #[error("Upstream error: {message}")]
    Upstream { message: String },
}

impl DataAccessError {
    pub fn rate_limited(client_id: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimitExceeded {
            client_id: client_id.into(),
            retry_after,
        }
    }

    pub fn circuit_open(component: impl Into<String>) -> Self {
        Self::CircuitOpen {
            component: component.into(),
        }
    }

    pub fn suspicious(signature: impl Into<String>) -> Self {
        Self::SuspiciousInput {
            signature: signature.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    pub fn schema_exhausted(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatchExhausted {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the identical request under its own policy
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Upstream { .. })
    }

    /// Whether the request was resolved locally before reaching the remote store
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } | Self::CircuitOpen { .. } | Self::SuspiciousInput { .. }
        )
    }

    /// Stable label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::SuspiciousInput { .. } => "suspicious_input",
            Self::Timeout { .. } => "timeout",
            Self::SchemaMismatchExhausted { .. } => "schema_mismatch_exhausted",
            Self::Upstream { .. } => "upstream_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, DataAccessError>;
