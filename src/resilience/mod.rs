//! # Resilience Module
//!
//! Fault tolerance around the remote store: requests are throttled per
//! client, bounded by deadlines, and isolated by a circuit breaker once the
//! store keeps failing.
//!
//! ## Architecture
//!
//! - **Rate Limiter**: Sliding-window request counts per client id
//! - **Circuit Breaker**: Fails fast after consecutive failures, probes after a cooldown
//! - **Timeout Guard**: Deadline-bounded execution for reads, writes and health checks
//! - **Metrics Collection**: Call outcomes and rejections per breaker
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use storefront_data::clock::SystemClock;
//! use storefront_data::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use storefront_data::security::IncidentLog;
//!
//! # async fn example() -> storefront_data::Result<()> {
//! let clock = Arc::new(SystemClock);
//! let incidents = Arc::new(IncidentLog::new(clock.clone(), 50, 100));
//! let breaker = Arc::new(CircuitBreaker::new(
//!     "remote_store",
//!     CircuitBreakerConfig { failure_threshold: 5, cooldown: Duration::from_secs(300) },
//!     clock,
//!     incidents,
//! ));
//!
//! let rows = breaker.call(|| async { Ok(vec!["row"]) }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod rate_limiter;
pub mod timeout;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
pub use rate_limiter::RateLimiter;
pub use timeout::{with_timeout, TimeoutGuard};
