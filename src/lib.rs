#![allow(clippy::doc_markdown)] // Allow technical terms like TTL, JSON in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Storefront Data Core
//!
//! Resilient data-access layer for the storefront and admin panel.
//!
//! ## Overview
//!
//! Every call to the hosted data store goes through one facade that adds
//! read caching, request coalescing, deadline-bounded execution with
//! schema-degradation fallback, and a client-side defense layer: per-client
//! rate limiting, circuit breaking, input screening and incident logging.
//!
//! ## Module Organization
//!
//! - [`facade`] - `DataAccessFacade`, the single entry point
//! - [`cache`] - TTL cache and single-flight request coalescing
//! - [`resilience`] - Rate limiter, circuit breaker and timeout guard
//! - [`security`] - Suspicious input scanner and incident log
//! - [`execution`] - Operation descriptors, remote executor contract, schema fallback
//! - [`config`] - Layered configuration loading
//! - [`clock`] - Injectable time source
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use serde_json::json;
//! use storefront_data::execution::{FnExecutor, OperationDescriptor};
//! use storefront_data::{DataAccessConfig, DataAccessFacade};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FnExecutor::new("hosted_store", |op: OperationDescriptor| {
//!     async move { Ok(json!([{ "id": 1, "resource": op.resource }])) }.boxed()
//! });
//!
//! let facade = DataAccessFacade::builder()
//!     .executor(Arc::new(store))
//!     .config(DataAccessConfig::default())
//!     .build()?;
//!
//! let products = facade
//!     .fetch(OperationDescriptor::read("products").with_param("category", "lamps"))
//!     .await?;
//! println!("{products}");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod execution;
pub mod facade;
pub mod logging;
pub mod resilience;
pub mod security;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigManager, ConfigurationError, DataAccessConfig};
pub use error::{DataAccessError, Result};
pub use execution::{OperationDescriptor, OperationKind, RemoteError, RemoteExecutor};
pub use facade::{DataAccessFacade, DataAccessFacadeBuilder, HealthSnapshot, MaintenanceReport};
pub use resilience::{CircuitBreaker, CircuitState, RateLimiter, TimeoutGuard};
pub use security::{IncidentKind, IncidentLog, SuspiciousInputScanner};
