//! # Read Cache Module
//!
//! In-process caching for remote reads.
//!
//! ```text
//! fetch ──▶ TtlCache ──hit──▶ value
//!              │ miss
//!              ▼
//!         SingleFlight ──▶ one remote call per key, shared by every waiter
//! ```
//!
//! Writes never populate the cache; they invalidate every entry of the
//! affected resource.

pub mod single_flight;
pub mod ttl_cache;

pub use single_flight::SingleFlight;
pub use ttl_cache::{CacheEntry, CacheStats, TtlCache};
