//! # Execution Module
//!
//! Operation descriptors, the remote executor contract supplied by the host,
//! and the schema-fallback layer wrapped around it.

pub mod operation;
pub mod remote;
pub mod schema_fallback;

pub use operation::{OperationDescriptor, OperationKind};
pub use remote::{FnExecutor, RemoteError, RemoteExecutor};
pub use schema_fallback::SchemaFallbackExecutor;
