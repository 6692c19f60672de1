//! # Remote Executor Contract
//!
//! The host application supplies the actual remote-store call. The core only
//! distinguishes a schema mismatch (a requested field or column the store
//! does not have) from every other failure, and it does so by error variant,
//! never by message text.

use crate::execution::OperationDescriptor;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Failure reported by a [`RemoteExecutor`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Schema mismatch on field '{field}': {message}")]
    SchemaMismatch { field: String, message: String },

    #[error("Remote failure: {message}")]
    Failure { message: String },
}

impl RemoteError {
    pub fn schema_mismatch(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::SchemaMismatch { message, .. } | Self::Failure { message } => message,
        }
    }
}

/// Executes one operation against the remote store
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, operation: &OperationDescriptor) -> Result<Value, RemoteError>;

    /// Name used in logs and breaker incidents
    fn name(&self) -> &str {
        "remote_store"
    }
}

type ExecuteFn =
    dyn Fn(OperationDescriptor) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync;

/// Adapts a plain async function into a [`RemoteExecutor`]
pub struct FnExecutor {
    name: String,
    execute: Box<ExecuteFn>,
}

impl fmt::Debug for FnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExecutor").field("name", &self.name).finish()
    }
}

impl FnExecutor {
    pub fn new<F>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(OperationDescriptor) -> BoxFuture<'static, Result<Value, RemoteError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            execute: Box::new(execute),
        }
    }
}

#[async_trait]
impl RemoteExecutor for FnExecutor {
    async fn execute(&self, operation: &OperationDescriptor) -> Result<Value, RemoteError> {
        (self.execute)(operation.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
