//! Operation descriptors
//!
//! A descriptor is created by the caller for each call, consumed by the
//! facade, and discarded once the call completes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do, against which resource, with which parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub kind: OperationKind,

    /// Logical table/collection name
    pub resource: String,

    /// Filters for reads, payload (plus identifying filters) for writes
    pub parameters: Map<String, Value>,

    /// Requested field set; `None` means every field
    pub projection: Option<Vec<String>>,

    /// Skip the read cache for this fetch (results still coalesce)
    #[serde(default)]
    pub bypass_cache: bool,
}

impl OperationDescriptor {
    pub fn new(kind: OperationKind, resource: impl Into<String>) -> Self {
        Self {
            kind,
            resource: resource.into(),
            parameters: Map::new(),
            projection: None,
            bypass_cache: false,
        }
    }

    pub fn read(resource: impl Into<String>) -> Self {
        Self::new(OperationKind::Read, resource)
    }

    pub fn create(resource: impl Into<String>) -> Self {
        Self::new(OperationKind::Create, resource)
    }

    pub fn update(resource: impl Into<String>) -> Self {
        Self::new(OperationKind::Update, resource)
    }

    pub fn delete(resource: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, resource)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    /// Deterministic cache/coalescing key for this operation
    ///
    /// Parameters are serialized from a sorted map, so insertion order does
    /// not change the key.
    pub fn fingerprint(&self) -> String {
        let parameters = Value::Object(self.parameters.clone()).to_string();
        let projection = self
            .projection
            .as_ref()
            .map_or_else(|| "*".to_string(), |fields| fields.join(","));
        format!(
            "{}{}|{}|{}",
            Self::resource_prefix(&self.resource),
            self.kind,
            parameters,
            projection
        )
    }

    /// Prefix shared by every fingerprint of `resource`
    pub fn resource_prefix(resource: &str) -> String {
        format!("{resource}:")
    }

    /// Short label for logs, e.g. `read products`
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = OperationDescriptor::read("products")
            .with_param("category", "shoes")
            .with_param("limit", 20);
        let b = OperationDescriptor::read("products")
            .with_param("limit", 20)
            .with_param("category", "shoes");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().starts_with("products:read|"));
    }

    #[test]
    fn test_fingerprint_distinguishes_projection_and_kind() {
        let full = OperationDescriptor::read("products");
        let reduced = OperationDescriptor::read("products").with_projection(["id", "name"]);
        let delete = OperationDescriptor::delete("products");

        assert_ne!(full.fingerprint(), reduced.fingerprint());
        assert_ne!(full.fingerprint(), delete.fingerprint());
        assert!(reduced.fingerprint().ends_with("|id,name"));
    }

    #[test]
    fn test_builder_and_kinds() {
        let op = OperationDescriptor::update("orders")
            .with_param("id", 7)
            .with_param("status", json!("shipped"))
            .bypassing_cache();

        assert!(op.kind.is_write());
        assert!(op.bypass_cache);
        assert_eq!(op.parameters["status"], json!("shipped"));
        assert_eq!(op.label(), "update orders");
        assert!(!OperationKind::Read.is_write());
    }
}
