//! # Schema Fallback Executor
//!
//! Issues an operation with its full projection. When the store reports a
//! schema mismatch and a reduced projection is configured for the resource,
//! the operation is re-issued exactly once against the known-safe fields and
//! the result is normalised by filling the excluded optional fields with
//! their documented defaults.
//!
//! Reads re-issue with the safe field set as projection. Creates re-issue
//! with the optional fields stripped from the payload. Updates and deletes
//! only narrow their projection: their parameters identify the rows they
//! touch and are never removed. When the reduced operation would be
//! identical to the original, no retry is issued.

use crate::config::{FallbackProjection, SchemaFallbackConfig};
use crate::error::{DataAccessError, Result};
use crate::execution::remote::{RemoteError, RemoteExecutor};
use crate::execution::{OperationDescriptor, OperationKind};
use crate::security::{IncidentKind, IncidentLog};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SchemaFallbackExecutor {
    executor: Arc<dyn RemoteExecutor>,
    projections: HashMap<String, FallbackProjection>,
    incidents: Arc<IncidentLog>,
    fallbacks_triggered: AtomicU64,
}

impl std::fmt::Debug for SchemaFallbackExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaFallbackExecutor")
            .field("executor", &self.executor.name())
            .field("resources", &self.projections.keys().collect::<Vec<_>>())
            .field("fallbacks_triggered", &self.fallbacks_triggered())
            .finish()
    }
}

impl SchemaFallbackExecutor {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        config: &SchemaFallbackConfig,
        incidents: Arc<IncidentLog>,
    ) -> Self {
        Self {
            executor,
            projections: config.projections.clone(),
            incidents,
            fallbacks_triggered: AtomicU64::new(0),
        }
    }

    /// Number of reduced-projection retries issued so far
    pub fn fallbacks_triggered(&self) -> u64 {
        self.fallbacks_triggered.load(Ordering::Relaxed)
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// Execute `operation`, retrying at most once with the reduced projection
    pub async fn execute(&self, operation: &OperationDescriptor) -> Result<Value> {
        let first_error = match self.executor.execute(operation).await {
            Ok(value) => return Ok(value),
            Err(RemoteError::Failure { message }) => {
                return Err(DataAccessError::upstream(message));
            }
            Err(e) => e,
        };

        let Some(projection) = self.projections.get(&operation.resource) else {
            debug!(
                resource = %operation.resource,
                "Schema mismatch with no fallback projection configured"
            );
            return Err(DataAccessError::schema_exhausted(
                &operation.resource,
                first_error.to_string(),
            ));
        };

        let reduced = reduce_operation(operation, projection);
        if reduced == *operation {
            debug!(
                resource = %operation.resource,
                operation = %operation.kind,
                "Schema mismatch cannot be avoided by narrowing the operation"
            );
            return Err(DataAccessError::schema_exhausted(
                &operation.resource,
                first_error.to_string(),
            ));
        }

        self.fallbacks_triggered.fetch_add(1, Ordering::Relaxed);
        warn!(
            resource = %operation.resource,
            operation = %operation.kind,
            error = %first_error,
            "Retrying with reduced projection"
        );
        self.incidents.record(
            IncidentKind::SchemaFallback,
            json!({
                "resource": operation.resource,
                "operation": operation.kind.as_str(),
                "error": first_error.to_string(),
            }),
        );

        match self.executor.execute(&reduced).await {
            Ok(value) => Ok(fill_defaults(value, operation, projection)),
            Err(RemoteError::SchemaMismatch { field, message }) => {
                Err(DataAccessError::schema_exhausted(
                    &operation.resource,
                    format!("{first_error}; reduced projection also failed on '{field}': {message}"),
                ))
            }
            Err(RemoteError::Failure { message }) => Err(DataAccessError::upstream(message)),
        }
    }
}

/// The same operation restricted to fields every schema version has
fn reduce_operation(
    operation: &OperationDescriptor,
    projection: &FallbackProjection,
) -> OperationDescriptor {
    let mut reduced = operation.clone();

    match operation.kind {
        OperationKind::Read => {
            let fields = match &operation.projection {
                Some(requested) => {
                    let kept: Vec<String> = requested
                        .iter()
                        .filter(|field| projection.safe_fields.contains(field))
                        .cloned()
                        .collect();
                    if kept.is_empty() {
                        projection.safe_fields.clone()
                    } else {
                        kept
                    }
                }
                None => projection.safe_fields.clone(),
            };
            reduced.projection = Some(fields);
        }
        OperationKind::Create => {
            reduced
                .parameters
                .retain(|key, _| !projection.is_optional(key));
            if let Some(fields) = &mut reduced.projection {
                fields.retain(|field| !projection.is_optional(field));
            }
        }
        // Parameters carry the row filters here; dropping one widens the write
        OperationKind::Update | OperationKind::Delete => {
            if let Some(fields) = &mut reduced.projection {
                fields.retain(|field| !projection.is_optional(field));
            }
        }
    }

    reduced
}

/// Insert defaults for optional fields the caller asked for but the reduced
/// call could not return
fn fill_defaults(
    value: Value,
    operation: &OperationDescriptor,
    projection: &FallbackProjection,
) -> Value {
    let wanted = |field: &str| {
        operation
            .projection
            .as_ref()
            .map_or(true, |fields| fields.iter().any(|f| f == field))
    };

    let fill = |row: &mut Map<String, Value>| {
        for (field, default) in &projection.optional_defaults {
            if wanted(field.as_str()) && !row.contains_key(field) {
                row.insert(field.clone(), default.clone());
            }
        }
    };

    match value {
        Value::Object(mut row) => {
            fill(&mut row);
            Value::Object(row)
        }
        Value::Array(rows) => Value::Array(
            rows.into_iter()
                .map(|row| match row {
                    Value::Object(mut row) => {
                        fill(&mut row);
                        Value::Object(row)
                    }
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Rejects any call that touches `missing_field`
    struct LaggingSchemaStore {
        missing_field: &'static str,
        fail_everything: bool,
        calls: Mutex<Vec<OperationDescriptor>>,
    }

    impl LaggingSchemaStore {
        fn new(missing_field: &'static str) -> Self {
            Self {
                missing_field,
                fail_everything: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<OperationDescriptor> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl RemoteExecutor for LaggingSchemaStore {
        async fn execute(
            &self,
            op: &OperationDescriptor,
        ) -> std::result::Result<Value, RemoteError> {
            self.calls.lock().push(op.clone());

            let touches_missing = op
                .projection
                .as_ref()
                .map_or(true, |fields| fields.iter().any(|f| f == self.missing_field))
                || op.parameters.contains_key(self.missing_field);

            if touches_missing || self.fail_everything {
                return Err(RemoteError::schema_mismatch(
                    self.missing_field,
                    format!("column {} does not exist", self.missing_field),
                ));
            }

            match op.kind {
                OperationKind::Read => Ok(json!([
                    { "id": 1, "name": "Lamp" },
                    { "id": 2, "name": "Desk" }
                ])),
                _ => Ok(Value::Object(op.parameters.clone())),
            }
        }
    }

    struct FlakyStore {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl RemoteExecutor for FlakyStore {
        async fn execute(
            &self,
            _op: &OperationDescriptor,
        ) -> std::result::Result<Value, RemoteError> {
            *self.calls.lock() += 1;
            Err(RemoteError::failure("connection reset"))
        }
    }

    fn products_config() -> SchemaFallbackConfig {
        let mut defaults = Map::new();
        defaults.insert("video_url".to_string(), Value::Null);
        defaults.insert("featured".to_string(), json!(false));

        let mut projections = HashMap::new();
        projections.insert(
            "products".to_string(),
            FallbackProjection {
                safe_fields: vec!["id".into(), "name".into()],
                optional_defaults: defaults,
            },
        );
        SchemaFallbackConfig { projections }
    }

    fn incidents() -> Arc<IncidentLog> {
        Arc::new(IncidentLog::new(Arc::new(ManualClock::new(0)), 50, 100))
    }

    #[tokio::test]
    async fn test_read_falls_back_once_and_fills_defaults() {
        let store = Arc::new(LaggingSchemaStore::new("video_url"));
        let log = incidents();
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), log.clone());

        let rows = executor
            .execute(&OperationDescriptor::read("products"))
            .await
            .unwrap();

        assert_eq!(
            rows,
            json!([
                { "id": 1, "name": "Lamp", "video_url": null, "featured": false },
                { "id": 2, "name": "Desk", "video_url": null, "featured": false }
            ])
        );
        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].projection, Some(vec!["id".to_string(), "name".to_string()]));
        assert_eq!(executor.fallbacks_triggered(), 1);
        assert_eq!(log.stats()[&IncidentKind::SchemaFallback], 1);
    }

    #[tokio::test]
    async fn test_defaults_only_for_requested_fields() {
        let store = Arc::new(LaggingSchemaStore::new("video_url"));
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), incidents());

        let rows = executor
            .execute(&OperationDescriptor::read("products").with_projection(["id", "video_url"]))
            .await
            .unwrap();

        assert_eq!(rows[0], json!({ "id": 1, "name": "Lamp", "video_url": null }));
        assert_eq!(store.calls()[1].projection, Some(vec!["id".to_string()]));
    }

    #[tokio::test]
    async fn test_write_strips_optional_fields() {
        let store = Arc::new(LaggingSchemaStore::new("video_url"));
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), incidents());

        let created = executor
            .execute(
                &OperationDescriptor::create("products")
                    .with_param("name", "Chair")
                    .with_param("video_url", "https://cdn.example/chair.mp4")
                    .with_projection(["name"]),
            )
            .await
            .unwrap();

        assert_eq!(created, json!({ "name": "Chair" }));
        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[1].parameters.contains_key("video_url"));
    }

    #[tokio::test]
    async fn test_delete_never_drops_its_filters() {
        let store = Arc::new(LaggingSchemaStore::new("featured"));
        let log = incidents();
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), log.clone());

        let result = executor
            .execute(
                &OperationDescriptor::delete("products")
                    .with_param("featured", true)
                    .with_projection(["id"]),
            )
            .await;

        assert!(matches!(
            result,
            Err(DataAccessError::SchemaMismatchExhausted { ref resource, .. }) if resource == "products"
        ));
        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls
            .iter()
            .all(|call| call.parameters.get("featured") == Some(&json!(true))));
        assert_eq!(executor.fallbacks_triggered(), 0);
        assert!(log.stats().get(&IncidentKind::SchemaFallback).is_none());
    }

    #[tokio::test]
    async fn test_update_with_optional_payload_is_not_retried() {
        let store = Arc::new(LaggingSchemaStore::new("video_url"));
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), incidents());

        let result = executor
            .execute(
                &OperationDescriptor::update("products")
                    .with_param("id", 7)
                    .with_param("video_url", "https://cdn.example/lamp.mp4")
                    .with_projection(["id"]),
            )
            .await;

        assert!(matches!(
            result,
            Err(DataAccessError::SchemaMismatchExhausted { .. })
        ));
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_update_narrows_projection_and_keeps_parameters() {
        let store = Arc::new(LaggingSchemaStore::new("video_url"));
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), incidents());

        let updated = executor
            .execute(
                &OperationDescriptor::update("products")
                    .with_param("id", 1)
                    .with_param("name", "Chair")
                    .with_projection(["name", "video_url"]),
            )
            .await
            .unwrap();

        assert_eq!(
            updated,
            json!({ "id": 1, "name": "Chair", "video_url": null })
        );
        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].parameters, calls[0].parameters);
        assert_eq!(calls[1].projection, Some(vec!["name".to_string()]));
    }

    #[tokio::test]
    async fn test_second_mismatch_is_exhausted_without_further_retries() {
        let store = Arc::new(LaggingSchemaStore {
            fail_everything: true,
            ..LaggingSchemaStore::new("video_url")
        });
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), incidents());

        let result = executor.execute(&OperationDescriptor::read("products")).await;

        assert!(matches!(
            result,
            Err(DataAccessError::SchemaMismatchExhausted { ref resource, .. }) if resource == "products"
        ));
        assert_eq!(store.calls().len(), 2);
        assert_eq!(executor.fallbacks_triggered(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_resource_does_not_retry() {
        let store = Arc::new(LaggingSchemaStore::new("video_url"));
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), incidents());

        let result = executor.execute(&OperationDescriptor::read("orders")).await;

        assert!(matches!(
            result,
            Err(DataAccessError::SchemaMismatchExhausted { .. })
        ));
        assert_eq!(store.calls().len(), 1);
        assert_eq!(executor.fallbacks_triggered(), 0);
    }

    #[tokio::test]
    async fn test_other_failures_never_trigger_fallback() {
        let store = Arc::new(FlakyStore {
            calls: Mutex::new(0),
        });
        let executor = SchemaFallbackExecutor::new(store.clone(), &products_config(), incidents());

        let result = executor.execute(&OperationDescriptor::read("products")).await;

        assert_eq!(result, Err(DataAccessError::upstream("connection reset")));
        assert_eq!(*store.calls.lock(), 1);
        assert_eq!(executor.fallbacks_triggered(), 0);
    }
}
