use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use storefront_data::execution::{OperationDescriptor, RemoteError, RemoteExecutor};

/// Scriptable stand-in for the hosted data store
///
/// Responses are taken from the script queue first, then the default
/// response. Any operation touching a field listed in `missing_fields` fails
/// with a schema mismatch before the script is consulted. The response is
/// fixed when the call arrives; the configured delay is applied afterwards.
#[derive(Debug)]
pub struct MockRemoteExecutor {
    calls: AtomicUsize,
    operations: Mutex<Vec<OperationDescriptor>>,
    script: Mutex<VecDeque<Result<Value, RemoteError>>>,
    default_response: Mutex<Result<Value, RemoteError>>,
    missing_fields: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl Default for MockRemoteExecutor {
    fn default() -> Self {
        Self::returning(json!([]))
    }
}

impl MockRemoteExecutor {
    pub fn returning(value: Value) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            operations: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default_response: Mutex::new(Ok(value)),
            missing_fields: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn failing(message: &str) -> Self {
        let store = Self::default();
        store.set_default(Err(RemoteError::failure(message)));
        store
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn with_missing_field(self, field: &str) -> Self {
        self.missing_fields.lock().push(field.to_string());
        self
    }

    pub fn set_default(&self, response: Result<Value, RemoteError>) {
        *self.default_response.lock() = response;
    }

    pub fn push_response(&self, response: Result<Value, RemoteError>) {
        self.script.lock().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn operations(&self) -> Vec<OperationDescriptor> {
        self.operations.lock().clone()
    }

    fn missing_field_touched(&self, op: &OperationDescriptor) -> Option<String> {
        let missing = self.missing_fields.lock();
        missing
            .iter()
            .find(|field| {
                let projected = op
                    .projection
                    .as_ref()
                    .map_or(true, |fields| fields.iter().any(|f| f == *field));
                projected || op.parameters.contains_key(field.as_str())
            })
            .cloned()
    }
}

#[async_trait]
impl RemoteExecutor for MockRemoteExecutor {
    async fn execute(&self, op: &OperationDescriptor) -> Result<Value, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.operations.lock().push(op.clone());

        let response = match self.missing_field_touched(op) {
            Some(field) => Err(RemoteError::schema_mismatch(
                field.clone(),
                format!("column \"{field}\" does not exist"),
            )),
            None => {
                let scripted = self.script.lock().pop_front();
                scripted.unwrap_or_else(|| self.default_response.lock().clone())
            }
        };

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        response
    }

    fn name(&self) -> &str {
        "mock_store"
    }
}
