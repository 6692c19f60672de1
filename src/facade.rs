//! # Data Access Facade
//!
//! Single entry point for every read and write against the remote store.
//! Each call passes, in order:
//!
//! ```text
//! RateLimiter ─▶ CircuitBreaker ─▶ SuspiciousInputScanner
//!        │
//!        ├─ fetch:  TtlCache ─miss─▶ SingleFlight ─▶ remote call ─▶ populate cache
//!        └─ write:  remote call ─▶ invalidate cached reads of the resource
//!
//! remote call = TimeoutGuard ─▶ SchemaFallbackExecutor ─▶ RemoteExecutor
//! ```
//!
//! Rejections are returned immediately without contacting the store. Remote
//! call outcomes settle the breaker permit exactly once per remote call, and
//! every call leaves an activity record in the incident log.
//!
//! Each resource carries a write generation. Writes bump it before they
//! invalidate, reads join only flights of the current generation, and a
//! flight whose generation moved on never populates the cache.

use crate::cache::{CacheStats, SingleFlight, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigResult, ConfigurationError, DataAccessConfig};
use crate::error::{DataAccessError, Result};
use crate::execution::{
    OperationDescriptor, OperationKind, RemoteExecutor, SchemaFallbackExecutor,
};
use crate::logging::{log_data_operation, log_error};
use crate::resilience::{
    with_timeout, CallPermit, CircuitBreaker, CircuitBreakerMetrics, CircuitState, RateLimiter,
    TimeoutGuard,
};
use crate::security::{IncidentKind, IncidentLog, ScanOutcome, SuspiciousInputScanner};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Point-in-time view of every shared structure behind the facade
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub session_id: String,
    pub circuit_state: Option<CircuitState>,
    pub circuit_breaker: Option<CircuitBreakerMetrics>,
    pub cache: CacheStats,
    pub in_flight: usize,
    pub rate_limited_clients: usize,
    pub fallbacks_triggered: u64,
    pub incidents: HashMap<IncidentKind, usize>,
}

impl HealthSnapshot {
    /// Healthy unless the breaker is failing
    pub fn is_healthy(&self) -> bool {
        self.circuit_breaker
            .as_ref()
            .map_or(true, CircuitBreakerMetrics::is_healthy)
    }
}

/// What one cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired_entries: usize,
    pub idle_clients: usize,
}

pub struct DataAccessFacade {
    config: DataAccessConfig,
    cache: Arc<TtlCache<Value>>,
    flights: SingleFlight<Value>,
    generations: Arc<DashMap<String, u64>>,
    rate_limiter: Option<RateLimiter>,
    breaker: Option<Arc<CircuitBreaker>>,
    scanner: SuspiciousInputScanner,
    timeouts: TimeoutGuard,
    executor: Arc<SchemaFallbackExecutor>,
    incidents: Arc<IncidentLog>,
}

impl std::fmt::Debug for DataAccessFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccessFacade")
            .field("executor", &self.executor.executor_name())
            .field("cache", &self.cache)
            .field("breaker", &self.breaker)
            .field("session_id", &self.incidents.session_id())
            .finish()
    }
}

impl DataAccessFacade {
    pub fn builder() -> DataAccessFacadeBuilder {
        DataAccessFacadeBuilder::default()
    }

    /// Read through the cache on behalf of the default client.
    ///
    /// The descriptor's kind is forced to `Read`.
    pub async fn fetch(&self, descriptor: OperationDescriptor) -> Result<Value> {
        self.fetch_as(&self.config.rate_limit.default_client_id, descriptor)
            .await
    }

    pub async fn create(&self, descriptor: OperationDescriptor) -> Result<Value> {
        self.create_as(&self.config.rate_limit.default_client_id, descriptor)
            .await
    }

    pub async fn update(&self, descriptor: OperationDescriptor) -> Result<Value> {
        self.update_as(&self.config.rate_limit.default_client_id, descriptor)
            .await
    }

    pub async fn delete(&self, descriptor: OperationDescriptor) -> Result<Value> {
        self.delete_as(&self.config.rate_limit.default_client_id, descriptor)
            .await
    }

    pub async fn fetch_as(
        &self,
        client_id: &str,
        mut descriptor: OperationDescriptor,
    ) -> Result<Value> {
        descriptor.kind = OperationKind::Read;
        self.execute_as(client_id, descriptor).await
    }

    pub async fn create_as(
        &self,
        client_id: &str,
        mut descriptor: OperationDescriptor,
    ) -> Result<Value> {
        descriptor.kind = OperationKind::Create;
        self.execute_as(client_id, descriptor).await
    }

    pub async fn update_as(
        &self,
        client_id: &str,
        mut descriptor: OperationDescriptor,
    ) -> Result<Value> {
        descriptor.kind = OperationKind::Update;
        self.execute_as(client_id, descriptor).await
    }

    pub async fn delete_as(
        &self,
        client_id: &str,
        mut descriptor: OperationDescriptor,
    ) -> Result<Value> {
        descriptor.kind = OperationKind::Delete;
        self.execute_as(client_id, descriptor).await
    }

    /// Run `descriptor` according to its own kind
    pub async fn execute_as(
        &self,
        client_id: &str,
        descriptor: OperationDescriptor,
    ) -> Result<Value> {
        let started = Instant::now();
        let result = self.dispatch(client_id, &descriptor).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let error = result.as_ref().err().map(ToString::to_string);
        self.incidents.record_activity(
            descriptor.kind.as_str(),
            &descriptor.resource,
            duration_ms,
            error.as_deref(),
        );
        log_data_operation(
            descriptor.kind.as_str(),
            &descriptor.resource,
            client_id,
            if error.is_none() { "success" } else { "failure" },
            duration_ms,
            error.as_deref(),
        );

        result
    }

    async fn dispatch(
        &self,
        client_id: &str,
        descriptor: &OperationDescriptor,
    ) -> Result<Value> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.check(client_id)?;
        }

        let permit = self.breaker.as_ref().map(|breaker| breaker.acquire()).transpose()?;

        if let ScanOutcome::Suspicious { signature, .. } = self.scanner.scan(descriptor) {
            return Err(DataAccessError::suspicious(signature.as_str()));
        }

        if descriptor.kind.is_write() {
            self.write(descriptor, permit).await
        } else {
            self.read(descriptor, permit).await
        }
    }

    async fn read(
        &self,
        descriptor: &OperationDescriptor,
        permit: Option<CallPermit>,
    ) -> Result<Value> {
        let key = descriptor.fingerprint();
        let use_cache = self.config.cache.enabled && !descriptor.bypass_cache;

        if use_cache {
            if let Some(value) = self.cache.get(&key) {
                debug!(key = %key, "Cache hit");
                return Ok(value);
            }
        }

        let generation = self.generation(&descriptor.resource);
        // Bypass reads never join a flight that may populate the cache
        let flight_key = if use_cache {
            format!("{key}@{generation}")
        } else {
            format!("{key}@{generation}/fresh")
        };

        let remote = self.remote_call(descriptor.clone(), permit, self.timeouts.read);
        let cache = use_cache.then(|| Arc::clone(&self.cache));
        let generations = Arc::clone(&self.generations);
        let resource = descriptor.resource.clone();
        let ttl = self.config.cache.ttl_for(&resource);

        // Only the leader's closure runs; a follower's closure (and its permit)
        // is dropped unused
        self.flights
            .run(&flight_key, move || async move {
                let value = remote.await?;
                if let Some(cache) = cache {
                    // The shard guard keeps a concurrent bump out until the put lands
                    let current = generations.get(&resource);
                    if current.as_deref().map_or(0, |g| *g) == generation {
                        cache.put(key, value.clone(), ttl);
                    } else {
                        debug!(
                            resource = %resource,
                            generation = generation,
                            "Resource written during read, not caching result"
                        );
                    }
                }
                Ok(value)
            })
            .await
    }

    fn generation(&self, resource: &str) -> u64 {
        self.generations.get(resource).map_or(0, |g| *g)
    }

    async fn write(
        &self,
        descriptor: &OperationDescriptor,
        permit: Option<CallPermit>,
    ) -> Result<Value> {
        let result = self
            .remote_call(descriptor.clone(), permit, self.timeouts.write)
            .await;

        // A failed or timed-out write may still have landed remotely
        let invalidated = self.invalidate_resource(&descriptor.resource);
        debug!(
            resource = %descriptor.resource,
            invalidated = invalidated,
            "Invalidated cached reads after write"
        );

        result
    }

    /// TimeoutGuard → SchemaFallbackExecutor → RemoteExecutor, settling the
    /// breaker permit with the outcome
    fn remote_call(
        &self,
        descriptor: OperationDescriptor,
        permit: Option<CallPermit>,
        deadline: Duration,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        let executor = Arc::clone(&self.executor);
        let incidents = Arc::clone(&self.incidents);

        async move {
            let label = descriptor.label();
            let started = Instant::now();
            let result = with_timeout(&label, deadline, executor.execute(&descriptor)).await;

            if let Some(permit) = permit {
                match &result {
                    Ok(_) => permit.record_success(started.elapsed()),
                    Err(_) => permit.record_failure(),
                }
            }

            if let Err(e) = &result {
                let kind = match e {
                    DataAccessError::Timeout { .. } => IncidentKind::OperationTimeout,
                    _ => IncidentKind::UpstreamFailure,
                };
                incidents.record(
                    kind,
                    json!({
                        "operation": descriptor.kind.as_str(),
                        "resource": descriptor.resource,
                        "error_kind": e.kind(),
                        "error": e.to_string(),
                    }),
                );
                log_error("data_access_facade", &label, &e.to_string(), None);
            }

            result
        }
    }

    /// Probe the store under the health-check deadline.
    ///
    /// Bypasses the cache, rate limiter and breaker so a probe works even
    /// while the circuit is open. Returns the probe latency.
    pub async fn health_check(&self, probe: OperationDescriptor) -> Result<Duration> {
        let started = Instant::now();
        let label = format!("health_check {}", probe.resource);
        self.timeouts
            .health_check(&label, self.executor.execute(&probe))
            .await?;
        Ok(started.elapsed())
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            session_id: self.incidents.session_id().to_string(),
            circuit_state: self.breaker.as_ref().map(|breaker| breaker.state()),
            circuit_breaker: self.breaker.as_ref().map(|breaker| breaker.metrics()),
            cache: self.cache.stats(),
            in_flight: self.flights.in_flight(),
            rate_limited_clients: self
                .rate_limiter
                .as_ref()
                .map_or(0, RateLimiter::tracked_clients),
            fallbacks_triggered: self.executor.fallbacks_triggered(),
            incidents: self.incidents.stats(),
        }
    }

    /// Drop every cached read of `resource`; returns how many were removed.
    ///
    /// Reads already in flight for the resource will not populate the cache,
    /// and later reads start a fresh load.
    pub fn invalidate_resource(&self, resource: &str) -> usize {
        *self.generations.entry(resource.to_string()).or_insert(0) += 1;
        self.cache
            .invalidate_prefix(&OperationDescriptor::resource_prefix(resource))
    }

    /// One cleanup pass: expired cache entries and idle rate windows
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            expired_entries: self.cache.purge_expired(),
            idle_clients: self
                .rate_limiter
                .as_ref()
                .map_or(0, RateLimiter::prune_idle),
        };
        if report != MaintenanceReport::default() {
            debug!(
                expired_entries = report.expired_entries,
                idle_clients = report.idle_clients,
                "Maintenance pass"
            );
        }
        report
    }

    /// Run [`Self::run_maintenance`] on the configured cleanup interval until
    /// the facade is dropped
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let facade: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cache.cleanup_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(facade) = facade.upgrade() else {
                    debug!("Facade dropped, stopping maintenance task");
                    break;
                };
                facade.run_maintenance();
            }
        })
    }

    pub fn config(&self) -> &DataAccessConfig {
        &self.config
    }

    pub fn incidents(&self) -> &Arc<IncidentLog> {
        &self.incidents
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// Builder wiring the facade's collaborators explicitly
#[derive(Default)]
pub struct DataAccessFacadeBuilder {
    executor: Option<Arc<dyn RemoteExecutor>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<DataAccessConfig>,
}

impl DataAccessFacadeBuilder {
    pub fn executor(mut self, executor: Arc<dyn RemoteExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: DataAccessConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> ConfigResult<DataAccessFacade> {
        let executor = self.executor.ok_or_else(|| {
            ConfigurationError::invalid_value("executor", "none", "a remote executor is required")
        })?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let incidents = Arc::new(build_incident_log(&config, Arc::clone(&clock)));

        let rate_limiter = config.rate_limit.enabled.then(|| {
            RateLimiter::from_config(&config.rate_limit, Arc::clone(&clock), Arc::clone(&incidents))
        });
        let breaker = config.circuit_breaker.enabled.then(|| {
            Arc::new(CircuitBreaker::new(
                executor.name(),
                config.circuit_breaker.to_resilience_config(),
                Arc::clone(&clock),
                Arc::clone(&incidents),
            ))
        });

        info!(
            executor = executor.name(),
            rate_limit_enabled = rate_limiter.is_some(),
            circuit_breaker_enabled = breaker.is_some(),
            session_id = incidents.session_id(),
            "Data access facade initialized"
        );

        Ok(DataAccessFacade {
            cache: Arc::new(TtlCache::new(Arc::clone(&clock), config.cache.max_entries)),
            flights: SingleFlight::new(),
            generations: Arc::new(DashMap::new()),
            rate_limiter,
            breaker,
            scanner: SuspiciousInputScanner::from_config(&config.scanner, Arc::clone(&incidents)),
            timeouts: TimeoutGuard::from_config(&config.timeouts),
            executor: Arc::new(SchemaFallbackExecutor::new(
                executor,
                &config.schema_fallback,
                Arc::clone(&incidents),
            )),
            incidents,
            config,
        })
    }
}

fn build_incident_log(config: &DataAccessConfig, clock: Arc<dyn Clock>) -> IncidentLog {
    let settings = &config.incident_log;
    let log = IncidentLog::new(clock, settings.security_capacity, settings.activity_capacity);

    let Some(path) = &settings.persist_path else {
        return log;
    };

    if path.exists() {
        match log.restore(path) {
            Ok(restored) => {
                info!(path = %path.display(), restored = restored, "Restored incident log")
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not restore incident log")
            }
        }
    }
    log.with_persist_path(path.clone())
}
