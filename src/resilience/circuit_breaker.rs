//! # Circuit Breaker Implementation
//!
//! Isolates a failing remote store so repeated failures fail fast instead of
//! piling up timeouts. Three states: Closed (normal operation), Open (failing
//! fast) and Half-Open (a single probe call tests recovery).
//!
//! Callers take a [`CallPermit`] before dispatching and settle it with the
//! outcome. Settling is the only way call outcomes reach the breaker, so a call
//! that never reaches the remote executor never counts as a failure.

use crate::clock::Clock;
use crate::error::{DataAccessError, Result};
use crate::resilience::metrics::AtomicCircuitBreakerMetrics;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::security::{IncidentKind, IncidentLog};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - one probe call allowed through
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
struct FailureWindow {
    consecutive_failures: u32,
    state: CircuitState,
    /// Only meaningful while Open
    opened_at_ms: u64,
    probe_in_flight: bool,
}

/// Breaker guarding every call to the remote executor
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    incidents: Arc<IncidentLog>,
    window: Mutex<FailureWindow>,
    metrics: AtomicCircuitBreakerMetrics,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("window", &*self.window.lock())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        incidents: Arc<IncidentLog>,
    ) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            cooldown_seconds = config.cooldown.as_secs(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            clock,
            incidents,
            window: Mutex::new(FailureWindow {
                consecutive_failures: 0,
                state: CircuitState::Closed,
                opened_at_ms: 0,
                probe_in_flight: false,
            }),
            metrics: AtomicCircuitBreakerMetrics::default(),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.window.lock().state
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.window.lock().consecutive_failures
    }

    /// Ask permission to dispatch one call.
    ///
    /// While Open this rejects with [`DataAccessError::CircuitOpen`] until the
    /// cooldown has elapsed; the first request after that becomes the
    /// half-open probe and every other request is rejected until the probe
    /// settles.
    pub fn acquire(self: &Arc<Self>) -> Result<CallPermit> {
        let mut window = self.window.lock();
        let now = self.clock.now_ms();

        let probe = match window.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooldown_ms = self.config.cooldown.as_millis() as u64;
                if now < window.opened_at_ms.saturating_add(cooldown_ms) {
                    drop(window);
                    return Err(self.reject());
                }
                window.state = CircuitState::HalfOpen;
                window.probe_in_flight = true;
                info!(component = %self.name, "Circuit breaker half-open (testing recovery)");
                self.incidents.record(
                    IncidentKind::CircuitBreakerProbe,
                    json!({
                        "component": self.name,
                        "opened_for_ms": now.saturating_sub(window.opened_at_ms),
                    }),
                );
                true
            }
            CircuitState::HalfOpen => {
                if window.probe_in_flight {
                    drop(window);
                    return Err(self.reject());
                }
                window.probe_in_flight = true;
                true
            }
        };

        Ok(CallPermit {
            breaker: Arc::clone(self),
            probe,
            settled: false,
        })
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, Fut>(self: &Arc<Self>, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.acquire()?;

        let start_time = Instant::now();
        let result = operation().await;
        match &result {
            Ok(_) => permit.record_success(start_time.elapsed()),
            Err(_) => permit.record_failure(),
        }
        result
    }

    fn reject(&self) -> DataAccessError {
        self.metrics.record_rejection();
        debug!(component = %self.name, "Call rejected, circuit open");
        DataAccessError::circuit_open(self.name.clone())
    }

    fn on_success(&self, probe: bool, duration: Duration) {
        self.metrics.record_success(duration);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis(),
            "Operation succeeded"
        );

        let mut window = self.window.lock();
        match window.state {
            CircuitState::HalfOpen if probe => {
                self.transition_to_closed(&mut window);
            }
            CircuitState::Closed => {
                // Decrement, not reset
                window.consecutive_failures = window.consecutive_failures.saturating_sub(1);
            }
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        self.metrics.record_failure();

        let mut window = self.window.lock();
        match window.state {
            CircuitState::Closed => {
                window.consecutive_failures += 1;
                warn!(
                    component = %self.name,
                    consecutive_failures = window.consecutive_failures,
                    "Operation failed"
                );
                if window.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to_open(&mut window);
                }
            }
            CircuitState::HalfOpen if probe => {
                // Any probe failure immediately reopens the circuit
                window.consecutive_failures += 1;
                self.transition_to_open(&mut window);
            }
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut window = self.window.lock();
        if window.state == CircuitState::HalfOpen {
            window.probe_in_flight = false;
        }
    }

    /// Transition to closed state (normal operation)
    fn transition_to_closed(&self, window: &mut FailureWindow) {
        let previous = window.state;
        window.state = CircuitState::Closed;
        window.consecutive_failures = 0;
        window.opened_at_ms = 0;
        window.probe_in_flight = false;

        info!(
            component = %self.name,
            previous_state = %previous,
            "Circuit breaker closed (recovered)"
        );
        self.incidents.record(
            IncidentKind::CircuitBreakerReset,
            json!({ "component": self.name, "previous_state": previous }),
        );
    }

    /// Transition to open state (failing fast)
    fn transition_to_open(&self, window: &mut FailureWindow) {
        window.state = CircuitState::Open;
        window.opened_at_ms = self.clock.now_ms();
        window.probe_in_flight = false;

        error!(
            component = %self.name,
            consecutive_failures = window.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            cooldown_seconds = self.config.cooldown.as_secs(),
            "Circuit breaker opened (failing fast)"
        );
        self.incidents.record(
            IncidentKind::DatabaseLocked,
            json!({
                "component": self.name,
                "consecutive_failures": window.consecutive_failures,
                "cooldown_ms": self.config.cooldown.as_millis() as u64,
            }),
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut window = self.window.lock();
        self.transition_to_open(&mut window);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        let mut window = self.window.lock();
        self.transition_to_closed(&mut window);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let window = self.window.lock();
        self.metrics
            .snapshot(window.state, window.consecutive_failures)
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        let metrics = self.metrics();
        metrics.current_state == CircuitState::Closed && metrics.is_healthy()
    }
}

/// Permission to dispatch one call through a [`CircuitBreaker`]
///
/// Dropping an unsettled probe permit hands the probe slot to the next caller
/// instead of leaving the breaker stuck half-open.
#[must_use = "settle the permit with the call outcome"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("component", &self.breaker.name)
            .field("probe", &self.probe)
            .field("settled", &self.settled)
            .finish()
    }
}

impl CallPermit {
    /// Whether this permit is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self, duration: Duration) {
        self.settled = true;
        self.breaker.on_success(self.probe, duration);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}
