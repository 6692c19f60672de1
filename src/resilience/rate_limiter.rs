//! # Sliding-Window Rate Limiter
//!
//! Counts requests per client over a continuously moving window. Timestamps
//! that have aged out are pruned lazily on each check, and idle clients are
//! dropped by [`RateLimiter::prune_idle`] during the maintenance pass.

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::error::{DataAccessError, Result};
use crate::security::{IncidentKind, IncidentLog};
use dashmap::DashMap;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Accepted request timestamps (epoch ms) for one client, oldest first
#[derive(Debug, Default)]
struct RateWindow {
    timestamps: VecDeque<u64>,
}

impl RateWindow {
    fn prune(&mut self, now_ms: u64, window_ms: u64) {
        while self
            .timestamps
            .front()
            .is_some_and(|&ts| now_ms.saturating_sub(ts) >= window_ms)
        {
            self.timestamps.pop_front();
        }
    }

    fn retry_after(&self, now_ms: u64, window_ms: u64) -> Duration {
        self.timestamps.front().map_or(Duration::ZERO, |&oldest| {
            Duration::from_millis((oldest + window_ms).saturating_sub(now_ms))
        })
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    window_ms: u64,
    max_requests: usize,
    clock: Arc<dyn Clock>,
    incidents: Arc<IncidentLog>,
}

impl RateLimiter {
    pub fn new(
        window: Duration,
        max_requests: usize,
        clock: Arc<dyn Clock>,
        incidents: Arc<IncidentLog>,
    ) -> Self {
        Self {
            windows: DashMap::new(),
            window_ms: window.as_millis() as u64,
            max_requests,
            clock,
            incidents,
        }
    }

    pub fn from_config(
        config: &RateLimitConfig,
        clock: Arc<dyn Clock>,
        incidents: Arc<IncidentLog>,
    ) -> Self {
        Self::new(config.window(), config.max_requests, clock, incidents)
    }

    /// Record a request for `client_id` if it fits in the window.
    ///
    /// A rejection records a `RATE_LIMIT_EXCEEDED` incident and carries the
    /// time until the oldest retained request ages out.
    pub fn check(&self, client_id: &str) -> Result<()> {
        let now = self.clock.now_ms();

        let (count, retry_after) = {
            let mut window = self.windows.entry(client_id.to_string()).or_default();
            window.prune(now, self.window_ms);

            if window.timestamps.len() < self.max_requests {
                window.timestamps.push_back(now);
                return Ok(());
            }
            (
                window.timestamps.len(),
                window.retry_after(now, self.window_ms),
            )
        };

        debug!(
            client_id = client_id,
            requests = count,
            retry_after_ms = retry_after.as_millis() as u64,
            "Rate limit exceeded"
        );
        self.incidents.record(
            IncidentKind::RateLimitExceeded,
            json!({
                "client_id": client_id,
                "requests_in_window": count,
                "limit": self.max_requests,
                "window_ms": self.window_ms,
            }),
        );
        Err(DataAccessError::rate_limited(client_id, retry_after))
    }

    /// Boolean form of [`Self::check`]
    pub fn allow(&self, client_id: &str) -> bool {
        self.check(client_id).is_ok()
    }

    /// Requests `client_id` may still issue in the current window
    pub fn remaining(&self, client_id: &str) -> usize {
        let now = self.clock.now_ms();
        self.windows.get_mut(client_id).map_or(self.max_requests, |mut window| {
            window.prune(now, self.window_ms);
            self.max_requests.saturating_sub(window.timestamps.len())
        })
    }

    /// Time until `client_id` can issue another request; zero if it can now
    pub fn retry_after(&self, client_id: &str) -> Duration {
        let now = self.clock.now_ms();
        match self.windows.get_mut(client_id) {
            Some(mut window) => {
                window.prune(now, self.window_ms);
                if window.timestamps.len() < self.max_requests {
                    Duration::ZERO
                } else {
                    window.retry_after(now, self.window_ms)
                }
            }
            None => Duration::ZERO,
        }
    }

    /// Prune every window and drop clients with no retained requests.
    /// Returns the number of clients dropped.
    pub fn prune_idle(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.prune(now, self.window_ms);
            !window.timestamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn reset(&self, client_id: &str) {
        self.windows.remove(client_id);
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}
