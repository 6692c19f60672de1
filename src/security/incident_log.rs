//! # Incident Log
//!
//! Bounded, append-only record of security and operational events. Two rings
//! are kept: incidents (anomalies detected by any component) and activities
//! (one record per completed data operation). When a ring is full the oldest
//! entry is evicted.
//!
//! Recording never fails the caller. Every incident is also emitted as a
//! `tracing` event so the host can route it to its own observability backend.
//! Persistence to a JSON file is best-effort and off the caller's path. A
//! single writer drains the newest pending snapshot, and each write replaces
//! the file atomically through a temporary sibling.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kinds of incident raised by the data-access core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    /// A client exceeded its sliding-window budget
    RateLimitExceeded,
    /// Outgoing parameters matched an attack signature
    SuspiciousPattern,
    /// Circuit opened; the remote store is treated as unavailable
    DatabaseLocked,
    /// Cooldown elapsed; one probe call will be let through
    CircuitBreakerProbe,
    /// Probe succeeded and the circuit closed again
    CircuitBreakerReset,
    /// A remote call missed its deadline
    OperationTimeout,
    /// A query was re-issued against the reduced projection
    SchemaFallback,
    /// Remote executor reported a failure
    UpstreamFailure,
}

impl IncidentKind {
    /// Security kinds are the ones worth persisting for later inspection
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded | Self::SuspiciousPattern | Self::DatabaseLocked
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIncident {
    #[serde(rename = "type")]
    pub kind: IncidentKind,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// Outcome of a completed data operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub action: String,
    pub resource: String,
    pub success: bool,
    pub duration_ms: u64,
    /// Error label when the operation failed
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// Serialized form of the log written by [`IncidentLog::persist`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentLogSnapshot {
    pub session_id: String,
    pub incidents: Vec<SecurityIncident>,
    pub activities: Vec<ActivityRecord>,
}

/// Capacity-bounded incident and activity rings
pub struct IncidentLog {
    session_id: String,
    clock: Arc<dyn Clock>,
    incident_capacity: usize,
    activity_capacity: usize,
    incidents: Mutex<VecDeque<SecurityIncident>>,
    activities: Mutex<VecDeque<ActivityRecord>>,
    persist: Option<Arc<PersistQueue>>,
}

/// Newest snapshot awaiting a write, plus whether a writer is draining it
struct PersistQueue {
    path: PathBuf,
    pending: Mutex<Option<IncidentLogSnapshot>>,
    writer_active: AtomicBool,
}

impl PersistQueue {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            pending: Mutex::new(None),
            writer_active: AtomicBool::new(false),
        }
    }

    /// Write pending snapshots until none is left
    fn drain(&self) {
        loop {
            let next = self.pending.lock().take();
            let Some(snapshot) = next else {
                self.writer_active.store(false, Ordering::SeqCst);
                // A snapshot queued between the take and the store has no writer
                let requeued = self.pending.lock().is_some();
                if requeued && !self.writer_active.swap(true, Ordering::SeqCst) {
                    continue;
                }
                return;
            };

            if let Err(e) = write_snapshot(&self.path, &snapshot) {
                warn!(path = %self.path.display(), error = %e, "Failed to persist incident log");
            }
        }
    }
}

impl std::fmt::Debug for IncidentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentLog")
            .field("session_id", &self.session_id)
            .field("incidents", &self.incidents.lock().len())
            .field("activities", &self.activities.lock().len())
            .field("persist_path", &self.persist.as_ref().map(|queue| &queue.path))
            .finish()
    }
}

impl IncidentLog {
    pub fn new(clock: Arc<dyn Clock>, incident_capacity: usize, activity_capacity: usize) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            clock,
            incident_capacity: incident_capacity.max(1),
            activity_capacity: activity_capacity.max(1),
            incidents: Mutex::new(VecDeque::new()),
            activities: Mutex::new(VecDeque::new()),
            persist: None,
        }
    }

    /// Persist the log to `path` after every security incident
    pub fn with_persist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist = Some(Arc::new(PersistQueue::new(path.into())));
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append an incident, evicting the oldest when at capacity
    pub fn record(&self, kind: IncidentKind, details: serde_json::Value) {
        let incident = SecurityIncident {
            kind,
            details,
            timestamp: self.clock.now_utc(),
            session_id: self.session_id.clone(),
        };

        if kind.is_security() {
            warn!(incident = ?kind, details = %incident.details, "Security incident");
        } else {
            info!(incident = ?kind, details = %incident.details, "Operational incident");
        }

        {
            let mut incidents = self.incidents.lock();
            if incidents.len() >= self.incident_capacity {
                incidents.pop_front();
            }
            incidents.push_back(incident);
        }

        if kind.is_security() {
            if let Some(queue) = &self.persist {
                self.schedule_persist(queue);
            }
        }
    }

    /// Append an activity record, evicting the oldest when at capacity
    pub fn record_activity(
        &self,
        action: &str,
        resource: &str,
        duration_ms: u64,
        error: Option<&str>,
    ) {
        let record = ActivityRecord {
            action: action.to_string(),
            resource: resource.to_string(),
            success: error.is_none(),
            duration_ms,
            error: error.map(str::to_string),
            timestamp: self.clock.now_utc(),
            session_id: self.session_id.clone(),
        };

        let mut activities = self.activities.lock();
        if activities.len() >= self.activity_capacity {
            activities.pop_front();
        }
        activities.push_back(record);
    }

    /// The `n` most recent incidents, oldest first
    pub fn recent(&self, n: usize) -> Vec<SecurityIncident> {
        let incidents = self.incidents.lock();
        let skip = incidents.len().saturating_sub(n);
        incidents.iter().skip(skip).cloned().collect()
    }

    /// The `n` most recent activities, oldest first
    pub fn recent_activities(&self, n: usize) -> Vec<ActivityRecord> {
        let activities = self.activities.lock();
        let skip = activities.len().saturating_sub(n);
        activities.iter().skip(skip).cloned().collect()
    }

    /// Retained incident counts by kind
    pub fn stats(&self) -> HashMap<IncidentKind, usize> {
        let mut counts = HashMap::new();
        for incident in self.incidents.lock().iter() {
            *counts.entry(incident.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.incidents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.lock().is_empty()
    }

    pub fn clear(&self) {
        self.incidents.lock().clear();
        self.activities.lock().clear();
    }

    pub fn snapshot(&self) -> IncidentLogSnapshot {
        IncidentLogSnapshot {
            session_id: self.session_id.clone(),
            incidents: self.incidents.lock().iter().cloned().collect(),
            activities: self.activities.lock().iter().cloned().collect(),
        }
    }

    /// Write the current log to `path` as JSON
    pub fn persist(&self, path: &Path) -> std::io::Result<()> {
        write_snapshot(path, &self.snapshot())
    }

    /// Replace the in-memory rings with entries previously written by
    /// [`Self::persist`], keeping only the newest entries that fit.
    pub fn restore(&self, path: &Path) -> std::io::Result<usize> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: IncidentLogSnapshot = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let restored = {
            let mut incidents = self.incidents.lock();
            incidents.clear();
            let skip = snapshot
                .incidents
                .len()
                .saturating_sub(self.incident_capacity);
            incidents.extend(snapshot.incidents.into_iter().skip(skip));
            incidents.len()
        };

        let mut activities = self.activities.lock();
        activities.clear();
        let skip = snapshot
            .activities
            .len()
            .saturating_sub(self.activity_capacity);
        activities.extend(snapshot.activities.into_iter().skip(skip));

        debug!(path = %path.display(), restored = restored, "Incident log restored");
        Ok(restored)
    }

    /// Queue the current log for writing, starting a writer if none runs.
    ///
    /// Without a runtime the write happens on the caller's thread.
    fn schedule_persist(&self, queue: &Arc<PersistQueue>) {
        {
            // Snapshotting under the queue lock keeps a later snapshot from
            // being replaced by an earlier one
            let mut pending = queue.pending.lock();
            *pending = Some(self.snapshot());
        }

        if queue.writer_active.swap(true, Ordering::SeqCst) {
            return;
        }

        let queue = Arc::clone(queue);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || queue.drain());
            }
            Err(_) => queue.drain(),
        }
    }
}

fn write_snapshot(path: &Path, snapshot: &IncidentLogSnapshot) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    std::fs::write(&staging, json)?;
    std::fs::rename(&staging, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn log(capacity: usize) -> (IncidentLog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        (IncidentLog::new(clock.clone(), capacity, capacity), clock)
    }

    #[test]
    fn test_recent_returns_newest_in_order() {
        let (log, clock) = log(10);
        for i in 0..4 {
            log.record(IncidentKind::UpstreamFailure, json!({ "attempt": i }));
            clock.advance(Duration::from_secs(1));
        }

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].details, json!({ "attempt": 2 }));
        assert_eq!(recent[1].details, json!({ "attempt": 3 }));
        assert!(recent[0].timestamp < recent[1].timestamp);
        assert_eq!(recent[0].session_id, log.session_id());
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let (log, _) = log(3);
        for i in 0..5 {
            log.record(IncidentKind::SuspiciousPattern, json!({ "n": i }));
        }

        let recent = log.recent(10);
        assert_eq!(recent.len(), 3);
        let ns: Vec<_> = recent.iter().map(|i| i.details["n"].clone()).collect();
        assert_eq!(ns, vec![json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_stats_count_by_kind() {
        let (log, _) = log(10);
        log.record(IncidentKind::RateLimitExceeded, json!({}));
        log.record(IncidentKind::RateLimitExceeded, json!({}));
        log.record(IncidentKind::DatabaseLocked, json!({}));

        let stats = log.stats();
        assert_eq!(stats.get(&IncidentKind::RateLimitExceeded), Some(&2));
        assert_eq!(stats.get(&IncidentKind::DatabaseLocked), Some(&1));
        assert_eq!(stats.get(&IncidentKind::SchemaFallback), None);
    }

    #[test]
    fn test_activities_are_kept_separately() {
        let clock = Arc::new(ManualClock::new(0));
        let log = IncidentLog::new(clock, 2, 3);
        for i in 0..5 {
            log.record_activity("fetch", &format!("r{i}"), 3, None);
        }
        log.record_activity("create", "orders", 8, Some("timeout"));

        assert!(log.is_empty());
        let activities = log.recent_activities(10);
        assert_eq!(activities.len(), 3);
        assert_eq!(activities[2].error.as_deref(), Some("timeout"));
        assert!(!activities[2].success);
    }

    #[test]
    fn test_incident_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&IncidentKind::CircuitBreakerReset).unwrap();
        assert_eq!(json, "\"CIRCUIT_BREAKER_RESET\"");
    }

    #[test]
    fn test_persist_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.json");

        let (log, _) = log(5);
        log.record(IncidentKind::SuspiciousPattern, json!({ "signature": "path_traversal" }));
        log.record_activity("fetch", "products", 12, None);
        log.persist(&path).unwrap();

        let (restored, _) = self::log(5);
        assert_eq!(restored.restore(&path).unwrap(), 1);
        assert_eq!(restored.recent(1)[0].details["signature"], "path_traversal");
        assert_eq!(restored.recent_activities(5).len(), 1);
    }

    #[test]
    fn test_security_incident_persists_automatically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auto.json");

        let clock = Arc::new(ManualClock::new(0));
        let log = IncidentLog::new(clock, 5, 5).with_persist_path(&path);
        log.record(IncidentKind::SchemaFallback, json!({}));
        assert!(!path.exists(), "operational incidents are not persisted");

        log.record(IncidentKind::RateLimitExceeded, json!({ "client_id": "u1" }));
        assert!(path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_burst_of_security_incidents_leaves_newest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burst.json");

        let clock = Arc::new(ManualClock::new(0));
        let log = IncidentLog::new(clock, 50, 5).with_persist_path(&path);
        for seq in 0..500 {
            log.record(IncidentKind::RateLimitExceeded, json!({ "seq": seq }));
        }

        let mut newest = None;
        for _ in 0..200 {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                let snapshot: IncidentLogSnapshot =
                    serde_json::from_str(&contents).expect("persisted file is never torn");
                newest = snapshot.incidents.last().map(|i| i.details["seq"].clone());
                if newest == Some(json!(499)) {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(newest, Some(json!(499)));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name() != "burst.json")
            .collect();
        assert!(leftovers.is_empty(), "staging file left behind");
    }
}
