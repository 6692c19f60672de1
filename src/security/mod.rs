//! # Security Module
//!
//! Client-side defense layer: pre-dispatch screening of operation parameters
//! and the bounded incident log every component reports anomalies to.

pub mod incident_log;
pub mod scanner;

pub use incident_log::{
    ActivityRecord, IncidentKind, IncidentLog, IncidentLogSnapshot, SecurityIncident,
};
pub use scanner::{AttackSignature, ScanOutcome, SuspiciousInputScanner};
