//! # Suspicious Input Scanner
//!
//! Screens outgoing operation parameters against a fixed set of attack
//! signatures before anything is dispatched to the remote store. This is a
//! heuristic layer on top of the store's own access control, never a
//! replacement for it.
//!
//! Every string in the descriptor is checked: the resource name, projection
//! fields, parameter keys and every string value nested anywhere in the
//! parameters. A match is logged as a `SUSPICIOUS_PATTERN` incident carrying
//! the signature and the parameter path, never the raw payload.

use crate::execution::OperationDescriptor;
use crate::security::incident_log::{IncidentKind, IncidentLog};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Named attack signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackSignature {
    /// Quote break-out followed by an always-true condition (`' OR 1=1`)
    SqlTautology,
    /// Quote break-out closed by a trailing comment (`admin'--`, `x'/*`)
    SqlCommentInjection,
    /// A second statement appended after `;` (`; DROP TABLE`)
    SqlStackedQuery,
    /// `UNION SELECT` exfiltration
    SqlUnionSelect,
    /// Script-capable markup, or a value that is a `javascript:` URL
    ScriptInjection,
    /// Inline event handler attributes (`<img onerror=...>`)
    EventHandlerInjection,
    /// Directory traversal sequences, raw or percent-encoded
    PathTraversal,
    /// Serialized parameters longer than the configured ceiling
    OversizedPayload,
}

impl AttackSignature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlTautology => "sql_tautology",
            Self::SqlCommentInjection => "sql_comment_injection",
            Self::SqlStackedQuery => "sql_stacked_query",
            Self::SqlUnionSelect => "sql_union_select",
            Self::ScriptInjection => "script_injection",
            Self::EventHandlerInjection => "event_handler_injection",
            Self::PathTraversal => "path_traversal",
            Self::OversizedPayload => "oversized_payload",
        }
    }
}

impl fmt::Display for AttackSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of screening one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Clean,
    Suspicious {
        signature: AttackSignature,
        /// Where the match was found, e.g. `parameters.search`
        location: String,
    },
}

impl ScanOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

const SIGNATURE_PATTERNS: &[(AttackSignature, &str)] = &[
    (
        AttackSignature::SqlTautology,
        r#"(?i)(['"]\s*\b(or|and)\b\s+['"]?\w+['"]?\s*=\s*['"]?\w+|\bor\s+1\s*=\s*1\b)"#,
    ),
    (
        AttackSignature::SqlCommentInjection,
        r"('\s*;?\s*(--|#)\s*$|'\s*;?\s*/\*)",
    ),
    (
        AttackSignature::SqlStackedQuery,
        r"(?i);\s*(drop\s+(table|database)|delete\s+from|insert\s+into|update\s+\w+\s+set|truncate\s+table|alter\s+table)",
    ),
    (
        AttackSignature::SqlUnionSelect,
        r"(?i)\bunion\s+(all\s+)?select\b",
    ),
    (
        AttackSignature::ScriptInjection,
        r"(?i)(<\s*/?\s*(script|iframe|object|embed|svg)\b|^\s*javascript\s*:)",
    ),
    (
        AttackSignature::EventHandlerInjection,
        r"(?i)<\s*[a-z][^>]*\bon[a-z]+\s*=",
    ),
    (
        AttackSignature::PathTraversal,
        r"(?i)(\.\./|\.\.\\|%2e%2e(%2f|%5c|/|\\))",
    ),
];

/// Pre-dispatch screening against the fixed signature set
pub struct SuspiciousInputScanner {
    patterns: Vec<(AttackSignature, Regex)>,
    max_payload_chars: usize,
    enabled: bool,
    incidents: Arc<IncidentLog>,
}

impl fmt::Debug for SuspiciousInputScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspiciousInputScanner")
            .field("signatures", &self.patterns.len())
            .field("max_payload_chars", &self.max_payload_chars)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl SuspiciousInputScanner {
    pub fn new(max_payload_chars: usize, incidents: Arc<IncidentLog>) -> Self {
        let patterns = SIGNATURE_PATTERNS
            .iter()
            .filter_map(|(signature, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some((*signature, regex)),
                Err(e) => {
                    tracing::error!(signature = %signature, error = %e, "Invalid signature pattern");
                    None
                }
            })
            .collect();

        Self {
            patterns,
            max_payload_chars,
            enabled: true,
            incidents,
        }
    }

    pub fn from_config(config: &crate::config::ScannerConfig, incidents: Arc<IncidentLog>) -> Self {
        let mut scanner = Self::new(config.max_payload_chars, incidents);
        scanner.enabled = config.enabled;
        scanner
    }

    /// Screen `descriptor`; a match is recorded as an incident
    pub fn scan(&self, descriptor: &OperationDescriptor) -> ScanOutcome {
        if !self.enabled {
            return ScanOutcome::Clean;
        }

        let outcome = self.evaluate(descriptor);
        if let ScanOutcome::Suspicious {
            signature,
            location,
        } = &outcome
        {
            self.incidents.record(
                IncidentKind::SuspiciousPattern,
                json!({
                    "signature": signature.as_str(),
                    "location": location,
                    "operation": descriptor.kind.as_str(),
                    "resource": truncate(&descriptor.resource, 64),
                }),
            );
        }
        outcome
    }

    fn evaluate(&self, descriptor: &OperationDescriptor) -> ScanOutcome {
        let serialized_len = Value::Object(descriptor.parameters.clone())
            .to_string()
            .chars()
            .count();
        if serialized_len > self.max_payload_chars {
            return ScanOutcome::Suspicious {
                signature: AttackSignature::OversizedPayload,
                location: "parameters".to_string(),
            };
        }

        if let Some(signature) = self.match_text(&descriptor.resource) {
            return suspicious(signature, "resource");
        }

        if let Some(fields) = &descriptor.projection {
            for field in fields {
                if let Some(signature) = self.match_text(field) {
                    return suspicious(signature, "projection");
                }
            }
        }

        for (key, value) in &descriptor.parameters {
            let location = format!("parameters.{}", truncate(key, 64));
            if let Some(signature) = self.match_text(key) {
                return ScanOutcome::Suspicious {
                    signature,
                    location,
                };
            }
            if let Some(signature) = self.match_value(value) {
                return ScanOutcome::Suspicious {
                    signature,
                    location,
                };
            }
        }

        ScanOutcome::Clean
    }

    fn match_value(&self, value: &Value) -> Option<AttackSignature> {
        match value {
            Value::String(text) => self.match_text(text),
            Value::Array(items) => items.iter().find_map(|item| self.match_value(item)),
            Value::Object(map) => map.iter().find_map(|(key, item)| {
                self.match_text(key).or_else(|| self.match_value(item))
            }),
            _ => None,
        }
    }

    fn match_text(&self, text: &str) -> Option<AttackSignature> {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(signature, _)| *signature)
    }
}

fn suspicious(signature: AttackSignature, location: &str) -> ScanOutcome {
    ScanOutcome::Suspicious {
        signature,
        location: location.to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
