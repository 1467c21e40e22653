//! Audit log for policy decisions.
//!
//! Every deny, rate-limit, and elevation-required decision lands here,
//! redacted on write and bounded per user.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use cb_domain::redact;

/// One recorded policy decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub user_id: String,
    /// Decision tag: `"deny"`, `"rate_limit"`, `"elevation_required"`, …
    pub decision: String,
    /// The rule or limit that triggered the decision.
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Bounded per-user ring of policy decisions.
pub struct AuditLog {
    per_user_cap: usize,
    entries: Mutex<HashMap<String, Vec<AuditEntry>>>,
}

impl AuditLog {
    pub fn new(per_user_cap: usize) -> Self {
        Self {
            per_user_cap,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a decision.  Details are redacted before storage.
    pub fn record(&self, user_id: &str, decision: &str, rule: &str, details: Option<Value>) {
        let entry = AuditEntry {
            at: Utc::now(),
            user_id: user_id.to_owned(),
            decision: decision.to_owned(),
            rule: rule.to_owned(),
            details: details.as_ref().map(redact::redact),
        };
        tracing::info!(
            user_id,
            decision,
            rule,
            "policy decision"
        );

        let mut entries = self.entries.lock();
        let ring = entries.entry(user_id.to_owned()).or_default();
        ring.push(entry);
        if ring.len() > self.per_user_cap {
            let overflow = ring.len() - self.per_user_cap;
            ring.drain(..overflow);
        }
    }

    /// Most recent entries for a user, newest last.
    pub fn recent(&self, user_id: &str, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        match entries.get(user_id) {
            Some(ring) => ring.iter().rev().take(limit).rev().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn user_count(&self) -> usize {
        self.entries.lock().len()
    }
}
