//! Append-only audit trail of validation outcomes.
//!
//! The ring lives in memory and is bounded: at [`AUDIT_MAX_LEN`] entries it
//! compacts down to the most recent [`AUDIT_COMPACT_LEN`], so a chatty
//! planner cannot grow the kernel without bound.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::RiskLevel;

/// Entry cap before compaction.
pub const AUDIT_MAX_LEN: usize = 1000;

/// Entries retained after compaction.
pub const AUDIT_COMPACT_LEN: usize = 500;

/// Immutable record of one validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the validation completed.
    pub timestamp: DateTime<Utc>,
    /// Proposal / request identifier.
    pub request_id: String,
    /// The proposal's intent.
    pub intent: String,
    /// Maximum action risk at the decision point.
    pub risk_level: RiskLevel,
    /// Whether the proposal was denied.
    pub blocked: bool,
    /// The failing rule, when blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether the planner supplied the override flag.
    pub override_risk: bool,
}

/// Bounded in-memory audit ring.
#[derive(Debug, Default)]
pub struct AuditRing {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditRing {
    /// New empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, compacting when the cap is hit.
    pub fn record(&self, entry: AuditEntry) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push(entry);
        if entries.len() > AUDIT_MAX_LEN {
            let keep_from = entries.len() - AUDIT_COMPACT_LEN;
            entries.drain(..keep_from);
        }
    }

    /// The most recent `limit` entries, oldest first. `0` returns everything.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let take = if limit == 0 || limit > entries.len() {
            entries.len()
        } else {
            limit
        };
        entries[entries.len() - take..].to_vec()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(request_id: &str) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            intent: "test".to_string(),
            risk_level: RiskLevel::None,
            blocked: false,
            reason: None,
            override_risk: false,
        }
    }

    #[test]
    fn records_in_order() {
        let ring = AuditRing::new();
        ring.record(entry("a"));
        ring.record(entry("b"));
        let recent = ring.recent(0);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "a");
        assert_eq!(recent[1].request_id, "b");
    }

    #[test]
    fn limit_returns_most_recent() {
        let ring = AuditRing::new();
        for i in 0..10 {
            ring.record(entry(&i.to_string()));
        }
        let recent = ring.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].request_id, "7");
        assert_eq!(recent[2].request_id, "9");
    }

    #[test]
    fn compacts_at_cap() {
        let ring = AuditRing::new();
        for i in 0..=AUDIT_MAX_LEN {
            ring.record(entry(&i.to_string()));
        }
        assert_eq!(ring.len(), AUDIT_COMPACT_LEN);
        // The retained window ends at the newest entry.
        let recent = ring.recent(1);
        assert_eq!(recent[0].request_id, AUDIT_MAX_LEN.to_string());
    }
}
