//! Append-only audit trail and unlock events.
//!
//! Every accepted write and every unlock produces an [`AuditEntry`]. Audit appends are
//! best-effort: [`AuditTrail::record`] logs and discards sink failures so that an audit outage
//! never fails the business operation that triggered it.

use crate::access::{Identity, Role};
use crate::error::StoreResult;
use crate::labs::LabKind;
use crate::lock::LockTable;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_types::{RecordNumber, VisitId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Register,
    UpdateRegistration,
    SaveMorphology,
    UnlockMorphology,
    SaveOrder,
    SaveAcceptance,
    UnlockAcceptance,
    SaveResults,
    UnlockResults,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Register => "register",
            AuditAction::UpdateRegistration => "update_registration",
            AuditAction::SaveMorphology => "save_morphology",
            AuditAction::UnlockMorphology => "unlock_morphology",
            AuditAction::SaveOrder => "save_order",
            AuditAction::SaveAcceptance => "save_acceptance",
            AuditAction::UnlockAcceptance => "unlock_acceptance",
            AuditAction::SaveResults => "save_results",
            AuditAction::UnlockResults => "unlock_results",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            AuditAction::Register,
            AuditAction::UpdateRegistration,
            AuditAction::SaveMorphology,
            AuditAction::UnlockMorphology,
            AuditAction::SaveOrder,
            AuditAction::SaveAcceptance,
            AuditAction::UnlockAcceptance,
            AuditAction::SaveResults,
            AuditAction::UnlockResults,
        ]
        .into_iter()
        .find(|action| action.as_str() == value)
    }

    pub fn unlock_for(table: LockTable) -> Self {
        match table {
            LockTable::Morphology => AuditAction::UnlockMorphology,
            LockTable::LabAcceptance => AuditAction::UnlockAcceptance,
            LockTable::LabResults => AuditAction::UnlockResults,
        }
    }
}

/// One state-changing operation, as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub role: Role,
    pub action: AuditAction,
    pub record_number: RecordNumber,
    pub visit_id: Option<VisitId>,
    pub lab: Option<LabKind>,
    pub old_snapshot: Option<serde_json::Value>,
    pub new_snapshot: Option<serde_json::Value>,
    pub old_fingerprint: Option<String>,
    pub new_fingerprint: Option<String>,
    pub origin: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(identity: &Identity, action: AuditAction, record_number: RecordNumber) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: identity.role(),
            action,
            record_number,
            visit_id: None,
            lab: None,
            old_snapshot: None,
            new_snapshot: None,
            old_fingerprint: None,
            new_fingerprint: None,
            origin: identity.origin().map(str::to_owned),
            at: crate::now(),
        }
    }

    pub fn visit(mut self, visit_id: VisitId) -> Self {
        self.visit_id = Some(visit_id);
        self
    }

    pub fn lab(mut self, lab: LabKind) -> Self {
        self.lab = Some(lab);
        self
    }

    pub fn old_snapshot(mut self, snapshot: Option<serde_json::Value>) -> Self {
        self.old_fingerprint = snapshot.as_ref().map(fingerprint);
        self.old_snapshot = snapshot;
        self
    }

    pub fn new_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.new_fingerprint = Some(fingerprint(&snapshot));
        self.new_snapshot = Some(snapshot);
        self
    }
}

/// Immutable record of an administrator unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockEvent {
    pub id: Uuid,
    pub record_number: RecordNumber,
    pub visit_id: VisitId,
    pub table: LockTable,
    pub lab: Option<LabKind>,
    pub reason: String,
    pub unlocked_by: Role,
    pub at: DateTime<Utc>,
}

/// SHA-256 hex digest of a snapshot's JSON encoding.
pub fn fingerprint(snapshot: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(snapshot.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Append-only destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Entries for one record number, newest first.
    async fn entries_for_record(
        &self,
        record_number: &RecordNumber,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>>;
}

/// Best-effort front for an [`AuditSink`].
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Append `entry`; failures are logged and discarded.
    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.sink.append(&entry).await {
            tracing::error!(
                "audit log error: action={} cr={} - {}",
                entry.action.as_str(),
                entry.record_number,
                e
            );
        }
    }

    pub async fn history(
        &self,
        record_number: &RecordNumber,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>> {
        self.sink.entries_for_record(record_number, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::shared::fixtures::BrokenSink;

    #[tokio::test]
    async fn record_swallows_sink_failures() {
        let trail = AuditTrail::new(Arc::new(BrokenSink));
        let entry = AuditEntry::new(
            &Identity::new(Role::Admin),
            AuditAction::Register,
            RecordNumber::parse("000000000001").unwrap(),
        );
        trail.record(entry).await;
    }

    #[test]
    fn snapshots_carry_fingerprints() {
        let entry = AuditEntry::new(
            &Identity::new(Role::Fish).with_origin("10.0.0.7"),
            AuditAction::SaveAcceptance,
            RecordNumber::parse("000000000001").unwrap(),
        )
        .old_snapshot(None)
        .new_snapshot(serde_json::json!({"notes": "ok"}));

        assert_eq!(entry.origin.as_deref(), Some("10.0.0.7"));
        assert!(entry.old_fingerprint.is_none());
        let fp = entry.new_fingerprint.expect("fingerprint");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint(&serde_json::json!({"notes": "ok"})));
    }

    #[test]
    fn action_names_round_trip() {
        for table in [
            LockTable::Morphology,
            LockTable::LabAcceptance,
            LockTable::LabResults,
        ] {
            let action = AuditAction::unlock_for(table);
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
    }
}
