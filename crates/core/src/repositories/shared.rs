//! Shared service state and helpers.
//!
//! [`Registry`] bundles what every stage service needs: the resolved [`CoreConfig`], the
//! record store and the audit trail. It is cheap to clone; services are built per request.

use crate::access::{authorize, Category, Identity};
use crate::audit::{AuditAction, AuditEntry, AuditSink, AuditTrail, UnlockEvent};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockTarget;
use crate::records::VisitKey;
use crate::store::memory::MemoryStore;
use crate::store::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct Registry {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn RecordStore>,
    audit: AuditTrail,
}

impl Registry {
    pub fn new(
        cfg: Arc<CoreConfig>,
        store: Arc<dyn RecordStore>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            cfg,
            store,
            audit: AuditTrail::new(audit_sink),
        }
    }

    /// Registry over a fresh process-local store that also holds the audit log.
    pub fn in_memory(cfg: Arc<CoreConfig>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(cfg, store.clone(), store)
    }

    pub fn cfg(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }
}

/// JSON snapshot of a record for the audit log.
pub(crate) fn snapshot<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

pub(crate) fn locked(target: LockTarget, key: &VisitKey) -> CoreError {
    CoreError::Locked {
        target,
        record_number: key.record_number.clone(),
        visit_id: key.visit_id.clone(),
    }
}

/// Administrator unlock shared by every lockable record kind.
///
/// Clears the lock flag and appends the unlock event in one store operation, then audits.
pub(crate) async fn unlock_record(
    registry: &Registry,
    identity: &Identity,
    target: LockTarget,
    record_number: &str,
    visit_id: &str,
    reason: &str,
) -> CoreResult<UnlockEvent> {
    authorize(identity, &[Category::Admin])?;
    let key = VisitKey::parse(record_number, visit_id)?;

    let event = UnlockEvent {
        id: Uuid::new_v4(),
        record_number: key.record_number.clone(),
        visit_id: key.visit_id.clone(),
        table: target.table,
        lab: target.lab,
        reason: reason.trim().to_owned(),
        unlocked_by: identity.role(),
        at: crate::now(),
    };

    if !registry.store().unlock(&event).await? {
        return Err(CoreError::NotFound(format!(
            "{} record not found for Lab ID {}",
            target.describe(),
            key.visit_id
        )));
    }
    tracing::info!("{} unlocked for {} by {}", target.describe(), key, identity.role());

    let mut entry = AuditEntry::new(identity, AuditAction::unlock_for(target.table), key.record_number)
        .visit(key.visit_id)
        .new_snapshot(serde_json::json!({ "reason": event.reason }));
    if let Some(lab) = target.lab {
        entry = entry.lab(lab);
    }
    registry.audit().record(entry).await;

    Ok(event)
}
