//! Administrator queries: audit history, unlock history and lock status.

use super::shared::Registry;
use crate::access::{authorize, Category, Identity};
use crate::audit::{AuditEntry, UnlockEvent};
use crate::error::CoreResult;
use crate::identity;
use crate::labs::LabKind;
use crate::lock::LockState;
use crate::records::VisitKey;
use prism_types::{RecordNumber, VisitId};
use serde::Serialize;

/// Lock state of one lab-scoped record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabLock {
    pub lab: LabKind,
    #[serde(flatten)]
    pub lock: LockState,
}

/// Lock state of every lockable record of one visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub record_number: RecordNumber,
    pub visit_id: VisitId,
    pub morphology_locked: bool,
    pub acceptance: Vec<LabLock>,
    pub results: Vec<LabLock>,
}

#[derive(Clone)]
pub struct AdminService {
    registry: Registry,
}

impl AdminService {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Audit entries for a record number, newest first.
    pub async fn audit_history(
        &self,
        identity: &Identity,
        record_number: &str,
    ) -> CoreResult<Vec<AuditEntry>> {
        authorize(identity, &[Category::Admin])?;
        let record_number = RecordNumber::parse(record_number)?;
        Ok(self
            .registry
            .audit()
            .history(&record_number, self.registry.cfg().audit_history_limit())
            .await?)
    }

    /// Most recent unlock events, newest first.
    pub async fn unlock_history(&self, identity: &Identity) -> CoreResult<Vec<UnlockEvent>> {
        authorize(identity, &[Category::Admin])?;
        Ok(self
            .registry
            .store()
            .unlock_history(self.registry.cfg().unlock_history_limit())
            .await?)
    }

    pub async fn lock_status(
        &self,
        identity: &Identity,
        record_number: &str,
        visit_id: &str,
    ) -> CoreResult<LockStatus> {
        authorize(identity, &[Category::Admin])?;
        let key = VisitKey::parse(record_number, visit_id)?;
        let store = self.registry.store();
        identity::resolve(store, &key).await?;

        let (morphology, acceptance, results) = tokio::join!(
            store.find_morphology(&key),
            store.acceptance_for_record(&key.record_number),
            store.results_for_record(&key.record_number),
        );

        let acceptance = acceptance?
            .into_iter()
            .filter(|a| a.visit_id == key.visit_id)
            .map(|a| LabLock {
                lab: a.lab,
                lock: a.lock,
            })
            .collect();
        let results = results?
            .into_iter()
            .filter(|r| r.visit_id == key.visit_id)
            .map(|r| LabLock {
                lab: r.lab,
                lock: r.lock,
            })
            .collect();

        Ok(LockStatus {
            morphology_locked: morphology?.is_some_and(|m| m.lock.locked),
            acceptance,
            results,
            record_number: key.record_number,
            visit_id: key.visit_id,
        })
    }
}
