//! Lab results and the per-lab results export.

use super::shared::{locked, snapshot, unlock_record, Registry};
use crate::access::{authorize, authorize_lab_write, Category, Identity};
use crate::audit::{AuditAction, AuditEntry, UnlockEvent};
use crate::error::CoreResult;
use crate::labs::LabKind;
use crate::lock::{LockTarget, SaveIntent};
use crate::records::{DateWindow, LabAcceptance, LabOrder, LabResults, Visit, VisitKey};
use crate::store::SaveOutcome;
use crate::workflow::{self, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultsForm {
    pub record_number: String,
    pub visit_id: String,
    pub panel_results: Option<serde_json::Value>,
}

/// One exported case: an order with whatever later stages exist for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub order: LabOrder,
    pub visit: Option<Visit>,
    pub acceptance: Option<LabAcceptance>,
    pub results: Option<LabResults>,
}

#[derive(Clone)]
pub struct ResultsService {
    registry: Registry,
}

impl ResultsService {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub async fn save(
        &self,
        identity: &Identity,
        lab: LabKind,
        form: ResultsForm,
    ) -> CoreResult<LabResults> {
        authorize_lab_write(identity, &[Category::ResultsWrite], lab)?;
        let key = VisitKey::parse(&form.record_number, &form.visit_id)?;
        let lab_key = key.lab(lab);
        let target = LockTarget::results(lab);
        let store = self.registry.store();

        workflow::enforce(store, Stage::Results(lab), &key).await?;

        if let Some(existing) = store.find_results(&lab_key).await? {
            if !existing.lock.admits(identity.role()) {
                return Err(locked(target, &key));
            }
        }

        let panel_results = form
            .panel_results
            .unwrap_or_else(|| serde_json::json!({}));
        let intent = SaveIntent {
            actor: identity.role(),
            at: crate::now(),
        };
        let SaveOutcome::Saved { previous, current } =
            store.save_results(&lab_key, &panel_results, &intent).await?
        else {
            return Err(locked(target, &key));
        };
        tracing::info!("{} results saved for {} by {}", lab, key, identity.role());

        self.registry
            .audit()
            .record(
                AuditEntry::new(identity, AuditAction::SaveResults, key.record_number)
                    .visit(key.visit_id)
                    .lab(lab)
                    .old_snapshot(previous.as_ref().map(snapshot))
                    .new_snapshot(snapshot(&current)),
            )
            .await;

        Ok(current)
    }

    pub async fn unlock(
        &self,
        identity: &Identity,
        lab: LabKind,
        record_number: &str,
        visit_id: &str,
        reason: &str,
    ) -> CoreResult<UnlockEvent> {
        unlock_record(
            &self.registry,
            identity,
            LockTarget::results(lab),
            record_number,
            visit_id,
            reason,
        )
        .await
    }

    /// Orders of `lab` created inside `window`, newest first, joined with visit, acceptance
    /// and results.
    pub async fn export(
        &self,
        identity: &Identity,
        lab: LabKind,
        window: DateWindow,
    ) -> CoreResult<Vec<ExportRow>> {
        authorize(identity, &[Category::Admin])?;
        let store = self.registry.store();

        let orders = store.orders_by_lab(lab, Some(window)).await?;
        let mut record_numbers: Vec<_> = orders.iter().map(|o| o.record_number.clone()).collect();
        record_numbers.sort();
        record_numbers.dedup();

        let (visits, acceptance, results) = tokio::join!(
            store.visits_for_records(&record_numbers),
            store.acceptance_by_lab(lab),
            store.results_by_lab(lab),
        );
        let visits: HashMap<VisitKey, Visit> =
            visits?.into_iter().map(|v| (v.key(), v)).collect();
        let mut acceptance: HashMap<VisitKey, LabAcceptance> = acceptance?
            .into_iter()
            .map(|a| (a.visit_key(), a))
            .collect();
        let mut results: HashMap<VisitKey, LabResults> = results?
            .into_iter()
            .map(|r| (r.visit_key(), r))
            .collect();

        Ok(orders
            .into_iter()
            .map(|order| {
                let key = order.visit_key();
                ExportRow {
                    visit: visits.get(&key).cloned(),
                    acceptance: acceptance.remove(&key),
                    results: results.remove(&key),
                    order,
                }
            })
            .collect())
    }
}
