//! Test orders and lab work lists.
//!
//! Orders are never locked; re-saving an order replaces its panels, payment and notes.

use super::shared::{snapshot, Registry};
use crate::access::{authorize, Category, Identity};
use crate::audit::{AuditAction, AuditEntry};
use crate::error::CoreResult;
use crate::labs::{validate_panels, validate_payment, LabKind};
use crate::records::{LabOrder, Visit, VisitKey};
use crate::workflow::{self, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderForm {
    pub record_number: String,
    pub visit_id: String,
    pub panels: String,
    pub payment: String,
    pub notes: String,
}

/// One order in a lab's work list, with the visit it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListing {
    #[serde(flatten)]
    pub order: LabOrder,
    pub visit: Option<Visit>,
}

#[derive(Clone)]
pub struct OrderService {
    registry: Registry,
}

impl OrderService {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub async fn save(
        &self,
        identity: &Identity,
        lab: LabKind,
        form: OrderForm,
    ) -> CoreResult<LabOrder> {
        authorize(identity, &[Category::OrderWrite])?;
        let key = VisitKey::parse(&form.record_number, &form.visit_id)?;
        validate_panels(lab, &form.panels)?;
        validate_payment(&form.payment)?;

        let store = self.registry.store();
        workflow::enforce(store, Stage::Order(lab), &key).await?;

        let previous = store.find_order(&key.lab(lab)).await?;
        let at = crate::now();
        let order = LabOrder {
            record_number: key.record_number.clone(),
            visit_id: key.visit_id.clone(),
            lab,
            panels: form.panels.trim().to_owned(),
            payment: form.payment.trim().to_owned(),
            notes: form.notes,
            created_at: at,
            updated_at: at,
        };
        let saved = store.save_order(&order).await?;
        tracing::info!("{} order saved for {} by {}", lab, key, identity.role());

        self.registry
            .audit()
            .record(
                AuditEntry::new(identity, AuditAction::SaveOrder, key.record_number)
                    .visit(key.visit_id)
                    .lab(lab)
                    .old_snapshot(previous.as_ref().map(snapshot))
                    .new_snapshot(snapshot(&saved)),
            )
            .await;

        Ok(saved)
    }

    /// Orders for `lab`, newest first, each joined with its visit.
    pub async fn list_by_lab(
        &self,
        identity: &Identity,
        lab: LabKind,
    ) -> CoreResult<Vec<OrderListing>> {
        authorize(identity, &[Category::AcceptanceWrite])?;
        let store = self.registry.store();

        let orders = store.orders_by_lab(lab, None).await?;
        let mut record_numbers: Vec<_> = orders.iter().map(|o| o.record_number.clone()).collect();
        record_numbers.sort();
        record_numbers.dedup();

        let visits: HashMap<VisitKey, Visit> = store
            .visits_for_records(&record_numbers)
            .await?
            .into_iter()
            .map(|v| (v.key(), v))
            .collect();

        Ok(orders
            .into_iter()
            .map(|order| {
                let visit = visits.get(&order.visit_key()).cloned();
                OrderListing { order, visit }
            })
            .collect())
    }

    /// Visits of `lab` that already have an acceptance record.
    pub async fn accepted_by_lab(
        &self,
        identity: &Identity,
        lab: LabKind,
    ) -> CoreResult<Vec<VisitKey>> {
        authorize(identity, &[Category::AcceptanceWrite])?;
        Ok(self
            .registry
            .store()
            .acceptance_by_lab(lab)
            .await?
            .iter()
            .map(|a| a.visit_key())
            .collect())
    }
}
