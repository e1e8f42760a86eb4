//! Process-local store.
//!
//! All tables sit behind a single `tokio::sync::RwLock`, so every write method runs as one
//! serialisable transaction: the row it reads is the row it replaces. Rows are kept in
//! insertion order, which gives the insertion-order tie break that listing operations need.

use super::{RecordStore, SaveOutcome, VisitUpsert};
use crate::audit::{AuditEntry, AuditSink, UnlockEvent};
use crate::error::{StoreError, StoreResult};
use crate::labs::LabKind;
use crate::lock::{LockState, LockTable, SaveIntent};
use crate::records::{
    AcceptanceContent, DateWindow, LabAcceptance, LabKey, LabOrder, LabResults, Morphology, Visit,
    VisitKey,
};
use async_trait::async_trait;
use prism_types::RecordNumber;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    visits: Vec<Visit>,
    morphology: Vec<Morphology>,
    orders: Vec<LabOrder>,
    acceptance: Vec<LabAcceptance>,
    results: Vec<LabResults>,
    unlocks: Vec<UnlockEvent>,
    audit: Vec<AuditEntry>,
}

fn same_visit(record_number: &RecordNumber, visit_id: &prism_types::VisitId, key: &VisitKey) -> bool {
    *record_number == key.record_number && *visit_id == key.visit_id
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_visit(&self, visit: &Visit) -> StoreResult<VisitUpsert> {
        let mut tables = self.tables.write().await;
        let key = visit.key();

        match tables
            .visits
            .iter_mut()
            .find(|v| same_visit(&v.record_number, &v.visit_id, &key))
        {
            Some(row) => {
                let previous = row.clone();
                *row = Visit {
                    created_at: previous.created_at,
                    ..visit.clone()
                };
                Ok(VisitUpsert {
                    previous: Some(previous),
                    saved: row.clone(),
                })
            }
            None => {
                tables.visits.push(visit.clone());
                Ok(VisitUpsert {
                    previous: None,
                    saved: visit.clone(),
                })
            }
        }
    }

    async fn find_visit(&self, key: &VisitKey) -> StoreResult<Option<Visit>> {
        let tables = self.tables.read().await;
        Ok(tables
            .visits
            .iter()
            .find(|v| same_visit(&v.record_number, &v.visit_id, key))
            .cloned())
    }

    async fn visits_for_record(&self, record_number: &RecordNumber) -> StoreResult<Vec<Visit>> {
        let tables = self.tables.read().await;
        let mut visits: Vec<Visit> = tables
            .visits
            .iter()
            .filter(|v| v.record_number == *record_number)
            .cloned()
            .collect();
        // Stable: equal dates keep insertion order.
        visits.sort_by_key(|v| v.date_received);
        Ok(visits)
    }

    async fn visits_for_records(
        &self,
        record_numbers: &[RecordNumber],
    ) -> StoreResult<Vec<Visit>> {
        let tables = self.tables.read().await;
        Ok(tables
            .visits
            .iter()
            .filter(|v| record_numbers.contains(&v.record_number))
            .cloned()
            .collect())
    }

    async fn search_visits(&self, needle: &str, limit: usize) -> StoreResult<Vec<Visit>> {
        let needle = needle.to_lowercase();
        let tables = self.tables.read().await;

        let mut latest: BTreeMap<&RecordNumber, &Visit> = BTreeMap::new();
        for visit in tables.visits.iter().filter(|v| {
            v.record_number.as_str().contains(&needle)
                || v.visit_id.as_str().to_lowercase().contains(&needle)
                || v.name.as_str().to_lowercase().contains(&needle)
        }) {
            latest
                .entry(&visit.record_number)
                .and_modify(|current| {
                    if visit.date_received >= current.date_received {
                        *current = visit;
                    }
                })
                .or_insert(visit);
        }

        Ok(latest.into_values().take(limit).cloned().collect())
    }

    async fn find_morphology(&self, key: &VisitKey) -> StoreResult<Option<Morphology>> {
        let tables = self.tables.read().await;
        Ok(tables
            .morphology
            .iter()
            .find(|m| same_visit(&m.record_number, &m.visit_id, key))
            .cloned())
    }

    async fn save_morphology(
        &self,
        key: &VisitKey,
        report: &str,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<Morphology>> {
        let mut tables = self.tables.write().await;
        let provenance = LockTable::Morphology.provenance();

        let existing = tables
            .morphology
            .iter_mut()
            .find(|m| same_visit(&m.record_number, &m.visit_id, key));

        let prior = existing.as_ref().map(|m| &m.lock);
        let Ok(lock) = LockState::after_save(prior, intent, provenance) else {
            return Ok(SaveOutcome::Locked);
        };

        let current = Morphology {
            record_number: key.record_number.clone(),
            visit_id: key.visit_id.clone(),
            report: report.to_owned(),
            lock,
            updated_at: intent.at,
        };

        let previous = match existing {
            Some(row) => Some(std::mem::replace(row, current.clone())),
            None => {
                tables.morphology.push(current.clone());
                None
            }
        };

        Ok(SaveOutcome::Saved { previous, current })
    }

    async fn morphology_for_record(
        &self,
        record_number: &RecordNumber,
    ) -> StoreResult<Vec<Morphology>> {
        let tables = self.tables.read().await;
        Ok(tables
            .morphology
            .iter()
            .filter(|m| m.record_number == *record_number)
            .cloned()
            .collect())
    }

    async fn find_order(&self, key: &LabKey) -> StoreResult<Option<LabOrder>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .iter()
            .find(|o| o.lab == key.lab && same_visit(&o.record_number, &o.visit_id, &key.visit))
            .cloned())
    }

    async fn save_order(&self, order: &LabOrder) -> StoreResult<LabOrder> {
        let mut tables = self.tables.write().await;
        let key = order.visit_key();

        match tables
            .orders
            .iter_mut()
            .find(|o| o.lab == order.lab && same_visit(&o.record_number, &o.visit_id, &key))
        {
            Some(row) => {
                *row = LabOrder {
                    created_at: row.created_at,
                    ..order.clone()
                };
                Ok(row.clone())
            }
            None => {
                tables.orders.push(order.clone());
                Ok(order.clone())
            }
        }
    }

    async fn orders_for_record(&self, record_number: &RecordNumber) -> StoreResult<Vec<LabOrder>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .iter()
            .filter(|o| o.record_number == *record_number)
            .cloned()
            .collect())
    }

    async fn orders_by_lab(
        &self,
        lab: LabKind,
        window: Option<DateWindow>,
    ) -> StoreResult<Vec<LabOrder>> {
        let tables = self.tables.read().await;
        // Reversed first so equal timestamps list the later insert first.
        let mut orders: Vec<LabOrder> = tables
            .orders
            .iter()
            .rev()
            .filter(|o| o.lab == lab)
            .filter(|o| window.map_or(true, |w| w.contains(o.created_at)))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn find_acceptance(&self, key: &LabKey) -> StoreResult<Option<LabAcceptance>> {
        let tables = self.tables.read().await;
        Ok(tables
            .acceptance
            .iter()
            .find(|a| a.lab == key.lab && same_visit(&a.record_number, &a.visit_id, &key.visit))
            .cloned())
    }

    async fn accession_owner(
        &self,
        lab: LabKind,
        accession: &str,
        exclude: &VisitKey,
    ) -> StoreResult<Option<VisitKey>> {
        let tables = self.tables.read().await;
        Ok(tables
            .acceptance
            .iter()
            .find(|a| {
                a.lab == lab
                    && a.content.accession.as_deref() == Some(accession)
                    && !same_visit(&a.record_number, &a.visit_id, exclude)
            })
            .map(LabAcceptance::visit_key))
    }

    async fn save_acceptance(
        &self,
        key: &LabKey,
        content: &AcceptanceContent,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<LabAcceptance>> {
        let mut tables = self.tables.write().await;
        let provenance = LockTable::LabAcceptance.provenance();

        let index = tables
            .acceptance
            .iter()
            .position(|a| a.lab == key.lab && same_visit(&a.record_number, &a.visit_id, &key.visit));

        let prior = index.map(|i| &tables.acceptance[i].lock);
        let Ok(lock) = LockState::after_save(prior, intent, provenance) else {
            return Ok(SaveOutcome::Locked);
        };

        if let Some(accession) = content.accession.as_deref() {
            if let Some(owner) = tables.acceptance.iter().find(|a| {
                a.lab == key.lab
                    && a.content.accession.as_deref() == Some(accession)
                    && !same_visit(&a.record_number, &a.visit_id, &key.visit)
            }) {
                return Err(StoreError::AccessionTaken {
                    owner: owner.record_number.clone(),
                });
            }
        }

        let current = LabAcceptance {
            record_number: key.visit.record_number.clone(),
            visit_id: key.visit.visit_id.clone(),
            lab: key.lab,
            content: content.clone(),
            lock,
            updated_at: intent.at,
        };

        let previous = match index {
            Some(i) => Some(std::mem::replace(&mut tables.acceptance[i], current.clone())),
            None => {
                tables.acceptance.push(current.clone());
                None
            }
        };

        Ok(SaveOutcome::Saved { previous, current })
    }

    async fn acceptance_for_record(
        &self,
        record_number: &RecordNumber,
    ) -> StoreResult<Vec<LabAcceptance>> {
        let tables = self.tables.read().await;
        Ok(tables
            .acceptance
            .iter()
            .filter(|a| a.record_number == *record_number)
            .cloned()
            .collect())
    }

    async fn acceptance_by_lab(&self, lab: LabKind) -> StoreResult<Vec<LabAcceptance>> {
        let tables = self.tables.read().await;
        Ok(tables
            .acceptance
            .iter()
            .filter(|a| a.lab == lab)
            .cloned()
            .collect())
    }

    async fn find_results(&self, key: &LabKey) -> StoreResult<Option<LabResults>> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .iter()
            .find(|r| r.lab == key.lab && same_visit(&r.record_number, &r.visit_id, &key.visit))
            .cloned())
    }

    async fn save_results(
        &self,
        key: &LabKey,
        panel_results: &serde_json::Value,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<LabResults>> {
        let mut tables = self.tables.write().await;
        let provenance = LockTable::LabResults.provenance();

        let existing = tables
            .results
            .iter_mut()
            .find(|r| r.lab == key.lab && same_visit(&r.record_number, &r.visit_id, &key.visit));

        let prior = existing.as_ref().map(|r| &r.lock);
        let Ok(lock) = LockState::after_save(prior, intent, provenance) else {
            return Ok(SaveOutcome::Locked);
        };

        let current = LabResults {
            record_number: key.visit.record_number.clone(),
            visit_id: key.visit.visit_id.clone(),
            lab: key.lab,
            panel_results: panel_results.clone(),
            lock,
            updated_at: intent.at,
        };

        let previous = match existing {
            Some(row) => Some(std::mem::replace(row, current.clone())),
            None => {
                tables.results.push(current.clone());
                None
            }
        };

        Ok(SaveOutcome::Saved { previous, current })
    }

    async fn results_for_record(
        &self,
        record_number: &RecordNumber,
    ) -> StoreResult<Vec<LabResults>> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .iter()
            .filter(|r| r.record_number == *record_number)
            .cloned()
            .collect())
    }

    async fn results_by_lab(&self, lab: LabKind) -> StoreResult<Vec<LabResults>> {
        let tables = self.tables.read().await;
        Ok(tables
            .results
            .iter()
            .filter(|r| r.lab == lab)
            .cloned()
            .collect())
    }

    async fn unlock(&self, event: &UnlockEvent) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let key = VisitKey::new(event.record_number.clone(), event.visit_id.clone());

        let lock = match (event.table, event.lab) {
            (LockTable::Morphology, _) => tables
                .morphology
                .iter_mut()
                .find(|m| same_visit(&m.record_number, &m.visit_id, &key))
                .map(|m| &mut m.lock),
            (LockTable::LabAcceptance, Some(lab)) => tables
                .acceptance
                .iter_mut()
                .find(|a| a.lab == lab && same_visit(&a.record_number, &a.visit_id, &key))
                .map(|a| &mut a.lock),
            (LockTable::LabResults, Some(lab)) => tables
                .results
                .iter_mut()
                .find(|r| r.lab == lab && same_visit(&r.record_number, &r.visit_id, &key))
                .map(|r| &mut r.lock),
            (LockTable::LabAcceptance | LockTable::LabResults, None) => None,
        };

        let Some(lock) = lock else {
            return Ok(false);
        };
        *lock = lock.after_unlock();
        tables.unlocks.push(event.clone());
        Ok(true)
    }

    async fn unlock_history(&self, limit: usize) -> StoreResult<Vec<UnlockEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.unlocks.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.tables.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn entries_for_record(
        &self,
        record_number: &RecordNumber,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .rev()
            .filter(|e| e.record_number == *record_number)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use chrono::{NaiveDate, TimeZone, Utc};
    use prism_types::{NonEmptyText, VisitId};

    fn visit(cr: &str, labid: &str, date: (i32, u32, u32), name: &str) -> Visit {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let text = |s: &str| NonEmptyText::new(s).unwrap();
        Visit {
            record_number: RecordNumber::parse(cr).unwrap(),
            visit_id: VisitId::parse(labid).unwrap(),
            date_received: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            name: text(name),
            age: text("40"),
            sex: text("F"),
            faculty: text("Haematology"),
            jr: None,
            sr: None,
            sample: text("BM"),
            tlc: None,
            bm_quality: None,
            blasts: None,
            eos: None,
            plasma: None,
            right_imprint: None,
            left_imprint: None,
            suspicion: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn intent(actor: Role) -> SaveIntent {
        SaveIntent {
            actor,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_fields_but_keeps_created_at() {
        let store = MemoryStore::new();
        let first = visit("000000000001", "A_1_2026", (2026, 1, 5), "Asha");
        store.upsert_visit(&first).await.unwrap();

        let mut second = visit("000000000001", "A_1_2026", (2026, 1, 6), "Asha Rani");
        second.created_at = Utc::now();
        let upsert = store.upsert_visit(&second).await.unwrap();

        assert_eq!(upsert.previous, Some(first.clone()));
        assert_eq!(upsert.saved.name.as_str(), "Asha Rani");
        assert_eq!(upsert.saved.created_at, first.created_at);
    }

    #[tokio::test]
    async fn search_returns_latest_visit_per_record() {
        let store = MemoryStore::new();
        for v in [
            visit("000000000002", "A_7_2025", (2025, 6, 1), "Ravi Kumar"),
            visit("000000000001", "A_1_2026", (2026, 1, 5), "Asha"),
            visit("000000000002", "A_9_2026", (2026, 2, 1), "Ravi Kumar"),
        ] {
            store.upsert_visit(&v).await.unwrap();
        }

        let hits = store.search_visits("RAVI", 20).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].visit_id.as_str(), "A_9_2026");

        let hits = store.search_visits("_2026", 20).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record_number.as_str(), "000000000001");

        let hits = store.search_visits("_2026", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn acceptance_backstop_rejects_claimed_accession() {
        let store = MemoryStore::new();
        let content = AcceptanceContent {
            accession: Some("X1".into()),
            panel_status: serde_json::json!({}),
            notes: String::new(),
        };
        let first = VisitKey::parse("000000000001", "A_1_2026").unwrap();
        let second = VisitKey::parse("000000000002", "A_2_2026").unwrap();

        store
            .save_acceptance(&first.lab(LabKind::Fish), &content, &intent(Role::Fish))
            .await
            .unwrap();
        let err = store
            .save_acceptance(&second.lab(LabKind::Fish), &content, &intent(Role::Fish))
            .await
            .expect_err("accession taken");
        assert!(
            matches!(err, StoreError::AccessionTaken { owner } if owner == first.record_number)
        );

        // Same accession in another lab is fine.
        store
            .save_acceptance(&second.lab(LabKind::Fcm), &content, &intent(Role::Fcm))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unlock_of_missing_record_appends_nothing() {
        let store = MemoryStore::new();
        let event = UnlockEvent {
            id: uuid::Uuid::new_v4(),
            record_number: RecordNumber::parse("000000000001").unwrap(),
            visit_id: VisitId::parse("A_1_2026").unwrap(),
            table: LockTable::LabResults,
            lab: Some(LabKind::Tcr),
            reason: String::new(),
            unlocked_by: Role::Admin,
            at: Utc::now(),
        };
        assert!(!store.unlock(&event).await.unwrap());
        assert!(store.unlock_history(10).await.unwrap().is_empty());
    }
}
