//! Persistence interface.
//!
//! The core never serialises writers itself. Every lockable save is a single atomic store
//! operation that reads the row present at write time, applies
//! [`LockState::after_save`](crate::lock::LockState::after_save) to it, and persists the outcome
//! (or reports the lock) without any window for another writer in between.
//!
//! Two backends are provided:
//! - [`memory::MemoryStore`]: process-local tables behind one async lock; used for development
//!   and tests.
//! - [`postgres::PgStore`]: PostgreSQL via `sqlx`, using `INSERT … ON CONFLICT DO UPDATE` with
//!   the lock transition expressed in the conflict clause.

pub mod memory;
pub mod postgres;

use crate::audit::UnlockEvent;
use crate::error::StoreResult;
use crate::labs::LabKind;
use crate::lock::SaveIntent;
use crate::records::{
    AcceptanceContent, DateWindow, LabAcceptance, LabKey, LabOrder, LabResults, Morphology, Visit,
    VisitKey,
};
use async_trait::async_trait;
use prism_types::RecordNumber;
use std::future::Future;
use std::time::{Duration, Instant};

/// Result of an atomic lockable save.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome<T> {
    Saved { previous: Option<T>, current: T },
    /// The row was locked at write time and the actor is not an administrator.
    Locked,
}

/// Result of a registration upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitUpsert {
    pub previous: Option<Visit>,
    pub saved: Visit,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a visit or replace every field of the existing row with the same key.
    ///
    /// `created_at` of an existing row is preserved.
    async fn upsert_visit(&self, visit: &Visit) -> StoreResult<VisitUpsert>;

    async fn find_visit(&self, key: &VisitKey) -> StoreResult<Option<Visit>>;

    /// Visits of one record number, oldest registration date first; ties in insertion order.
    async fn visits_for_record(&self, record_number: &RecordNumber) -> StoreResult<Vec<Visit>>;

    async fn visits_for_records(&self, record_numbers: &[RecordNumber])
        -> StoreResult<Vec<Visit>>;

    /// Case-insensitive substring match on record number, visit id and name.
    ///
    /// Returns the latest visit of each matching record number, ordered by record number.
    async fn search_visits(&self, needle: &str, limit: usize) -> StoreResult<Vec<Visit>>;

    async fn find_morphology(&self, key: &VisitKey) -> StoreResult<Option<Morphology>>;

    async fn save_morphology(
        &self,
        key: &VisitKey,
        report: &str,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<Morphology>>;

    async fn morphology_for_record(
        &self,
        record_number: &RecordNumber,
    ) -> StoreResult<Vec<Morphology>>;

    async fn find_order(&self, key: &LabKey) -> StoreResult<Option<LabOrder>>;

    /// Insert or replace an order; `created_at` of an existing row is preserved.
    async fn save_order(&self, order: &LabOrder) -> StoreResult<LabOrder>;

    async fn orders_for_record(&self, record_number: &RecordNumber) -> StoreResult<Vec<LabOrder>>;

    /// Orders of one lab, newest first, optionally restricted to a creation-date window.
    async fn orders_by_lab(
        &self,
        lab: LabKind,
        window: Option<DateWindow>,
    ) -> StoreResult<Vec<LabOrder>>;

    async fn find_acceptance(&self, key: &LabKey) -> StoreResult<Option<LabAcceptance>>;

    /// Visit other than `exclude` whose acceptance in `lab` holds `accession`.
    async fn accession_owner(
        &self,
        lab: LabKind,
        accession: &str,
        exclude: &VisitKey,
    ) -> StoreResult<Option<VisitKey>>;

    /// # Errors
    ///
    /// Returns [`StoreError::AccessionTaken`](crate::StoreError::AccessionTaken) if another
    /// visit claimed the accession id after the caller's uniqueness check.
    async fn save_acceptance(
        &self,
        key: &LabKey,
        content: &AcceptanceContent,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<LabAcceptance>>;

    async fn acceptance_for_record(
        &self,
        record_number: &RecordNumber,
    ) -> StoreResult<Vec<LabAcceptance>>;

    async fn acceptance_by_lab(&self, lab: LabKind) -> StoreResult<Vec<LabAcceptance>>;

    async fn find_results(&self, key: &LabKey) -> StoreResult<Option<LabResults>>;

    async fn save_results(
        &self,
        key: &LabKey,
        panel_results: &serde_json::Value,
        intent: &SaveIntent,
    ) -> StoreResult<SaveOutcome<LabResults>>;

    async fn results_for_record(&self, record_number: &RecordNumber)
        -> StoreResult<Vec<LabResults>>;

    async fn results_by_lab(&self, lab: LabKind) -> StoreResult<Vec<LabResults>>;

    /// Clear the lock flag of the record named by `event` and append `event`, atomically.
    ///
    /// Returns `false`, appending nothing, when the record does not exist.
    async fn unlock(&self, event: &UnlockEvent) -> StoreResult<bool>;

    /// Unlock events, newest first.
    async fn unlock_history(&self, limit: usize) -> StoreResult<Vec<UnlockEvent>>;
}

/// Await `op`, reporting it when it takes at least `threshold`.
pub(crate) async fn observe<T, F>(label: &str, threshold: Duration, op: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = op.await;
    let elapsed = start.elapsed();
    if elapsed >= threshold {
        tracing::warn!("slow query ({}ms): {}", elapsed.as_millis(), label);
    }
    out
}

/// First `max` characters of a statement, for logs.
pub(crate) fn truncate_statement(statement: &str, max: usize) -> String {
    let squashed = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    squashed.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_statement_squashes_whitespace() {
        let sql = "SELECT *\n      FROM lab_results\n      WHERE cr = $1";
        assert_eq!(
            truncate_statement(sql, 200),
            "SELECT * FROM lab_results WHERE cr = $1"
        );
        assert_eq!(truncate_statement(sql, 8), "SELECT *");
    }

    #[tokio::test]
    async fn observe_returns_inner_value() {
        let value = observe("noop", Duration::from_secs(5), async { 7 }).await;
        assert_eq!(value, 7);
    }
}
