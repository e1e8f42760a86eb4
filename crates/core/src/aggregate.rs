//! Cross-stage views of a record number.

use crate::constants::MIN_SEARCH_QUERY_LEN;
use crate::error::{CoreError, CoreResult};
use crate::records::{LabAcceptance, LabOrder, LabResults, Morphology, Visit};
use crate::store::RecordStore;
use prism_types::{RecordNumber, VisitId};
use serde::Serialize;

/// Every record held for one record number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitBundle {
    pub record_number: RecordNumber,
    /// Oldest registration date first.
    pub visits: Vec<Visit>,
    pub morphology: Vec<Morphology>,
    pub orders: Vec<LabOrder>,
    pub acceptance: Vec<LabAcceptance>,
    pub results: Vec<LabResults>,
    pub active_visit_id: VisitId,
}

/// The visit with the latest registration date; the last-inserted one on ties.
///
/// `visits` must be in store order (oldest registration date first, ties by insertion).
pub fn active_visit(visits: &[Visit]) -> Option<&Visit> {
    visits.last()
}

/// Load every stage's records for `record_number`.
///
/// The five category reads run concurrently and independently.
pub async fn load_all(
    store: &dyn RecordStore,
    record_number: &RecordNumber,
) -> CoreResult<VisitBundle> {
    let (visits, morphology, orders, acceptance, results) = tokio::join!(
        store.visits_for_record(record_number),
        store.morphology_for_record(record_number),
        store.orders_for_record(record_number),
        store.acceptance_for_record(record_number),
        store.results_for_record(record_number),
    );

    let visits = visits?;
    let Some(active) = active_visit(&visits) else {
        return Err(CoreError::NotFound(format!("CR {record_number} not found")));
    };
    let active_visit_id = active.visit_id.clone();

    Ok(VisitBundle {
        record_number: record_number.clone(),
        visits,
        morphology: morphology?,
        orders: orders?,
        acceptance: acceptance?,
        results: results?,
        active_visit_id,
    })
}

/// Latest visit of each record number matching `query`, at most `limit` rows.
pub async fn search(store: &dyn RecordStore, query: &str, limit: usize) -> CoreResult<Vec<Visit>> {
    let query = query.trim();
    if query.chars().count() < MIN_SEARCH_QUERY_LEN {
        return Err(CoreError::invalid(format!(
            "Search query must be at least {MIN_SEARCH_QUERY_LEN} characters"
        )));
    }
    Ok(store.search_visits(query, limit).await?)
}
