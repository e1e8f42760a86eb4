//! Accession id uniqueness within a lab.
//!
//! An accession id may be held by at most one visit per lab. Self-exclusion is by visit key, so
//! re-saving a visit's own acceptance under its unchanged accession id never conflicts.

use crate::error::{CoreError, CoreResult, StoreError};
use crate::labs::LabKind;
use crate::records::VisitKey;
use crate::store::RecordStore;

/// Trimmed accession id, or `None` when blank.
pub fn normalize(accession: Option<String>) -> Option<String> {
    accession
        .map(|a| a.trim().to_owned())
        .filter(|a| !a.is_empty())
}

/// Fail with [`CoreError::Conflict`] if a visit other than `key` holds `accession` in `lab`.
pub async fn ensure_unclaimed(
    store: &dyn RecordStore,
    lab: LabKind,
    accession: Option<&str>,
    key: &VisitKey,
) -> CoreResult<()> {
    let Some(accession) = accession else {
        return Ok(());
    };
    match store.accession_owner(lab, accession, key).await? {
        Some(owner) => Err(CoreError::Conflict {
            lab,
            accession: accession.to_owned(),
            owner: owner.record_number,
        }),
        None => Ok(()),
    }
}

/// Maps the store's write-time uniqueness backstop onto [`CoreError::Conflict`].
pub fn conflict_from_store(err: StoreError, lab: LabKind, accession: Option<&str>) -> CoreError {
    match (err, accession) {
        (StoreError::AccessionTaken { owner }, Some(accession)) => CoreError::Conflict {
            lab,
            accession: accession.to_owned(),
            owner,
        },
        (err, _) => CoreError::Storage(err),
    }
}
