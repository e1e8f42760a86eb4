//! Stage ordering.
//!
//! ```text
//! Registration ─┬─> Morphology
//!               ├─> Order(lab)
//!               └─> Acceptance(lab) ──> Results(lab)
//! ```
//!
//! A stage may only be written once its prerequisite record exists for the same visit (and,
//! for lab stages, the same lab). An unsatisfied gate is reported as
//! [`CoreError::PrerequisiteMissing`] naming the missing stage, never as a plain not-found.

use crate::error::{CoreError, CoreResult};
use crate::labs::LabKind;
use crate::records::VisitKey;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Registration,
    Morphology,
    Order(LabKind),
    Acceptance(LabKind),
    Results(LabKind),
}

impl Stage {
    /// The stage that must exist before this one may be written.
    pub fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::Registration => None,
            Stage::Morphology | Stage::Order(_) | Stage::Acceptance(_) => {
                Some(Stage::Registration)
            }
            Stage::Results(lab) => Some(Stage::Acceptance(lab)),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Registration => f.write_str("Visit registration"),
            Stage::Morphology => f.write_str("Morphology"),
            Stage::Order(lab) => write!(f, "{} order", lab.label()),
            Stage::Acceptance(lab) => write!(f, "{} acceptance", lab.label()),
            Stage::Results(lab) => write!(f, "{} results", lab.label()),
        }
    }
}

/// Whether a record for `stage` exists under `key`.
async fn reached(store: &dyn RecordStore, stage: Stage, key: &VisitKey) -> CoreResult<bool> {
    let found = match stage {
        Stage::Registration => store.find_visit(key).await?.is_some(),
        Stage::Morphology => store.find_morphology(key).await?.is_some(),
        Stage::Order(lab) => store.find_order(&key.lab(lab)).await?.is_some(),
        Stage::Acceptance(lab) => store.find_acceptance(&key.lab(lab)).await?.is_some(),
        Stage::Results(lab) => store.find_results(&key.lab(lab)).await?.is_some(),
    };
    Ok(found)
}

/// Fail unless the prerequisite of `stage` exists for `key`.
pub async fn enforce(store: &dyn RecordStore, stage: Stage, key: &VisitKey) -> CoreResult<()> {
    let Some(required) = stage.prerequisite() else {
        return Ok(());
    };
    if reached(store, required, key).await? {
        Ok(())
    } else {
        Err(CoreError::PrerequisiteMissing(required))
    }
}
