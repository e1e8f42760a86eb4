//! # PRISM Core
//!
//! Workflow and state-integrity core for the PRISM clinical lab record system.
//!
//! A visit moves through registration, morphology, test order, lab acceptance and lab
//! results. This crate owns the rules around that movement:
//! - who may write which record ([`access`])
//! - which stage must exist before another may be written ([`workflow`])
//! - when a record becomes immutable and how an administrator reverses that ([`lock`])
//! - accession id uniqueness within a lab ([`accession`])
//! - the append-only audit trail ([`audit`])
//!
//! Stage services live in [`repositories`]; persistence sits behind [`store::RecordStore`].
//!
//! **No API concerns**: session tokens and HTTP handling belong in `api-shared` and `api-rest`.

pub mod access;
pub mod accession;
pub mod aggregate;
pub mod audit;
pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod labs;
pub mod lock;
pub mod records;
pub mod repositories;
pub mod store;
pub mod workflow;

pub use access::{Category, Identity, Role};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult, StoreError, StoreResult, ValidationErrors};
pub use labs::LabKind;
pub use prism_types::{NonEmptyText, RecordNumber, VisitId};
pub use repositories::shared::Registry;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the microsecond precision every backend can store.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
