use crate::access::AccessDenied;
use crate::labs::LabKind;
use crate::lock::LockTarget;
use crate::workflow::Stage;
use prism_types::{RecordNumber, VisitId};

/// Ordered list of validation failures; the first entry is the headline message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    /// Returns `None` when `messages` is empty.
    pub fn from_messages(messages: Vec<String>) -> Option<Self> {
        if messages.is_empty() {
            None
        } else {
            Some(Self(messages))
        }
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self(vec![message.into()])
    }

    pub fn first(&self) -> &str {
        &self.0[0]
    }

    pub fn all(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.first())
    }
}

/// Failures raised by a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
    #[error("accession id already held by record {owner}")]
    AccessionTaken { owner: RecordNumber },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("{0}")]
    Authorization(AccessDenied),
    #[error("{0}")]
    NotFound(String),
    #[error("{0} must be completed first")]
    PrerequisiteMissing(Stage),
    #[error("Unique Lab ID '{accession}' already exists for {} (CR: {owner})", lab.label())]
    Conflict {
        lab: LabKind,
        accession: String,
        owner: RecordNumber,
    },
    #[error("{} for Lab ID {visit_id} is locked. Contact admin to unlock.", target.describe())]
    Locked {
        target: LockTarget,
        record_number: RecordNumber,
        visit_id: VisitId,
    },
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl CoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(ValidationErrors::single(message))
    }

    /// Whether the failure was caused by an active record lock.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

impl From<prism_types::IdentifierError> for CoreError {
    fn from(err: prism_types::IdentifierError) -> Self {
        Self::invalid(err.to_string())
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
