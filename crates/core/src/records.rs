//! Record types for every workflow stage.
//!
//! All records are keyed by a [`VisitKey`]; lab-scoped records add a [`LabKind`] through
//! [`LabKey`].

use crate::labs::LabKind;
use crate::lock::LockState;
use crate::CoreResult;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use prism_types::{NonEmptyText, RecordNumber, VisitId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitKey {
    pub record_number: RecordNumber,
    pub visit_id: VisitId,
}

impl VisitKey {
    pub fn new(record_number: RecordNumber, visit_id: VisitId) -> Self {
        Self {
            record_number,
            visit_id,
        }
    }

    /// Parse both halves of a visit key from caller input.
    pub fn parse(record_number: &str, visit_id: &str) -> CoreResult<Self> {
        Ok(Self {
            record_number: RecordNumber::parse(record_number)?,
            visit_id: VisitId::parse(visit_id)?,
        })
    }

    pub fn lab(&self, lab: LabKind) -> LabKey {
        LabKey {
            visit: self.clone(),
            lab,
        }
    }
}

impl std::fmt::Display for VisitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.record_number, self.visit_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabKey {
    pub visit: VisitKey,
    pub lab: LabKind,
}

/// One registered specimen/encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    pub record_number: RecordNumber,
    pub visit_id: VisitId,
    pub date_received: NaiveDate,
    pub name: NonEmptyText,
    pub age: NonEmptyText,
    pub sex: NonEmptyText,
    pub faculty: NonEmptyText,
    pub jr: Option<String>,
    pub sr: Option<String>,
    pub sample: NonEmptyText,
    pub tlc: Option<String>,
    pub bm_quality: Option<String>,
    pub blasts: Option<String>,
    pub eos: Option<String>,
    pub plasma: Option<String>,
    pub right_imprint: Option<String>,
    pub left_imprint: Option<String>,
    pub suspicion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Visit {
    pub fn key(&self) -> VisitKey {
        VisitKey::new(self.record_number.clone(), self.visit_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Morphology {
    pub record_number: RecordNumber,
    pub visit_id: VisitId,
    pub report: String,
    #[serde(flatten)]
    pub lock: LockState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabOrder {
    pub record_number: RecordNumber,
    pub visit_id: VisitId,
    pub lab: LabKind,
    /// Comma-separated panel names from the lab's catalogue.
    pub panels: String,
    pub payment: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabOrder {
    pub fn visit_key(&self) -> VisitKey {
        VisitKey::new(self.record_number.clone(), self.visit_id.clone())
    }
}

/// Writable content of an acceptance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceContent {
    /// Accession id, unique within the lab across all visits.
    pub accession: Option<String>,
    pub panel_status: serde_json::Value,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabAcceptance {
    pub record_number: RecordNumber,
    pub visit_id: VisitId,
    pub lab: LabKind,
    #[serde(flatten)]
    pub content: AcceptanceContent,
    #[serde(flatten)]
    pub lock: LockState,
    pub updated_at: DateTime<Utc>,
}

impl LabAcceptance {
    pub fn visit_key(&self) -> VisitKey {
        VisitKey::new(self.record_number.clone(), self.visit_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabResults {
    pub record_number: RecordNumber,
    pub visit_id: VisitId,
    pub lab: LabKind,
    pub panel_results: serde_json::Value,
    #[serde(flatten)]
    pub lock: LockState,
    pub updated_at: DateTime<Utc>,
}

impl LabResults {
    pub fn visit_key(&self) -> VisitKey {
        VisitKey::new(self.record_number.clone(), self.visit_id.clone())
    }
}

/// Inclusive calendar-day window over order creation dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> CoreResult<Self> {
        if to < from {
            return Err(crate::CoreError::invalid("from date must not be after to date"));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        day >= self.from && day <= self.to
    }

    /// Half-open UTC instant range `[start, end)`; `end` is `None` at the calendar's last day.
    pub fn bounds(&self) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        let start = self.from.and_time(NaiveTime::MIN).and_utc();
        let end = self
            .to
            .succ_opt()
            .map(|next| next.and_time(NaiveTime::MIN).and_utc());
        (start, end)
    }
}
