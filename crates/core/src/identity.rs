//! Visit identity: registration validation and visit lookup.
//!
//! Registration input is checked syntactically before any storage access. Every violated rule
//! is collected, in field order, so the caller gets a headline message plus the full list.

use crate::error::{CoreError, CoreResult, ValidationErrors};
use crate::records::{Visit, VisitKey};
use crate::store::RecordStore;
use chrono::{DateTime, NaiveDate, Utc};
use prism_types::{NonEmptyText, RecordNumber, VisitId};
use serde::Deserialize;

/// Raw registration input as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationForm {
    pub record_number: String,
    pub visit_id: String,
    /// `YYYY-MM-DD`.
    pub date_received: String,
    pub name: String,
    pub age: String,
    pub sex: String,
    pub faculty: String,
    pub jr: Option<String>,
    pub sr: Option<String>,
    pub sample: String,
    pub tlc: Option<String>,
    pub bm_quality: Option<String>,
    pub blasts: Option<String>,
    pub eos: Option<String>,
    pub plasma: Option<String>,
    pub right_imprint: Option<String>,
    pub left_imprint: Option<String>,
    pub suspicion: Option<String>,
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

impl RegistrationForm {
    /// Validates the form into a [`Visit`] stamped with `at`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] listing every violated rule.
    pub fn validate(self, at: DateTime<Utc>) -> CoreResult<Visit> {
        let mut errors = Vec::new();

        let record_number = RecordNumber::parse(&self.record_number)
            .map_err(|e| errors.push(e.to_string()))
            .ok();
        let visit_id = VisitId::parse(&self.visit_id)
            .map_err(|e| errors.push(e.to_string()))
            .ok();

        let date_received = match self.date_received.trim() {
            "" => {
                errors.push("Date received is required".to_owned());
                None
            }
            raw => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| errors.push("Date received must be a date (YYYY-MM-DD)".to_owned()))
                .ok(),
        };

        let mut required = |value: &str, message: &str| {
            NonEmptyText::new(value)
                .map_err(|_| errors.push(message.to_owned()))
                .ok()
        };
        let name = required(&self.name, "Patient name is required");
        let age = required(&self.age, "Age is required");
        let sex = required(&self.sex, "Sex is required");
        let faculty = required(&self.faculty, "Faculty is required");
        let sample = required(&self.sample, "Sample type is required");

        if let Some(errors) = ValidationErrors::from_messages(errors) {
            return Err(CoreError::Validation(errors));
        }

        match (
            record_number,
            visit_id,
            date_received,
            name,
            age,
            sex,
            faculty,
            sample,
        ) {
            (
                Some(record_number),
                Some(visit_id),
                Some(date_received),
                Some(name),
                Some(age),
                Some(sex),
                Some(faculty),
                Some(sample),
            ) => Ok(Visit {
                record_number,
                visit_id,
                date_received,
                name,
                age,
                sex,
                faculty,
                jr: optional(self.jr),
                sr: optional(self.sr),
                sample,
                tlc: optional(self.tlc),
                bm_quality: optional(self.bm_quality),
                blasts: optional(self.blasts),
                eos: optional(self.eos),
                plasma: optional(self.plasma),
                right_imprint: optional(self.right_imprint),
                left_imprint: optional(self.left_imprint),
                suspicion: optional(self.suspicion),
                created_at: at,
                updated_at: at,
            }),
            _ => Err(CoreError::invalid("Registration is incomplete")),
        }
    }
}

/// Look up a registered visit.
pub async fn resolve(store: &dyn RecordStore, key: &VisitKey) -> CoreResult<Visit> {
    store
        .find_visit(key)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Visit {} not found", key.visit_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> RegistrationForm {
        RegistrationForm {
            record_number: "000000000001".into(),
            visit_id: "A_100_2026".into(),
            date_received: "2026-01-05".into(),
            name: " Asha ".into(),
            age: "34".into(),
            sex: "F".into(),
            faculty: "Haematology".into(),
            sample: "BM".into(),
            blasts: Some("  ".into()),
            suspicion: Some("AML".into()),
            ..Default::default()
        }
    }

    #[test]
    fn complete_form_becomes_a_visit() {
        let at = crate::now();
        let visit = complete().validate(at).expect("valid");
        assert_eq!(visit.name.as_str(), "Asha");
        assert_eq!(visit.blasts, None);
        assert_eq!(visit.suspicion.as_deref(), Some("AML"));
        assert_eq!(visit.created_at, at);
    }

    #[test]
    fn every_violation_is_reported_in_field_order() {
        let form = RegistrationForm {
            record_number: "12".into(),
            visit_id: "X_1_2026".into(),
            date_received: "05/01/2026".into(),
            name: "   ".into(),
            ..complete()
        };
        let Err(CoreError::Validation(errors)) = form.validate(crate::now()) else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.first(), "CR number must be exactly 12 digits");
        assert_eq!(
            errors.all(),
            [
                "CR number must be exactly 12 digits",
                "Lab ID format invalid (expected A_100_2026 or P_100_2026)",
                "Date received must be a date (YYYY-MM-DD)",
                "Patient name is required",
            ]
        );
    }

    #[test]
    fn empty_form_reports_missing_fields() {
        let Err(CoreError::Validation(errors)) =
            RegistrationForm::default().validate(crate::now())
        else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.first(), "CR number is required");
        assert_eq!(errors.all().len(), 8);
    }

    #[tokio::test]
    async fn resolve_reports_unknown_visits() {
        let store = crate::store::memory::MemoryStore::new();
        let key = VisitKey::parse("000000000001", "A_1_2026").unwrap();
        assert!(matches!(
            resolve(&store, &key).await,
            Err(CoreError::NotFound(_))
        ));
    }
}
