//! Wire request and response types shared by the HTTP surfaces.
//!
//! Request types accept the camelCase field names plus the short legacy names used by older
//! clients (`cr`, `labid`, `uniqueLabId`). Missing fields deserialize as blank so that the core
//! validation produces the user-facing message. Age and the cell counts may arrive as JSON
//! numbers or strings.

use chrono::{DateTime, NaiveDate, Utc};
use prism_core::identity::RegistrationForm;
use prism_core::records::DateWindow;
use prism_core::repositories::{
    acceptance::AcceptanceForm, morphology::MorphologyForm, orders::OrderForm,
    results::ResultsForm,
};
use prism_core::{CoreError, CoreResult};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};

// ============================================================================
// Authentication
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct LoginReq {
    #[schema(example = "resident")]
    pub role: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRes {
    pub token: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
    /// Lifetime in whole hours, e.g. `12h`.
    pub expires_in: String,
}

/// Error body returned for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

impl ErrorRes {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            all_errors: None,
            locked: None,
        }
    }
}

// ============================================================================
// Stage requests
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterVisitReq {
    #[serde(alias = "cr")]
    #[schema(example = "000000000001")]
    pub record_number: String,
    #[serde(alias = "labid")]
    #[schema(example = "A_100_2026")]
    pub visit_id: String,
    #[serde(alias = "date")]
    #[schema(example = "2026-01-05")]
    pub date_received: String,
    pub name: String,
    #[serde(deserialize_with = "text_or_number")]
    #[schema(example = "52")]
    pub age: String,
    pub sex: String,
    pub faculty: String,
    pub jr: Option<String>,
    pub sr: Option<String>,
    pub sample: String,
    #[serde(deserialize_with = "optional_text_or_number")]
    pub tlc: Option<String>,
    #[serde(alias = "bm_quality")]
    pub bm_quality: Option<String>,
    #[serde(deserialize_with = "optional_text_or_number")]
    pub blasts: Option<String>,
    #[serde(deserialize_with = "optional_text_or_number")]
    pub eos: Option<String>,
    #[serde(deserialize_with = "optional_text_or_number")]
    pub plasma: Option<String>,
    #[serde(alias = "right_imprint")]
    pub right_imprint: Option<String>,
    #[serde(alias = "left_imprint")]
    pub left_imprint: Option<String>,
    pub suspicion: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl From<TextOrNumber> for String {
    fn from(value: TextOrNumber) -> Self {
        match value {
            TextOrNumber::Text(text) => text,
            TextOrNumber::Number(number) => number.to_string(),
        }
    }
}

fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(optional_text_or_number(deserializer)?.unwrap_or_default())
}

fn optional_text_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<TextOrNumber>::deserialize(deserializer)?.map(String::from))
}

impl From<RegisterVisitReq> for RegistrationForm {
    fn from(req: RegisterVisitReq) -> Self {
        RegistrationForm {
            record_number: req.record_number,
            visit_id: req.visit_id,
            date_received: req.date_received,
            name: req.name,
            age: req.age,
            sex: req.sex,
            faculty: req.faculty,
            jr: req.jr,
            sr: req.sr,
            sample: req.sample,
            tlc: req.tlc,
            bm_quality: req.bm_quality,
            blasts: req.blasts,
            eos: req.eos,
            plasma: req.plasma,
            right_imprint: req.right_imprint,
            left_imprint: req.left_imprint,
            suspicion: req.suspicion,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct MorphologyReq {
    #[serde(alias = "cr")]
    pub record_number: String,
    #[serde(alias = "labid")]
    pub visit_id: String,
    pub report: String,
}

impl From<MorphologyReq> for MorphologyForm {
    fn from(req: MorphologyReq) -> Self {
        MorphologyForm {
            record_number: req.record_number,
            visit_id: req.visit_id,
            report: req.report,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderReq {
    #[serde(alias = "cr")]
    pub record_number: String,
    #[serde(alias = "labid")]
    pub visit_id: String,
    /// Comma-separated panel names.
    #[schema(example = "CLL,MM")]
    pub panels: String,
    pub payment: String,
    pub notes: String,
}

impl From<OrderReq> for OrderForm {
    fn from(req: OrderReq) -> Self {
        OrderForm {
            record_number: req.record_number,
            visit_id: req.visit_id,
            panels: req.panels,
            payment: req.payment,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AcceptanceReq {
    #[serde(alias = "cr")]
    pub record_number: String,
    #[serde(alias = "labid")]
    pub visit_id: String,
    /// Lab accession id, unique within the lab. Blank means none.
    #[serde(alias = "uniqueLabId", alias = "unique_lab_id")]
    pub accession: Option<String>,
    #[serde(alias = "panel_status")]
    #[schema(value_type = Option<Object>)]
    pub panel_status: Option<serde_json::Value>,
    pub notes: Option<String>,
}

impl From<AcceptanceReq> for AcceptanceForm {
    fn from(req: AcceptanceReq) -> Self {
        AcceptanceForm {
            record_number: req.record_number,
            visit_id: req.visit_id,
            accession: req.accession,
            panel_status: req.panel_status,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultsReq {
    #[serde(alias = "cr")]
    pub record_number: String,
    #[serde(alias = "labid")]
    pub visit_id: String,
    #[serde(alias = "panel_results")]
    #[schema(value_type = Option<Object>)]
    pub panel_results: Option<serde_json::Value>,
}

impl From<ResultsReq> for ResultsForm {
    fn from(req: ResultsReq) -> Self {
        ResultsForm {
            record_number: req.record_number,
            visit_id: req.visit_id,
            panel_results: req.panel_results,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct UnlockReq {
    #[serde(alias = "cr")]
    pub record_number: String,
    #[serde(alias = "labid")]
    pub visit_id: String,
    pub reason: Option<String>,
}

impl UnlockReq {
    pub fn reason(&self) -> &str {
        self.reason.as_deref().map(str::trim).unwrap_or_default()
    }
}

// ============================================================================
// Query strings
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Matches record number, visit id or patient name (case-insensitive substring).
    pub q: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    /// First order date, inclusive (`YYYY-MM-DD`).
    pub from: Option<String>,
    /// Last order date, inclusive (`YYYY-MM-DD`).
    pub to: Option<String>,
}

impl ExportQuery {
    pub fn window(&self) -> CoreResult<DateWindow> {
        let (Some(from), Some(to)) = (non_blank(&self.from), non_blank(&self.to)) else {
            return Err(CoreError::invalid("from and to date params required"));
        };
        DateWindow::new(parse_date("from", from)?, parse_date("to", to)?)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(field: &str, value: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| CoreError::invalid(format!("{field} must be a date (YYYY-MM-DD)")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_field_names_are_accepted() {
        let req: AcceptanceReq = serde_json::from_value(serde_json::json!({
            "cr": "000000000001",
            "labid": "A_100_2026",
            "uniqueLabId": "X1",
        }))
        .unwrap();
        let form = AcceptanceForm::from(req);
        assert_eq!(form.record_number, "000000000001");
        assert_eq!(form.visit_id, "A_100_2026");
        assert_eq!(form.accession.as_deref(), Some("X1"));
        assert!(form.panel_status.is_none());
    }

    #[test]
    fn missing_fields_deserialize_blank() {
        let req: RegisterVisitReq = serde_json::from_str("{}").unwrap();
        assert!(req.record_number.is_empty());
        assert!(req.suspicion.is_none());
    }

    #[test]
    fn counts_accept_numbers_or_text() {
        let req: RegisterVisitReq = serde_json::from_value(serde_json::json!({
            "age": 52,
            "tlc": 4.5,
            "blasts": "12",
            "eos": null,
        }))
        .unwrap();
        assert_eq!(req.age, "52");
        assert_eq!(req.tlc.as_deref(), Some("4.5"));
        assert_eq!(req.blasts.as_deref(), Some("12"));
        assert!(req.eos.is_none());
        assert!(req.plasma.is_none());

        let req: RegisterVisitReq = serde_json::from_value(serde_json::json!({ "age": null })).unwrap();
        assert!(req.age.is_empty());
    }

    #[test]
    fn non_scalar_age_is_rejected() {
        let parsed = serde_json::from_value::<RegisterVisitReq>(serde_json::json!({ "age": [52] }));
        assert!(parsed.is_err());
    }

    #[test]
    fn export_window_requires_both_dates() {
        let err = ExportQuery {
            from: Some("2026-01-01".into()),
            to: None,
        }
        .window()
        .unwrap_err();
        assert_eq!(err.to_string(), "from and to date params required");

        let err = ExportQuery {
            from: Some("2026-01-01".into()),
            to: Some("01/02/2026".into()),
        }
        .window()
        .unwrap_err();
        assert_eq!(err.to_string(), "to must be a date (YYYY-MM-DD)");

        let window = ExportQuery {
            from: Some("2026-01-01".into()),
            to: Some("2026-01-31".into()),
        }
        .window()
        .unwrap();
        assert_eq!(window.to, NaiveDate::from_ymd_opt(2026, 1, 31).unwrap());
    }

    #[test]
    fn error_body_omits_unset_fields() {
        let body = serde_json::to_value(ErrorRes::new("Invalid token")).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Invalid token" }));
    }
}
