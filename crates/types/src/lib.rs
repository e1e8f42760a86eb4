//! # PRISM Types
//!
//! Validated scalar types shared by every PRISM crate.
//!
//! A value of one of these types has already passed its syntactic check, so downstream code
//! never re-validates identifiers or required free text.

use std::fmt;

/// Length of a hospital record number.
pub const RECORD_NUMBER_LEN: usize = 12;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
}

/// Errors raised when parsing a visit identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("CR number is required")]
    MissingRecordNumber,
    #[error("CR number must be exactly 12 digits")]
    MalformedRecordNumber,
    #[error("Lab ID is required")]
    MissingVisitId,
    #[error("Lab ID format invalid (expected A_100_2026 or P_100_2026)")]
    MalformedVisitId,
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// Returns `Err(TextError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Subject identifier shared by every visit of one patient.
///
/// Always exactly [`RECORD_NUMBER_LEN`] ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordNumber(String);

impl RecordNumber {
    pub fn parse(input: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let input = input.as_ref().trim();
        if input.is_empty() {
            return Err(IdentifierError::MissingRecordNumber);
        }
        if input.len() != RECORD_NUMBER_LEN || !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentifierError::MalformedRecordNumber);
        }
        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Specimen category encoded as the first segment of a [`VisitId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitCategory {
    /// `A_…` visits.
    Adult,
    /// `P_…` visits.
    Paediatric,
}

/// Identifier of one specimen/encounter: `<A|P>_<sequence>_<year>`, e.g. `A_100_2026`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VisitId(String);

impl VisitId {
    pub fn parse(input: impl AsRef<str>) -> Result<Self, IdentifierError> {
        let input = input.as_ref().trim();
        if input.is_empty() {
            return Err(IdentifierError::MissingVisitId);
        }

        let mut parts = input.split('_');
        let (Some(prefix), Some(sequence), Some(year), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdentifierError::MalformedVisitId);
        };

        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !matches!(prefix, "A" | "P") || !digits(sequence) || year.len() != 4 || !digits(year) {
            return Err(IdentifierError::MalformedVisitId);
        }

        Ok(Self(input.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> VisitCategory {
        if self.0.starts_with('P') {
            VisitCategory::Paediatric
        } else {
            VisitCategory::Adult
        }
    }

    /// Four-digit year segment.
    pub fn year(&self) -> &str {
        &self.0[self.0.len() - 4..]
    }
}

macro_rules! string_newtype_impls {
    ($ty:ident, $ctor:path) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $ctor(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

string_newtype_impls!(NonEmptyText, NonEmptyText::new);
string_newtype_impls!(RecordNumber, RecordNumber::parse);
string_newtype_impls!(VisitId, VisitId::parse);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_and_rejects_blank() {
        assert_eq!(NonEmptyText::new("  Asha ").unwrap().as_str(), "Asha");
        assert_eq!(NonEmptyText::new("   "), Err(TextError::Empty));
    }

    #[test]
    fn record_number_requires_twelve_digits() {
        assert!(RecordNumber::parse("000000000001").is_ok());
        assert_eq!(
            RecordNumber::parse(""),
            Err(IdentifierError::MissingRecordNumber)
        );
        assert_eq!(
            RecordNumber::parse("12345"),
            Err(IdentifierError::MalformedRecordNumber)
        );
        assert_eq!(
            RecordNumber::parse("00000000000a"),
            Err(IdentifierError::MalformedRecordNumber)
        );
    }

    #[test]
    fn visit_id_accepts_structured_ids() {
        let id = VisitId::parse("P_42_2025").expect("valid visit id");
        assert_eq!(id.category(), VisitCategory::Paediatric);
        assert_eq!(id.year(), "2025");
        assert!(VisitId::parse("A_100_2026").is_ok());
    }

    #[test]
    fn visit_id_rejects_malformed_ids() {
        for bad in ["B_100_2026", "A__2026", "A_100_26", "A_100_2026_1", "A-100-2026", "a_1_2026"] {
            assert_eq!(
                VisitId::parse(bad),
                Err(IdentifierError::MalformedVisitId),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn deserialize_validates() {
        let ok: RecordNumber = serde_json::from_str("\"000000000001\"").unwrap();
        assert_eq!(ok.as_str(), "000000000001");
        assert!(serde_json::from_str::<VisitId>("\"nope\"").is_err());
    }
}
