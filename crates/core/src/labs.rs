//! Lab discipline catalogue.
//!
//! Static lookup data: the fixed set of lab disciplines, the panels each one offers, and the
//! payment categories accepted on a test order.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A diagnostic lab discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabKind {
    Fish,
    Fcm,
    Rtpcr,
    Ngsh12,
    Ngsh9,
    Tcr,
}

impl LabKind {
    pub const ALL: [LabKind; 6] = [
        LabKind::Fish,
        LabKind::Fcm,
        LabKind::Rtpcr,
        LabKind::Ngsh12,
        LabKind::Ngsh9,
        LabKind::Tcr,
    ];

    /// Identifier used in routes, tokens and storage.
    pub fn as_str(self) -> &'static str {
        match self {
            LabKind::Fish => "fish",
            LabKind::Fcm => "fcm",
            LabKind::Rtpcr => "rtpcr",
            LabKind::Ngsh12 => "ngsh12",
            LabKind::Ngsh9 => "ngsh9",
            LabKind::Tcr => "tcr",
        }
    }

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            LabKind::Fish => "FISH",
            LabKind::Fcm => "FCM",
            LabKind::Rtpcr => "RT-PCR",
            LabKind::Ngsh12 => "NGS-H12",
            LabKind::Ngsh9 => "NGS-H9",
            LabKind::Tcr => "TCR",
        }
    }

    pub fn panels(self) -> &'static [&'static str] {
        match self {
            LabKind::Fish => &[
                "ALL",
                "MDS",
                "MDS-Extended",
                "Acute Leuk-NOS",
                "CML/MPN",
                "JMML",
                "CLL",
                "CLL+CCND1",
                "Lymphoma-not CLL",
                "HES",
                "T-PLL",
                "MM",
                "Other",
            ],
            LabKind::Fcm => &[
                "Acute Leuk",
                "CLPD",
                "MM-Diagnosis",
                "MM-MRD",
                "B-ALL-MRD",
                "T-ALL-MRD",
                "MDS",
                "B & T Tubes Acute Leuk",
                "CLPD-MRD",
                "Mast Cell Tube",
                "Neuroblastoma",
                "Other",
            ],
            LabKind::Rtpcr => &[
                "Acute Leukemia Panel",
                "BCR-ABL1",
                "JAK2",
                "CML/MPN Panel",
                "MYD88",
                "BRAF",
                "ddPCR-MRD",
                "qPCR-MRD",
                "Other",
            ],
            LabKind::Ngsh12 => &[
                "Myeloid Mutation Panel",
                "Lymphoid Mutation Panel",
                "TP53 Only",
                "Other",
            ],
            LabKind::Ngsh9 => &[
                "RNA Fusion Panel",
                "IBMFS Panel",
                "WES with CNV",
                "TCR by NGS",
                "T-ALL Somatic",
                "Other",
            ],
            LabKind::Tcr => &["TCR Beta", "TCR Gamma", "Other"],
        }
    }

    pub fn offers_panel(self, panel: &str) -> bool {
        self.panels().contains(&panel)
    }
}

impl std::fmt::Display for LabKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LabKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LabKind::ALL
            .into_iter()
            .find(|lab| lab.as_str() == s)
            .ok_or_else(|| CoreError::invalid(format!("Invalid lab: {s}")))
    }
}

/// Payment categories accepted on a test order.
pub const PAYMENT_CATEGORIES: &[&str] = &[
    "✅ Paid",
    "Ayushman",
    "Poor Free",
    "JSSK",
    "HIMCARE",
    "❌ Not Paid",
    "PP",
    "HP",
    "OK",
];

/// Checks a comma-separated panel list against the lab's catalogue.
///
/// Blank entries are ignored so that an empty order is accepted.
pub fn validate_panels(lab: LabKind, panels: &str) -> CoreResult<()> {
    let unknown: Vec<String> = panels
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter(|p| !lab.offers_panel(p))
        .map(|p| format!("Unknown {} panel: {p}", lab.label()))
        .collect();

    match crate::ValidationErrors::from_messages(unknown) {
        Some(errors) => Err(CoreError::Validation(errors)),
        None => Ok(()),
    }
}

pub fn validate_payment(payment: &str) -> CoreResult<()> {
    let payment = payment.trim();
    if payment.is_empty() || PAYMENT_CATEGORIES.contains(&payment) {
        Ok(())
    } else {
        Err(CoreError::invalid(format!("Invalid payment category: {payment}")))
    }
}
