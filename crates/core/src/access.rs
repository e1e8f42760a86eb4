//! Role-based access policy.
//!
//! Every caller carries exactly one [`Role`]. Each role maps to a fixed set of record
//! [`Category`] permissions, and lab roles additionally own one lab discipline. Both tables are
//! static and never change at runtime.

use crate::labs::LabKind;
use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Registers visits, writes morphology reports and test orders.
    Resident,
    Fish,
    Fcm,
    Rtpcr,
    Ngsh12,
    Ngsh9,
    Tcr,
    /// Review-only access.
    Consultant,
    Admin,
}

/// Record categories a role may be permitted to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    VisitWrite,
    MorphologyWrite,
    OrderWrite,
    AcceptanceWrite,
    ResultsWrite,
    ReadOnly,
    Admin,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::Resident,
        Role::Fish,
        Role::Fcm,
        Role::Rtpcr,
        Role::Ngsh12,
        Role::Ngsh9,
        Role::Tcr,
        Role::Consultant,
        Role::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Fish => "fish",
            Role::Fcm => "fcm",
            Role::Rtpcr => "rtpcr",
            Role::Ngsh12 => "ngsh12",
            Role::Ngsh9 => "ngsh9",
            Role::Tcr => "tcr",
            Role::Consultant => "consultant",
            Role::Admin => "admin",
        }
    }

    pub fn categories(self) -> &'static [Category] {
        use Category::*;
        match self {
            Role::Resident => &[VisitWrite, MorphologyWrite, OrderWrite],
            Role::Fish | Role::Fcm | Role::Rtpcr | Role::Ngsh12 | Role::Ngsh9 | Role::Tcr => {
                &[AcceptanceWrite, ResultsWrite]
            }
            Role::Consultant => &[ReadOnly],
            Role::Admin => &[
                VisitWrite,
                MorphologyWrite,
                OrderWrite,
                AcceptanceWrite,
                ResultsWrite,
                ReadOnly,
                Admin,
            ],
        }
    }

    /// The lab discipline a lab role works in.
    pub fn owned_lab(self) -> Option<LabKind> {
        match self {
            Role::Fish => Some(LabKind::Fish),
            Role::Fcm => Some(LabKind::Fcm),
            Role::Rtpcr => Some(LabKind::Rtpcr),
            Role::Ngsh12 => Some(LabKind::Ngsh12),
            Role::Ngsh9 => Some(LabKind::Ngsh9),
            Role::Tcr => Some(LabKind::Tcr),
            Role::Resident | Role::Consultant | Role::Admin => None,
        }
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| CoreError::invalid("Invalid role"))
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    role: Role,
    origin: Option<String>,
}

impl Identity {
    pub fn new(role: Role) -> Self {
        Self { role, origin: None }
    }

    /// Attach the network origin recorded in audit entries.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Why an authenticated identity was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("Role '{role}' does not have permission for this action")]
    MissingCategory { role: Role },
    #[error("Role '{role}' can only write {} records", owned.label())]
    LabScope {
        role: Role,
        owned: LabKind,
        requested: LabKind,
    },
}

/// Allows the identity when its permitted categories intersect `required`.
///
/// An empty `required` set admits any authenticated identity.
pub fn authorize(identity: &Identity, required: &[Category]) -> CoreResult<()> {
    if required.is_empty() {
        return Ok(());
    }

    let permitted = identity.role.categories();
    if required.iter().any(|c| permitted.contains(c)) {
        Ok(())
    } else {
        Err(CoreError::Authorization(AccessDenied::MissingCategory {
            role: identity.role,
        }))
    }
}

/// Category check followed by the lab-scope check used for acceptance and results writes.
pub fn authorize_lab_write(
    identity: &Identity,
    required: &[Category],
    lab: LabKind,
) -> CoreResult<()> {
    authorize(identity, required)?;

    if identity.is_admin() {
        return Ok(());
    }
    match identity.role.owned_lab() {
        Some(owned) if owned != lab => Err(CoreError::Authorization(AccessDenied::LabScope {
            role: identity.role,
            owned,
            requested: lab,
        })),
        _ => Ok(()),
    }
}
