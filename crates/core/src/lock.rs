//! Record lock state machine.
//!
//! Lockable records (morphology, lab acceptance, lab results) are either `Unlocked` or `Locked`.
//! A record with no row yet is implicitly unlocked. Any accepted save leaves the record locked;
//! only an administrator may write to a locked record or unlock it.
//!
//! ```text
//!  (no row) --save--> Locked --unlock(admin)--> Unlocked --save--> Locked
//!                       |  ^
//!                       +--+ save(admin): content replaced, provenance kept
//! ```
//!
//! The transition functions here are pure. Store backends evaluate them against the row as it
//! exists at write time, inside the same atomic operation that persists the result, so two
//! concurrent saves to one key can never blend lock metadata from different rows.

use crate::access::Role;
use crate::labs::LabKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lock fields persisted alongside a lockable record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockState {
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<Role>,
}

/// Whether a record kind tracks who locked it and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// `locked_at`/`locked_by` are stamped on every transition into `Locked`.
    Stamped,
    /// Only the flag is tracked.
    FlagOnly,
}

/// The table an unlock or lock failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTable {
    Morphology,
    LabAcceptance,
    LabResults,
}

impl LockTable {
    pub fn as_str(self) -> &'static str {
        match self {
            LockTable::Morphology => "morphology",
            LockTable::LabAcceptance => "lab_acceptance",
            LockTable::LabResults => "lab_results",
        }
    }

    pub fn provenance(self) -> Provenance {
        match self {
            LockTable::Morphology => Provenance::FlagOnly,
            LockTable::LabAcceptance | LockTable::LabResults => Provenance::Stamped,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "morphology" => Some(LockTable::Morphology),
            "lab_acceptance" => Some(LockTable::LabAcceptance),
            "lab_results" => Some(LockTable::LabResults),
            _ => None,
        }
    }
}

/// One lockable record: a table plus, for lab tables, the discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTarget {
    pub table: LockTable,
    pub lab: Option<LabKind>,
}

impl LockTarget {
    pub fn morphology() -> Self {
        Self {
            table: LockTable::Morphology,
            lab: None,
        }
    }

    pub fn acceptance(lab: LabKind) -> Self {
        Self {
            table: LockTable::LabAcceptance,
            lab: Some(lab),
        }
    }

    pub fn results(lab: LabKind) -> Self {
        Self {
            table: LockTable::LabResults,
            lab: Some(lab),
        }
    }

    /// Human-readable name used in caller-facing messages.
    pub fn describe(&self) -> String {
        match (self.table, self.lab) {
            (LockTable::Morphology, _) => "Morphology".to_string(),
            (LockTable::LabAcceptance, Some(lab)) => format!("{} acceptance", lab.label()),
            (LockTable::LabResults, Some(lab)) => format!("{} results", lab.label()),
            (LockTable::LabAcceptance, None) => "Acceptance".to_string(),
            (LockTable::LabResults, None) => "Results".to_string(),
        }
    }
}

/// Who is saving, and when.
#[derive(Debug, Clone, Copy)]
pub struct SaveIntent {
    pub actor: Role,
    pub at: DateTime<Utc>,
}

/// A non-administrator attempted to write a locked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRejected;

impl LockState {
    /// Lock state after a save, evaluated against the row present at write time.
    ///
    /// # Errors
    ///
    /// Returns [`LockRejected`] when `prior` is locked and the actor is not an administrator.
    pub fn after_save(
        prior: Option<&LockState>,
        intent: &SaveIntent,
        provenance: Provenance,
    ) -> Result<LockState, LockRejected> {
        let fresh = || match provenance {
            Provenance::Stamped => LockState {
                locked: true,
                locked_at: Some(intent.at),
                locked_by: Some(intent.actor),
            },
            Provenance::FlagOnly => LockState {
                locked: true,
                locked_at: None,
                locked_by: None,
            },
        };

        match prior {
            None => Ok(fresh()),
            Some(prior) if prior.locked => {
                if intent.actor.is_admin() {
                    Ok(prior.clone())
                } else {
                    Err(LockRejected)
                }
            }
            Some(_) => Ok(fresh()),
        }
    }

    /// Lock state after an administrator unlock. Provenance of the previous lock is retained
    /// until the next save re-stamps it.
    pub fn after_unlock(&self) -> LockState {
        LockState {
            locked: false,
            ..self.clone()
        }
    }

    /// Whether `role` may currently write a record in this state.
    pub fn admits(&self, role: Role) -> bool {
        !self.locked || role.is_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn intent(actor: Role, hour: u32) -> SaveIntent {
        SaveIntent {
            actor,
            at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn first_save_locks_with_provenance() {
        let state = LockState::after_save(None, &intent(Role::Fish, 9), Provenance::Stamped)
            .expect("first save accepted");
        assert!(state.locked);
        assert_eq!(state.locked_by, Some(Role::Fish));
        assert_eq!(state.locked_at, Some(intent(Role::Fish, 9).at));
    }

    #[test]
    fn flag_only_records_never_stamp() {
        let state = LockState::after_save(None, &intent(Role::Resident, 9), Provenance::FlagOnly)
            .expect("first save accepted");
        assert!(state.locked);
        assert_eq!(state.locked_at, None);
        assert_eq!(state.locked_by, None);
    }

    #[test]
    fn locked_record_rejects_non_admin() {
        let locked = LockState::after_save(None, &intent(Role::Fish, 9), Provenance::Stamped)
            .unwrap();
        assert_eq!(
            LockState::after_save(Some(&locked), &intent(Role::Fish, 10), Provenance::Stamped),
            Err(LockRejected)
        );
        assert!(!locked.admits(Role::Fish));
        assert!(locked.admits(Role::Admin));
    }

    #[test]
    fn admin_save_preserves_provenance() {
        let locked = LockState::after_save(None, &intent(Role::Fish, 9), Provenance::Stamped)
            .unwrap();
        let after = LockState::after_save(Some(&locked), &intent(Role::Admin, 11), Provenance::Stamped)
            .expect("admin may write");
        assert_eq!(after, locked);
    }

    #[test]
    fn resave_after_unlock_restamps() {
        let locked = LockState::after_save(None, &intent(Role::Fish, 9), Provenance::Stamped)
            .unwrap();
        let unlocked = locked.after_unlock();
        assert!(!unlocked.locked);
        assert_eq!(unlocked.locked_by, Some(Role::Fish));

        let relocked =
            LockState::after_save(Some(&unlocked), &intent(Role::Admin, 12), Provenance::Stamped)
                .expect("unlocked record accepts save");
        assert!(relocked.locked);
        assert_eq!(relocked.locked_by, Some(Role::Admin));
        assert_eq!(relocked.locked_at, Some(intent(Role::Admin, 12).at));
    }

    #[test]
    fn lock_table_round_trips_its_name() {
        for table in [
            LockTable::Morphology,
            LockTable::LabAcceptance,
            LockTable::LabResults,
        ] {
            assert_eq!(LockTable::parse(table.as_str()), Some(table));
        }
    }
}
