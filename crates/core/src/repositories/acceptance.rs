//! Lab acceptance.
//!
//! Save flow: category and lab-scope check, visit gate, lock fast path, accession uniqueness,
//! then the atomic lock-aware store write. The store re-evaluates the lock and the accession
//! claim at write time, so the earlier checks only shorten the common rejection paths.

use super::shared::{locked, snapshot, unlock_record, Registry};
use crate::access::{authorize_lab_write, Category, Identity};
use crate::accession;
use crate::audit::{AuditAction, AuditEntry, UnlockEvent};
use crate::error::CoreResult;
use crate::labs::LabKind;
use crate::lock::{LockTarget, SaveIntent};
use crate::records::{AcceptanceContent, LabAcceptance, VisitKey};
use crate::store::SaveOutcome;
use crate::workflow::{self, Stage};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AcceptanceForm {
    pub record_number: String,
    pub visit_id: String,
    /// Accession id; blank means none.
    pub accession: Option<String>,
    pub panel_status: Option<serde_json::Value>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct AcceptanceService {
    registry: Registry,
}

impl AcceptanceService {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub async fn save(
        &self,
        identity: &Identity,
        lab: LabKind,
        form: AcceptanceForm,
    ) -> CoreResult<LabAcceptance> {
        authorize_lab_write(identity, &[Category::AcceptanceWrite], lab)?;
        let key = VisitKey::parse(&form.record_number, &form.visit_id)?;
        let lab_key = key.lab(lab);
        let target = LockTarget::acceptance(lab);
        let store = self.registry.store();

        workflow::enforce(store, Stage::Acceptance(lab), &key).await?;

        if let Some(existing) = store.find_acceptance(&lab_key).await? {
            if !existing.lock.admits(identity.role()) {
                return Err(locked(target, &key));
            }
        }

        let content = AcceptanceContent {
            accession: accession::normalize(form.accession),
            panel_status: form
                .panel_status
                .unwrap_or_else(|| serde_json::json!({})),
            notes: form.notes.unwrap_or_default(),
        };
        accession::ensure_unclaimed(store, lab, content.accession.as_deref(), &key).await?;

        let intent = SaveIntent {
            actor: identity.role(),
            at: crate::now(),
        };
        let outcome = store
            .save_acceptance(&lab_key, &content, &intent)
            .await
            .map_err(|e| accession::conflict_from_store(e, lab, content.accession.as_deref()))?;
        let SaveOutcome::Saved { previous, current } = outcome else {
            return Err(locked(target, &key));
        };
        tracing::info!("{} acceptance saved for {} by {}", lab, key, identity.role());

        self.registry
            .audit()
            .record(
                AuditEntry::new(identity, AuditAction::SaveAcceptance, key.record_number)
                    .visit(key.visit_id)
                    .lab(lab)
                    .old_snapshot(previous.as_ref().map(snapshot))
                    .new_snapshot(snapshot(&current)),
            )
            .await;

        Ok(current)
    }

    pub async fn unlock(
        &self,
        identity: &Identity,
        lab: LabKind,
        record_number: &str,
        visit_id: &str,
        reason: &str,
    ) -> CoreResult<UnlockEvent> {
        unlock_record(
            &self.registry,
            identity,
            LockTarget::acceptance(lab),
            record_number,
            visit_id,
            reason,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessDenied, Role};
    use crate::error::CoreError;
    use crate::repositories::orders::{OrderForm, OrderService};
    use crate::config::CoreConfig;
    use crate::repositories::shared::fixtures::{as_role, register, registry, BrokenSink};
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    fn accept(cr: &str, labid: &str, accession: &str) -> AcceptanceForm {
        AcceptanceForm {
            record_number: cr.into(),
            visit_id: labid.into(),
            accession: Some(accession.into()),
            panel_status: Some(serde_json::json!({ "CLL": "accepted" })),
            notes: None,
        }
    }

    #[tokio::test]
    async fn duplicate_accession_names_the_first_visit() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;
        register(&registry, "000000000002", "A_101_2026", "2026-01-05").await;
        OrderService::new(registry.clone())
            .save(
                &as_role(Role::Resident),
                LabKind::Fish,
                OrderForm {
                    record_number: "000000000001".into(),
                    visit_id: "A_100_2026".into(),
                    panels: "CLL".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let service = AcceptanceService::new(registry);
        let saved = service
            .save(
                &as_role(Role::Fish),
                LabKind::Fish,
                accept("000000000001", "A_100_2026", "X1"),
            )
            .await
            .unwrap();
        assert!(saved.lock.locked);
        assert_eq!(saved.lock.locked_by, Some(Role::Fish));

        let err = service
            .save(
                &as_role(Role::Fish),
                LabKind::Fish,
                accept("000000000002", "A_101_2026", "X1"),
            )
            .await
            .unwrap_err();
        let CoreError::Conflict { owner, .. } = err else {
            panic!("expected conflict, got {err:?}");
        };
        assert_eq!(owner.as_str(), "000000000001");
    }

    #[tokio::test]
    async fn locked_acceptance_rejects_lab_role_and_keeps_content() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;
        let service = AcceptanceService::new(registry.clone());
        let first = service
            .save(
                &as_role(Role::Fcm),
                LabKind::Fcm,
                accept("000000000001", "A_100_2026", "F-9"),
            )
            .await
            .unwrap();

        let mut changed = accept("000000000001", "A_100_2026", "F-9");
        changed.notes = Some("resubmitted".into());
        let err = service
            .save(&as_role(Role::Fcm), LabKind::Fcm, changed)
            .await
            .unwrap_err();
        assert!(err.is_locked());
        assert_eq!(
            err.to_string(),
            "FCM acceptance for Lab ID A_100_2026 is locked. Contact admin to unlock."
        );

        let key = VisitKey::parse("000000000001", "A_100_2026").unwrap();
        let stored = registry
            .store()
            .find_acceptance(&key.lab(LabKind::Fcm))
            .await
            .unwrap();
        assert_eq!(stored, Some(first));
    }

    #[tokio::test]
    async fn admin_edit_preserves_lock_provenance() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;
        let service = AcceptanceService::new(registry);
        let first = service
            .save(
                &as_role(Role::Fish),
                LabKind::Fish,
                accept("000000000001", "A_100_2026", "X1"),
            )
            .await
            .unwrap();

        // Re-saving its own accession id never conflicts.
        let edited = service
            .save(
                &as_role(Role::Admin),
                LabKind::Fish,
                accept("000000000001", "A_100_2026", "X1"),
            )
            .await
            .unwrap();
        assert_eq!(edited.lock, first.lock);
    }

    #[tokio::test]
    async fn lab_role_is_confined_to_its_lab() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;
        let err = AcceptanceService::new(registry)
            .save(
                &as_role(Role::Fish),
                LabKind::Fcm,
                accept("000000000001", "A_100_2026", "X1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Authorization(AccessDenied::LabScope { .. })
        ));
    }

    #[tokio::test]
    async fn unlock_records_exactly_one_event() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;
        let service = AcceptanceService::new(registry.clone());

        let err = service
            .unlock(&as_role(Role::Admin), LabKind::Fish, "000000000001", "A_100_2026", "")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(registry.store().unlock_history(10).await.unwrap().is_empty());

        service
            .save(
                &as_role(Role::Fish),
                LabKind::Fish,
                accept("000000000001", "A_100_2026", "X1"),
            )
            .await
            .unwrap();
        let event = service
            .unlock(&as_role(Role::Admin), LabKind::Fish, "000000000001", "A_100_2026", "")
            .await
            .unwrap();
        assert_eq!(event.reason, "");
        assert_eq!(registry.store().unlock_history(10).await.unwrap(), vec![event]);

        // Exactly one subsequent lab-role save goes through.
        service
            .save(
                &as_role(Role::Fish),
                LabKind::Fish,
                accept("000000000001", "A_100_2026", "X1"),
            )
            .await
            .unwrap();
        assert!(service
            .save(
                &as_role(Role::Fish),
                LabKind::Fish,
                accept("000000000001", "A_100_2026", "X1"),
            )
            .await
            .unwrap_err()
            .is_locked());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_saves_lock_exactly_once() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;
        let service = AcceptanceService::new(registry.clone());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let mut form = accept("000000000001", "A_100_2026", "X1");
                    form.notes = Some(format!("attempt {i}"));
                    service.save(&as_role(Role::Fish), LabKind::Fish, form).await
                })
            })
            .collect();

        let mut saved = Vec::new();
        let mut locked = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(acceptance) => saved.push(acceptance),
                Err(err) if err.is_locked() => locked += 1,
                Err(err) => panic!("unexpected failure: {err:?}"),
            }
        }
        assert_eq!(saved.len(), 1);
        assert_eq!(locked, 31);

        let key = VisitKey::parse("000000000001", "A_100_2026").unwrap();
        let stored = registry
            .store()
            .find_acceptance(&key.lab(LabKind::Fish))
            .await
            .unwrap();
        assert_eq!(stored.as_ref(), saved.first());
    }

    #[tokio::test]
    async fn save_succeeds_when_the_audit_sink_fails() {
        let registry = Registry::new(
            Arc::new(CoreConfig::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(BrokenSink),
        );
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;

        let saved = AcceptanceService::new(registry.clone())
            .save(
                &as_role(Role::Fish),
                LabKind::Fish,
                accept("000000000001", "A_100_2026", "X1"),
            )
            .await
            .unwrap();
        assert!(saved.lock.locked);

        let key = VisitKey::parse("000000000001", "A_100_2026").unwrap();
        let stored = registry
            .store()
            .find_acceptance(&key.lab(LabKind::Fish))
            .await
            .unwrap();
        assert_eq!(stored, Some(saved));
    }
}
