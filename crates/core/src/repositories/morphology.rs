//! Morphology reports.
//!
//! One free-text report per visit. The first save locks the report (flag only, no provenance);
//! afterwards only an administrator may edit or unlock it.

use super::shared::{locked, snapshot, unlock_record, Registry};
use crate::access::{authorize, Category, Identity};
use crate::audit::{AuditAction, AuditEntry, UnlockEvent};
use crate::error::CoreResult;
use crate::lock::{LockTarget, SaveIntent};
use crate::records::{Morphology, VisitKey};
use crate::store::SaveOutcome;
use crate::workflow::{self, Stage};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MorphologyForm {
    pub record_number: String,
    pub visit_id: String,
    pub report: String,
}

#[derive(Clone)]
pub struct MorphologyService {
    registry: Registry,
}

impl MorphologyService {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub async fn save(&self, identity: &Identity, form: MorphologyForm) -> CoreResult<Morphology> {
        authorize(identity, &[Category::MorphologyWrite])?;
        let key = VisitKey::parse(&form.record_number, &form.visit_id)?;
        let store = self.registry.store();
        let target = LockTarget::morphology();

        workflow::enforce(store, Stage::Morphology, &key).await?;

        if let Some(existing) = store.find_morphology(&key).await? {
            if !existing.lock.admits(identity.role()) {
                return Err(locked(target, &key));
            }
        }

        let intent = SaveIntent {
            actor: identity.role(),
            at: crate::now(),
        };
        let SaveOutcome::Saved { previous, current } =
            store.save_morphology(&key, &form.report, &intent).await?
        else {
            return Err(locked(target, &key));
        };
        tracing::info!("morphology saved for {} by {}", key, identity.role());

        self.registry
            .audit()
            .record(
                AuditEntry::new(identity, AuditAction::SaveMorphology, key.record_number)
                    .visit(key.visit_id)
                    .old_snapshot(previous.as_ref().map(snapshot))
                    .new_snapshot(snapshot(&current)),
            )
            .await;

        Ok(current)
    }

    pub async fn unlock(
        &self,
        identity: &Identity,
        record_number: &str,
        visit_id: &str,
        reason: &str,
    ) -> CoreResult<UnlockEvent> {
        unlock_record(
            &self.registry,
            identity,
            LockTarget::morphology(),
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
    use crate::access::Role;
    use crate::error::CoreError;
    use crate::repositories::shared::fixtures::{as_role, register, registry};
    use crate::workflow::Stage;

    fn report(text: &str) -> MorphologyForm {
        MorphologyForm {
            record_number: "000000000001".into(),
            visit_id: "A_100_2026".into(),
            report: text.into(),
        }
    }

    #[tokio::test]
    async fn morphology_requires_registration() {
        let service = MorphologyService::new(registry());
        let err = service
            .save(&as_role(Role::Resident), report("hypercellular"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::PrerequisiteMissing(Stage::Registration)
        ));
    }

    #[tokio::test]
    async fn first_save_locks_without_provenance() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;
        let service = MorphologyService::new(registry);

        let saved = service
            .save(&as_role(Role::Resident), report("hypercellular"))
            .await
            .unwrap();
        assert!(saved.lock.locked);
        assert_eq!(saved.lock.locked_by, None);

        let err = service
            .save(&as_role(Role::Resident), report("revised"))
            .await
            .unwrap_err();
        assert!(err.is_locked());
        assert_eq!(
            err.to_string(),
            "Morphology for Lab ID A_100_2026 is locked. Contact admin to unlock."
        );

        let edited = service
            .save(&as_role(Role::Admin), report("admin edit"))
            .await
            .unwrap();
        assert_eq!(edited.report, "admin edit");
        assert!(edited.lock.locked);
    }

    #[tokio::test]
    async fn unlock_allows_one_more_save() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;
        let service = MorphologyService::new(registry);
        service
            .save(&as_role(Role::Resident), report("first"))
            .await
            .unwrap();

        let err = service
            .unlock(&as_role(Role::Resident), "000000000001", "A_100_2026", "typo")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));

        service
            .unlock(&as_role(Role::Admin), "000000000001", "A_100_2026", "typo")
            .await
            .unwrap();
        service
            .save(&as_role(Role::Resident), report("second"))
            .await
            .unwrap();
        assert!(service
            .save(&as_role(Role::Resident), report("third"))
            .await
            .unwrap_err()
            .is_locked());
    }
}
