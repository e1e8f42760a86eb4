//! Visit registration and record-number level reads.

use super::shared::{snapshot, Registry};
use crate::access::{authorize, Category, Identity};
use crate::aggregate::{self, VisitBundle};
use crate::audit::{AuditAction, AuditEntry};
use crate::error::CoreResult;
use crate::identity::RegistrationForm;
use crate::records::Visit;
use prism_types::{RecordNumber, VisitId};
use serde::Serialize;

/// Outcome of a registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub visit: Visit,
    /// The record number already had visits under other visit ids.
    pub is_new_visit: bool,
    pub other_visit_ids: Vec<VisitId>,
}

#[derive(Clone)]
pub struct VisitService {
    registry: Registry,
}

impl VisitService {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Register a visit, or replace every field of an existing one with the same key.
    pub async fn register(
        &self,
        identity: &Identity,
        form: RegistrationForm,
    ) -> CoreResult<Registration> {
        authorize(identity, &[Category::VisitWrite])?;
        let visit = form.validate(crate::now())?;
        let store = self.registry.store();

        let existing = store.visits_for_record(&visit.record_number).await?;
        let is_new_visit =
            !existing.is_empty() && !existing.iter().any(|v| v.visit_id == visit.visit_id);
        let other_visit_ids: Vec<VisitId> = existing
            .into_iter()
            .map(|v| v.visit_id)
            .filter(|id| *id != visit.visit_id)
            .collect();

        let upsert = store.upsert_visit(&visit).await?;
        let action = if upsert.previous.is_some() {
            AuditAction::UpdateRegistration
        } else {
            AuditAction::Register
        };
        tracing::info!("{} {} by {}", action.as_str(), upsert.saved.key(), identity.role());

        self.registry
            .audit()
            .record(
                AuditEntry::new(identity, action, upsert.saved.record_number.clone())
                    .visit(upsert.saved.visit_id.clone())
                    .old_snapshot(upsert.previous.as_ref().map(snapshot))
                    .new_snapshot(snapshot(&upsert.saved)),
            )
            .await;

        Ok(Registration {
            visit: upsert.saved,
            is_new_visit,
            other_visit_ids,
        })
    }

    pub async fn load_all(&self, identity: &Identity, record_number: &str) -> CoreResult<VisitBundle> {
        authorize(identity, &[Category::VisitWrite, Category::ReadOnly])?;
        let record_number = RecordNumber::parse(record_number)?;
        aggregate::load_all(self.registry.store(), &record_number).await
    }

    /// Any authenticated identity may search.
    pub async fn search(&self, identity: &Identity, query: &str) -> CoreResult<Vec<Visit>> {
        authorize(identity, &[])?;
        aggregate::search(
            self.registry.store(),
            query,
            self.registry.cfg().search_limit(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::error::CoreError;
    use crate::repositories::shared::fixtures::{as_role, form, register, registry};

    #[tokio::test]
    async fn registered_visit_loads_back_verbatim() {
        let registry = registry();
        let service = VisitService::new(registry.clone());
        let mut input = form("000000000001", "A_100_2026", "2026-01-05");
        input.suspicion = Some("CML".into());
        input.tlc = Some("12000".into());

        let registration = service
            .register(&as_role(Role::Resident), input)
            .await
            .unwrap();
        assert!(!registration.is_new_visit);
        assert!(registration.other_visit_ids.is_empty());

        let bundle = service
            .load_all(&as_role(Role::Consultant), "000000000001")
            .await
            .unwrap();
        assert_eq!(bundle.visits, vec![registration.visit]);
        assert_eq!(bundle.active_visit_id.as_str(), "A_100_2026");
    }

    #[tokio::test]
    async fn second_visit_is_flagged_new() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;

        let registration = VisitService::new(registry.clone())
            .register(
                &as_role(Role::Admin),
                form("000000000001", "A_140_2026", "2026-02-01"),
            )
            .await
            .unwrap();
        assert!(registration.is_new_visit);
        assert_eq!(registration.other_visit_ids[0].as_str(), "A_100_2026");
    }

    #[tokio::test]
    async fn re_registration_replaces_fields_and_audits_update() {
        let registry = registry();
        register(&registry, "000000000001", "A_100_2026", "2026-01-05").await;

        let mut changed = form("000000000001", "A_100_2026", "2026-01-06");
        changed.name = "Ravi K".into();
        let registration = VisitService::new(registry.clone())
            .register(&as_role(Role::Resident), changed)
            .await
            .unwrap();
        assert!(!registration.is_new_visit);
        assert_eq!(registration.visit.name.as_str(), "Ravi K");

        let history = registry
            .audit()
            .history(&registration.visit.record_number, 10)
            .await
            .unwrap();
        assert_eq!(history[0].action, AuditAction::UpdateRegistration);
        assert!(history[0].old_fingerprint.is_some());
        assert_eq!(history[1].action, AuditAction::Register);
    }

    #[tokio::test]
    async fn lab_roles_cannot_register_or_load() {
        let registry = registry();
        let service = VisitService::new(registry);
        let err = service
            .register(
                &as_role(Role::Fish),
                form("000000000001", "A_100_2026", "2026-01-05"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));

        let err = service
            .load_all(&as_role(Role::Tcr), "000000000001")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));
    }

    #[tokio::test]
    async fn search_is_bounded_by_config() {
        let registry = registry();
        for n in 1..=25 {
            register(&registry, &format!("{n:012}"), &format!("A_{n}_2026"), "2026-01-05").await;
        }
        let hits = VisitService::new(registry)
            .search(&as_role(Role::Fish), "ravi")
            .await
            .unwrap();
        assert_eq!(hits.len(), 20);
    }
}
