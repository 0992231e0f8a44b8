//! Patient consent, recorded by the nurse assigned to a medical record.

use serde::Deserialize;
use serde_json::{Value, json};
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult, require};
use crate::access::{AccessError, WriteAction, can_create};
use crate::models::{Consent, Entity, EntityKind, MedicalRecord, Patient, RecordMeta};
use crate::repositories::EntityRepository;
use crate::store::Document;
use crate::tenancy::RequestContext;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewConsent {
    pub medical_record_id: String,
    pub consent_type: String,
    pub granted: bool,
    /// Guardian giving consent on the patient's behalf.
    #[serde(default)]
    pub guardian_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsentPatch {
    pub granted: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct ConsentService {
    repo: EntityRepository,
}

impl ConsentService {
    pub fn new(repo: EntityRepository) -> Self {
        Self { repo }
    }

    pub async fn create(&self, ctx: &RequestContext, request: NewConsent) -> ServiceResult<Consent> {
        can_create(ctx.caller(), EntityKind::Consent)?;
        require("consentType", &request.consent_type)?;

        let caller = ctx.caller();
        let record = self
            .repo
            .load_by_code::<MedicalRecord>(ctx.deadline(), &request.medical_record_id)
            .await?
            .filter(|record| record.nurse_id == caller.code())
            .ok_or_else(|| AccessError::denied(EntityKind::MedicalRecord, &request.medical_record_id))?;

        if let Some(guardian_id) = &request.guardian_id {
            let is_guardian = self
                .repo
                .load_by_code::<Patient>(ctx.deadline(), &record.patient_id)
                .await?
                .is_some_and(|patient| patient.guardian_ids.contains(guardian_id));
            if !is_guardian {
                return Err(ServiceError::validation(format!(
                    "'{guardian_id}' is not a guardian of patient '{}'",
                    record.patient_id
                )));
            }
        }

        let code = EntityKind::Consent.new_code();
        let mut meta = RecordMeta::created(&code, caller.code());
        meta.tenant_id = record.meta.tenant_id.clone();
        meta.hospital_id = record.meta.hospital_id.clone();
        let consent = Consent {
            meta,
            medical_record_id: record.code().to_string(),
            patient_id: record.patient_id.clone(),
            guardian_id: request.guardian_id,
            consent_type: request.consent_type.trim().to_string(),
            granted: request.granted,
            notes: request.notes,
        };
        self.repo.insert(ctx, &consent).await?;
        Ok(consent)
    }

    pub async fn update(&self, ctx: &RequestContext, code: &str, patch: ConsentPatch) -> ServiceResult<Consent> {
        let mut changes = Document::new();
        if let Some(granted) = patch.granted {
            changes.insert("granted".into(), json!(granted));
        }
        if let Some(notes) = patch.notes {
            changes.insert("notes".into(), Value::String(notes));
        }
        if changes.is_empty() {
            return Err(ServiceError::validation("no changes supplied"));
        }
        let _: Consent = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;
        Ok(self.repo.update(ctx, code, changes).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cache::MemoryCache;
    use crate::models::fixtures::patient;
    use crate::models::{MedicalRecordStatus, Vitals};
    use crate::store::InMemoryStore;
    use crate::tenancy::{CallerIdentity, Tier};

    async fn setup() -> (ConsentService, EntityRepository) {
        let repo = EntityRepository::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(MemoryCache::with_capacity(16)),
            Duration::from_secs(60),
        );
        let receptionist =
            RequestContext::new(CallerIdentity::member("REC1", Tier::Receptionist, "TEN1").unwrap());
        let mut minor = patient("PAT1", "REC1", "HOS1", "TEN1");
        minor.guardian_ids = vec!["GUA1".into()];
        repo.insert(&receptionist, &minor).await.unwrap();
        repo.insert(
            &receptionist,
            &MedicalRecord {
                meta: RecordMeta::created("MED1", "REC1").in_tenant("TEN1").in_hospital("HOS1"),
                appointment_id: "APP1".into(),
                patient_id: "PAT1".into(),
                doctor_id: "DOC1".into(),
                nurse_id: "NUR1".into(),
                reason: None,
                vitals: Vitals::default(),
                diagnosis: None,
                tests: vec![],
                status: MedicalRecordStatus::Open,
                prescription_id: None,
                bill_id: None,
                test_reports: Vec::new(),
            },
        )
        .await
        .unwrap();
        (ConsentService::new(repo.clone()), repo)
    }

    fn request(guardian: Option<&str>) -> NewConsent {
        NewConsent {
            medical_record_id: "MED1".into(),
            consent_type: "Surgery".into(),
            granted: true,
            guardian_id: guardian.map(str::to_string),
            notes: None,
        }
    }

    #[tokio::test]
    async fn assigned_nurse_records_consent_readable_by_guardian() {
        let (service, repo) = setup().await;
        let nurse = RequestContext::new(CallerIdentity::member("NUR1", Tier::Nurse, "TEN1").unwrap());
        let consent = service.create(&nurse, request(Some("GUA1"))).await.unwrap();
        assert_eq!(consent.meta.hospital_id.as_deref(), Some("HOS1"));

        let guardian = RequestContext::new(CallerIdentity::member("GUA1", Tier::Guardian, "TEN1").unwrap());
        let seen: Consent = repo.fetch_by_code(&guardian, consent.code()).await.unwrap();
        assert!(seen.granted);
    }

    #[tokio::test]
    async fn unknown_guardian_is_rejected() {
        let (service, _) = setup().await;
        let nurse = RequestContext::new(CallerIdentity::member("NUR1", Tier::Nurse, "TEN1").unwrap());
        let err = service.create(&nurse, request(Some("GUA2"))).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn unassigned_nurse_is_denied() {
        let (service, _) = setup().await;
        let nurse = RequestContext::new(CallerIdentity::member("NUR2", Tier::Nurse, "TEN1").unwrap());
        let err = service.create(&nurse, request(None)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Access(ref e) if e.is_denied()));
    }
}
