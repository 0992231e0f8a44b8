//! Prescriptions written by the doctor of a medical record.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult, hospital_of, load_in_hospital};
use crate::access::{WriteAction, can_create};
use crate::models::{
    Entity, EntityKind, MedicalRecord, MedicalRecordStatus, Medicine, PrescribedMedicine,
    Prescription, RecordMeta,
};
use crate::repositories::EntityRepository;
use crate::store::{Document, document};
use crate::tenancy::{Deadline, RequestContext};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewPrescription {
    pub medical_record_id: String,
    pub medicines: Vec<PrescribedMedicine>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionPatch {
    pub medicines: Option<Vec<PrescribedMedicine>>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct PrescriptionService {
    repo: EntityRepository,
}

impl PrescriptionService {
    pub fn new(repo: EntityRepository) -> Self {
        Self { repo }
    }

    /// Prescribes for an open medical record of the calling doctor.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        request: NewPrescription,
    ) -> ServiceResult<Prescription> {
        can_create(ctx.caller(), EntityKind::Prescription)?;
        let record: MedicalRecord = self
            .repo
            .load_for_write(ctx, &request.medical_record_id, WriteAction::Update)
            .await?;

        if record.status == MedicalRecordStatus::Closed {
            return Err(ServiceError::conflict(format!(
                "medical record '{}' is closed",
                record.code()
            )));
        }
        if let Some(existing) = &record.prescription_id {
            return Err(ServiceError::conflict(format!(
                "medical record '{}' already has prescription '{existing}'",
                record.code()
            )));
        }

        let hospital = hospital_of(&record)?;
        self.validate_lines(ctx.deadline(), hospital, &request.medicines)
            .await?;

        let code = EntityKind::Prescription.new_code();
        let mut meta = RecordMeta::created(&code, ctx.caller().code()).in_hospital(hospital);
        meta.tenant_id = record.meta.tenant_id.clone();
        let prescription = Prescription {
            meta,
            medical_record_id: record.code().to_string(),
            appointment_id: record.appointment_id.clone(),
            patient_id: record.patient_id.clone(),
            doctor_id: record.doctor_id.clone(),
            medicines: request.medicines,
            notes: request.notes,
        };

        self.repo.insert(ctx, &prescription).await?;
        let linked = self
            .repo
            .update::<MedicalRecord>(
                ctx,
                record.code(),
                document(json!({
                    "prescriptionId": code,
                    "status": MedicalRecordStatus::UnderTreatment,
                })),
            )
            .await;
        if let Err(err) = linked {
            if let Err(cleanup) = self.repo.delete(ctx, EntityKind::Prescription, &code).await {
                warn!(code = %code, error = %cleanup, "Failed to remove unlinked prescription");
            }
            return Err(err.into());
        }

        info!(prescription = %code, record = record.code(), "Prescription written");
        Ok(prescription)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        code: &str,
        patch: PrescriptionPatch,
    ) -> ServiceResult<Prescription> {
        let current: Prescription = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;
        self.ensure_unbilled(ctx, &current).await?;

        let mut changes = Document::new();
        if let Some(medicines) = patch.medicines {
            self.validate_lines(ctx.deadline(), hospital_of(&current)?, &medicines)
                .await?;
            changes.insert("medicines".into(), json!(medicines));
        }
        if let Some(notes) = patch.notes {
            changes.insert("notes".into(), Value::String(notes));
        }
        if changes.is_empty() {
            return Err(ServiceError::validation("no changes supplied"));
        }
        Ok(self.repo.update(ctx, code, changes).await?)
    }

    /// Withdraws a prescription that has not been billed yet.
    pub async fn delete(&self, ctx: &RequestContext, code: &str) -> ServiceResult<()> {
        let current: Prescription = self
            .repo
            .load_for_write(ctx, code, WriteAction::Delete)
            .await?;
        self.ensure_unbilled(ctx, &current).await?;

        self.repo.delete(ctx, EntityKind::Prescription, code).await?;
        self.repo
            .update::<MedicalRecord>(
                ctx,
                &current.medical_record_id,
                document(json!({ "prescriptionId": null, "status": MedicalRecordStatus::Open })),
            )
            .await?;
        Ok(())
    }

    async fn ensure_unbilled(&self, ctx: &RequestContext, prescription: &Prescription) -> ServiceResult<()> {
        let billed = self
            .repo
            .load_by_code::<MedicalRecord>(ctx.deadline(), &prescription.medical_record_id)
            .await?
            .is_some_and(|record| record.bill_id.is_some());
        if billed {
            return Err(ServiceError::conflict(format!(
                "prescription '{}' has already been billed",
                prescription.code()
            )));
        }
        Ok(())
    }

    async fn validate_lines(
        &self,
        deadline: Deadline,
        hospital: &str,
        lines: &[PrescribedMedicine],
    ) -> ServiceResult<()> {
        if lines.is_empty() {
            return Err(ServiceError::validation("at least one medicine is required"));
        }
        let mut seen = HashSet::new();
        for line in lines {
            validate_line(line)?;
            if !seen.insert(line.medicine_id.as_str()) {
                return Err(ServiceError::validation(format!(
                    "medicine '{}' is listed more than once",
                    line.medicine_id
                )));
            }
            load_in_hospital::<Medicine>(&self.repo, deadline, hospital, &line.medicine_id).await?;
        }
        Ok(())
    }
}

fn validate_line(line: &PrescribedMedicine) -> ServiceResult<()> {
    if line.medicine_id.trim().is_empty() {
        return Err(ServiceError::validation("medicineId is required"));
    }
    if line.dosage_per_frequency == 0 {
        return Err(ServiceError::validation("dosagePerFrequency must be positive"));
    }
    if line.no_of_days == 0 {
        return Err(ServiceError::validation("noOfDays must be positive"));
    }
    if line.frequency.times_per_day() == 0 {
        return Err(ServiceError::validation(
            "frequency must include morning, afternoon or night",
        ));
    }
    Ok(())
}
