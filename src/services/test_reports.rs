//! Lab test reports for the patient's latest visit.
//!
//! The nurse assigned to the visit issues one report per test ordered on the
//! medical record, once the patient's consent for the record is granted.
//! Report codes are linked back onto the record.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult, load_in_hospital, require};
use crate::access::{AccessError, WriteAction, can_access, can_create};
use crate::models::{
    Appointment, AppointmentStatus, Consent, Entity, EntityKind, LabTest, MedicalRecord, Patient,
    RecordMeta, TestReport,
};
use crate::repositories::EntityRepository;
use crate::store::{Document, Filter, document};
use crate::tenancy::RequestContext;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTestReports {
    pub patient_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestReportPatch {
    pub result: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct TestReportService {
    repo: EntityRepository,
}

impl TestReportService {
    pub fn new(repo: EntityRepository) -> Self {
        Self { repo }
    }

    /// Issues reports for every test on the patient's latest medical record.
    pub async fn create(&self, ctx: &RequestContext, request: NewTestReports) -> ServiceResult<Vec<TestReport>> {
        can_create(ctx.caller(), EntityKind::TestReport)?;
        require("patientId", &request.patient_id)?;
        let deadline = ctx.deadline();
        let caller = ctx.caller();
        let hospital = self.repo.caller_creator(ctx, EntityKind::TestReport).await?;

        let patient: Patient =
            load_in_hospital(&self.repo, deadline, &hospital, request.patient_id.trim()).await?;
        let Some(latest) = patient.latest_appointment() else {
            return Err(ServiceError::conflict(format!(
                "patient '{}' has no appointment",
                patient.code()
            )));
        };
        let appointment: Appointment = load_in_hospital(&self.repo, deadline, &hospital, latest).await?;
        if appointment.status == AppointmentStatus::Cancelled {
            return Err(ServiceError::conflict(format!("appointment '{latest}' was cancelled")));
        }

        let record: MedicalRecord =
            load_in_hospital(&self.repo, deadline, &hospital, &appointment.medical_record_id).await?;
        if record.nurse_id != caller.code() {
            return Err(AccessError::denied(EntityKind::MedicalRecord, record.code()).into());
        }
        if !record.test_reports.is_empty() {
            return Err(ServiceError::conflict(format!(
                "medical record '{}' already has test reports",
                record.code()
            )));
        }
        if record.tests.is_empty() {
            return Err(ServiceError::conflict(format!(
                "medical record '{}' has no tests ordered",
                record.code()
            )));
        }
        self.ensure_consent(ctx, &record).await?;

        let mut reports = Vec::with_capacity(record.tests.len());
        for test_id in &record.tests {
            let test: LabTest = load_in_hospital(&self.repo, deadline, &hospital, test_id).await?;
            let code = EntityKind::TestReport.new_code();
            let mut meta = RecordMeta::created(&code, caller.code());
            meta.tenant_id = record.meta.tenant_id.clone();
            meta.hospital_id = record.meta.hospital_id.clone();
            let report = TestReport {
                meta,
                medical_record_id: record.code().to_string(),
                appointment_id: appointment.code().to_string(),
                patient_id: record.patient_id.clone(),
                doctor_id: record.doctor_id.clone(),
                test_id: test.code().to_string(),
                test_name: test.name,
                price: test.price,
                result: None,
                notes: None,
            };
            self.repo.insert(ctx, &report).await?;
            reports.push(report);
        }

        let codes: Vec<&str> = reports.iter().map(TestReport::code).collect();
        self.repo
            .update::<MedicalRecord>(ctx, record.code(), document(json!({ "testReports": codes })))
            .await?;
        info!(
            medical_record = record.code(),
            reports = reports.len(),
            nurse = caller.code(),
            "Test reports issued"
        );
        Ok(reports)
    }

    /// Reports of one patient the caller may read.
    pub async fn for_patient(&self, ctx: &RequestContext, patient_id: &str) -> ServiceResult<Vec<TestReport>> {
        let reports: Vec<TestReport> = self
            .repo
            .find_all_by(ctx.deadline(), &Filter::new().eq("patientId", patient_id))
            .await?;
        let mut visible = Vec::with_capacity(reports.len());
        for report in reports {
            match can_access(ctx.caller(), &report) {
                Ok(()) => visible.push(report),
                Err(err) if err.is_denied() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(visible)
    }

    /// Records the outcome of a test. Only the issuing nurse may do this.
    pub async fn update(&self, ctx: &RequestContext, code: &str, patch: TestReportPatch) -> ServiceResult<TestReport> {
        let mut changes = Document::new();
        if let Some(result) = patch.result {
            require("result", &result)?;
            changes.insert("result".into(), Value::String(result.trim().to_string()));
        }
        if let Some(notes) = patch.notes {
            changes.insert("notes".into(), Value::String(notes));
        }
        if changes.is_empty() {
            return Err(ServiceError::validation("no changes supplied"));
        }
        let _: TestReport = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;
        Ok(self.repo.update(ctx, code, changes).await?)
    }

    async fn ensure_consent(&self, ctx: &RequestContext, record: &MedicalRecord) -> ServiceResult<()> {
        let granted = self
            .repo
            .find_all_by::<Consent>(ctx.deadline(), &Filter::new().eq("medicalRecordId", record.code()))
            .await?
            .iter()
            .any(|consent| consent.granted);
        if !granted {
            return Err(ServiceError::conflict(format!(
                "consent for medical record '{}' is not granted",
                record.code()
            )));
        }
        Ok(())
    }
}
