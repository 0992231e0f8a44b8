//! Medical record updates by the assigned nurse and doctor.

use serde::Deserialize;
use serde_json::{Value, json};
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult, hospital_of, load_in_hospital};
use crate::access::WriteAction;
use crate::models::{LabTest, MedicalRecord, MedicalRecordStatus, Vitals};
use crate::repositories::EntityRepository;
use crate::store::Document;
use crate::tenancy::{RequestContext, Tier};

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecordPatch {
    /// Nurse only.
    pub vitals: Option<Vitals>,
    pub diagnosis: Option<String>,
    /// Lab test codes of the record's hospital.
    pub tests: Option<Vec<String>>,
    pub status: Option<MedicalRecordStatus>,
}

#[derive(Clone)]
pub struct MedicalRecordService {
    repo: EntityRepository,
}

impl MedicalRecordService {
    pub fn new(repo: EntityRepository) -> Self {
        Self { repo }
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        code: &str,
        patch: MedicalRecordPatch,
    ) -> ServiceResult<MedicalRecord> {
        let current: MedicalRecord = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;
        if current.status == MedicalRecordStatus::Closed {
            return Err(ServiceError::conflict(format!("medical record '{code}' is closed")));
        }

        let mut changes = Document::new();
        match ctx.caller().tier() {
            Tier::Nurse => {
                if patch.diagnosis.is_some() || patch.tests.is_some() || patch.status.is_some() {
                    return Err(ServiceError::validation("nurses may only record vitals"));
                }
                if let Some(vitals) = patch.vitals {
                    validate_vitals(&vitals)?;
                    changes.insert("vitals".into(), json!(vitals));
                }
            }
            _ => {
                if patch.vitals.is_some() {
                    return Err(ServiceError::validation("vitals are recorded by the assigned nurse"));
                }
                if let Some(diagnosis) = patch.diagnosis {
                    changes.insert("diagnosis".into(), Value::String(diagnosis.trim().to_string()));
                }
                if let Some(tests) = patch.tests {
                    if current.bill_id.is_some() {
                        return Err(ServiceError::conflict("tests cannot change after billing"));
                    }
                    if !current.test_reports.is_empty() {
                        return Err(ServiceError::conflict(
                            "tests cannot change once reports are issued",
                        ));
                    }
                    let tests = self.validate_tests(ctx, &current, tests).await?;
                    changes.insert("tests".into(), json!(tests));
                }
                if let Some(status) = patch.status {
                    if status == MedicalRecordStatus::Closed && current.bill_id.is_none() {
                        return Err(ServiceError::conflict(
                            "a medical record is closed by billing",
                        ));
                    }
                    changes.insert("status".into(), json!(status));
                }
            }
        }

        if changes.is_empty() {
            return Err(ServiceError::validation("no changes supplied"));
        }
        Ok(self.repo.update(ctx, code, changes).await?)
    }

    /// Deduplicated test codes, each a lab test of the record's hospital.
    async fn validate_tests(
        &self,
        ctx: &RequestContext,
        record: &MedicalRecord,
        tests: Vec<String>,
    ) -> ServiceResult<Vec<String>> {
        let hospital = hospital_of(record)?;
        let mut unique: Vec<String> = Vec::with_capacity(tests.len());
        for test in tests {
            let test = test.trim().to_string();
            if test.is_empty() || unique.contains(&test) {
                continue;
            }
            load_in_hospital::<LabTest>(&self.repo, ctx.deadline(), hospital, &test).await?;
            unique.push(test);
        }
        Ok(unique)
    }
}

fn validate_vitals(vitals: &Vitals) -> ServiceResult<()> {
    if let Some(weight) = vitals.weight
        && !(weight.is_finite() && weight > 0.0)
    {
        return Err(ServiceError::validation("weight must be a positive number"));
    }
    if vitals.bp.as_deref().is_some_and(|bp| bp.trim().is_empty()) {
        return Err(ServiceError::validation("bp must not be blank"));
    }
    Ok(())
}
