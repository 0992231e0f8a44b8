//! Clinical records: appointments, medical records, prescriptions and consent.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Entity, EntityKind, OwnerField, OwnerRef, RecordMeta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Whether the visit is finished, one way or another.
    pub fn is_closed(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub patient_id: String,
    pub doctor_id: String,
    pub nurse_id: String,
    pub date: NaiveDate,
    /// Slot start, `HH:MM`.
    pub time: String,
    pub medical_record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub status: AppointmentStatus,
    /// Set while the visit is open; a patient cannot book again until it clears.
    #[serde(default)]
    pub is_processing: bool,
}

impl Entity for Appointment {
    const KIND: EntityKind = EntityKind::Appointment;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn domain_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        match field {
            OwnerField::PatientId => OwnerRef::required(Some(&self.patient_id)),
            OwnerField::DoctorId => OwnerRef::required(Some(&self.doctor_id)),
            OwnerField::NurseId => OwnerRef::required(Some(&self.nurse_id)),
            _ => OwnerRef::Missing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MedicalRecordStatus {
    #[default]
    Open,
    UnderTreatment,
    Closed,
}

/// Vitals recorded by the assigned nurse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Vitals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub appointment_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub nurse_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub vitals: Vitals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    /// Lab test codes ordered by the doctor.
    #[serde(default)]
    pub tests: Vec<String>,
    #[serde(default)]
    pub status: MedicalRecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bill_id: Option<String>,
    /// One report per ordered test, issued once consent is granted.
    #[serde(default)]
    pub test_reports: Vec<String>,
}

impl Entity for MedicalRecord {
    const KIND: EntityKind = EntityKind::MedicalRecord;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn domain_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        match field {
            OwnerField::PatientId => OwnerRef::required(Some(&self.patient_id)),
            OwnerField::DoctorId => OwnerRef::required(Some(&self.doctor_id)),
            OwnerField::NurseId => OwnerRef::required(Some(&self.nurse_id)),
            _ => OwnerRef::Missing,
        }
    }
}

/// Times of day a medicine is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Frequency {
    #[serde(default)]
    pub morning: bool,
    #[serde(default)]
    pub afternoon: bool,
    #[serde(default)]
    pub night: bool,
}

impl Frequency {
    pub fn times_per_day(self) -> u32 {
        [self.morning, self.afternoon, self.night]
            .into_iter()
            .filter(|taken| *taken)
            .count() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrescribedMedicine {
    pub medicine_id: String,
    pub dosage_per_frequency: u32,
    pub no_of_days: u32,
    pub frequency: Frequency,
}

impl PrescribedMedicine {
    /// Tablets needed for the whole course.
    pub fn required_tablets(&self) -> u64 {
        u64::from(self.dosage_per_frequency)
            * u64::from(self.frequency.times_per_day())
            * u64::from(self.no_of_days)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub medical_record_id: String,
    pub appointment_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub medicines: Vec<PrescribedMedicine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for Prescription {
    const KIND: EntityKind = EntityKind::Prescription;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn domain_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        match field {
            OwnerField::PatientId => OwnerRef::required(Some(&self.patient_id)),
            OwnerField::DoctorId => OwnerRef::required(Some(&self.doctor_id)),
            _ => OwnerRef::Missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Consent {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub medical_record_id: String,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_id: Option<String>,
    /// General, Surgery, DataSharing, ...
    pub consent_type: String,
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for Consent {
    const KIND: EntityKind = EntityKind::Consent;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn domain_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        match field {
            OwnerField::PatientId => OwnerRef::required(Some(&self.patient_id)),
            OwnerField::GuardianId => OwnerRef::optional(self.guardian_id.as_deref()),
            _ => OwnerRef::Missing,
        }
    }
}

/// Outcome of one lab test ordered on a medical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub medical_record_id: String,
    pub appointment_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub test_id: String,
    pub test_name: String,
    /// Catalogue price when the report was issued, minor units.
    pub price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Entity for TestReport {
    const KIND: EntityKind = EntityKind::TestReport;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn domain_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        match field {
            OwnerField::PatientId => OwnerRef::required(Some(&self.patient_id)),
            OwnerField::DoctorId => OwnerRef::required(Some(&self.doctor_id)),
            _ => OwnerRef::Missing,
        }
    }
}
