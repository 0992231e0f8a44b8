//! # Data Models
//!
//! Typed entity records for every collection served by HealthHub, the
//! [`EntityKind`] table (collection names, cache key prefixes, code prefixes)
//! and the [`Entity`] trait the access policy and cached repository are
//! generic over.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::tenancy::Tier;

pub mod accounts;
pub mod clinical;
pub mod document;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod login;
pub mod pharmacy;
pub mod role;

pub use accounts::{
    AccountProfile, Doctor, Guardian, Hospital, Nurse, Patient, Pharmacist, Receptionist,
    SuperAdmin, Tenant,
};
pub(crate) use accounts::with_account_type;
pub use clinical::{
    Appointment, AppointmentStatus, Consent, Frequency, MedicalRecord, MedicalRecordStatus,
    PrescribedMedicine, Prescription, TestReport, Vitals,
};
pub use login::LoginRecord;
pub use pharmacy::{Bill, BillLine, BillStatus, BillTest, LabTest, Medicine};
pub use role::{Privilege, Role};

/// Every collection HealthHub stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    SuperAdmin,
    Tenant,
    Hospital,
    Doctor,
    Nurse,
    Pharmacist,
    Receptionist,
    Patient,
    Guardian,
    Appointment,
    MedicalRecord,
    Prescription,
    Medicine,
    Bill,
    LabTest,
    Consent,
    TestReport,
    Login,
    Role,
}

impl EntityKind {
    pub const ALL: [EntityKind; 19] = [
        EntityKind::SuperAdmin,
        EntityKind::Tenant,
        EntityKind::Hospital,
        EntityKind::Doctor,
        EntityKind::Nurse,
        EntityKind::Pharmacist,
        EntityKind::Receptionist,
        EntityKind::Patient,
        EntityKind::Guardian,
        EntityKind::Appointment,
        EntityKind::MedicalRecord,
        EntityKind::Prescription,
        EntityKind::Medicine,
        EntityKind::Bill,
        EntityKind::LabTest,
        EntityKind::Consent,
        EntityKind::TestReport,
        EntityKind::Login,
        EntityKind::Role,
    ];

    /// Name of the document store collection.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::SuperAdmin => "SUPERADMIN",
            EntityKind::Tenant => "TENANT",
            EntityKind::Hospital => "HOSPITAL",
            EntityKind::Doctor => "DOCTOR",
            EntityKind::Nurse => "NURSE",
            EntityKind::Pharmacist => "PHARMACIST",
            EntityKind::Receptionist => "RECEPTIONIST",
            EntityKind::Patient => "PATIENT",
            EntityKind::Guardian => "GUARDIAN",
            EntityKind::Appointment => "APPOINTMENT",
            EntityKind::MedicalRecord => "MEDICALRECORD",
            EntityKind::Prescription => "PRESCRIPTION",
            EntityKind::Medicine => "MEDICINE",
            EntityKind::Bill => "BILL",
            EntityKind::LabTest => "TEST",
            EntityKind::Consent => "CONSENT",
            EntityKind::TestReport => "TESTREPORT",
            EntityKind::Login => "LOGIN",
            EntityKind::Role => "ROLE",
        }
    }

    /// Cache key prefix. Every prefix ends with `:` so no prefix is a prefix of another.
    pub fn key_prefix(self) -> &'static str {
        match self {
            EntityKind::SuperAdmin => "SUPERADMIN:",
            EntityKind::Tenant => "TENANT:",
            EntityKind::Hospital => "HOSPITAL:",
            EntityKind::Doctor => "DOCTOR:",
            EntityKind::Nurse => "NURSE:",
            EntityKind::Pharmacist => "PHARMACIST:",
            EntityKind::Receptionist => "RECEPTIONIST:",
            EntityKind::Patient => "PATIENT:",
            EntityKind::Guardian => "GUARDIAN:",
            EntityKind::Appointment => "APPOINTMENT:",
            EntityKind::MedicalRecord => "MEDICALRECORD:",
            EntityKind::Prescription => "PRESCRIPTION:",
            EntityKind::Medicine => "MEDICINE:",
            EntityKind::Bill => "BILL:",
            EntityKind::LabTest => "TEST:",
            EntityKind::Consent => "CONSENT:",
            EntityKind::TestReport => "TESTREPORT:",
            EntityKind::Login => "LOGIN:",
            EntityKind::Role => "ROLE:",
        }
    }

    /// Prefix of generated record codes.
    pub fn code_prefix(self) -> &'static str {
        match self {
            EntityKind::SuperAdmin => "SA",
            EntityKind::Tenant => "TEN",
            EntityKind::Hospital => "HOS",
            EntityKind::Doctor => "DOC",
            EntityKind::Nurse => "NUR",
            EntityKind::Pharmacist => "PHA",
            EntityKind::Receptionist => "REC",
            EntityKind::Patient => "PAT",
            EntityKind::Guardian => "GUA",
            EntityKind::Appointment => "APP",
            EntityKind::MedicalRecord => "MED",
            EntityKind::Prescription => "PRE",
            EntityKind::Medicine => "MDN",
            EntityKind::Bill => "BIL",
            EntityKind::LabTest => "TST",
            EntityKind::Consent => "CON",
            EntityKind::TestReport => "TRP",
            EntityKind::Login => "LOG",
            EntityKind::Role => "ROL",
        }
    }

    pub fn cache_key(self, code: &str) -> String {
        format!("{}{}", self.key_prefix(), code)
    }

    /// Generates a fresh record code, e.g. `DOC3F9A1C27B0`.
    pub fn new_code(self) -> String {
        let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
        format!("{}{}", self.code_prefix(), &suffix[..10])
    }

    /// Tier whose accounts live in this collection, if any.
    pub fn account_tier(self) -> Option<Tier> {
        Tier::ALL.into_iter().find(|tier| tier.entity_kind() == self)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Ownership and audit fields carried by every record.
///
/// Ownership (`createdBy`, `tenantId`, `hospitalId`) is write-once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl RecordMeta {
    /// Meta for a record being created now by `created_by`.
    pub fn created(code: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        let created_by = created_by.into();
        Self {
            code: code.into(),
            created_by: Some(created_by.clone()),
            created_at: Some(now),
            updated_at: Some(now),
            updated_by: Some(created_by),
            ..Default::default()
        }
    }

    pub fn in_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn in_hospital(mut self, hospital_id: impl Into<String>) -> Self {
        self.hospital_id = Some(hospital_id.into());
        self
    }
}

/// Record attributes that can encode ownership of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerField {
    Code,
    CreatedBy,
    TenantId,
    HospitalId,
    PatientId,
    DoctorId,
    NurseId,
    GuardianId,
    GuardianIds,
}

impl OwnerField {
    /// Document field name, as stored.
    pub fn name(self) -> &'static str {
        match self {
            OwnerField::Code => "code",
            OwnerField::CreatedBy => "createdBy",
            OwnerField::TenantId => "tenantId",
            OwnerField::HospitalId => "hospitalId",
            OwnerField::PatientId => "patientId",
            OwnerField::DoctorId => "doctorId",
            OwnerField::NurseId => "nurseId",
            OwnerField::GuardianId => "guardianId",
            OwnerField::GuardianIds => "guardianIds",
        }
    }
}

/// Value of an ownership field on a concrete record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerRef<'a> {
    /// The field is required for this record but absent or empty.
    Missing,
    /// The field is optional and currently unset.
    Unassigned,
    One(&'a str),
    Many(&'a [String]),
}

impl<'a> OwnerRef<'a> {
    /// A field the record must carry; empty strings count as missing.
    pub fn required(value: Option<&'a str>) -> Self {
        match value {
            Some(v) if !v.is_empty() => OwnerRef::One(v),
            _ => OwnerRef::Missing,
        }
    }

    pub fn optional(value: Option<&'a str>) -> Self {
        match value {
            Some(v) if !v.is_empty() => OwnerRef::One(v),
            _ => OwnerRef::Unassigned,
        }
    }

    /// `None` when the field is missing, otherwise whether it references `code`.
    pub fn references(self, code: &str) -> Option<bool> {
        match self {
            OwnerRef::Missing => None,
            OwnerRef::Unassigned => Some(false),
            OwnerRef::One(value) => Some(value == code),
            OwnerRef::Many(values) => Some(values.iter().any(|v| v == code)),
        }
    }
}

/// A typed record stored in one collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn code(&self) -> &str {
        &self.meta().code
    }

    /// Ownership fields that live on the concrete record rather than in [`RecordMeta`].
    fn domain_ref(&self, _field: OwnerField) -> OwnerRef<'_> {
        OwnerRef::Missing
    }

    fn owner_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        let meta = self.meta();
        match field {
            OwnerField::Code => OwnerRef::required(Some(meta.code.as_str())),
            OwnerField::CreatedBy => OwnerRef::required(meta.created_by.as_deref()),
            OwnerField::TenantId => OwnerRef::required(meta.tenant_id.as_deref()),
            OwnerField::HospitalId => OwnerRef::required(meta.hospital_id.as_deref()),
            other => self.domain_ref(other),
        }
    }
}

/// An entity that represents a person who can log in.
pub trait Account: Entity {
    const TIER: Tier;

    fn profile(&self) -> &AccountProfile;

    fn profile_mut(&mut self) -> &mut AccountProfile;
}

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "healthhub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn key_prefixes_are_stable_and_collision_free() {
        let prefixes: Vec<_> = EntityKind::ALL.iter().map(|k| k.key_prefix()).collect();
        let unique: HashSet<_> = prefixes.iter().collect();
        assert_eq!(unique.len(), prefixes.len());

        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j {
                    assert!(!b.starts_with(a), "{a} is a prefix of {b}");
                }
            }
        }

        assert_eq!(EntityKind::Doctor.cache_key("D001"), "DOCTOR:D001");
        assert_eq!(EntityKind::LabTest.cache_key("T1"), "TEST:T1");
        assert_eq!(EntityKind::TestReport.cache_key("T1"), "TESTREPORT:T1");
        assert_eq!(EntityKind::Role.cache_key("R1"), "ROLE:R1");
    }

    #[test]
    fn collections_and_code_prefixes_are_unique() {
        let collections: HashSet<_> = EntityKind::ALL.iter().map(|k| k.collection()).collect();
        assert_eq!(collections.len(), EntityKind::ALL.len());
        let codes: HashSet<_> = EntityKind::ALL.iter().map(|k| k.code_prefix()).collect();
        assert_eq!(codes.len(), EntityKind::ALL.len());
    }

    #[test]
    fn new_codes_carry_the_kind_prefix() {
        let code = EntityKind::Patient.new_code();
        assert!(code.starts_with("PAT"));
        assert_eq!(code.len(), 13);
        assert_ne!(code, EntityKind::Patient.new_code());
    }

    #[test]
    fn account_tiers_round_trip() {
        for tier in Tier::ALL {
            assert_eq!(tier.entity_kind().account_tier(), Some(tier));
        }
        assert_eq!(EntityKind::Bill.account_tier(), None);
    }

    #[test]
    fn owner_ref_distinguishes_missing_from_unassigned() {
        assert_eq!(OwnerRef::required(Some("")), OwnerRef::Missing);
        assert_eq!(OwnerRef::required(None).references("X"), None);
        assert_eq!(OwnerRef::optional(None).references("X"), Some(false));
        let many = vec!["A".to_string(), "B".to_string()];
        assert_eq!(OwnerRef::Many(&many).references("B"), Some(true));
    }
}
