//! Account records: one per tier of the tenancy hierarchy.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Account, Entity, EntityKind, OwnerField, OwnerRef, RecordMeta};
use crate::tenancy::Tier;

/// Contact details and login state shared by every account record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    pub name: String,
    pub mail: String,
    pub phone_no: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub login_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl AccountProfile {
    pub fn new(name: impl Into<String>, mail: impl Into<String>, phone_no: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mail: mail.into(),
            phone_no: phone_no.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuperAdmin {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Hospital {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Nurse {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pharmacist {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Receptionist {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
    pub date_of_birth: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default)]
    pub guardian_ids: Vec<String>,
    /// Appointment codes, oldest first.
    #[serde(default)]
    pub appointments: Vec<String>,
}

impl Patient {
    /// Age in whole years on `today`.
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        today.years_since(self.date_of_birth).unwrap_or(0)
    }

    pub fn latest_appointment(&self) -> Option<&str> {
        self.appointments.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Guardian {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(flatten)]
    pub profile: AccountProfile,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

macro_rules! impl_account {
    ($ty:ty, $tier:expr) => {
        impl Account for $ty {
            const TIER: Tier = $tier;

            fn profile(&self) -> &AccountProfile {
                &self.profile
            }

            fn profile_mut(&mut self) -> &mut AccountProfile {
                &mut self.profile
            }
        }
    };
}

/// Accounts whose ownership is fully described by [`RecordMeta`].
macro_rules! impl_plain_account {
    ($ty:ty, $kind:expr, $tier:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn meta(&self) -> &RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut RecordMeta {
                &mut self.meta
            }
        }

        impl_account!($ty, $tier);
    };
}

impl_plain_account!(SuperAdmin, EntityKind::SuperAdmin, Tier::SuperAdmin);
impl_plain_account!(Tenant, EntityKind::Tenant, Tier::Tenant);
impl_plain_account!(Hospital, EntityKind::Hospital, Tier::Hospital);
impl_plain_account!(Doctor, EntityKind::Doctor, Tier::Doctor);
impl_plain_account!(Nurse, EntityKind::Nurse, Tier::Nurse);
impl_plain_account!(Pharmacist, EntityKind::Pharmacist, Tier::Pharmacist);
impl_plain_account!(Receptionist, EntityKind::Receptionist, Tier::Receptionist);
impl_account!(Patient, Tier::Patient);
impl_account!(Guardian, Tier::Guardian);

impl Entity for Patient {
    const KIND: EntityKind = EntityKind::Patient;
    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
    fn domain_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        match field {
            OwnerField::GuardianIds => OwnerRef::Many(&self.guardian_ids),
            _ => OwnerRef::Missing,
        }
    }
}

impl Entity for Guardian {
    const KIND: EntityKind = EntityKind::Guardian;
    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
    fn domain_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        match field {
            OwnerField::PatientId => OwnerRef::required(Some(&self.patient_id)),
            _ => OwnerRef::Missing,
        }
    }
}

/// Runs `$body` with `$alias` bound to the account type of `$tier`.
macro_rules! with_account_type {
    ($tier:expr, $alias:ident => $body:expr) => {
        match $tier {
            $crate::tenancy::Tier::SuperAdmin => {
                type $alias = $crate::models::SuperAdmin;
                $body
            }
            $crate::tenancy::Tier::Tenant => {
                type $alias = $crate::models::Tenant;
                $body
            }
            $crate::tenancy::Tier::Hospital => {
                type $alias = $crate::models::Hospital;
                $body
            }
            $crate::tenancy::Tier::Doctor => {
                type $alias = $crate::models::Doctor;
                $body
            }
            $crate::tenancy::Tier::Nurse => {
                type $alias = $crate::models::Nurse;
                $body
            }
            $crate::tenancy::Tier::Pharmacist => {
                type $alias = $crate::models::Pharmacist;
                $body
            }
            $crate::tenancy::Tier::Receptionist => {
                type $alias = $crate::models::Receptionist;
                $body
            }
            $crate::tenancy::Tier::Patient => {
                type $alias = $crate::models::Patient;
                $body
            }
            $crate::tenancy::Tier::Guardian => {
                type $alias = $crate::models::Guardian;
                $body
            }
        }
    };
}

pub(crate) use with_account_type;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patient_serializes_flat_camel_case() {
        let patient = Patient {
            meta: RecordMeta::created("PAT1", "REC1")
                .in_tenant("TEN1")
                .in_hospital("HOS1"),
            profile: AccountProfile::new("Asha", "asha@example.com", "5550001"),
            date_of_birth: NaiveDate::from_ymd_opt(2015, 4, 2).unwrap(),
            gender: None,
            guardian_ids: vec!["GUA1".into()],
            appointments: vec![],
        };

        let value = serde_json::to_value(&patient).unwrap();
        assert_eq!(value["code"], json!("PAT1"));
        assert_eq!(value["createdBy"], json!("REC1"));
        assert_eq!(value["hospitalId"], json!("HOS1"));
        assert_eq!(value["phoneNo"], json!("5550001"));
        assert_eq!(value["dateOfBirth"], json!("2015-04-02"));

        let back: Patient = serde_json::from_value(value).unwrap();
        assert_eq!(back, patient);
        assert_eq!(back.owner_ref(OwnerField::GuardianIds).references("GUA1"), Some(true));
    }

    #[test]
    fn patient_age_is_computed_from_date_of_birth() {
        let patient: Patient = serde_json::from_value(json!({
            "code": "PAT1",
            "name": "Kid",
            "mail": "kid@example.com",
            "phoneNo": "1",
            "dateOfBirth": "2010-06-15"
        }))
        .unwrap();
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2026, 6, 14).unwrap()), 15);
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2026, 6, 15).unwrap()), 16);
    }

    #[test]
    fn record_without_required_fields_fails_to_decode() {
        let result = serde_json::from_value::<Doctor>(json!({ "code": "DOC1" }));
        assert!(result.is_err());
    }
}
