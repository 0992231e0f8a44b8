//! Declarative per-entity access table.
//!
//! One [`EntityPolicy`] row per [`EntityKind`] names:
//! - the tier allowed to create records of the kind,
//! - the fields that anchor a record to a tenant and to a hospital,
//! - which leaf tiers may read a record through which reference field,
//! - how list-all queries are scoped for leaf tiers,
//! - who may update or delete a record.

use crate::models::{EntityKind, OwnerField};
use crate::tenancy::Tier;

use OwnerField::*;

/// How a leaf tier's list-all query is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRule {
    /// `{field: caller.code}`.
    Field(OwnerField),
    /// `{field: <caller's own createdBy>}`; one hop through the caller's
    /// creator chain (a staff member's hospital).
    CreatorHospital(OwnerField),
}

/// Who may mutate a record.
#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    /// Tier allowed to update and delete, and the field that must hold its code.
    pub owner: (Tier, OwnerField),
    /// Additional tiers allowed to update (never delete).
    pub co_writers: &'static [(Tier, OwnerField)],
}

#[derive(Debug, Clone, Copy)]
pub struct EntityPolicy {
    pub kind: EntityKind,
    pub creator: Option<Tier>,
    pub tenant_anchor: Option<OwnerField>,
    pub hospital_anchor: Option<OwnerField>,
    pub leaf_read: &'static [(Tier, OwnerField)],
    pub leaf_list: &'static [(Tier, ScopeRule)],
    pub write: WritePolicy,
}

impl EntityPolicy {
    /// Fields granting `tier` read access besides authorship.
    pub fn read_fields(&self, tier: Tier) -> impl Iterator<Item = OwnerField> + '_ {
        self.leaf_read
            .iter()
            .filter(move |(t, _)| *t == tier)
            .map(|(_, field)| *field)
    }

    pub fn list_rule(&self, tier: Tier) -> Option<ScopeRule> {
        self.leaf_list
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, rule)| *rule)
    }

    /// Ownership field checked when `tier` updates a record, if any.
    pub fn update_field(&self, tier: Tier) -> Option<OwnerField> {
        let (owner, field) = self.write.owner;
        if owner == tier {
            return Some(field);
        }
        self.write
            .co_writers
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, field)| *field)
    }

    /// Ownership field checked when `tier` deletes a record, if any.
    pub fn delete_field(&self, tier: Tier) -> Option<OwnerField> {
        let (owner, field) = self.write.owner;
        (owner == tier).then_some(field)
    }
}

const fn owned_by(tier: Tier) -> WritePolicy {
    WritePolicy {
        owner: (tier, CreatedBy),
        co_writers: &[],
    }
}

/// Staff rows differ only in kind; `own` lets each member read its own account.
const fn staff(kind: EntityKind, own: &'static [(Tier, OwnerField)]) -> EntityPolicy {
    EntityPolicy {
        kind,
        creator: Some(Tier::Hospital),
        tenant_anchor: Some(TenantId),
        hospital_anchor: Some(CreatedBy),
        leaf_read: own,
        leaf_list: &[],
        write: owned_by(Tier::Hospital),
    }
}

static SUPER_ADMIN: EntityPolicy = EntityPolicy {
    kind: EntityKind::SuperAdmin,
    creator: None,
    tenant_anchor: None,
    hospital_anchor: None,
    leaf_read: &[],
    leaf_list: &[],
    write: WritePolicy {
        owner: (Tier::SuperAdmin, Code),
        co_writers: &[],
    },
};

static TENANT: EntityPolicy = EntityPolicy {
    kind: EntityKind::Tenant,
    creator: Some(Tier::SuperAdmin),
    tenant_anchor: Some(Code),
    hospital_anchor: None,
    leaf_read: &[],
    leaf_list: &[],
    write: owned_by(Tier::SuperAdmin),
};

static HOSPITAL: EntityPolicy = EntityPolicy {
    kind: EntityKind::Hospital,
    creator: Some(Tier::Tenant),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(Code),
    leaf_read: &[],
    leaf_list: &[],
    write: owned_by(Tier::Tenant),
};

static DOCTOR: EntityPolicy = staff(EntityKind::Doctor, &[(Tier::Doctor, Code)]);
static NURSE: EntityPolicy = staff(EntityKind::Nurse, &[(Tier::Nurse, Code)]);
static PHARMACIST: EntityPolicy = staff(EntityKind::Pharmacist, &[(Tier::Pharmacist, Code)]);
static RECEPTIONIST: EntityPolicy = staff(EntityKind::Receptionist, &[(Tier::Receptionist, Code)]);

static PATIENT: EntityPolicy = EntityPolicy {
    kind: EntityKind::Patient,
    creator: Some(Tier::Receptionist),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[(Tier::Patient, Code), (Tier::Guardian, GuardianIds)],
    leaf_list: &[(Tier::Receptionist, ScopeRule::Field(CreatedBy))],
    write: owned_by(Tier::Receptionist),
};

static GUARDIAN: EntityPolicy = EntityPolicy {
    kind: EntityKind::Guardian,
    creator: Some(Tier::Receptionist),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[(Tier::Guardian, Code), (Tier::Patient, PatientId)],
    leaf_list: &[
        (Tier::Receptionist, ScopeRule::Field(CreatedBy)),
        (Tier::Patient, ScopeRule::Field(PatientId)),
    ],
    write: owned_by(Tier::Receptionist),
};

static APPOINTMENT: EntityPolicy = EntityPolicy {
    kind: EntityKind::Appointment,
    creator: Some(Tier::Receptionist),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[
        (Tier::Doctor, DoctorId),
        (Tier::Nurse, NurseId),
        (Tier::Patient, PatientId),
    ],
    leaf_list: &[
        (Tier::Receptionist, ScopeRule::CreatorHospital(HospitalId)),
        (Tier::Doctor, ScopeRule::Field(DoctorId)),
        (Tier::Nurse, ScopeRule::Field(NurseId)),
        (Tier::Patient, ScopeRule::Field(PatientId)),
    ],
    write: WritePolicy {
        owner: (Tier::Receptionist, CreatedBy),
        co_writers: &[(Tier::Doctor, DoctorId)],
    },
};

static MEDICAL_RECORD: EntityPolicy = EntityPolicy {
    kind: EntityKind::MedicalRecord,
    creator: None,
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[
        (Tier::Doctor, DoctorId),
        (Tier::Nurse, NurseId),
        (Tier::Patient, PatientId),
    ],
    leaf_list: &[
        (Tier::Doctor, ScopeRule::Field(DoctorId)),
        (Tier::Nurse, ScopeRule::Field(NurseId)),
        (Tier::Patient, ScopeRule::Field(PatientId)),
    ],
    write: WritePolicy {
        owner: (Tier::Doctor, DoctorId),
        co_writers: &[(Tier::Nurse, NurseId)],
    },
};

static PRESCRIPTION: EntityPolicy = EntityPolicy {
    kind: EntityKind::Prescription,
    creator: Some(Tier::Doctor),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[(Tier::Doctor, DoctorId), (Tier::Patient, PatientId)],
    leaf_list: &[
        (Tier::Doctor, ScopeRule::Field(DoctorId)),
        (Tier::Patient, ScopeRule::Field(PatientId)),
    ],
    write: owned_by(Tier::Doctor),
};

static MEDICINE: EntityPolicy = EntityPolicy {
    kind: EntityKind::Medicine,
    creator: Some(Tier::Pharmacist),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[],
    leaf_list: &[
        (Tier::Pharmacist, ScopeRule::CreatorHospital(HospitalId)),
        (Tier::Doctor, ScopeRule::CreatorHospital(HospitalId)),
    ],
    write: owned_by(Tier::Pharmacist),
};

static BILL: EntityPolicy = EntityPolicy {
    kind: EntityKind::Bill,
    creator: Some(Tier::Pharmacist),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[(Tier::Patient, PatientId)],
    leaf_list: &[
        (Tier::Pharmacist, ScopeRule::Field(CreatedBy)),
        (Tier::Patient, ScopeRule::Field(PatientId)),
    ],
    write: owned_by(Tier::Pharmacist),
};

static LAB_TEST: EntityPolicy = EntityPolicy {
    kind: EntityKind::LabTest,
    creator: Some(Tier::Hospital),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[],
    leaf_list: &[
        (Tier::Doctor, ScopeRule::CreatorHospital(HospitalId)),
        (Tier::Pharmacist, ScopeRule::CreatorHospital(HospitalId)),
        (Tier::Receptionist, ScopeRule::CreatorHospital(HospitalId)),
    ],
    write: owned_by(Tier::Hospital),
};

static CONSENT: EntityPolicy = EntityPolicy {
    kind: EntityKind::Consent,
    creator: Some(Tier::Nurse),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[(Tier::Patient, PatientId), (Tier::Guardian, GuardianId)],
    leaf_list: &[
        (Tier::Nurse, ScopeRule::Field(CreatedBy)),
        (Tier::Patient, ScopeRule::Field(PatientId)),
        (Tier::Guardian, ScopeRule::Field(GuardianId)),
    ],
    write: owned_by(Tier::Nurse),
};

static TEST_REPORT: EntityPolicy = EntityPolicy {
    kind: EntityKind::TestReport,
    creator: Some(Tier::Nurse),
    tenant_anchor: Some(TenantId),
    hospital_anchor: Some(HospitalId),
    leaf_read: &[(Tier::Doctor, DoctorId), (Tier::Patient, PatientId)],
    leaf_list: &[
        (Tier::Nurse, ScopeRule::Field(CreatedBy)),
        (Tier::Doctor, ScopeRule::Field(DoctorId)),
        (Tier::Patient, ScopeRule::Field(PatientId)),
    ],
    write: owned_by(Tier::Nurse),
};

// Roles sit outside every tenant; only super-administrators see them.
static ROLE: EntityPolicy = EntityPolicy {
    kind: EntityKind::Role,
    creator: Some(Tier::SuperAdmin),
    tenant_anchor: None,
    hospital_anchor: None,
    leaf_read: &[],
    leaf_list: &[],
    write: owned_by(Tier::SuperAdmin),
};

// Login records hold password hashes; only super-administrators read them
// through the generic path.
static LOGIN: EntityPolicy = EntityPolicy {
    kind: EntityKind::Login,
    creator: None,
    tenant_anchor: None,
    hospital_anchor: None,
    leaf_read: &[],
    leaf_list: &[],
    write: owned_by(Tier::SuperAdmin),
};

pub fn policy_for(kind: EntityKind) -> &'static EntityPolicy {
    match kind {
        EntityKind::SuperAdmin => &SUPER_ADMIN,
        EntityKind::Tenant => &TENANT,
        EntityKind::Hospital => &HOSPITAL,
        EntityKind::Doctor => &DOCTOR,
        EntityKind::Nurse => &NURSE,
        EntityKind::Pharmacist => &PHARMACIST,
        EntityKind::Receptionist => &RECEPTIONIST,
        EntityKind::Patient => &PATIENT,
        EntityKind::Guardian => &GUARDIAN,
        EntityKind::Appointment => &APPOINTMENT,
        EntityKind::MedicalRecord => &MEDICAL_RECORD,
        EntityKind::Prescription => &PRESCRIPTION,
        EntityKind::Medicine => &MEDICINE,
        EntityKind::Bill => &BILL,
        EntityKind::LabTest => &LAB_TEST,
        EntityKind::Consent => &CONSENT,
        EntityKind::TestReport => &TEST_REPORT,
        EntityKind::Login => &LOGIN,
        EntityKind::Role => &ROLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_its_own_row() {
        for kind in EntityKind::ALL {
            assert_eq!(policy_for(kind).kind, kind);
        }
    }

    #[test]
    fn creators_sit_above_or_beside_what_they_create() {
        for kind in EntityKind::ALL {
            let policy = policy_for(kind);
            if let (Some(creator), Some(tier)) = (policy.creator, kind.account_tier()) {
                assert!(creator.depth() < tier.depth(), "{kind} created by {creator}");
            }
        }
        assert_eq!(policy_for(EntityKind::MedicalRecord).creator, None);
    }

    #[test]
    fn co_writers_may_update_but_never_delete() {
        let appointment = policy_for(EntityKind::Appointment);
        assert_eq!(appointment.update_field(Tier::Doctor), Some(DoctorId));
        assert_eq!(appointment.delete_field(Tier::Doctor), None);
        assert_eq!(
            appointment.delete_field(Tier::Receptionist),
            Some(CreatedBy)
        );

        let record = policy_for(EntityKind::MedicalRecord);
        assert_eq!(record.update_field(Tier::Nurse), Some(NurseId));
        assert_eq!(record.delete_field(Tier::Nurse), None);
    }

    #[test]
    fn every_leaf_account_reads_its_own_record() {
        for kind in EntityKind::ALL {
            let Some(tier) = kind.account_tier().filter(|tier| tier.is_leaf()) else {
                continue;
            };
            let own: Vec<_> = policy_for(kind).read_fields(tier).collect();
            assert!(own.contains(&Code), "{kind}");
        }
    }

    #[test]
    fn only_leaf_tiers_appear_in_leaf_rules() {
        for kind in EntityKind::ALL {
            let policy = policy_for(kind);
            assert!(policy.leaf_read.iter().all(|(tier, _)| tier.is_leaf()));
            assert!(policy.leaf_list.iter().all(|(tier, _)| tier.is_leaf()));
        }
    }
}
