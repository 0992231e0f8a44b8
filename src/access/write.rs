use super::AccessError;
use super::policy::policy_for;
use super::read::{deny, references_any};
use crate::models::{Entity, EntityKind};
use crate::tenancy::CallerIdentity;

/// Mutation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Update,
    Delete,
}

/// Write eligibility of `caller` for `record`.
///
/// A single field-equality check against the write table: the owner tier may
/// update and delete, co-writer tiers may only update. Super-administrators
/// get no bypass here; they write only what the table assigns to them.
pub fn can_write<E: Entity>(
    caller: &CallerIdentity,
    record: &E,
    action: WriteAction,
) -> Result<(), AccessError> {
    let policy = policy_for(E::KIND);
    let field = match action {
        WriteAction::Update => policy.update_field(caller.tier()),
        WriteAction::Delete => policy.delete_field(caller.tier()),
    };

    match field {
        Some(field) if references_any(caller, record, [field])? => Ok(()),
        _ => deny(caller, record),
    }
}

/// Whether `caller` may create records of `kind`.
pub fn can_create(caller: &CallerIdentity, kind: EntityKind) -> Result<(), AccessError> {
    if policy_for(kind).creator == Some(caller.tier()) {
        return Ok(());
    }
    tracing::debug!(
        entity = %kind,
        caller = caller.code(),
        tier = %caller.tier(),
        "Creation denied"
    );
    Err(AccessError::CreationDenied {
        kind,
        tier: caller.tier(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::tenancy::Tier;

    fn member(code: &str, tier: Tier) -> CallerIdentity {
        CallerIdentity::member(code, tier, "TEN1").unwrap()
    }

    #[test]
    fn doctor_cannot_delete_appointment_of_another_receptionist() {
        let record = appointment("APP1", "REC1", "HOS1", "D1");

        // Even the assigned doctor may only update, never delete.
        let doctor = member("D1", Tier::Doctor);
        assert!(can_write(&doctor, &record, WriteAction::Update).is_ok());
        let err = can_write(&doctor, &record, WriteAction::Delete).unwrap_err();
        assert!(err.is_denied());

        let other_doctor = member("D2", Tier::Doctor);
        assert!(
            can_write(&other_doctor, &record, WriteAction::Update)
                .unwrap_err()
                .is_denied()
        );
    }

    #[test]
    fn owner_may_update_and_delete() {
        let record = appointment("APP1", "REC1", "HOS1", "D1");
        let owner = member("REC1", Tier::Receptionist);
        assert!(can_write(&owner, &record, WriteAction::Update).is_ok());
        assert!(can_write(&owner, &record, WriteAction::Delete).is_ok());

        let other = member("REC2", Tier::Receptionist);
        assert!(can_write(&other, &record, WriteAction::Delete).is_err());
    }

    #[test]
    fn staff_are_owned_by_the_creating_hospital() {
        let record = doctor("D1", "HOS1", "TEN1");
        assert!(can_write(&member("HOS1", Tier::Hospital), &record, WriteAction::Delete).is_ok());
        assert!(can_write(&member("HOS2", Tier::Hospital), &record, WriteAction::Delete).is_err());
        // Reading rights do not imply writing rights.
        let tenant = CallerIdentity::tenant("TEN1").unwrap();
        assert!(can_write(&tenant, &record, WriteAction::Update).is_err());
    }

    #[test]
    fn super_admin_writes_only_what_it_owns() {
        let admin = CallerIdentity::super_admin("SA1").unwrap();
        assert!(can_write(&admin, &tenant("TEN1", "SA1"), WriteAction::Delete).is_ok());
        assert!(
            can_write(&admin, &doctor("D1", "HOS1", "TEN1"), WriteAction::Update)
                .unwrap_err()
                .is_denied()
        );
    }

    #[test]
    fn missing_owner_field_is_malformed() {
        let mut record = patient("PAT1", "REC1", "HOS1", "TEN1");
        record.meta.created_by = None;
        let err = can_write(&member("REC1", Tier::Receptionist), &record, WriteAction::Update)
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn creation_follows_the_creator_column() {
        let admin = CallerIdentity::super_admin("SA1").unwrap();
        assert!(can_create(&admin, EntityKind::Tenant).is_ok());
        let err = can_create(&admin, EntityKind::Hospital).unwrap_err();
        assert!(err.is_denied());
        assert_eq!(err.to_string(), "SUPERADMIN callers may not create HOSPITAL records");

        let hospital = member("HOS1", Tier::Hospital);
        for kind in [
            EntityKind::Doctor,
            EntityKind::Nurse,
            EntityKind::Pharmacist,
            EntityKind::Receptionist,
            EntityKind::LabTest,
        ] {
            assert!(can_create(&hospital, kind).is_ok(), "{kind}");
        }

        let receptionist = member("REC1", Tier::Receptionist);
        assert!(can_create(&receptionist, EntityKind::Appointment).is_ok());
        assert!(can_create(&receptionist, EntityKind::MedicalRecord).is_err());
        assert!(can_create(&member("D1", Tier::Doctor), EntityKind::Prescription).is_ok());
        assert!(can_create(&member("PH1", Tier::Pharmacist), EntityKind::Bill).is_ok());
        assert!(can_create(&member("N1", Tier::Nurse), EntityKind::Consent).is_ok());
    }
}
