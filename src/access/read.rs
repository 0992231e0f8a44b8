use metrics::counter;

use super::AccessError;
use super::policy::policy_for;
use crate::models::{Entity, OwnerField};
use crate::tenancy::{CallerIdentity, Tier};

/// Read eligibility of `caller` for `record`.
///
/// Exactly one rule applies, chosen by the caller's own tier. A required
/// ownership field missing from the record is reported as
/// [`AccessError::MalformedRecord`], never as a denial.
pub fn can_access<E: Entity>(caller: &CallerIdentity, record: &E) -> Result<(), AccessError> {
    if caller.is_super_admin() {
        return Ok(());
    }

    let policy = policy_for(E::KIND);
    let allowed = match caller.tier() {
        Tier::SuperAdmin => false,
        Tier::Tenant => anchored(caller, record, policy.tenant_anchor)?,
        Tier::Hospital => anchored(caller, record, policy.hospital_anchor)?,
        leaf => {
            let fields = std::iter::once(OwnerField::CreatedBy).chain(policy.read_fields(leaf));
            references_any(caller, record, fields)?
        }
    };

    if allowed {
        Ok(())
    } else {
        deny(caller, record)
    }
}

fn anchored<E: Entity>(
    caller: &CallerIdentity,
    record: &E,
    anchor: Option<OwnerField>,
) -> Result<bool, AccessError> {
    match anchor {
        Some(field) => references_any(caller, record, std::iter::once(field)),
        None => Ok(false),
    }
}

/// Whether any of `fields` on `record` references the caller.
pub(crate) fn references_any<E: Entity>(
    caller: &CallerIdentity,
    record: &E,
    fields: impl IntoIterator<Item = OwnerField>,
) -> Result<bool, AccessError> {
    for field in fields {
        match record.owner_ref(field).references(caller.code()) {
            Some(true) => return Ok(true),
            Some(false) => {}
            None => {
                tracing::error!(
                    entity = %E::KIND,
                    code = record.code(),
                    field = field.name(),
                    "Record is missing an ownership field"
                );
                return Err(AccessError::malformed(
                    E::KIND,
                    record.code(),
                    format!("missing ownership field '{}'", field.name()),
                ));
            }
        }
    }
    Ok(false)
}

pub(crate) fn deny<E: Entity>(caller: &CallerIdentity, record: &E) -> Result<(), AccessError> {
    tracing::debug!(
        entity = %E::KIND,
        code = record.code(),
        caller = caller.code(),
        tier = %caller.tier(),
        "Access denied"
    );
    counter!(
        "access_denied_total",
        "entity" => E::KIND.collection(),
        "tier" => caller.tier().collection()
    )
    .increment(1);
    Err(AccessError::denied(E::KIND, record.code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;

    fn member(code: &str, tier: Tier) -> CallerIdentity {
        CallerIdentity::member(code, tier, "TEN1").unwrap()
    }

    #[test]
    fn super_admin_reads_every_record() {
        let admin = CallerIdentity::super_admin("SA1").unwrap();
        assert!(can_access(&admin, &doctor("D1", "HOS1", "TEN1")).is_ok());
        assert!(can_access(&admin, &appointment("APP1", "REC1", "HOS1", "D1")).is_ok());

        // Even a record with no ownership fields at all.
        let mut orphan = doctor("D9", "HOS1", "TEN1");
        orphan.meta.created_by = None;
        orphan.meta.tenant_id = None;
        assert!(can_access(&admin, &orphan).is_ok());
    }

    #[test]
    fn tenant_matches_on_tenant_id_only() {
        let tenant = CallerIdentity::tenant("TEN1").unwrap();
        assert!(can_access(&tenant, &doctor("D1", "HOS1", "TEN1")).is_ok());

        let err = can_access(&tenant, &doctor("D2", "HOS9", "TEN2")).unwrap_err();
        assert!(err.is_denied());
    }

    #[test]
    fn tenant_reads_its_own_tenant_record() {
        let record = tenant("TEN1", "SA1");
        assert!(can_access(&CallerIdentity::tenant("TEN1").unwrap(), &record).is_ok());
        assert!(
            can_access(&CallerIdentity::tenant("TEN2").unwrap(), &record)
                .unwrap_err()
                .is_denied()
        );
    }

    #[test]
    fn hospital_matches_on_hospital_anchor() {
        let caller = member("HOS1", Tier::Hospital);
        assert!(can_access(&caller, &doctor("D1", "HOS1", "TEN1")).is_ok());
        assert!(can_access(&caller, &appointment("APP1", "REC1", "HOS1", "D1")).is_ok());
        assert!(can_access(&caller, &hospital("HOS1", "TEN1")).is_ok());
        assert!(
            can_access(&caller, &doctor("D2", "HOS2", "TEN1"))
                .unwrap_err()
                .is_denied()
        );
        // Tenants sit above hospitals and are never readable by them.
        assert!(
            can_access(&caller, &tenant("TEN1", "SA1"))
                .unwrap_err()
                .is_denied()
        );
    }

    #[test]
    fn leaf_roles_match_direct_references_or_authorship() {
        let record = appointment("APP1", "REC1", "HOS1", "D1");

        assert!(can_access(&member("D1", Tier::Doctor), &record).is_ok());
        assert!(can_access(&member("NUR1", Tier::Nurse), &record).is_ok());
        assert!(can_access(&member("PAT1", Tier::Patient), &record).is_ok());
        assert!(can_access(&member("REC1", Tier::Receptionist), &record).is_ok());

        let other_doctor = member("D2", Tier::Doctor);
        assert!(can_access(&other_doctor, &record).unwrap_err().is_denied());

        // The doctor reference does not grant access to a nurse with the same code.
        let nurse_named_d1 = member("D1", Tier::Nurse);
        assert!(can_access(&nurse_named_d1, &record).unwrap_err().is_denied());
    }

    #[test]
    fn guardian_reads_patient_through_guardian_list() {
        let mut record = patient("PAT1", "REC1", "HOS1", "TEN1");
        record.guardian_ids.push("GUA1".into());

        assert!(can_access(&member("GUA1", Tier::Guardian), &record).is_ok());
        assert!(
            can_access(&member("GUA2", Tier::Guardian), &record)
                .unwrap_err()
                .is_denied()
        );
        assert!(can_access(&member("PAT1", Tier::Patient), &record).is_ok());
    }

    #[test]
    fn unassigned_optional_reference_is_a_plain_denial() {
        let record = consent("CON1", "NUR1", None);
        let guardian = member("GUA1", Tier::Guardian);
        assert!(can_access(&guardian, &record).unwrap_err().is_denied());

        let record = consent("CON2", "NUR1", Some("GUA1"));
        assert!(can_access(&guardian, &record).is_ok());
    }

    #[test]
    fn missing_ownership_field_is_malformed_not_denied() {
        let mut record = appointment("APP1", "REC1", "HOS1", "D1");
        record.meta.hospital_id = None;
        let err = can_access(&member("HOS1", Tier::Hospital), &record).unwrap_err();
        assert!(err.is_malformed(), "{err}");

        let mut record = appointment("APP1", "REC1", "HOS1", "D1");
        record.meta.created_by = None;
        let doctor = member("D1", Tier::Doctor);
        assert!(can_access(&doctor, &record).unwrap_err().is_malformed());

        let record = appointment("APP1", "REC1", "HOS1", "");
        assert!(can_access(&doctor, &record).unwrap_err().is_malformed());
    }
}
