//! Scope-filter resolution for list-all queries.

use super::AccessError;
use super::policy::{ScopeRule, policy_for};
use crate::models::{EntityKind, OwnerField};
use crate::store::Filter;
use crate::tenancy::{CallerIdentity, Tier};

/// Store filter bounding a list-all query, before any one-hop lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopePlan {
    /// Ready to run as-is.
    Filter(Filter),
    /// Filter `field` on the `createdBy` of the caller's own account record.
    ViaCreator { field: OwnerField },
}

impl ScopePlan {
    /// Completes a [`ScopePlan::ViaCreator`] plan once the creator code is known.
    pub fn resolve(self, creator: &str) -> Filter {
        match self {
            ScopePlan::Filter(filter) => filter,
            ScopePlan::ViaCreator { field } => Filter::new().eq(field.name(), creator),
        }
    }
}

/// Resolves the list scope of `caller` over `kind`.
///
/// Unrecognized tiers, and leaf tiers without a list rule for the kind, are
/// denied rather than given an unbounded filter.
pub fn plan_scope(kind: EntityKind, caller: &CallerIdentity) -> Result<ScopePlan, AccessError> {
    if caller.is_super_admin() {
        return Ok(ScopePlan::Filter(Filter::new()));
    }

    let policy = policy_for(kind);
    let own = |field: OwnerField| ScopePlan::Filter(Filter::new().eq(field.name(), caller.code()));
    let plan = match caller.tier() {
        Tier::SuperAdmin => None,
        Tier::Tenant => policy.tenant_anchor.map(own),
        Tier::Hospital => policy.hospital_anchor.map(own),
        leaf => policy.list_rule(leaf).map(|rule| match rule {
            ScopeRule::Field(field) => own(field),
            ScopeRule::CreatorHospital(field) => ScopePlan::ViaCreator { field },
        }),
    };

    plan.ok_or_else(|| {
        tracing::debug!(
            entity = %kind,
            caller = caller.code(),
            tier = %caller.tier(),
            "No list scope for caller"
        );
        AccessError::denied(kind, "*")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(code: &str, tier: Tier) -> CallerIdentity {
        CallerIdentity::member(code, tier, "TEN1").unwrap()
    }

    #[test]
    fn upper_tiers_scope_on_their_anchor() {
        let admin = CallerIdentity::super_admin("SA1").unwrap();
        assert_eq!(
            plan_scope(EntityKind::Bill, &admin).unwrap(),
            ScopePlan::Filter(Filter::new())
        );

        let tenant = CallerIdentity::tenant("TEN1").unwrap();
        assert_eq!(
            plan_scope(EntityKind::Hospital, &tenant).unwrap(),
            ScopePlan::Filter(Filter::new().eq("tenantId", "TEN1"))
        );

        let hospital = member("HOS1", Tier::Hospital);
        assert_eq!(
            plan_scope(EntityKind::Doctor, &hospital).unwrap(),
            ScopePlan::Filter(Filter::new().eq("createdBy", "HOS1"))
        );
        assert_eq!(
            plan_scope(EntityKind::Appointment, &hospital).unwrap(),
            ScopePlan::Filter(Filter::new().eq("hospitalId", "HOS1"))
        );
    }

    #[test]
    fn leaf_tiers_use_their_list_rule() {
        assert_eq!(
            plan_scope(EntityKind::Appointment, &member("D1", Tier::Doctor)).unwrap(),
            ScopePlan::Filter(Filter::new().eq("doctorId", "D1"))
        );

        let plan = plan_scope(EntityKind::Appointment, &member("REC1", Tier::Receptionist))
            .unwrap();
        assert_eq!(
            plan,
            ScopePlan::ViaCreator {
                field: OwnerField::HospitalId
            }
        );
        assert_eq!(plan.resolve("HOS1"), Filter::new().eq("hospitalId", "HOS1"));
    }

    #[test]
    fn callers_without_a_rule_are_denied() {
        // A hospital lists only its own hospital record.
        assert_eq!(
            plan_scope(EntityKind::Hospital, &member("HOS1", Tier::Hospital)).unwrap(),
            ScopePlan::Filter(Filter::by_code("HOS1"))
        );

        let err = plan_scope(EntityKind::Tenant, &member("HOS1", Tier::Hospital)).unwrap_err();
        assert!(err.is_denied());

        let err = plan_scope(EntityKind::Bill, &member("D1", Tier::Doctor)).unwrap_err();
        assert!(err.is_denied());

        let err = plan_scope(EntityKind::Login, &CallerIdentity::tenant("TEN1").unwrap());
        assert!(err.unwrap_err().is_denied());
    }
}
