//! # Tenancy Context
//!
//! Per-request caller identity and deadline. A [`RequestContext`] is built once
//! per request by the authentication middleware and handed to every repository
//! and service call.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::models::EntityKind;

/// Position of a caller in the tenancy hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    SuperAdmin,
    Tenant,
    Hospital,
    Doctor,
    Nurse,
    Pharmacist,
    Receptionist,
    Patient,
    Guardian,
}

impl Tier {
    pub const ALL: [Tier; 9] = [
        Tier::SuperAdmin,
        Tier::Tenant,
        Tier::Hospital,
        Tier::Doctor,
        Tier::Nurse,
        Tier::Pharmacist,
        Tier::Receptionist,
        Tier::Patient,
        Tier::Guardian,
    ];

    /// Collection name the tier's accounts live in. Tokens carry this value.
    pub fn collection(self) -> &'static str {
        self.entity_kind().collection()
    }

    /// Entity kind holding the account records of this tier.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            Tier::SuperAdmin => EntityKind::SuperAdmin,
            Tier::Tenant => EntityKind::Tenant,
            Tier::Hospital => EntityKind::Hospital,
            Tier::Doctor => EntityKind::Doctor,
            Tier::Nurse => EntityKind::Nurse,
            Tier::Pharmacist => EntityKind::Pharmacist,
            Tier::Receptionist => EntityKind::Receptionist,
            Tier::Patient => EntityKind::Patient,
            Tier::Guardian => EntityKind::Guardian,
        }
    }

    /// Depth in the hierarchy, 0 for the super-administrator.
    pub fn depth(self) -> u8 {
        match self {
            Tier::SuperAdmin => 0,
            Tier::Tenant => 1,
            Tier::Hospital => 2,
            Tier::Doctor | Tier::Nurse | Tier::Pharmacist | Tier::Receptionist => 3,
            Tier::Patient | Tier::Guardian => 4,
        }
    }

    pub fn is_leaf(self) -> bool {
        self.depth() >= 3
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for Tier {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|tier| tier.collection().eq_ignore_ascii_case(s))
            .ok_or_else(|| TenancyError::UnknownCollection(s.to_string()))
    }
}

/// Errors raised while building a caller identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenancyError {
    #[error("caller code must not be empty")]
    EmptyCode,
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
    #[error("super-administrator callers cannot carry a tenant id")]
    SuperAdminWithTenant,
    #[error("only super-administrators may belong to the {0} collection")]
    SuperAdminCollection(String),
    #[error("{tier} callers require a tenant id")]
    MissingTenant { tier: Tier },
}

/// Identity of the caller: `{ code, collection, tenantId, isSuperAdmin }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    code: String,
    tier: Tier,
    tenant_id: String,
    is_super_admin: bool,
}

impl CallerIdentity {
    /// Builds an identity from raw token claims, enforcing that super-admins
    /// carry no tenant id and every other caller maps to exactly one tier.
    pub fn new(
        code: impl Into<String>,
        collection: &str,
        tenant_id: impl Into<String>,
        is_super_admin: bool,
    ) -> Result<Self, TenancyError> {
        let code = code.into();
        let tenant_id = tenant_id.into();
        if code.trim().is_empty() {
            return Err(TenancyError::EmptyCode);
        }

        if is_super_admin {
            if !tenant_id.is_empty() {
                return Err(TenancyError::SuperAdminWithTenant);
            }
            return Ok(Self {
                code,
                tier: Tier::SuperAdmin,
                tenant_id,
                is_super_admin,
            });
        }

        let tier: Tier = collection.parse()?;
        match tier {
            Tier::SuperAdmin => Err(TenancyError::SuperAdminCollection(collection.to_string())),
            // A tenant is its own tenancy root.
            Tier::Tenant => Ok(Self {
                tenant_id: code.clone(),
                code,
                tier,
                is_super_admin,
            }),
            _ if tenant_id.is_empty() => Err(TenancyError::MissingTenant { tier }),
            _ => Ok(Self {
                code,
                tier,
                tenant_id,
                is_super_admin,
            }),
        }
    }

    pub fn super_admin(code: impl Into<String>) -> Result<Self, TenancyError> {
        Self::new(code, Tier::SuperAdmin.collection(), "", true)
    }

    pub fn tenant(code: impl Into<String>) -> Result<Self, TenancyError> {
        Self::new(code, Tier::Tenant.collection(), "", false)
    }

    pub fn member(
        code: impl Into<String>,
        tier: Tier,
        tenant_id: impl Into<String>,
    ) -> Result<Self, TenancyError> {
        Self::new(code, tier.collection(), tenant_id, false)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn collection(&self) -> &'static str {
        self.tier.collection()
    }

    /// Tenant id of the caller; empty for super-administrators.
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn is_super_admin(&self) -> bool {
        self.is_super_admin
    }
}

/// The deadline attached to a request elapsed before the call completed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("request deadline exceeded")]
pub struct DeadlineExceeded;

/// Optional point in time by which store and cache calls must complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline; calls run to completion.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn instant(self) -> Option<Instant> {
        self.0
    }

    /// Runs `future` bounded by the deadline. Nothing is started once the
    /// deadline has passed, and no retry is attempted when it elapses.
    pub async fn within<F, T>(self, future: F) -> Result<T, DeadlineExceeded>
    where
        F: Future<Output = T>,
    {
        match self.0 {
            Some(deadline) if Instant::now() >= deadline => Err(DeadlineExceeded),
            Some(deadline) => tokio::time::timeout_at(deadline, future)
                .await
                .map_err(|_| DeadlineExceeded),
            None => Ok(future.await),
        }
    }
}

/// Caller identity plus the deadline propagated to store and cache calls.
#[derive(Debug, Clone)]
pub struct RequestContext {
    caller: CallerIdentity,
    deadline: Deadline,
}

impl RequestContext {
    pub fn new(caller: CallerIdentity) -> Self {
        Self {
            caller,
            deadline: Deadline::none(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::after(timeout))
    }

    pub fn caller(&self) -> &CallerIdentity {
        &self.caller
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub async fn within<F, T>(&self, future: F) -> Result<T, DeadlineExceeded>
    where
        F: Future<Output = T>,
    {
        self.deadline.within(future).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_admin_cannot_carry_tenant() {
        let err = CallerIdentity::new("SA1", "SUPERADMIN", "T1", true).unwrap_err();
        assert_eq!(err, TenancyError::SuperAdminWithTenant);

        let admin = CallerIdentity::super_admin("SA1").unwrap();
        assert!(admin.is_super_admin());
        assert_eq!(admin.tier(), Tier::SuperAdmin);
        assert_eq!(admin.tenant_id(), "");
    }

    #[test]
    fn non_super_collection_must_map_to_a_tier() {
        assert!(matches!(
            CallerIdentity::new("X", "JANITOR", "T1", false),
            Err(TenancyError::UnknownCollection(_))
        ));
        assert!(matches!(
            CallerIdentity::new("X", "SUPERADMIN", "", false),
            Err(TenancyError::SuperAdminCollection(_))
        ));
        assert_eq!(
            CallerIdentity::member("D1", Tier::Doctor, ""),
            Err(TenancyError::MissingTenant { tier: Tier::Doctor })
        );
    }

    #[test]
    fn tenant_is_its_own_tenancy_root() {
        let tenant = CallerIdentity::tenant("TEN1").unwrap();
        assert_eq!(tenant.tenant_id(), "TEN1");
        assert_eq!(tenant.collection(), "TENANT");
    }

    #[test]
    fn collection_parsing_is_case_insensitive() {
        assert_eq!("doctor".parse::<Tier>().unwrap(), Tier::Doctor);
        assert_eq!("RECEPTIONIST".parse::<Tier>().unwrap(), Tier::Receptionist);
        assert!(Tier::Guardian.is_leaf());
        assert!(!Tier::Hospital.is_leaf());
    }

    #[tokio::test]
    async fn within_enforces_deadline() {
        let caller = CallerIdentity::super_admin("SA1").unwrap();
        let ctx = RequestContext::new(caller).with_timeout(Duration::from_millis(10));
        let slow = tokio::time::sleep(Duration::from_millis(200));
        assert_eq!(ctx.within(slow).await, Err(DeadlineExceeded));

        let fresh = RequestContext::new(ctx.caller().clone()).with_timeout(Duration::from_secs(5));
        let ok = fresh.within(async { 7 }).await;
        assert_eq!(ok, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_starts_after_the_deadline() {
        let deadline = Deadline::after(Duration::from_millis(5));
        tokio::time::advance(Duration::from_millis(6)).await;
        assert_eq!(deadline.within(async { 1 }).await, Err(DeadlineExceeded));
        assert_eq!(Deadline::none().within(async { 1 }).await, Ok(1));
    }
}
