//! # Access Policy Engine
//!
//! Decides read, write and list eligibility for a caller against a record,
//! driven by one declarative table ([`policy::policy_for`]) instead of
//! per-entity branching.
//!
//! Rules are evaluated for the caller's own tier only: a super-administrator
//! short-circuits, a tenant is matched on the tenant anchor, a hospital on the
//! hospital anchor, and leaf roles on direct references or authorship.

use thiserror::Error;

use crate::models::EntityKind;
use crate::store::StoreError;
use crate::tenancy::Tier;

pub mod policy;
pub mod read;
pub mod scope;
pub mod write;

pub use policy::{EntityPolicy, ScopeRule, WritePolicy, policy_for};
pub use read::can_access;
pub use scope::{ScopePlan, plan_scope};
pub use write::{WriteAction, can_create, can_write};

/// Error taxonomy of the access layer.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("{kind} record '{code}' not found")]
    NotFound { kind: EntityKind, code: String },
    #[error("caller may not access {kind} record '{code}'")]
    InvalidAccess { kind: EntityKind, code: String },
    /// The caller's tier is not the creator of the kind.
    #[error("{tier} callers may not create {kind} records")]
    CreationDenied { kind: EntityKind, tier: Tier },
    /// A record pulled from the store or cache lacks an expected field or
    /// does not decode. Never a silent denial.
    #[error("{kind} record '{code}' is malformed: {reason}")]
    MalformedRecord {
        kind: EntityKind,
        code: String,
        reason: String,
    },
    #[error(transparent)]
    Upstream(#[from] StoreError),
}

impl AccessError {
    pub fn not_found(kind: EntityKind, code: impl Into<String>) -> Self {
        AccessError::NotFound {
            kind,
            code: code.into(),
        }
    }

    pub fn denied(kind: EntityKind, code: impl Into<String>) -> Self {
        AccessError::InvalidAccess {
            kind,
            code: code.into(),
        }
    }

    pub fn malformed(kind: EntityKind, code: impl Into<String>, reason: impl Into<String>) -> Self {
        AccessError::MalformedRecord {
            kind,
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AccessError::NotFound { .. })
    }

    /// Any policy denial, read, write or create.
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            AccessError::InvalidAccess { .. } | AccessError::CreationDenied { .. }
        )
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, AccessError::MalformedRecord { .. })
    }
}
