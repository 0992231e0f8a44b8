//! # Entity Services
//!
//! Business rules layered on the cached entity repository: account
//! provisioning, login, booking, clinical records, pharmacy and billing.

use thiserror::Error;

use crate::access::AccessError;
use crate::auth::AuthError;
use crate::models::Entity;
use crate::passwords::PasswordError;
use crate::repositories::EntityRepository;
use crate::store::StoreError;
use crate::tenancy::Deadline;

pub mod accounts;
pub mod appointments;
pub mod auth;
pub mod consents;
pub mod login_attempts;
pub mod medical_records;
pub mod notify;
pub mod pharmacy;
pub mod prescriptions;
pub mod roles;
pub mod test_reports;

pub use accounts::AccountService;
pub use appointments::AppointmentService;
pub use auth::AuthService;
pub use login_attempts::LoginAttemptTracker;
pub use medical_records::MedicalRecordService;
pub use notify::{LogNotifier, Notifier, OtpNotice};
pub use pharmacy::PharmacyService;
pub use prescriptions::PrescriptionService;
pub use roles::RoleService;
pub use test_reports::TestReportService;
pub use consents::ConsentService;
pub use lab_tests::LabTestService;

/// Errors surfaced by entity services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Access(AccessError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("invalid credentials")]
    Unauthenticated,
    #[error("account is locked")]
    AccountLocked,
    #[error(transparent)]
    Token(#[from] AuthError),
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }
}

impl From<AccessError> for ServiceError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Upstream(StoreError::Duplicate { collection, code }) => {
                ServiceError::Conflict(format!("{collection} record '{code}' already exists"))
            }
            other => ServiceError::Access(other),
        }
    }
}

impl From<PasswordError> for ServiceError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort { .. } | PasswordError::TooLong { .. } => {
                ServiceError::Validation(err.to_string())
            }
            // A stored hash that cannot be parsed never authenticates.
            PasswordError::InvalidFormat => ServiceError::Unauthenticated,
            PasswordError::Hashing(_) => ServiceError::Internal(err.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Rejects blank required text fields.
pub(crate) fn require(field: &str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::validation(format!("{field} is required")));
    }
    Ok(())
}

/// Hospital a record belongs to; records without one are malformed.
pub(crate) fn hospital_of<E: Entity>(record: &E) -> Result<&str, AccessError> {
    record
        .meta()
        .hospital_id
        .as_deref()
        .filter(|hospital| !hospital.is_empty())
        .ok_or_else(|| {
            AccessError::malformed(E::KIND, record.code(), "missing ownership field 'hospitalId'")
        })
}

/// Loads a record that must belong to `hospital`.
///
/// A missing record and a record of another hospital are both reported as
/// denied, so callers cannot discover codes of other hospitals.
pub(crate) async fn load_in_hospital<E: Entity>(
    repo: &EntityRepository,
    deadline: Deadline,
    hospital: &str,
    code: &str,
) -> ServiceResult<E> {
    match repo.load_by_code::<E>(deadline, code).await? {
        Some(record) if hospital_of(&record)? == hospital => Ok(record),
        _ => Err(AccessError::denied(E::KIND, code).into()),
    }
}
