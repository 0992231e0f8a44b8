//! Account endpoints: tenants, hospitals, staff, patients and guardians.
//!
//! Every account collection gets the same read, contact update, delete and
//! unlock endpoints; creation differs per tier.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Json, Response},
};

use super::{Body, created};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::models::{Doctor, Guardian, Hospital, Nurse, Patient, Pharmacist, Receptionist, Tenant};
use crate::server::AppState;
use crate::services::accounts::{AccountPatch, NewGuardian, NewHospital, NewPatient, NewStaff, NewTenant};

macro_rules! account_handlers {
    (
        $account:ident,
        tag = $tag:tt,
        list = $list_path:tt,
        item = $item_path:tt,
        unlock = $unlock_path:tt,
        $get_fn:ident,
        $list_fn:ident,
        $update_fn:ident,
        $delete_fn:ident,
        $unlock_fn:ident $(,)?
    ) => {
        read_handlers!($account, tag = $tag, list = $list_path, item = $item_path, $get_fn, $list_fn);

        #[utoipa::path(
            patch,
            path = $item_path,
            security(("bearer_auth" = [])),
            params(("code" = String, Path, description = "Account code")),
            request_body = AccountPatch,
            responses(
                (status = 200, description = "Contact details updated", body = $account),
                (status = 400, description = "Validation failed", body = ApiError),
                (status = 403, description = "Caller may not update this account", body = ApiError),
                (status = 409, description = "Email or phone already in use", body = ApiError)
            ),
            tag = $tag
        )]
        pub async fn $update_fn(
            State(state): State<AppState>,
            Caller(ctx): Caller,
            Path(code): Path<String>,
            Body(patch): Body<AccountPatch>,
        ) -> Result<Json<$account>, ApiError> {
            Ok(Json(state.accounts.update_contact::<$account>(&ctx, &code, patch).await?))
        }

        #[utoipa::path(
            delete,
            path = $item_path,
            security(("bearer_auth" = [])),
            params(("code" = String, Path, description = "Account code")),
            responses(
                (status = 204, description = "Account and login removed"),
                (status = 403, description = "Caller may not delete this account", body = ApiError)
            ),
            tag = $tag
        )]
        pub async fn $delete_fn(
            State(state): State<AppState>,
            Caller(ctx): Caller,
            Path(code): Path<String>,
        ) -> Result<StatusCode, ApiError> {
            state.accounts.delete_account::<$account>(&ctx, &code).await?;
            Ok(StatusCode::NO_CONTENT)
        }

        #[utoipa::path(
            post,
            path = $unlock_path,
            security(("bearer_auth" = [])),
            params(("code" = String, Path, description = "Account code")),
            responses(
                (status = 200, description = "Lockout cleared", body = $account),
                (status = 403, description = "Only the account's creator may unlock it", body = ApiError)
            ),
            tag = $tag
        )]
        pub async fn $unlock_fn(
            State(state): State<AppState>,
            Caller(ctx): Caller,
            Path(code): Path<String>,
        ) -> Result<Json<$account>, ApiError> {
            Ok(Json(state.auth.unlock::<$account>(&ctx, &code).await?))
        }
    };
}

account_handlers!(
    Tenant,
    tag = "tenants",
    list = "/tenants",
    item = "/tenants/{code}",
    unlock = "/tenants/{code}/unlock",
    get_tenant,
    list_tenants,
    update_tenant,
    delete_tenant,
    unlock_tenant,
);

account_handlers!(
    Hospital,
    tag = "hospitals",
    list = "/hospitals",
    item = "/hospitals/{code}",
    unlock = "/hospitals/{code}/unlock",
    get_hospital,
    list_hospitals,
    update_hospital,
    delete_hospital,
    unlock_hospital,
);

account_handlers!(
    Doctor,
    tag = "staff",
    list = "/doctors",
    item = "/doctors/{code}",
    unlock = "/doctors/{code}/unlock",
    get_doctor,
    list_doctors,
    update_doctor,
    delete_doctor,
    unlock_doctor,
);

account_handlers!(
    Nurse,
    tag = "staff",
    list = "/nurses",
    item = "/nurses/{code}",
    unlock = "/nurses/{code}/unlock",
    get_nurse,
    list_nurses,
    update_nurse,
    delete_nurse,
    unlock_nurse,
);

account_handlers!(
    Pharmacist,
    tag = "staff",
    list = "/pharmacists",
    item = "/pharmacists/{code}",
    unlock = "/pharmacists/{code}/unlock",
    get_pharmacist,
    list_pharmacists,
    update_pharmacist,
    delete_pharmacist,
    unlock_pharmacist,
);

account_handlers!(
    Receptionist,
    tag = "staff",
    list = "/receptionists",
    item = "/receptionists/{code}",
    unlock = "/receptionists/{code}/unlock",
    get_receptionist,
    list_receptionists,
    update_receptionist,
    delete_receptionist,
    unlock_receptionist,
);

account_handlers!(
    Patient,
    tag = "patients",
    list = "/patients",
    item = "/patients/{code}",
    unlock = "/patients/{code}/unlock",
    get_patient,
    list_patients,
    update_patient,
    delete_patient,
    unlock_patient,
);

account_handlers!(
    Guardian,
    tag = "patients",
    list = "/guardians",
    item = "/guardians/{code}",
    unlock = "/guardians/{code}/unlock",
    get_guardian,
    list_guardians,
    update_guardian,
    delete_guardian,
    unlock_guardian,
);

/// Create a tenant (super-administrator only)
#[utoipa::path(
    post,
    path = "/tenants",
    security(("bearer_auth" = [])),
    request_body = NewTenant,
    responses(
        (status = 201, description = "Tenant created; a one-time password was issued", body = Tenant),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Caller may not create tenants", body = ApiError),
        (status = 409, description = "Email or phone already in use", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewTenant>,
) -> Result<Response, ApiError> {
    let tenant = state.accounts.create_tenant(&ctx, request).await?;
    Ok(created("/tenants", tenant))
}

/// Create a hospital under the calling tenant
#[utoipa::path(
    post,
    path = "/hospitals",
    security(("bearer_auth" = [])),
    request_body = NewHospital,
    responses(
        (status = 201, description = "Hospital created", body = Hospital),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Caller may not create hospitals", body = ApiError),
        (status = 409, description = "Email or phone already in use", body = ApiError)
    ),
    tag = "hospitals"
)]
pub async fn create_hospital(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewHospital>,
) -> Result<Response, ApiError> {
    let hospital = state.accounts.create_hospital(&ctx, request).await?;
    Ok(created("/hospitals", hospital))
}

#[utoipa::path(
    post,
    path = "/doctors",
    security(("bearer_auth" = [])),
    request_body = NewStaff,
    responses(
        (status = 201, description = "Doctor created", body = Doctor),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Only hospitals create staff", body = ApiError),
        (status = 409, description = "Email or phone already in use", body = ApiError)
    ),
    tag = "staff"
)]
pub async fn create_doctor(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewStaff>,
) -> Result<Response, ApiError> {
    let doctor = state.accounts.create_staff::<Doctor>(&ctx, request).await?;
    Ok(created("/doctors", doctor))
}

#[utoipa::path(
    post,
    path = "/nurses",
    security(("bearer_auth" = [])),
    request_body = NewStaff,
    responses(
        (status = 201, description = "Nurse created", body = Nurse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Only hospitals create staff", body = ApiError),
        (status = 409, description = "Email or phone already in use", body = ApiError)
    ),
    tag = "staff"
)]
pub async fn create_nurse(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewStaff>,
) -> Result<Response, ApiError> {
    let nurse = state.accounts.create_staff::<Nurse>(&ctx, request).await?;
    Ok(created("/nurses", nurse))
}

#[utoipa::path(
    post,
    path = "/pharmacists",
    security(("bearer_auth" = [])),
    request_body = NewStaff,
    responses(
        (status = 201, description = "Pharmacist created", body = Pharmacist),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Only hospitals create staff", body = ApiError),
        (status = 409, description = "Email or phone already in use", body = ApiError)
    ),
    tag = "staff"
)]
pub async fn create_pharmacist(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewStaff>,
) -> Result<Response, ApiError> {
    let pharmacist = state.accounts.create_staff::<Pharmacist>(&ctx, request).await?;
    Ok(created("/pharmacists", pharmacist))
}

#[utoipa::path(
    post,
    path = "/receptionists",
    security(("bearer_auth" = [])),
    request_body = NewStaff,
    responses(
        (status = 201, description = "Receptionist created", body = Receptionist),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Only hospitals create staff", body = ApiError),
        (status = 409, description = "Email or phone already in use", body = ApiError)
    ),
    tag = "staff"
)]
pub async fn create_receptionist(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewStaff>,
) -> Result<Response, ApiError> {
    let receptionist = state.accounts.create_staff::<Receptionist>(&ctx, request).await?;
    Ok(created("/receptionists", receptionist))
}

/// Register a patient; minors must include a guardian
#[utoipa::path(
    post,
    path = "/patients",
    security(("bearer_auth" = [])),
    request_body = NewPatient,
    responses(
        (status = 201, description = "Patient registered", body = Patient),
        (status = 400, description = "Validation failed, or a minor without guardian", body = ApiError),
        (status = 403, description = "Only receptionists register patients", body = ApiError),
        (status = 409, description = "Email or phone already in use", body = ApiError)
    ),
    tag = "patients"
)]
pub async fn create_patient(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewPatient>,
) -> Result<Response, ApiError> {
    let patient = state.accounts.create_patient(&ctx, request).await?;
    Ok(created("/patients", patient))
}

/// Add a guardian to an existing patient
#[utoipa::path(
    post,
    path = "/guardians",
    security(("bearer_auth" = [])),
    request_body = NewGuardian,
    responses(
        (status = 201, description = "Guardian added", body = Guardian),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Caller did not register the patient", body = ApiError),
        (status = 409, description = "Email or phone already in use", body = ApiError)
    ),
    tag = "patients"
)]
pub async fn create_guardian(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewGuardian>,
) -> Result<Response, ApiError> {
    let guardian = state.accounts.create_guardian(&ctx, request).await?;
    Ok(created("/guardians", guardian))
}
