//! Medicine stock, lab test catalogue and billing endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Json, Response},
};

use super::{Body, created};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::models::{Bill, LabTest, Medicine};
use crate::server::AppState;
use crate::services::lab_tests::{LabTestPatch, NewLabTest};
use crate::services::pharmacy::{BillPatch, MedicinePatch, NewBill, NewMedicine};

read_handlers!(
    Medicine,
    tag = "pharmacy",
    list = "/medicines",
    item = "/medicines/{code}",
    get_medicine,
    list_medicines,
);

read_handlers!(
    LabTest,
    tag = "lab-tests",
    list = "/lab-tests",
    item = "/lab-tests/{code}",
    get_lab_test,
    list_lab_tests,
);

read_handlers!(
    Bill,
    tag = "bills",
    list = "/bills",
    item = "/bills/{code}",
    get_bill,
    list_bills,
);

#[utoipa::path(
    post,
    path = "/medicines",
    security(("bearer_auth" = [])),
    request_body = NewMedicine,
    responses(
        (status = 201, description = "Medicine stocked", body = Medicine),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Only pharmacists stock medicines", body = ApiError),
        (status = 409, description = "Name already stocked in this hospital", body = ApiError)
    ),
    tag = "pharmacy"
)]
pub async fn create_medicine(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewMedicine>,
) -> Result<Response, ApiError> {
    let medicine = state.pharmacy.create_medicine(&ctx, request).await?;
    Ok(created("/medicines", medicine))
}

#[utoipa::path(
    patch,
    path = "/medicines/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Medicine code")),
    request_body = MedicinePatch,
    responses(
        (status = 200, description = "Stock updated", body = Medicine),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Caller did not stock this medicine", body = ApiError),
        (status = 409, description = "Name already stocked in this hospital", body = ApiError)
    ),
    tag = "pharmacy"
)]
pub async fn update_medicine(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<MedicinePatch>,
) -> Result<Json<Medicine>, ApiError> {
    Ok(Json(state.pharmacy.update_medicine(&ctx, &code, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/medicines/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Medicine code")),
    responses(
        (status = 204, description = "Medicine removed from stock"),
        (status = 403, description = "Caller did not stock this medicine", body = ApiError)
    ),
    tag = "pharmacy"
)]
pub async fn delete_medicine(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.repo.delete_owned::<Medicine>(&ctx, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/lab-tests",
    security(("bearer_auth" = [])),
    request_body = NewLabTest,
    responses(
        (status = 201, description = "Lab test added to the catalogue", body = LabTest),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Only hospitals define lab tests", body = ApiError),
        (status = 409, description = "Name already used in this hospital", body = ApiError)
    ),
    tag = "lab-tests"
)]
pub async fn create_lab_test(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewLabTest>,
) -> Result<Response, ApiError> {
    let test = state.lab_tests.create(&ctx, request).await?;
    Ok(created("/lab-tests", test))
}

#[utoipa::path(
    patch,
    path = "/lab-tests/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Lab test code")),
    request_body = LabTestPatch,
    responses(
        (status = 200, description = "Lab test updated", body = LabTest),
        (status = 403, description = "Caller does not own this lab test", body = ApiError),
        (status = 409, description = "Name already used in this hospital", body = ApiError)
    ),
    tag = "lab-tests"
)]
pub async fn update_lab_test(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<LabTestPatch>,
) -> Result<Json<LabTest>, ApiError> {
    Ok(Json(state.lab_tests.update(&ctx, &code, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/lab-tests/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Lab test code")),
    responses(
        (status = 204, description = "Lab test removed from the catalogue"),
        (status = 403, description = "Caller does not own this lab test", body = ApiError)
    ),
    tag = "lab-tests"
)]
pub async fn delete_lab_test(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.repo.delete_owned::<LabTest>(&ctx, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Bill the patient's latest appointment and close the visit
#[utoipa::path(
    post,
    path = "/bills",
    security(("bearer_auth" = [])),
    request_body = NewBill,
    responses(
        (status = 201, description = "Bill created", body = Bill),
        (status = 403, description = "Patient outside the pharmacist's hospital", body = ApiError),
        (status = 409, description = "Nothing open to bill", body = ApiError)
    ),
    tag = "bills"
)]
pub async fn create_bill(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewBill>,
) -> Result<Response, ApiError> {
    let bill = state.pharmacy.create_bill(&ctx, request).await?;
    Ok(created("/bills", bill))
}

#[utoipa::path(
    patch,
    path = "/bills/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Bill code")),
    request_body = BillPatch,
    responses(
        (status = 200, description = "Bill status changed", body = Bill),
        (status = 403, description = "Caller did not issue this bill", body = ApiError),
        (status = 409, description = "Bill is no longer pending", body = ApiError)
    ),
    tag = "bills"
)]
pub async fn update_bill(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<BillPatch>,
) -> Result<Json<Bill>, ApiError> {
    Ok(Json(state.pharmacy.update_bill(&ctx, &code, patch).await?))
}
