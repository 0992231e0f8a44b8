//! Appointment, medical record, prescription, consent and test report endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Json, Response},
};

use super::{Body, created};
use crate::auth::Caller;
use crate::error::ApiError;
use crate::models::{Appointment, Consent, MedicalRecord, Prescription, TestReport};
use crate::server::AppState;
use crate::services::appointments::{AppointmentPatch, BookAppointment};
use crate::services::consents::{ConsentPatch, NewConsent};
use crate::services::medical_records::MedicalRecordPatch;
use crate::services::prescriptions::{NewPrescription, PrescriptionPatch};
use crate::services::test_reports::{NewTestReports, TestReportPatch};

read_handlers!(
    Appointment,
    tag = "appointments",
    list = "/appointments",
    item = "/appointments/{code}",
    get_appointment,
    list_appointments,
);

read_handlers!(
    MedicalRecord,
    tag = "medical-records",
    list = "/medical-records",
    item = "/medical-records/{code}",
    get_medical_record,
    list_medical_records,
);

read_handlers!(
    Prescription,
    tag = "prescriptions",
    list = "/prescriptions",
    item = "/prescriptions/{code}",
    get_prescription,
    list_prescriptions,
);

read_handlers!(
    Consent,
    tag = "consents",
    list = "/consents",
    item = "/consents/{code}",
    get_consent,
    list_consents,
);

read_handlers!(
    TestReport,
    tag = "test-reports",
    list = "/test-reports",
    item = "/test-reports/{code}",
    get_test_report,
    list_test_reports,
);

/// Book an appointment; opens the visit's medical record
#[utoipa::path(
    post,
    path = "/appointments",
    security(("bearer_auth" = [])),
    request_body = BookAppointment,
    responses(
        (status = 201, description = "Appointment booked", body = Appointment),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Patient, doctor or nurse outside the caller's hospital", body = ApiError),
        (status = 409, description = "Slot taken, or the patient has an open visit", body = ApiError)
    ),
    tag = "appointments"
)]
pub async fn book_appointment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<BookAppointment>,
) -> Result<Response, ApiError> {
    let appointment = state.appointments.book(&ctx, request).await?;
    Ok(created("/appointments", appointment))
}

#[utoipa::path(
    patch,
    path = "/appointments/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Appointment code")),
    request_body = AppointmentPatch,
    responses(
        (status = 200, description = "Appointment updated", body = Appointment),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Caller may not update this appointment", body = ApiError),
        (status = 409, description = "Closed appointment, taken slot or invalid transition", body = ApiError)
    ),
    tag = "appointments"
)]
pub async fn update_appointment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<AppointmentPatch>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(state.appointments.update(&ctx, &code, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/appointments/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Appointment code")),
    responses(
        (status = 204, description = "Appointment and its empty medical record removed"),
        (status = 403, description = "Caller may not delete this appointment", body = ApiError),
        (status = 409, description = "Visit already has a prescription or bill", body = ApiError)
    ),
    tag = "appointments"
)]
pub async fn delete_appointment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.appointments.delete(&ctx, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Record vitals (nurse) or diagnosis, tests and status (doctor)
#[utoipa::path(
    patch,
    path = "/medical-records/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Medical record code")),
    request_body = MedicalRecordPatch,
    responses(
        (status = 200, description = "Medical record updated", body = MedicalRecord),
        (status = 400, description = "Field not writable by the caller's role", body = ApiError),
        (status = 403, description = "Caller is not assigned to this record", body = ApiError),
        (status = 409, description = "Record closed or already billed", body = ApiError)
    ),
    tag = "medical-records"
)]
pub async fn update_medical_record(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<MedicalRecordPatch>,
) -> Result<Json<MedicalRecord>, ApiError> {
    Ok(Json(state.medical_records.update(&ctx, &code, patch).await?))
}

#[utoipa::path(
    post,
    path = "/prescriptions",
    security(("bearer_auth" = [])),
    request_body = NewPrescription,
    responses(
        (status = 201, description = "Prescription written", body = Prescription),
        (status = 400, description = "Invalid medicine lines", body = ApiError),
        (status = 403, description = "Caller is not the record's doctor", body = ApiError),
        (status = 409, description = "Record closed or already prescribed", body = ApiError)
    ),
    tag = "prescriptions"
)]
pub async fn create_prescription(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewPrescription>,
) -> Result<Response, ApiError> {
    let prescription = state.prescriptions.create(&ctx, request).await?;
    Ok(created("/prescriptions", prescription))
}

#[utoipa::path(
    patch,
    path = "/prescriptions/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Prescription code")),
    request_body = PrescriptionPatch,
    responses(
        (status = 200, description = "Prescription updated", body = Prescription),
        (status = 400, description = "Invalid medicine lines", body = ApiError),
        (status = 403, description = "Caller did not write this prescription", body = ApiError),
        (status = 409, description = "Already billed", body = ApiError)
    ),
    tag = "prescriptions"
)]
pub async fn update_prescription(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<PrescriptionPatch>,
) -> Result<Json<Prescription>, ApiError> {
    Ok(Json(state.prescriptions.update(&ctx, &code, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/prescriptions/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Prescription code")),
    responses(
        (status = 204, description = "Prescription withdrawn"),
        (status = 403, description = "Caller did not write this prescription", body = ApiError),
        (status = 409, description = "Already billed", body = ApiError)
    ),
    tag = "prescriptions"
)]
pub async fn delete_prescription(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.prescriptions.delete(&ctx, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/consents",
    security(("bearer_auth" = [])),
    request_body = NewConsent,
    responses(
        (status = 201, description = "Consent recorded", body = Consent),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 403, description = "Caller is not the record's nurse", body = ApiError)
    ),
    tag = "consents"
)]
pub async fn create_consent(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewConsent>,
) -> Result<Response, ApiError> {
    let consent = state.consents.create(&ctx, request).await?;
    Ok(created("/consents", consent))
}

#[utoipa::path(
    patch,
    path = "/consents/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Consent code")),
    request_body = ConsentPatch,
    responses(
        (status = 200, description = "Consent updated", body = Consent),
        (status = 403, description = "Caller did not record this consent", body = ApiError)
    ),
    tag = "consents"
)]
pub async fn update_consent(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<ConsentPatch>,
) -> Result<Json<Consent>, ApiError> {
    Ok(Json(state.consents.update(&ctx, &code, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/consents/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Consent code")),
    responses(
        (status = 204, description = "Consent removed"),
        (status = 403, description = "Caller did not record this consent", body = ApiError)
    ),
    tag = "consents"
)]
pub async fn delete_consent(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.repo.delete_owned::<Consent>(&ctx, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Issue one report per test ordered on the patient's latest medical record
#[utoipa::path(
    post,
    path = "/test-reports",
    security(("bearer_auth" = [])),
    request_body = NewTestReports,
    responses(
        (status = 201, description = "Reports issued", body = Vec<TestReport>),
        (status = 403, description = "Caller is not the visit's nurse", body = ApiError),
        (status = 409, description = "No tests ordered, consent missing, or reports already issued", body = ApiError)
    ),
    tag = "test-reports"
)]
pub async fn create_test_reports(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(request): Body<NewTestReports>,
) -> Result<(StatusCode, Json<Vec<TestReport>>), ApiError> {
    let reports = state.test_reports.create(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(reports)))
}

#[utoipa::path(
    patch,
    path = "/test-reports/{code}",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Test report code")),
    request_body = TestReportPatch,
    responses(
        (status = 200, description = "Result recorded", body = TestReport),
        (status = 403, description = "Caller did not issue this report", body = ApiError)
    ),
    tag = "test-reports"
)]
pub async fn update_test_report(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
    Body(patch): Body<TestReportPatch>,
) -> Result<Json<TestReport>, ApiError> {
    Ok(Json(state.test_reports.update(&ctx, &code, patch).await?))
}

/// Test reports of one patient that the caller may read
#[utoipa::path(
    get,
    path = "/patients/{code}/test-reports",
    security(("bearer_auth" = [])),
    params(("code" = String, Path, description = "Patient code")),
    responses(
        (status = 200, description = "Readable reports of the patient", body = Vec<TestReport>)
    ),
    tag = "test-reports"
)]
pub async fn patient_test_reports(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(code): Path<String>,
) -> Result<Json<Vec<TestReport>>, ApiError> {
    Ok(Json(state.test_reports.for_patient(&ctx, &code).await?))
}
