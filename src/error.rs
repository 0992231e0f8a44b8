//! # Error Handling
//!
//! Problem+json API errors with trace id propagation, and the mapping from
//! service and access errors onto HTTP statuses.
//!
//! A record that does not exist and a record the caller may not see produce
//! the same `403 NOT_AUTHORIZED` response, so existence is never revealed.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::access::AccessError;
use crate::services::ServiceError;
use crate::store::StoreError;
use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Trace id of the running request, or a fresh correlation id outside one.
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );
        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<AccessError> for ApiError {
    fn from(error: AccessError) -> Self {
        match error {
            AccessError::NotFound { .. }
            | AccessError::InvalidAccess { .. }
            | AccessError::CreationDenied { .. } => Self::new(
                StatusCode::FORBIDDEN,
                "NOT_AUTHORIZED",
                "You are not authorized to access this resource",
            ),
            AccessError::MalformedRecord { kind, code, reason } => {
                tracing::error!(entity = %kind, code = %code, reason = %reason, "Malformed record");
                Self::internal()
            }
            AccessError::Upstream(StoreError::Timeout) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "The request deadline was exceeded",
            ),
            AccessError::Upstream(StoreError::Duplicate { collection, code }) => Self::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                &format!("{collection} record '{code}' already exists"),
            ),
            AccessError::Upstream(StoreError::Contention { collection, code }) => Self::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                &format!("{collection} record '{code}' is being changed concurrently; retry"),
            ),
            AccessError::Upstream(StoreError::Database(sea_orm::DbErr::Conn(err))) => {
                tracing::error!(error = ?err, "Database connection error");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            AccessError::Upstream(err) => {
                tracing::error!(error = %err, "Document store error");
                Self::internal()
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Access(err) => err.into(),
            ServiceError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
            }
            ServiceError::Conflict(message) => Self::new(StatusCode::CONFLICT, "CONFLICT", &message),
            ServiceError::Unauthenticated => unauthorized(Some("Invalid credentials")),
            ServiceError::AccountLocked => Self::new(
                StatusCode::LOCKED,
                "ACCOUNT_LOCKED",
                "Account is locked after repeated failed logins",
            ),
            ServiceError::Token(err) => {
                tracing::error!(error = %err, "Token issuance failed");
                Self::internal()
            }
            ServiceError::Internal(message) => {
                tracing::error!(error = %message, "Service failure");
                Self::internal()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);
        Self::internal()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err.body_text()),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err.body_text()),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        validation_error("Invalid path parameter", json!({ "reason": rejection.body_text() }))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        validation_error("Invalid query string", json!({ "reason": rejection.body_text() }))
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use crate::passwords::PasswordError;

    #[test]
    fn missing_and_forbidden_records_look_identical() {
        let missing: ApiError = AccessError::not_found(EntityKind::Patient, "PAT404").into();
        let denied: ApiError = AccessError::denied(EntityKind::Patient, "PAT1").into();
        assert_eq!(missing.status, StatusCode::FORBIDDEN);
        assert_eq!(missing.status, denied.status);
        assert_eq!(missing.code, denied.code);
        assert_eq!(missing.message, denied.message);
        assert!(!missing.message.contains("PAT404"));
    }

    #[test]
    fn malformed_records_are_server_errors() {
        let error: ApiError =
            AccessError::malformed(EntityKind::Doctor, "DOC1", "missing ownership field 'hospitalId'").into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("hospitalId"));
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::validation("bad"), StatusCode::BAD_REQUEST),
            (ServiceError::conflict("taken"), StatusCode::CONFLICT),
            (ServiceError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (ServiceError::AccountLocked, StatusCode::LOCKED),
            (
                ServiceError::from(PasswordError::Hashing("worker panicked".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServiceError::from(PasswordError::TooLong { max: 72 }),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::Access(AccessError::Upstream(StoreError::Timeout)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }
    }

    #[test]
    fn details_and_trace_id_are_serialized() {
        let error = validation_error("Invalid", json!({ "field": "mail" }));
        let body = serde_json::to_value(&error).unwrap();
        assert_eq!(body["code"], "VALIDATION_FAILED");
        assert_eq!(body["details"]["field"], "mail");
        assert!(body["trace_id"].as_str().is_some_and(|id| id.starts_with("corr-")));
    }

    #[test]
    fn explicit_trace_id_wins() {
        let error = unauthorized_with_trace_id(None, "trace-1".into());
        assert_eq!(error.trace_id.as_deref(), Some("trace-1"));
        assert_eq!(&*error.message, "Authentication required");
    }
}
