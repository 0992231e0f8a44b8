//! # API Handlers
//!
//! HTTP endpoints for every HealthHub collection. Reads go through the
//! cached repository with the access policy applied; writes go through the
//! entity services.

use axum::{
    extract::{FromRequest, Request, State},
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Json, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::{Entity, ServiceInfo};
use crate::server::AppState;

/// Generates `get` and `list` handlers for one collection.
///
/// `get` returns one record the caller may read; `list` returns every record
/// inside the caller's scope.
macro_rules! read_handlers {
    (
        $entity:ident,
        tag = $tag:tt,
        list = $list_path:tt,
        item = $item_path:tt,
        $get_fn:ident,
        $list_fn:ident $(,)?
    ) => {
        #[utoipa::path(
            get,
            path = $item_path,
            security(("bearer_auth" = [])),
            params(("code" = String, Path, description = "Record code")),
            responses(
                (status = 200, description = "Record visible to the caller", body = $entity),
                (status = 401, description = "Missing or invalid bearer token", body = ApiError),
                (status = 403, description = "Not authorized, or no such record", body = ApiError),
                (status = 504, description = "Request deadline exceeded", body = ApiError)
            ),
            tag = $tag
        )]
        pub async fn $get_fn(
            axum::extract::State(state): axum::extract::State<crate::server::AppState>,
            crate::auth::Caller(ctx): crate::auth::Caller,
            axum::extract::Path(code): axum::extract::Path<String>,
        ) -> Result<axum::Json<$entity>, ApiError> {
            Ok(axum::Json(state.repo.fetch_by_code::<$entity>(&ctx, &code).await?))
        }

        #[utoipa::path(
            get,
            path = $list_path,
            security(("bearer_auth" = [])),
            responses(
                (status = 200, description = "Records inside the caller's scope", body = Vec<$entity>),
                (status = 401, description = "Missing or invalid bearer token", body = ApiError),
                (status = 403, description = "Caller may not list this collection", body = ApiError)
            ),
            tag = $tag
        )]
        pub async fn $list_fn(
            axum::extract::State(state): axum::extract::State<crate::server::AppState>,
            crate::auth::Caller(ctx): crate::auth::Caller,
        ) -> Result<axum::Json<Vec<$entity>>, ApiError> {
            Ok(axum::Json(state.repo.list_with_scope::<$entity>(&ctx).await?))
        }
    };
}

pub mod accounts;
pub mod auth;
pub mod clinical;
pub mod pharmacy;
pub mod roles;


/// JSON request body whose rejections are reported as problem+json.
pub struct Body<T>(pub T);

impl<S, T> FromRequest<S> for Body<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Body(value))
    }
}

/// `201 Created` with a `Location` header pointing at the new record.
pub(crate) fn created<E: Entity + Serialize>(collection_path: &str, record: E) -> Response {
    let location = format!("{collection_path}/{}", record.code());
    let mut response = (StatusCode::CREATED, Json(record)).into_response();
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(LOCATION, value);
    }
    response
}

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness of the service and its document store.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    #[schema(example = "ok")]
    pub status: &'static str,
    /// `memory` or `database`.
    pub store: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    fn ok(store: &'static str) -> Self {
        Self {
            status: "ok",
            store,
            error: None,
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthStatus),
        (status = 503, description = "Document store unreachable", body = HealthStatus)
    ),
    tag = "root"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let Some(db) = state.db.as_ref() else {
        return (StatusCode::OK, Json(HealthStatus::ok("memory")));
    };
    match crate::db::health_check(db).await {
        Ok(()) => (StatusCode::OK, Json(HealthStatus::ok("database"))),
        Err(err) => {
            tracing::warn!(error = %err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "unavailable",
                    store: "database",
                    error: Some("database unreachable".to_string()),
                }),
            )
        }
    }
}
