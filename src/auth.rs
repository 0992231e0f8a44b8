//! # Authentication
//!
//! Signed bearer tokens carrying the caller identity, the middleware that
//! verifies them, and the [`Caller`] extractor handlers use to obtain the
//! per-request [`RequestContext`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized, unauthorized_with_trace_id};
use crate::server::AppState;
use crate::telemetry::TraceContext;
use crate::tenancy::{CallerIdentity, RequestContext, TenancyError};

/// Token claims. The token is the only carrier of the identity; nothing is
/// stored server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub code: String,
    pub collection: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub is_super_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is invalid or expired")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token claims do not describe a valid caller: {0}")]
    InvalidClaims(#[from] TenancyError),
}

/// Issues and verifies HS256 tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            Duration::from_secs(config.token_ttl_seconds),
        )
    }

    /// Signs a token for `caller`, returning it with its expiry.
    pub fn issue(&self, caller: &CallerIdentity) -> Result<(String, DateTime<Utc>), AuthError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            code: caller.code().to_string(),
            collection: caller.collection().to_string(),
            tenant_id: caller.tenant_id().to_string(),
            is_super_admin: caller.is_super_admin(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok((token, expires_at))
    }

    /// Verifies signature and expiry and rebuilds the caller identity.
    pub fn verify(&self, token: &str) -> Result<CallerIdentity, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        let claims = data.claims;
        Ok(CallerIdentity::new(
            claims.code,
            &claims.collection,
            claims.tenant_id,
            claims.is_super_admin,
        )?)
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Verifies the bearer token and attaches a [`RequestContext`] carrying the
/// caller identity and the request deadline.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone());

    let token = extract_bearer_token(request.headers(), trace_id.as_deref())?;
    let caller = state.tokens.verify(token).map_err(|err| {
        tracing::debug!(error = %err, "Rejected bearer token");
        reject("Invalid or expired token", trace_id.as_deref())
    })?;

    tracing::debug!(caller = caller.code(), tier = %caller.tier(), "Authenticated request");

    let ctx = RequestContext::new(caller)
        .with_timeout(Duration::from_millis(state.config.request_timeout_ms));
    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}

fn reject(message: &str, trace_id: Option<&str>) -> ApiError {
    match trace_id {
        Some(trace_id) => unauthorized_with_trace_id(Some(message), trace_id.to_string()),
        None => unauthorized(Some(message)),
    }
}

fn extract_bearer_token<'a>(
    headers: &'a HeaderMap,
    trace_id: Option<&str>,
) -> Result<&'a str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| reject("Missing Authorization header", trace_id))?
        .to_str()
        .map_err(|_| reject("Invalid Authorization header", trace_id))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| reject("Authorization header must use Bearer scheme", trace_id))
}

/// The authenticated caller of a protected route.
#[derive(Debug, Clone)]
pub struct Caller(pub RequestContext);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| unauthorized(Some("Authentication required")))
    }
}
