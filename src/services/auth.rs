//! Login, lockout and password management.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use super::{LoginAttemptTracker, ServiceError, ServiceResult};
use crate::access::{AccessError, WriteAction};
use crate::auth::TokenIssuer;
use crate::models::{Account, Entity, EntityKind, LoginRecord, with_account_type};
use crate::passwords::{PasswordHasher, validate_new_password};
use crate::repositories::EntityRepository;
use crate::store::{Filter, document};
use crate::tenancy::{CallerIdentity, Deadline, RequestContext, Tier};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Email, phone number or account code.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub code: String,
    pub collection: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    pub is_super_admin: bool,
    /// The caller signed in with a one-time password and must change it.
    pub reset_required: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Clone)]
pub struct AuthService {
    repo: EntityRepository,
    tracker: Arc<LoginAttemptTracker>,
    tokens: TokenIssuer,
    hasher: PasswordHasher,
    max_attempts: u32,
}

impl AuthService {
    pub fn new(
        repo: EntityRepository,
        tracker: Arc<LoginAttemptTracker>,
        tokens: TokenIssuer,
        hasher: PasswordHasher,
        max_attempts: u32,
    ) -> Self {
        Self {
            repo,
            tracker,
            tokens,
            hasher,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Authenticates by email, phone number or code and issues a token.
    ///
    /// Unknown identifiers and wrong passwords are indistinguishable to the
    /// caller. Reaching the attempt limit blocks the account until a
    /// creator unlocks it.
    #[instrument(skip_all)]
    pub async fn login(&self, deadline: Deadline, request: LoginRequest) -> ServiceResult<LoginResponse> {
        let identifier = request.identifier.trim();
        if identifier.is_empty() || request.password.is_empty() {
            return Err(ServiceError::Unauthenticated);
        }

        let Some(login) = self.find_login(deadline, identifier).await? else {
            counter!("login_failures_total", "reason" => "unknown_identifier").increment(1);
            return Err(ServiceError::Unauthenticated);
        };

        let identity = login_identity(&login)?;
        let ctx = RequestContext::new(identity).with_deadline(deadline);
        with_account_type!(ctx.caller().tier(), A => {
            self.complete_login::<A>(&ctx, &login, &request.password).await
        })
    }

    async fn complete_login<A: Account>(
        &self,
        ctx: &RequestContext,
        login: &LoginRecord,
        password: &str,
    ) -> ServiceResult<LoginResponse> {
        let code = login.code();
        let Some(account) = self.repo.load_by_code::<A>(ctx.deadline(), code).await? else {
            warn!(code, collection = %login.collection, "Login record without an account");
            return Err(ServiceError::Unauthenticated);
        };
        let profile = account.profile();

        if profile.is_blocked {
            counter!("login_failures_total", "reason" => "locked").increment(1);
            return Err(ServiceError::AccountLocked);
        }

        if !self.hasher.verify(password, &login.password_hash).await? {
            let attempts = self
                .tracker
                .record_failure(code)
                .max(profile.login_attempts.saturating_add(1));
            let blocked = attempts >= self.max_attempts;
            self.repo
                .update::<A>(
                    ctx,
                    code,
                    document(json!({ "loginAttempts": attempts, "isBlocked": blocked })),
                )
                .await?;
            counter!("login_failures_total", "reason" => "bad_password").increment(1);
            if blocked {
                warn!(code, attempts, "Account locked after repeated login failures");
                return Err(ServiceError::AccountLocked);
            }
            return Err(ServiceError::Unauthenticated);
        }

        let now = Utc::now();
        if login.otp_expired(now) {
            counter!("login_failures_total", "reason" => "otp_expired").increment(1);
            return Err(ServiceError::Unauthenticated);
        }

        self.tracker.reset(code);
        self.repo
            .update::<A>(
                ctx,
                code,
                document(json!({
                    "isActive": true,
                    "lastLoginAt": now.to_rfc3339(),
                    "loginAttempts": 0,
                })),
            )
            .await?;

        let caller = ctx.caller();
        let (token, expires_at) = self.tokens.issue(caller)?;
        info!(code, tier = %caller.tier(), "Login succeeded");

        Ok(LoginResponse {
            token,
            expires_at,
            code: code.to_string(),
            collection: caller.collection().to_string(),
            tenant_id: caller.tenant_id().to_string(),
            is_super_admin: caller.is_super_admin(),
            reset_required: login.reset,
        })
    }

    /// Replaces the caller's password, clearing any pending one-time password.
    pub async fn change_password(&self, ctx: &RequestContext, request: ChangePassword) -> ServiceResult<()> {
        let code = ctx.caller().code();
        let Some(login) = self
            .repo
            .load_by_code::<LoginRecord>(ctx.deadline(), code)
            .await?
        else {
            return Err(ServiceError::Unauthenticated);
        };

        if !self
            .hasher
            .verify(&request.current_password, &login.password_hash)
            .await?
        {
            return Err(ServiceError::Unauthenticated);
        }
        validate_new_password(&request.new_password)?;
        if request.new_password == request.current_password {
            return Err(ServiceError::validation(
                "new password must differ from the current password",
            ));
        }

        let password_hash = self.hasher.hash(&request.new_password).await?;
        self.repo
            .update::<LoginRecord>(
                ctx,
                code,
                document(json!({
                    "passwordHash": password_hash,
                    "reset": false,
                    "otpExpiresAt": null,
                })),
            )
            .await?;
        info!(code, "Password changed");
        Ok(())
    }

    /// Clears a lockout. Only the account's creator may do this.
    pub async fn unlock<A: Account>(&self, ctx: &RequestContext, code: &str) -> ServiceResult<A> {
        let account: A = self.repo.load_for_write(ctx, code, WriteAction::Update).await?;
        let unlocked = self
            .repo
            .update::<A>(
                ctx,
                account.code(),
                document(json!({ "isBlocked": false, "loginAttempts": 0 })),
            )
            .await?;
        self.tracker.reset(code);
        info!(code, unlocked_by = ctx.caller().code(), "Account unlocked");
        Ok(unlocked)
    }

    /// Unlock for an account identified by its collection name.
    pub async fn unlock_in(&self, ctx: &RequestContext, tier: Tier, code: &str) -> ServiceResult<()> {
        with_account_type!(tier, A => {
            self.unlock::<A>(ctx, code).await.map(|_| ())
        })
    }

    async fn find_login(&self, deadline: Deadline, identifier: &str) -> ServiceResult<Option<LoginRecord>> {
        for field in ["email", "phoneNo", "code"] {
            let found = self
                .repo
                .find_one_by::<LoginRecord>(deadline, &Filter::new().eq(field, identifier))
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }
}

/// Identity described by a login record.
fn login_identity(login: &LoginRecord) -> Result<CallerIdentity, AccessError> {
    let malformed = |reason: String| AccessError::malformed(EntityKind::Login, login.code(), reason);
    let tier: Tier = login
        .collection
        .parse()
        .map_err(|err: crate::tenancy::TenancyError| malformed(err.to_string()))?;
    let tenant_id = match tier {
        Tier::SuperAdmin | Tier::Tenant => String::new(),
        _ => login.meta.tenant_id.clone().unwrap_or_default(),
    };
    CallerIdentity::new(
        login.code(),
        &login.collection,
        tenant_id,
        tier == Tier::SuperAdmin,
    )
    .map_err(|err| malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::{Doctor, RecordMeta};
    use crate::models::fixtures::doctor;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    const PASSWORD: &str = "correct-horse";

    async fn service(max_attempts: u32) -> (AuthService, EntityRepository) {
        let hasher = PasswordHasher::new(4);
        let repo = EntityRepository::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(MemoryCache::with_capacity(64)),
            Duration::from_secs(60),
        );
        let hospital = RequestContext::new(CallerIdentity::member("HOS1", Tier::Hospital, "TEN1").unwrap());
        repo.insert(&hospital, &doctor("DOC1", "HOS1", "TEN1")).await.unwrap();
        repo.insert(
            &hospital,
            &LoginRecord {
                meta: RecordMeta::created("DOC1", "HOS1").in_tenant("TEN1").in_hospital("HOS1"),
                email: "doc1@example.com".into(),
                phone_no: "9000000001".into(),
                collection: "DOCTOR".into(),
                password_hash: hasher.hash(PASSWORD).await.unwrap(),
                reset: false,
                otp_expires_at: None,
            },
        )
        .await
        .unwrap();

        let service = AuthService::new(
            repo.clone(),
            Arc::new(LoginAttemptTracker::new()),
            TokenIssuer::new(b"unit-test-secret", Duration::from_secs(300)),
            hasher,
            max_attempts,
        );
        (service, repo)
    }

    fn request(identifier: &str, password: &str) -> LoginRequest {
        LoginRequest {
            identifier: identifier.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn login_accepts_email_phone_or_code() {
        let (service, _) = service(3).await;
        for identifier in ["doc1@example.com", "9000000001", "DOC1"] {
            let response = service
                .login(Deadline::none(), request(identifier, PASSWORD))
                .await
                .unwrap();
            assert_eq!(response.code, "DOC1");
            assert_eq!(response.collection, "DOCTOR");
            assert_eq!(response.tenant_id, "TEN1");
            assert!(!response.reset_required);
        }
    }

    #[tokio::test]
    async fn unknown_identifier_is_unauthenticated() {
        let (service, _) = service(3).await;
        let err = service
            .login(Deadline::none(), request("nobody@example.com", PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthenticated));
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_account() {
        let (service, repo) = service(3).await;
        for _ in 0..2 {
            let err = service
                .login(Deadline::none(), request("DOC1", "wrong-password"))
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Unauthenticated));
        }
        let err = service
            .login(Deadline::none(), request("DOC1", "wrong-password"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AccountLocked));

        // The right password no longer helps.
        let err = service
            .login(Deadline::none(), request("DOC1", PASSWORD))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AccountLocked));

        let stored: Doctor = repo.load_by_code(Deadline::none(), "DOC1").await.unwrap().unwrap();
        assert!(stored.profile.is_blocked);
        assert_eq!(stored.profile.login_attempts, 3);
    }

    #[tokio::test]
    async fn creator_unlock_restores_login() {
        let (service, _) = service(1).await;
        let err = service
            .login(Deadline::none(), request("DOC1", "wrong-password"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AccountLocked));

        let other_hospital =
            RequestContext::new(CallerIdentity::member("HOS2", Tier::Hospital, "TEN1").unwrap());
        assert!(service.unlock::<Doctor>(&other_hospital, "DOC1").await.is_err());

        let hospital = RequestContext::new(CallerIdentity::member("HOS1", Tier::Hospital, "TEN1").unwrap());
        let unlocked = service.unlock::<Doctor>(&hospital, "DOC1").await.unwrap();
        assert!(!unlocked.profile.is_blocked);

        service.login(Deadline::none(), request("DOC1", PASSWORD)).await.unwrap();
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let (service, _) = service(3).await;
        let ctx = RequestContext::new(CallerIdentity::member("DOC1", Tier::Doctor, "TEN1").unwrap());

        let err = service
            .change_password(
                &ctx,
                ChangePassword {
                    current_password: "nope-nope".into(),
                    new_password: "another-password".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthenticated));

        service
            .change_password(
                &ctx,
                ChangePassword {
                    current_password: PASSWORD.into(),
                    new_password: "another-password".into(),
                },
            )
            .await
            .unwrap();
        service
            .login(Deadline::none(), request("DOC1", "another-password"))
            .await
            .unwrap();
    }
}
