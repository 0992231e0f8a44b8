//! Account provisioning.
//!
//! Each tier creates the tier below it. A new account gets a generated code,
//! ownership fields from the creator chain, and a login record holding a
//! hashed one-time password.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{Notifier, OtpNotice, ServiceError, ServiceResult, require};
use crate::access::{AccessError, WriteAction, can_create};
use crate::models::{
    Account, AccountProfile, Doctor, Entity, EntityKind, Guardian, Hospital, LoginRecord, Nurse,
    Patient, Pharmacist, RecordMeta, Receptionist, SuperAdmin, Tenant,
};
use crate::passwords::{PasswordHasher, generate_otp, validate_new_password};
use crate::repositories::EntityRepository;
use crate::store::{Document, Filter, document};
use crate::tenancy::{CallerIdentity, Deadline, RequestContext, Tier};

/// Patients younger than this need a guardian.
pub const ADULT_AGE: u32 = 18;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    pub name: String,
    pub mail: String,
    pub phone_no: String,
}

impl ContactDetails {
    fn validate(&self) -> ServiceResult<()> {
        require("name", &self.name)?;
        validate_mail(&self.mail)?;
        validate_phone(&self.phone_no)
    }

    fn profile(&self) -> AccountProfile {
        AccountProfile::new(self.name.trim(), self.mail.trim(), self.phone_no.trim())
    }
}

fn validate_mail(mail: &str) -> ServiceResult<()> {
    let valid = mail
        .trim()
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(ServiceError::validation("mail must be a valid email address"));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> ServiceResult<()> {
    let phone = phone.trim();
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() < 7 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ServiceError::validation("phoneNo must contain at least 7 digits"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTenant {
    #[serde(flatten)]
    pub contact: ContactDetails,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewHospital {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(default)]
    pub address: Option<String>,
}

/// Doctor, nurse, pharmacist or receptionist.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewStaff {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(default)]
    pub department: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuardianDetails {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(default)]
    pub relation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    #[serde(flatten)]
    pub contact: ContactDetails,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub gender: Option<String>,
    /// Required when the patient is a minor.
    #[serde(default)]
    pub guardian: Option<GuardianDetails>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewGuardian {
    #[serde(flatten)]
    pub guardian: GuardianDetails,
    pub patient_id: String,
}

/// Contact fields an account owner may change.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountPatch {
    pub name: Option<String>,
    pub mail: Option<String>,
    pub phone_no: Option<String>,
}

/// Staff accounts created by a hospital.
pub trait StaffAccount: Account {
    fn assemble(meta: RecordMeta, profile: AccountProfile, department: Option<String>) -> Self;
}

impl StaffAccount for Doctor {
    fn assemble(meta: RecordMeta, profile: AccountProfile, department: Option<String>) -> Self {
        Doctor {
            meta,
            profile,
            department,
        }
    }
}

impl StaffAccount for Nurse {
    fn assemble(meta: RecordMeta, profile: AccountProfile, department: Option<String>) -> Self {
        Nurse {
            meta,
            profile,
            department,
        }
    }
}

impl StaffAccount for Pharmacist {
    fn assemble(meta: RecordMeta, profile: AccountProfile, _department: Option<String>) -> Self {
        Pharmacist { meta, profile }
    }
}

impl StaffAccount for Receptionist {
    fn assemble(meta: RecordMeta, profile: AccountProfile, _department: Option<String>) -> Self {
        Receptionist { meta, profile }
    }
}

#[derive(Clone)]
pub struct AccountService {
    repo: EntityRepository,
    notifier: Arc<dyn Notifier>,
    hasher: PasswordHasher,
    otp_ttl: Duration,
}

impl AccountService {
    pub fn new(
        repo: EntityRepository,
        notifier: Arc<dyn Notifier>,
        hasher: PasswordHasher,
        otp_ttl: Duration,
    ) -> Self {
        Self {
            repo,
            notifier,
            hasher,
            otp_ttl,
        }
    }

    pub async fn create_tenant(&self, ctx: &RequestContext, request: NewTenant) -> ServiceResult<Tenant> {
        can_create(ctx.caller(), EntityKind::Tenant)?;
        self.provision(ctx, EntityKind::Tenant.new_code(), &request.contact, |meta, profile| {
            Tenant { meta, profile }
        })
        .await
    }

    pub async fn create_hospital(
        &self,
        ctx: &RequestContext,
        request: NewHospital,
    ) -> ServiceResult<Hospital> {
        can_create(ctx.caller(), EntityKind::Hospital)?;
        let address = request.address;
        self.provision(ctx, EntityKind::Hospital.new_code(), &request.contact, |meta, profile| {
            Hospital {
                meta,
                profile,
                address,
            }
        })
        .await
    }

    pub async fn create_staff<A: StaffAccount>(
        &self,
        ctx: &RequestContext,
        request: NewStaff,
    ) -> ServiceResult<A> {
        can_create(ctx.caller(), A::KIND)?;
        let department = request.department;
        self.provision(ctx, A::KIND.new_code(), &request.contact, |meta, profile| {
            A::assemble(meta, profile, department)
        })
        .await
    }

    /// Registers a patient, and their guardian when one is supplied.
    pub async fn create_patient(
        &self,
        ctx: &RequestContext,
        request: NewPatient,
    ) -> ServiceResult<Patient> {
        can_create(ctx.caller(), EntityKind::Patient)?;
        request.contact.validate()?;

        let today = Utc::now().date_naive();
        if request.date_of_birth > today {
            return Err(ServiceError::validation("dateOfBirth cannot be in the future"));
        }
        let age = today.years_since(request.date_of_birth).unwrap_or(0);
        if age < ADULT_AGE && request.guardian.is_none() {
            return Err(ServiceError::validation(format!(
                "a guardian is required for patients under {ADULT_AGE}"
            )));
        }

        // Check the guardian up front so a failure cannot strand a patient.
        if let Some(guardian) = &request.guardian {
            guardian.contact.validate()?;
            if guardian.contact.mail.trim() == request.contact.mail.trim()
                || guardian.contact.phone_no.trim() == request.contact.phone_no.trim()
            {
                return Err(ServiceError::conflict(
                    "guardian contact details must differ from the patient's",
                ));
            }
            self.ensure_contact_unique(ctx.deadline(), &guardian.contact, None)
                .await?;
        }

        let patient_code = EntityKind::Patient.new_code();
        let guardian_code = request
            .guardian
            .as_ref()
            .map(|_| EntityKind::Guardian.new_code());

        let guardian_ids: Vec<String> = guardian_code.iter().cloned().collect();
        let patient = self
            .provision(ctx, patient_code.clone(), &request.contact, |meta, profile| Patient {
                meta,
                profile,
                date_of_birth: request.date_of_birth,
                gender: request.gender,
                guardian_ids,
                appointments: Vec::new(),
            })
            .await?;

        if let (Some(details), Some(code)) = (request.guardian, guardian_code) {
            let relation = details.relation;
            let created = self
                .provision(ctx, code, &details.contact, |meta, profile| Guardian {
                    meta,
                    profile,
                    patient_id: patient_code.clone(),
                    relation,
                })
                .await;
            if let Err(err) = created {
                self.discard(ctx, EntityKind::Patient, &patient_code).await;
                return Err(err);
            }
        }

        Ok(patient)
    }

    /// Adds a guardian to a patient the caller registered.
    pub async fn create_guardian(
        &self,
        ctx: &RequestContext,
        request: NewGuardian,
    ) -> ServiceResult<Guardian> {
        can_create(ctx.caller(), EntityKind::Guardian)?;
        let patient: Patient = self
            .repo
            .load_for_write(ctx, &request.patient_id, WriteAction::Update)
            .await?;

        let relation = request.guardian.relation;
        let patient_id = patient.code().to_string();
        let guardian = self
            .provision(
                ctx,
                EntityKind::Guardian.new_code(),
                &request.guardian.contact,
                |meta, profile| Guardian {
                    meta,
                    profile,
                    patient_id,
                    relation,
                },
            )
            .await?;

        let mut guardian_ids = patient.guardian_ids.clone();
        guardian_ids.push(guardian.code().to_string());
        self.repo
            .update::<Patient>(ctx, patient.code(), document(json!({ "guardianIds": guardian_ids })))
            .await?;

        Ok(guardian)
    }

    /// Updates contact details on the account and its login record.
    pub async fn update_contact<A: Account>(
        &self,
        ctx: &RequestContext,
        code: &str,
        patch: AccountPatch,
    ) -> ServiceResult<A> {
        let current: A = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;
        let profile = current.profile();

        let mut changes = Document::new();
        let mut login_changes = Document::new();

        if let Some(name) = patch.name {
            require("name", &name)?;
            changes.insert("name".into(), Value::String(name.trim().to_string()));
        }
        if let Some(mail) = patch.mail.map(|m| m.trim().to_string())
            && mail != profile.mail
        {
            validate_mail(&mail)?;
            self.ensure_unique(ctx.deadline(), "email", &mail, Some(code)).await?;
            changes.insert("mail".into(), Value::String(mail.clone()));
            login_changes.insert("email".into(), Value::String(mail));
        }
        if let Some(phone) = patch.phone_no.map(|p| p.trim().to_string())
            && phone != profile.phone_no
        {
            validate_phone(&phone)?;
            self.ensure_unique(ctx.deadline(), "phoneNo", &phone, Some(code)).await?;
            changes.insert("phoneNo".into(), Value::String(phone.clone()));
            login_changes.insert("phoneNo".into(), Value::String(phone));
        }

        if changes.is_empty() {
            return Err(ServiceError::validation("no changes supplied"));
        }
        if !login_changes.is_empty() {
            self.repo
                .update::<LoginRecord>(ctx, code, login_changes)
                .await?;
        }
        Ok(self.repo.update::<A>(ctx, code, changes).await?)
    }

    /// Deletes an account and its login record.
    pub async fn delete_account<A: Account>(&self, ctx: &RequestContext, code: &str) -> ServiceResult<()> {
        self.repo.delete_owned::<A>(ctx, code).await?;
        match self.repo.delete(ctx, EntityKind::Login, code).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Seeds a super-administrator with a chosen password.
    ///
    /// There is no caller above the super-administrator tier, so the new
    /// account acts as its own creator.
    pub async fn bootstrap_super_admin(
        &self,
        contact: ContactDetails,
        password: &str,
    ) -> ServiceResult<SuperAdmin> {
        contact.validate()?;
        validate_new_password(password)?;

        let code = EntityKind::SuperAdmin.new_code();
        let caller = CallerIdentity::super_admin(code.clone())
            .map_err(|err| ServiceError::validation(err.to_string()))?;
        let ctx = RequestContext::new(caller);
        self.ensure_contact_unique(ctx.deadline(), &contact, None)
            .await?;

        let meta = RecordMeta::created(&code, &code);
        let admin = SuperAdmin {
            meta: meta.clone(),
            profile: contact.profile(),
        };
        let login = LoginRecord {
            meta,
            email: admin.profile.mail.clone(),
            phone_no: admin.profile.phone_no.clone(),
            collection: Tier::SuperAdmin.collection().to_string(),
            password_hash: self.hasher.hash(password).await?,
            reset: false,
            otp_expires_at: None,
        };

        self.repo.insert(&ctx, &admin).await?;
        if let Err(err) = self.repo.insert(&ctx, &login).await {
            self.discard(&ctx, EntityKind::SuperAdmin, &code).await;
            return Err(err.into());
        }
        info!(code = %code, "Super-administrator bootstrapped");
        Ok(admin)
    }

    async fn provision<A: Account>(
        &self,
        ctx: &RequestContext,
        code: String,
        contact: &ContactDetails,
        build: impl FnOnce(RecordMeta, AccountProfile) -> A,
    ) -> ServiceResult<A> {
        contact.validate()?;
        self.ensure_contact_unique(ctx.deadline(), contact, None)
            .await?;

        let meta = self.ownership(ctx, &code).await?;
        let account = build(meta.clone(), contact.profile());

        let otp = generate_otp();
        let expires_at = Utc::now() + self.otp_ttl;
        let login = LoginRecord {
            meta,
            email: account.profile().mail.clone(),
            phone_no: account.profile().phone_no.clone(),
            collection: A::TIER.collection().to_string(),
            password_hash: self.hasher.hash(&otp).await?,
            reset: true,
            otp_expires_at: Some(expires_at),
        };

        self.repo.insert(ctx, &account).await?;
        if let Err(err) = self.repo.insert(ctx, &login).await {
            self.discard(ctx, A::KIND, &code).await;
            return Err(err.into());
        }

        info!(
            entity = %A::KIND,
            code = %code,
            created_by = ctx.caller().code(),
            "Account created"
        );

        let notice = OtpNotice {
            code,
            collection: A::TIER.collection(),
            mail: login.email,
            phone_no: login.phone_no,
            otp,
            expires_at,
        };
        if let Err(err) = self.notifier.send_otp(&notice).await {
            warn!(code = %notice.code, error = %err, "One-time password notification failed");
        }

        Ok(account)
    }

    /// Ownership fields for a record created now by the caller.
    async fn ownership(&self, ctx: &RequestContext, code: &str) -> ServiceResult<RecordMeta> {
        let caller = ctx.caller();
        let meta = RecordMeta::created(code, caller.code());
        let meta = match caller.tier() {
            Tier::SuperAdmin => meta,
            Tier::Tenant => meta.in_tenant(caller.code()),
            Tier::Hospital => meta.in_tenant(caller.tenant_id()).in_hospital(caller.code()),
            tier => {
                let hospital = self
                    .repo
                    .caller_creator(ctx, tier.entity_kind())
                    .await?;
                meta.in_tenant(caller.tenant_id()).in_hospital(hospital)
            }
        };
        Ok(meta)
    }

    async fn ensure_contact_unique(
        &self,
        deadline: Deadline,
        contact: &ContactDetails,
        except: Option<&str>,
    ) -> ServiceResult<()> {
        self.ensure_unique(deadline, "email", contact.mail.trim(), except)
            .await?;
        self.ensure_unique(deadline, "phoneNo", contact.phone_no.trim(), except)
            .await
    }

    async fn ensure_unique(
        &self,
        deadline: Deadline,
        field: &str,
        value: &str,
        except: Option<&str>,
    ) -> ServiceResult<()> {
        let existing = self
            .repo
            .find_one_by::<LoginRecord>(deadline, &Filter::new().eq(field, value))
            .await?;
        match existing {
            Some(login) if Some(login.code()) != except => Err(ServiceError::conflict(format!(
                "{field} is already registered"
            ))),
            _ => Ok(()),
        }
    }

    /// Best-effort removal of a partially provisioned account.
    async fn discard(&self, ctx: &RequestContext, kind: EntityKind, code: &str) {
        for kind in [kind, EntityKind::Login] {
            match self.repo.delete(ctx, kind, code).await {
                Ok(()) => {}
                Err(AccessError::NotFound { .. }) => {}
                Err(err) => warn!(entity = %kind, code, error = %err, "Cleanup after failed provisioning failed"),
            }
        }
    }
}
