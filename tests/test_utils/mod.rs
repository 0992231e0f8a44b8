//! Shared fixtures for the integration tests.
//!
//! Builds application state over the in-memory or SQLite document store and
//! provisions a small clinic through the account services.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use healthhub::config::{AppConfig, StoreBackend};
use healthhub::models::{Doctor, Nurse, Pharmacist, Receptionist, RecordMeta};
use healthhub::server::AppState;
use healthhub::services::accounts::{ContactDetails, NewHospital, NewStaff, NewTenant};
use healthhub::services::{Notifier, OtpNotice};
use healthhub::store::{DatabaseStore, InMemoryStore};
use healthhub::tenancy::{CallerIdentity, RequestContext, Tier};

pub const ADMIN_PASSWORD: &str = "admin-password-1";

/// Keeps every issued one-time password so tests can log in with it.
#[derive(Default)]
pub struct CapturingNotifier {
    notices: Mutex<Vec<OtpNotice>>,
}

impl CapturingNotifier {
    #[allow(dead_code)]
    pub fn otp_for(&self, code: &str) -> Option<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|notice| notice.code == code)
            .map(|notice| notice.otp.clone())
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_otp(&self, notice: &OtpNotice) -> anyhow::Result<()> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        // Lowest bcrypt cost keeps the suites fast.
        password_hash_cost: 4,
        ..Default::default()
    }
}

/// State over a fresh in-memory store.
#[allow(dead_code)]
pub fn memory_state() -> (AppState, Arc<CapturingNotifier>) {
    let notifier = Arc::new(CapturingNotifier::default());
    let state = AppState::new(
        Arc::new(test_config()),
        Arc::new(InMemoryStore::new()),
        notifier.clone(),
    );
    (state, notifier)
}

/// State over a migrated in-memory SQLite database.
#[allow(dead_code)]
pub async fn sqlite_state() -> Result<(AppState, Arc<CapturingNotifier>)> {
    let config = AppConfig {
        store_backend: StoreBackend::Database,
        database_url: "sqlite::memory:".to_string(),
        ..test_config()
    };
    let db = healthhub::db::init_pool(&config).await?;
    let notifier = Arc::new(CapturingNotifier::default());
    let state = AppState::new(
        Arc::new(config),
        Arc::new(DatabaseStore::new(Arc::new(db.clone()))),
        notifier.clone(),
    )
    .with_database(db);
    Ok((state, notifier))
}

pub fn ctx(caller: CallerIdentity) -> RequestContext {
    RequestContext::new(caller)
}

#[allow(dead_code)]
pub fn member(code: &str, tier: Tier, tenant: &str) -> RequestContext {
    ctx(CallerIdentity::member(code, tier, tenant).unwrap())
}

#[allow(dead_code)]
pub fn super_admin_ctx() -> RequestContext {
    ctx(CallerIdentity::super_admin("SUP-ROOT").unwrap())
}

/// Contact details unique per `n`.
pub fn contact(name: &str, n: u32) -> ContactDetails {
    ContactDetails {
        name: name.to_string(),
        mail: format!("{}{n}@example.com", name.to_lowercase()),
        phone_no: format!("90000{n:05}"),
    }
}

/// Ownership fields of a record created by `creator` inside a hospital.
#[allow(dead_code)]
pub fn meta_in(code: &str, creator: &str, tenant: &str, hospital: &str) -> RecordMeta {
    RecordMeta::created(code, creator)
        .in_tenant(tenant)
        .in_hospital(hospital)
}

/// One tenant with one hospital and one of each staff role.
#[allow(dead_code)]
pub struct Clinic {
    pub super_admin: RequestContext,
    pub tenant: RequestContext,
    pub hospital: RequestContext,
    pub doctor: RequestContext,
    pub nurse: RequestContext,
    pub pharmacist: RequestContext,
    pub receptionist: RequestContext,
}

#[allow(dead_code)]
impl Clinic {
    pub fn tenant_id(&self) -> &str {
        self.tenant.caller().code()
    }

    pub fn hospital_id(&self) -> &str {
        self.hospital.caller().code()
    }
}

/// Provisions a clinic through the account services. `seed` keeps contact
/// details unique when a test builds several.
#[allow(dead_code)]
pub async fn provision_clinic(state: &AppState, seed: u32) -> Result<Clinic> {
    let base = seed * 100;
    let admin = state
        .accounts
        .bootstrap_super_admin(contact("Root", base), ADMIN_PASSWORD)
        .await?;
    let super_admin = ctx(CallerIdentity::super_admin(admin.meta.code.clone())?);

    let tenant = state
        .accounts
        .create_tenant(
            &super_admin,
            NewTenant {
                contact: contact("Tenant", base + 1),
            },
        )
        .await?;
    let tenant_id = tenant.meta.code.clone();
    let tenant_ctx = ctx(CallerIdentity::tenant(tenant_id.clone())?);

    let hospital = state
        .accounts
        .create_hospital(
            &tenant_ctx,
            NewHospital {
                contact: contact("Hospital", base + 2),
                address: Some("1 Main Road".to_string()),
            },
        )
        .await?;
    let hospital_ctx = member(&hospital.meta.code, Tier::Hospital, &tenant_id);

    let staff = |name: &str, n: u32| NewStaff {
        contact: contact(name, base + n),
        department: None,
    };
    let doctor: Doctor = state
        .accounts
        .create_staff(&hospital_ctx, staff("Doctor", 3))
        .await?;
    let nurse: Nurse = state
        .accounts
        .create_staff(&hospital_ctx, staff("Nurse", 4))
        .await?;
    let pharmacist: Pharmacist = state
        .accounts
        .create_staff(&hospital_ctx, staff("Pharmacist", 5))
        .await?;
    let receptionist: Receptionist = state
        .accounts
        .create_staff(&hospital_ctx, staff("Receptionist", 6))
        .await?;

    Ok(Clinic {
        super_admin,
        doctor: member(&doctor.meta.code, Tier::Doctor, &tenant_id),
        nurse: member(&nurse.meta.code, Tier::Nurse, &tenant_id),
        pharmacist: member(&pharmacist.meta.code, Tier::Pharmacist, &tenant_id),
        receptionist: member(&receptionist.meta.code, Tier::Receptionist, &tenant_id),
        tenant: tenant_ctx,
        hospital: hospital_ctx,
    })
}
