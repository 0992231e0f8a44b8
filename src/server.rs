//! # Server Configuration
//!
//! Shared application state, the axum router and the OpenAPI document.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{TokenIssuer, auth_middleware};
use crate::cache::MemoryCache;
use crate::config::{AppConfig, StoreBackend};
use crate::handlers::{self, accounts, auth, clinical, pharmacy, roles};
use crate::passwords::PasswordHasher;
use crate::repositories::EntityRepository;
use crate::services::{
    AccountService, AppointmentService, AuthService, ConsentService, LabTestService,
    LogNotifier, LoginAttemptTracker, MedicalRecordService, Notifier, PharmacyService,
    PrescriptionService, RoleService, TestReportService,
};
use crate::store::{DatabaseStore, DocumentStore, InMemoryStore};
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: TokenIssuer,
    pub repo: EntityRepository,
    /// Present when documents live in the database; used by `/health`.
    pub db: Option<DatabaseConnection>,
    pub accounts: AccountService,
    pub auth: AuthService,
    pub appointments: AppointmentService,
    pub medical_records: MedicalRecordService,
    pub prescriptions: PrescriptionService,
    pub pharmacy: PharmacyService,
    pub lab_tests: LabTestService,
    pub consents: ConsentService,
    pub test_reports: TestReportService,
    pub roles: RoleService,
}

impl AppState {
    /// Wires every service over `store` and a fresh in-process cache.
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cache = Arc::new(MemoryCache::with_capacity(config.cache_capacity));
        let repo = EntityRepository::new(
            store,
            cache,
            Duration::from_secs(config.cache_ttl_seconds),
        );
        let tokens = TokenIssuer::from_config(&config);
        let tracker = Arc::new(LoginAttemptTracker::new());
        let otp_ttl = chrono::Duration::seconds(i64::try_from(config.otp_ttl_seconds).unwrap_or(i64::MAX));
        let hasher = PasswordHasher::new(config.password_hash_cost);

        Self {
            accounts: AccountService::new(repo.clone(), notifier, hasher, otp_ttl),
            auth: AuthService::new(
                repo.clone(),
                tracker,
                tokens.clone(),
                hasher,
                config.max_login_attempts,
            ),
            appointments: AppointmentService::new(repo.clone()),
            medical_records: MedicalRecordService::new(repo.clone()),
            prescriptions: PrescriptionService::new(repo.clone()),
            pharmacy: PharmacyService::new(repo.clone(), config.bill_service_charge),
            lab_tests: LabTestService::new(repo.clone()),
            consents: ConsentService::new(repo.clone()),
            test_reports: TestReportService::new(repo.clone()),
            roles: RoleService::new(repo.clone()),
            db: None,
            repo,
            tokens,
            config,
        }
    }

    pub fn with_database(mut self, db: DatabaseConnection) -> Self {
        self.db = Some(db);
        self
    }
}

/// Builds the state for the configured store backend, connecting and
/// migrating the database when one is used.
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let config = Arc::new(config);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    match config.store_backend {
        StoreBackend::Memory => {
            info!("Using in-memory document store");
            Ok(AppState::new(config, Arc::new(InMemoryStore::new()), notifier))
        }
        StoreBackend::Database => {
            let db = crate::db::init_pool(&config).await?;
            let store = Arc::new(DatabaseStore::new(Arc::new(db.clone())));
            Ok(AppState::new(config, store, notifier).with_database(db))
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/auth/login", post(auth::login));

    let protected = Router::new()
        .route("/auth/password", post(auth::change_password))
        // Accounts
        .route(
            "/tenants",
            get(accounts::list_tenants).post(accounts::create_tenant),
        )
        .route(
            "/tenants/{code}",
            get(accounts::get_tenant)
                .patch(accounts::update_tenant)
                .delete(accounts::delete_tenant),
        )
        .route("/tenants/{code}/unlock", post(accounts::unlock_tenant))
        .route(
            "/hospitals",
            get(accounts::list_hospitals).post(accounts::create_hospital),
        )
        .route(
            "/hospitals/{code}",
            get(accounts::get_hospital)
                .patch(accounts::update_hospital)
                .delete(accounts::delete_hospital),
        )
        .route("/hospitals/{code}/unlock", post(accounts::unlock_hospital))
        .route(
            "/doctors",
            get(accounts::list_doctors).post(accounts::create_doctor),
        )
        .route(
            "/doctors/{code}",
            get(accounts::get_doctor)
                .patch(accounts::update_doctor)
                .delete(accounts::delete_doctor),
        )
        .route("/doctors/{code}/unlock", post(accounts::unlock_doctor))
        .route(
            "/nurses",
            get(accounts::list_nurses).post(accounts::create_nurse),
        )
        .route(
            "/nurses/{code}",
            get(accounts::get_nurse)
                .patch(accounts::update_nurse)
                .delete(accounts::delete_nurse),
        )
        .route("/nurses/{code}/unlock", post(accounts::unlock_nurse))
        .route(
            "/pharmacists",
            get(accounts::list_pharmacists).post(accounts::create_pharmacist),
        )
        .route(
            "/pharmacists/{code}",
            get(accounts::get_pharmacist)
                .patch(accounts::update_pharmacist)
                .delete(accounts::delete_pharmacist),
        )
        .route(
            "/pharmacists/{code}/unlock",
            post(accounts::unlock_pharmacist),
        )
        .route(
            "/receptionists",
            get(accounts::list_receptionists).post(accounts::create_receptionist),
        )
        .route(
            "/receptionists/{code}",
            get(accounts::get_receptionist)
                .patch(accounts::update_receptionist)
                .delete(accounts::delete_receptionist),
        )
        .route(
            "/receptionists/{code}/unlock",
            post(accounts::unlock_receptionist),
        )
        .route(
            "/patients",
            get(accounts::list_patients).post(accounts::create_patient),
        )
        .route(
            "/patients/{code}",
            get(accounts::get_patient)
                .patch(accounts::update_patient)
                .delete(accounts::delete_patient),
        )
        .route("/patients/{code}/unlock", post(accounts::unlock_patient))
        .route(
            "/guardians",
            get(accounts::list_guardians).post(accounts::create_guardian),
        )
        .route(
            "/guardians/{code}",
            get(accounts::get_guardian)
                .patch(accounts::update_guardian)
                .delete(accounts::delete_guardian),
        )
        .route("/guardians/{code}/unlock", post(accounts::unlock_guardian))
        // Clinical
        .route(
            "/appointments",
            get(clinical::list_appointments).post(clinical::book_appointment),
        )
        .route(
            "/appointments/{code}",
            get(clinical::get_appointment)
                .patch(clinical::update_appointment)
                .delete(clinical::delete_appointment),
        )
        .route("/medical-records", get(clinical::list_medical_records))
        .route(
            "/medical-records/{code}",
            get(clinical::get_medical_record).patch(clinical::update_medical_record),
        )
        .route(
            "/prescriptions",
            get(clinical::list_prescriptions).post(clinical::create_prescription),
        )
        .route(
            "/prescriptions/{code}",
            get(clinical::get_prescription)
                .patch(clinical::update_prescription)
                .delete(clinical::delete_prescription),
        )
        .route(
            "/consents",
            get(clinical::list_consents).post(clinical::create_consent),
        )
        .route(
            "/consents/{code}",
            get(clinical::get_consent)
                .patch(clinical::update_consent)
                .delete(clinical::delete_consent),
        )
        .route(
            "/test-reports",
            get(clinical::list_test_reports).post(clinical::create_test_reports),
        )
        .route(
            "/test-reports/{code}",
            get(clinical::get_test_report).patch(clinical::update_test_report),
        )
        .route(
            "/patients/{code}/test-reports",
            get(clinical::patient_test_reports),
        )
        // Pharmacy, lab tests and billing
        .route(
            "/medicines",
            get(pharmacy::list_medicines).post(pharmacy::create_medicine),
        )
        .route(
            "/medicines/{code}",
            get(pharmacy::get_medicine)
                .patch(pharmacy::update_medicine)
                .delete(pharmacy::delete_medicine),
        )
        .route(
            "/lab-tests",
            get(pharmacy::list_lab_tests).post(pharmacy::create_lab_test),
        )
        .route(
            "/lab-tests/{code}",
            get(pharmacy::get_lab_test)
                .patch(pharmacy::update_lab_test)
                .delete(pharmacy::delete_lab_test),
        )
        .route(
            "/bills",
            get(pharmacy::list_bills).post(pharmacy::create_bill),
        )
        .route(
            "/bills/{code}",
            get(pharmacy::get_bill).patch(pharmacy::update_bill),
        )
        // Roles
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route(
            "/roles/{code}",
            get(roles::get_role)
                .patch(roles::update_role)
                .delete(roles::delete_role),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(trace_context_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let profile = config.profile.clone();
    let state = build_state(config).await?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "HealthHub listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}

/// Registers the bearer token scheme referenced by protected paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root,
        handlers::health,
        auth::login,
        auth::change_password,
        accounts::list_tenants,
        accounts::create_tenant,
        accounts::get_tenant,
        accounts::update_tenant,
        accounts::delete_tenant,
        accounts::unlock_tenant,
        accounts::list_hospitals,
        accounts::create_hospital,
        accounts::get_hospital,
        accounts::update_hospital,
        accounts::delete_hospital,
        accounts::unlock_hospital,
        accounts::list_doctors,
        accounts::create_doctor,
        accounts::get_doctor,
        accounts::update_doctor,
        accounts::delete_doctor,
        accounts::unlock_doctor,
        accounts::list_nurses,
        accounts::create_nurse,
        accounts::get_nurse,
        accounts::update_nurse,
        accounts::delete_nurse,
        accounts::unlock_nurse,
        accounts::list_pharmacists,
        accounts::create_pharmacist,
        accounts::get_pharmacist,
        accounts::update_pharmacist,
        accounts::delete_pharmacist,
        accounts::unlock_pharmacist,
        accounts::list_receptionists,
        accounts::create_receptionist,
        accounts::get_receptionist,
        accounts::update_receptionist,
        accounts::delete_receptionist,
        accounts::unlock_receptionist,
        accounts::list_patients,
        accounts::create_patient,
        accounts::get_patient,
        accounts::update_patient,
        accounts::delete_patient,
        accounts::unlock_patient,
        accounts::list_guardians,
        accounts::create_guardian,
        accounts::get_guardian,
        accounts::update_guardian,
        accounts::delete_guardian,
        accounts::unlock_guardian,
        clinical::list_appointments,
        clinical::book_appointment,
        clinical::get_appointment,
        clinical::update_appointment,
        clinical::delete_appointment,
        clinical::list_medical_records,
        clinical::get_medical_record,
        clinical::update_medical_record,
        clinical::list_prescriptions,
        clinical::create_prescription,
        clinical::get_prescription,
        clinical::update_prescription,
        clinical::delete_prescription,
        clinical::list_consents,
        clinical::create_consent,
        clinical::get_consent,
        clinical::update_consent,
        clinical::delete_consent,
        clinical::list_test_reports,
        clinical::create_test_reports,
        clinical::get_test_report,
        clinical::update_test_report,
        clinical::patient_test_reports,
        pharmacy::list_medicines,
        pharmacy::create_medicine,
        pharmacy::get_medicine,
        pharmacy::update_medicine,
        pharmacy::delete_medicine,
        pharmacy::list_lab_tests,
        pharmacy::create_lab_test,
        pharmacy::get_lab_test,
        pharmacy::update_lab_test,
        pharmacy::delete_lab_test,
        pharmacy::list_bills,
        pharmacy::create_bill,
        pharmacy::get_bill,
        pharmacy::update_bill,
        roles::list_roles,
        roles::create_role,
        roles::get_role,
        roles::update_role,
        roles::delete_role,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::EntityKind,
            crate::models::RecordMeta,
            crate::models::AccountProfile,
            crate::models::Tenant,
            crate::models::Hospital,
            crate::models::Doctor,
            crate::models::Nurse,
            crate::models::Pharmacist,
            crate::models::Receptionist,
            crate::models::Patient,
            crate::models::Guardian,
            crate::models::Appointment,
            crate::models::AppointmentStatus,
            crate::models::MedicalRecord,
            crate::models::MedicalRecordStatus,
            crate::models::Vitals,
            crate::models::Prescription,
            crate::models::PrescribedMedicine,
            crate::models::Frequency,
            crate::models::Consent,
            crate::models::TestReport,
            crate::models::Role,
            crate::models::Privilege,
            crate::models::Medicine,
            crate::models::LabTest,
            crate::models::Bill,
            crate::models::BillLine,
            crate::models::BillTest,
            crate::models::BillStatus,
            crate::tenancy::Tier,
            crate::error::ApiError,
            crate::handlers::HealthStatus,
            crate::services::auth::LoginRequest,
            crate::services::auth::LoginResponse,
            crate::services::auth::ChangePassword,
            crate::services::accounts::ContactDetails,
            crate::services::accounts::NewTenant,
            crate::services::accounts::NewHospital,
            crate::services::accounts::NewStaff,
            crate::services::accounts::NewPatient,
            crate::services::accounts::GuardianDetails,
            crate::services::accounts::NewGuardian,
            crate::services::accounts::AccountPatch,
            crate::services::appointments::BookAppointment,
            crate::services::appointments::AppointmentPatch,
            crate::services::medical_records::MedicalRecordPatch,
            crate::services::prescriptions::NewPrescription,
            crate::services::prescriptions::PrescriptionPatch,
            crate::services::consents::NewConsent,
            crate::services::consents::ConsentPatch,
            crate::services::test_reports::NewTestReports,
            crate::services::test_reports::TestReportPatch,
            crate::services::roles::NewRole,
            crate::services::roles::RolePatch,
            crate::services::pharmacy::NewMedicine,
            crate::services::pharmacy::MedicinePatch,
            crate::services::pharmacy::NewBill,
            crate::services::pharmacy::BillPatch,
            crate::services::lab_tests::NewLabTest,
            crate::services::lab_tests::LabTestPatch,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "auth", description = "Login and password management"),
        (name = "tenants", description = "Tenant accounts"),
        (name = "hospitals", description = "Hospital accounts"),
        (name = "staff", description = "Doctors, nurses, pharmacists and receptionists"),
        (name = "patients", description = "Patients and guardians"),
        (name = "appointments", description = "Appointment booking"),
        (name = "medical-records", description = "Visit records"),
        (name = "prescriptions", description = "Prescriptions"),
        (name = "consents", description = "Patient consent"),
        (name = "test-reports", description = "Lab test reports"),
        (name = "roles", description = "Roles and privileges"),
        (name = "pharmacy", description = "Medicine stock"),
        (name = "lab-tests", description = "Lab test catalogue"),
        (name = "bills", description = "Billing"),
    ),
    info(
        title = "HealthHub API",
        description = "Multi-tenant hospital management API",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
