//! The service stack over the SQLite-backed document store.

mod test_utils;

use std::sync::Arc;

use chrono::NaiveDate;
use healthhub::access::AccessError;
use healthhub::models::{Doctor, Patient};
use healthhub::server::AppState;
use healthhub::services::ServiceError;
use healthhub::services::accounts::{NewPatient, NewStaff};
use healthhub::services::auth::LoginRequest;
use healthhub::store::{DatabaseStore, DocumentStore, Filter, document};
use healthhub::tenancy::Deadline;
use serde_json::json;

use test_utils::{contact, provision_clinic, sqlite_state};

/// A second application state over the same database, with a cold cache.
fn reopen(state: &AppState) -> AppState {
    let db = state.db.clone().expect("database-backed state");
    AppState::new(
        state.config.clone(),
        Arc::new(DatabaseStore::new(Arc::new(db.clone()))),
        Arc::new(healthhub::services::LogNotifier),
    )
    .with_database(db)
}

#[tokio::test]
async fn clinic_provisioned_on_sqlite_is_scoped_and_persistent() {
    let (state, notifier) = sqlite_state().await.unwrap();
    let clinic = provision_clinic(&state, 21).await.unwrap();

    let second: Doctor = state
        .accounts
        .create_staff(
            &clinic.hospital,
            NewStaff {
                contact: contact("Surgeon", 2107),
                department: Some("Surgery".into()),
            },
        )
        .await
        .unwrap();

    let reopened = reopen(&state);
    let mut doctors: Vec<String> = reopened
        .repo
        .list_with_scope::<Doctor>(&clinic.hospital)
        .await
        .unwrap()
        .into_iter()
        .map(|doctor| doctor.meta.code)
        .collect();
    doctors.sort();
    let mut expected = vec![
        clinic.doctor.caller().code().to_string(),
        second.meta.code.clone(),
    ];
    expected.sort();
    assert_eq!(doctors, expected);

    let fetched: Doctor = reopened
        .repo
        .fetch_by_code(&clinic.tenant, &second.meta.code)
        .await
        .unwrap();
    assert_eq!(fetched.department.as_deref(), Some("Surgery"));
    assert_eq!(fetched.meta.hospital_id.as_deref(), Some(clinic.hospital_id()));

    let doctor = clinic.doctor.caller().code();
    let otp = notifier.otp_for(doctor).unwrap();
    let response = reopened
        .auth
        .login(
            Deadline::none(),
            LoginRequest {
                identifier: doctor.to_string(),
                password: otp,
            },
        )
        .await
        .unwrap();
    assert!(response.reset_required);
}

#[tokio::test]
async fn updates_reach_a_second_process() {
    let (state, _) = sqlite_state().await.unwrap();
    let clinic = provision_clinic(&state, 22).await.unwrap();
    let patient = state
        .accounts
        .create_patient(
            &clinic.receptionist,
            NewPatient {
                contact: contact("Patient", 2201),
                date_of_birth: NaiveDate::from_ymd_opt(1975, 9, 30).unwrap(),
                gender: None,
                guardian: None,
            },
        )
        .await
        .unwrap();

    let reopened = reopen(&state);
    let before: Patient = reopened
        .repo
        .fetch_by_code(&clinic.receptionist, &patient.meta.code)
        .await
        .unwrap();
    assert_eq!(before.gender, None);

    state
        .repo
        .update_owned::<Patient>(
            &clinic.receptionist,
            &patient.meta.code,
            document(json!({ "gender": "M", "tenantId": "SOMEONE-ELSE" })),
        )
        .await
        .unwrap();

    // The other process's cache still holds the old copy until it expires.
    reopened
        .repo
        .invalidate(&clinic.receptionist, healthhub::models::EntityKind::Patient, &patient.meta.code)
        .await;
    let after: Patient = reopened
        .repo
        .fetch_by_code(&clinic.receptionist, &patient.meta.code)
        .await
        .unwrap();
    assert_eq!(after.gender.as_deref(), Some("M"));
    assert_eq!(after.meta.tenant_id.as_deref(), Some(clinic.tenant_id()));
}

#[tokio::test]
async fn duplicate_contacts_conflict_on_sqlite() {
    let (state, _) = sqlite_state().await.unwrap();
    let clinic = provision_clinic(&state, 23).await.unwrap();

    let reused = state
        .accounts
        .create_staff::<Doctor>(
            &clinic.hospital,
            NewStaff {
                contact: contact("Doctor", 2303),
                department: None,
            },
        )
        .await;
    assert!(matches!(reused, Err(ServiceError::Conflict(_))));
}

#[tokio::test]
async fn rows_missing_ownership_fields_are_malformed() {
    let (state, _) = sqlite_state().await.unwrap();
    let clinic = provision_clinic(&state, 24).await.unwrap();
    let db = state.db.clone().unwrap();
    let store = DatabaseStore::new(Arc::new(db));

    store
        .insert_one(
            "DOCTOR",
            document(json!({
                "code": "DOC-ORPHAN",
                "createdBy": clinic.hospital_id(),
                "name": "Orphan",
                "mail": "orphan@example.com",
                "phoneNo": "9000002499"
            })),
        )
        .await
        .unwrap();

    let by_tenant = state
        .repo
        .fetch_by_code::<Doctor>(&clinic.tenant, "DOC-ORPHAN")
        .await;
    assert!(matches!(by_tenant, Err(AccessError::MalformedRecord { .. })), "{by_tenant:?}");

    // The hospital anchor is present, so the hospital still reads it.
    let by_hospital = state
        .repo
        .fetch_by_code::<Doctor>(&clinic.hospital, "DOC-ORPHAN")
        .await;
    assert!(by_hospital.is_ok(), "{by_hospital:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_merges_keep_every_field() {
    let (state, _) = sqlite_state().await.unwrap();
    let store = DatabaseStore::new(Arc::new(state.db.clone().unwrap()));
    store
        .insert_one("MEDICINE", document(json!({ "code": "MED-SHARED" })))
        .await
        .unwrap();

    let writers: Vec<_> = (0..20)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_one(
                        "MEDICINE",
                        &Filter::by_code("MED-SHARED"),
                        document(json!({ (format!("field{i}")): i })),
                    )
                    .await
            })
        })
        .collect();
    for writer in writers {
        assert_eq!(writer.await.unwrap().unwrap(), 1);
    }

    let merged = store
        .find_one("MEDICINE", &Filter::by_code("MED-SHARED"))
        .await
        .unwrap()
        .unwrap();
    for i in 0..20 {
        assert_eq!(merged[&format!("field{i}")], json!(i), "field{i} was lost");
    }
}
