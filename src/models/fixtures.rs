//! Record builders shared by unit tests.

use chrono::NaiveDate;

use super::*;

pub fn profile(name: &str) -> AccountProfile {
    AccountProfile::new(name, format!("{}@example.com", name.to_lowercase()), "9000000000")
}

pub fn tenant(code: &str, super_admin: &str) -> Tenant {
    Tenant {
        meta: RecordMeta::created(code, super_admin),
        profile: profile(code),
    }
}

pub fn hospital(code: &str, tenant: &str) -> Hospital {
    Hospital {
        meta: RecordMeta::created(code, tenant).in_tenant(tenant),
        profile: profile(code),
        address: None,
    }
}

pub fn doctor(code: &str, hospital: &str, tenant: &str) -> Doctor {
    Doctor {
        meta: RecordMeta::created(code, hospital)
            .in_tenant(tenant)
            .in_hospital(hospital),
        profile: profile(code),
        department: Some("Cardiology".into()),
    }
}

pub fn nurse(code: &str, hospital: &str, tenant: &str) -> Nurse {
    Nurse {
        meta: RecordMeta::created(code, hospital)
            .in_tenant(tenant)
            .in_hospital(hospital),
        profile: profile(code),
        department: None,
    }
}

pub fn receptionist(code: &str, hospital: &str, tenant: &str) -> Receptionist {
    Receptionist {
        meta: RecordMeta::created(code, hospital)
            .in_tenant(tenant)
            .in_hospital(hospital),
        profile: profile(code),
    }
}

pub fn patient(code: &str, receptionist: &str, hospital: &str, tenant: &str) -> Patient {
    Patient {
        meta: RecordMeta::created(code, receptionist)
            .in_tenant(tenant)
            .in_hospital(hospital),
        profile: profile(code),
        date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
        gender: None,
        guardian_ids: vec![],
        appointments: vec![],
    }
}

pub fn appointment(code: &str, receptionist: &str, hospital: &str, doctor: &str) -> Appointment {
    Appointment {
        meta: RecordMeta::created(code, receptionist)
            .in_tenant("TEN1")
            .in_hospital(hospital),
        patient_id: "PAT1".into(),
        doctor_id: doctor.into(),
        nurse_id: "NUR1".into(),
        date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        time: "10:30".into(),
        medical_record_id: "MED1".into(),
        reason: None,
        status: AppointmentStatus::Scheduled,
        is_processing: true,
    }
}

pub fn consent(code: &str, nurse: &str, guardian: Option<&str>) -> Consent {
    Consent {
        meta: RecordMeta::created(code, nurse)
            .in_tenant("TEN1")
            .in_hospital("HOS1"),
        medical_record_id: "MED1".into(),
        patient_id: "PAT1".into(),
        guardian_id: guardian.map(str::to_string),
        consent_type: "Surgery".into(),
        granted: true,
        notes: None,
    }
}
