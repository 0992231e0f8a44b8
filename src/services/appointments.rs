//! Appointment booking and lifecycle.
//!
//! Booking opens a medical record for the visit and appends the appointment
//! to the patient's history. A patient has at most one open visit at a time.

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult, hospital_of, load_in_hospital};
use crate::access::{AccessError, WriteAction, can_create};
use crate::models::{
    Appointment, AppointmentStatus, Doctor, Entity, EntityKind, MedicalRecord, MedicalRecordStatus,
    Nurse, Patient, RecordMeta, Vitals,
};
use crate::repositories::EntityRepository;
use crate::store::{Document, Filter, document};
use crate::tenancy::{Deadline, RequestContext, Tier};

/// Collection of slot markers, one per booked doctor, date and time.
const SLOT_COLLECTION: &str = "SLOT";

/// Conditional history writes attempted before a booking gives up.
const HISTORY_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookAppointment {
    pub patient_id: String,
    pub doctor_id: String,
    pub nurse_id: String,
    pub date: NaiveDate,
    /// `HH:MM`, 24-hour clock.
    pub time: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPatch {
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub nurse_id: Option<String>,
    pub reason: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentPatch {
    fn touches_schedule(&self) -> bool {
        self.date.is_some() || self.time.is_some() || self.nurse_id.is_some() || self.reason.is_some()
    }
}

#[derive(Clone)]
pub struct AppointmentService {
    repo: EntityRepository,
}

impl AppointmentService {
    pub fn new(repo: EntityRepository) -> Self {
        Self { repo }
    }

    /// Books a visit for a patient of the receptionist's hospital.
    pub async fn book(&self, ctx: &RequestContext, request: BookAppointment) -> ServiceResult<Appointment> {
        can_create(ctx.caller(), EntityKind::Appointment)?;
        let time = normalize_time(&request.time)?;
        if request.date < Utc::now().date_naive() {
            return Err(ServiceError::validation("date cannot be in the past"));
        }

        let hospital = self
            .repo
            .caller_creator(ctx, EntityKind::Appointment)
            .await?;
        let deadline = ctx.deadline();
        let patient: Patient =
            load_in_hospital(&self.repo, deadline, &hospital, &request.patient_id).await?;
        let doctor: Doctor =
            load_in_hospital(&self.repo, deadline, &hospital, &request.doctor_id).await?;
        let nurse: Nurse = load_in_hospital(&self.repo, deadline, &hospital, &request.nurse_id).await?;

        self.ensure_no_open_visit(deadline, &patient).await?;

        let caller = ctx.caller();
        let appointment_code = EntityKind::Appointment.new_code();
        let record_code = EntityKind::MedicalRecord.new_code();
        let meta = |code: &str| {
            RecordMeta::created(code, caller.code())
                .in_tenant(caller.tenant_id())
                .in_hospital(hospital.as_str())
        };

        let slot = slot_key(doctor.code(), request.date, &time);
        self.claim_slot(deadline, &slot, &appointment_code).await?;

        let record = MedicalRecord {
            meta: meta(&record_code),
            appointment_id: appointment_code.clone(),
            patient_id: patient.code().to_string(),
            doctor_id: doctor.code().to_string(),
            nurse_id: nurse.code().to_string(),
            reason: request.reason.clone(),
            vitals: Vitals::default(),
            diagnosis: None,
            tests: Vec::new(),
            status: MedicalRecordStatus::Open,
            prescription_id: None,
            bill_id: None,
            test_reports: Vec::new(),
        };
        let appointment = Appointment {
            meta: meta(&appointment_code),
            patient_id: patient.code().to_string(),
            doctor_id: doctor.code().to_string(),
            nurse_id: nurse.code().to_string(),
            date: request.date,
            time,
            medical_record_id: record_code.clone(),
            reason: request.reason,
            status: AppointmentStatus::Scheduled,
            is_processing: true,
        };

        if let Err(err) = self.repo.insert(ctx, &record).await {
            self.release_slot(deadline, &slot, &appointment_code).await;
            return Err(err.into());
        }
        if let Err(err) = self.repo.insert(ctx, &appointment).await {
            self.discard(ctx, EntityKind::MedicalRecord, &record_code).await;
            self.release_slot(deadline, &slot, &appointment_code).await;
            return Err(err.into());
        }
        if let Err(err) = self.open_visit(ctx, patient, &appointment_code).await {
            self.discard(ctx, EntityKind::Appointment, &appointment_code).await;
            self.discard(ctx, EntityKind::MedicalRecord, &record_code).await;
            self.release_slot(deadline, &slot, &appointment_code).await;
            return Err(err);
        }

        info!(
            appointment = %appointment_code,
            patient = appointment.patient_id.as_str(),
            doctor = appointment.doctor_id.as_str(),
            "Appointment booked"
        );
        Ok(appointment)
    }

    /// Reschedules or advances an appointment.
    ///
    /// The booking receptionist may change anything; the assigned doctor may
    /// only move the status forward.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        code: &str,
        patch: AppointmentPatch,
    ) -> ServiceResult<Appointment> {
        let current: Appointment = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;

        if ctx.caller().tier() == Tier::Doctor && patch.touches_schedule() {
            return Err(ServiceError::validation(
                "doctors may only change the appointment status",
            ));
        }
        if current.status.is_closed() {
            return Err(ServiceError::conflict(format!(
                "appointment '{code}' is already {:?}",
                current.status
            )));
        }

        let deadline = ctx.deadline();
        let current_slot = slot_key(&current.doctor_id, current.date, &current.time);
        let mut new_slot = None;
        let mut changes = Document::new();
        let mut record_changes = Document::new();

        if patch.date.is_some() || patch.time.is_some() {
            let date = patch.date.unwrap_or(current.date);
            let time = match &patch.time {
                Some(time) => normalize_time(time)?,
                None => current.time.clone(),
            };
            if date < Utc::now().date_naive() {
                return Err(ServiceError::validation("date cannot be in the past"));
            }
            let slot = slot_key(&current.doctor_id, date, &time);
            if slot != current_slot {
                new_slot = Some(slot);
            }
            changes.insert("date".into(), json!(date));
            changes.insert("time".into(), Value::String(time));
        }

        if let Some(nurse_id) = &patch.nurse_id {
            let nurse: Nurse =
                load_in_hospital(&self.repo, deadline, hospital_of(&current)?, nurse_id).await?;
            changes.insert("nurseId".into(), Value::String(nurse.code().to_string()));
            record_changes.insert("nurseId".into(), Value::String(nurse.code().to_string()));
        }

        if let Some(reason) = patch.reason {
            changes.insert("reason".into(), Value::String(reason.clone()));
            record_changes.insert("reason".into(), Value::String(reason));
        }

        if let Some(status) = patch.status {
            if !can_transition(current.status, status) {
                return Err(ServiceError::conflict(format!(
                    "cannot move appointment from {:?} to {status:?}",
                    current.status
                )));
            }
            changes.insert("status".into(), json!(status));
            if status.is_closed() {
                changes.insert("isProcessing".into(), Value::Bool(false));
            }
            if status == AppointmentStatus::Cancelled {
                record_changes.insert("status".into(), json!(MedicalRecordStatus::Closed));
            }
        }

        if changes.is_empty() {
            return Err(ServiceError::validation("no changes supplied"));
        }

        if let Some(slot) = &new_slot {
            self.claim_slot(deadline, slot, code).await?;
        }
        let cancelled = patch.status == Some(AppointmentStatus::Cancelled);
        let updated = self
            .apply_update(ctx, code, &current.medical_record_id, changes, record_changes)
            .await;
        match updated {
            Ok(appointment) => {
                if new_slot.is_some() || cancelled {
                    self.release_slot(deadline, &current_slot, code).await;
                }
                Ok(appointment)
            }
            Err(err) => {
                if let Some(slot) = &new_slot {
                    self.release_slot(deadline, slot, code).await;
                }
                Err(err)
            }
        }
    }

    async fn apply_update(
        &self,
        ctx: &RequestContext,
        code: &str,
        record_id: &str,
        changes: Document,
        record_changes: Document,
    ) -> ServiceResult<Appointment> {
        if !record_changes.is_empty() {
            self.repo
                .update::<MedicalRecord>(ctx, record_id, record_changes)
                .await?;
        }
        Ok(self.repo.update(ctx, code, changes).await?)
    }

    /// Deletes an appointment together with its medical record.
    pub async fn delete(&self, ctx: &RequestContext, code: &str) -> ServiceResult<()> {
        let current: Appointment = self
            .repo
            .load_for_write(ctx, code, WriteAction::Delete)
            .await?;

        if let Some(record) = self
            .repo
            .load_by_code::<MedicalRecord>(ctx.deadline(), &current.medical_record_id)
            .await?
        {
            if record.prescription_id.is_some() || record.bill_id.is_some() {
                return Err(ServiceError::conflict(
                    "appointment has clinical history and cannot be deleted; cancel it instead",
                ));
            }
            self.discard(ctx, EntityKind::MedicalRecord, record.code()).await;
        }

        self.repo.delete(ctx, EntityKind::Appointment, code).await?;
        self.release_slot(
            ctx.deadline(),
            &slot_key(&current.doctor_id, current.date, &current.time),
            code,
        )
        .await;
        self.close_history_entry(ctx, &current.patient_id, code).await
    }

    /// Rejects a booking while the patient's latest visit is still open.
    async fn ensure_no_open_visit(&self, deadline: Deadline, patient: &Patient) -> ServiceResult<()> {
        if let Some(latest) = patient.latest_appointment()
            && let Some(previous) = self
                .repo
                .load_by_code::<Appointment>(deadline, latest)
                .await?
            && previous.is_processing
        {
            return Err(ServiceError::conflict(format!(
                "patient already has an open appointment '{latest}'"
            )));
        }
        Ok(())
    }

    /// Takes a doctor's slot for `holder`; the slot marker's unique code
    /// rejects a second live booking of the same doctor, date and time.
    async fn claim_slot(&self, deadline: Deadline, slot: &str, holder: &str) -> ServiceResult<()> {
        if self
            .repo
            .claim_key(deadline, SLOT_COLLECTION, slot, holder)
            .await?
        {
            return Ok(());
        }
        let (doctor, when) = slot.split_once('|').unwrap_or((slot, ""));
        Err(ServiceError::conflict(format!(
            "doctor '{doctor}' is already booked at {}",
            when.replace('|', " ")
        )))
    }

    async fn release_slot(&self, deadline: Deadline, slot: &str, holder: &str) {
        if let Err(err) = self
            .repo
            .release_key(deadline, SLOT_COLLECTION, slot, holder)
            .await
        {
            warn!(slot, holder, error = %err, "Releasing the slot failed");
        }
    }

    /// Appends the new visit to the patient's history.
    ///
    /// The write only applies to the history it was computed from. When a
    /// concurrent booking got there first, the open-visit rule is checked
    /// again against the fresh history before retrying.
    async fn open_visit(
        &self,
        ctx: &RequestContext,
        mut patient: Patient,
        appointment: &str,
    ) -> ServiceResult<()> {
        let code = patient.code().to_string();
        for _ in 0..HISTORY_ATTEMPTS {
            let mut history = patient.appointments.clone();
            history.push(appointment.to_string());
            let written = self
                .repo
                .update_where::<Patient>(
                    ctx,
                    &code,
                    Filter::new().eq("appointments", json!(patient.appointments)),
                    document(json!({ "appointments": history })),
                )
                .await?;
            if written.is_some() {
                return Ok(());
            }

            patient = self
                .repo
                .load_by_code::<Patient>(ctx.deadline(), &code)
                .await?
                .ok_or_else(|| AccessError::not_found(EntityKind::Patient, code.as_str()))?;
            self.ensure_no_open_visit(ctx.deadline(), &patient).await?;
        }
        Err(ServiceError::conflict(format!(
            "history of patient '{code}' kept changing during booking"
        )))
    }

    /// Drops a deleted appointment from the patient's history.
    async fn close_history_entry(
        &self,
        ctx: &RequestContext,
        patient_id: &str,
        appointment: &str,
    ) -> ServiceResult<()> {
        for _ in 0..HISTORY_ATTEMPTS {
            let Some(patient) = self
                .repo
                .load_by_code::<Patient>(ctx.deadline(), patient_id)
                .await?
            else {
                return Ok(());
            };
            let history: Vec<&String> = patient
                .appointments
                .iter()
                .filter(|a| *a != appointment)
                .collect();
            if history.len() == patient.appointments.len() {
                return Ok(());
            }
            let written = self
                .repo
                .update_where::<Patient>(
                    ctx,
                    patient_id,
                    Filter::new().eq("appointments", json!(patient.appointments)),
                    document(json!({ "appointments": history })),
                )
                .await?;
            if written.is_some() {
                return Ok(());
            }
        }
        Err(ServiceError::conflict(format!(
            "history of patient '{patient_id}' kept changing"
        )))
    }

    async fn discard(&self, ctx: &RequestContext, kind: EntityKind, code: &str) {
        match self.repo.delete(ctx, kind, code).await {
            Ok(()) | Err(AccessError::NotFound { .. }) => {}
            Err(err) => warn!(entity = %kind, code, error = %err, "Cleanup of booking failed"),
        }
    }
}

/// Marker key of a doctor's slot.
fn slot_key(doctor_id: &str, date: NaiveDate, time: &str) -> String {
    format!("{doctor_id}|{date}|{time}")
}

/// Canonical `HH:MM` form of a slot time.
fn normalize_time(time: &str) -> ServiceResult<String> {
    NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| ServiceError::validation("time must be HH:MM"))
}

fn can_transition(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    matches!(
        (from, to),
        (Scheduled, InProgress) | (Scheduled, Cancelled) | (InProgress, Completed) | (InProgress, Cancelled)
    ) || from == to
}
