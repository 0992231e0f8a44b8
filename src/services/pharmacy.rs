//! Pharmacy stock and billing.
//!
//! A bill covers the patient's latest appointment: prescribed medicines that
//! are in stock, the lab tests on the medical record, and a flat service
//! charge. Billing closes the visit.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult, hospital_of, load_in_hospital, require};
use crate::access::{WriteAction, can_create};
use crate::models::{
    Appointment, AppointmentStatus, Bill, BillLine, BillStatus, BillTest, Entity, EntityKind,
    LabTest, MedicalRecord, MedicalRecordStatus, Medicine, Patient, Prescription, RecordMeta,
};
use crate::repositories::EntityRepository;
use crate::store::{Document, Filter, document};
use crate::tenancy::RequestContext;

/// Conditional stock writes attempted before a bill gives up on a busy medicine.
const STOCK_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewMedicine {
    pub medicine_name: String,
    #[serde(default)]
    pub drug_type: Option<String>,
    #[serde(default)]
    pub dosage: Option<String>,
    pub no_of_strips: u64,
    pub tablets_per_strip: u64,
    /// Minor currency units.
    pub price_per_strip: u64,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MedicinePatch {
    pub medicine_name: Option<String>,
    pub drug_type: Option<String>,
    pub dosage: Option<String>,
    pub no_of_strips: Option<u64>,
    pub tablets_per_strip: Option<u64>,
    pub price_per_strip: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewBill {
    pub patient_id: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillPatch {
    pub status: BillStatus,
}

/// The records a bill is drawn from.
#[derive(Clone, Copy)]
struct Visit<'a> {
    hospital: &'a str,
    patient: &'a Patient,
    appointment: &'a Appointment,
    record: &'a MedicalRecord,
}

#[derive(Clone)]
pub struct PharmacyService {
    repo: EntityRepository,
    service_charge: u64,
}

impl PharmacyService {
    pub fn new(repo: EntityRepository, service_charge: u64) -> Self {
        Self {
            repo,
            service_charge,
        }
    }

    pub async fn create_medicine(&self, ctx: &RequestContext, request: NewMedicine) -> ServiceResult<Medicine> {
        can_create(ctx.caller(), EntityKind::Medicine)?;
        require("medicineName", &request.medicine_name)?;
        let total = total_tablets(request.no_of_strips, request.tablets_per_strip)?;

        let hospital = self
            .repo
            .caller_creator(ctx, EntityKind::Medicine)
            .await?;
        let name = request.medicine_name.trim().to_string();
        self.ensure_name_free(ctx, &hospital, &name, None).await?;

        let code = EntityKind::Medicine.new_code();
        let medicine = Medicine {
            meta: RecordMeta::created(&code, ctx.caller().code())
                .in_tenant(ctx.caller().tenant_id())
                .in_hospital(hospital),
            medicine_name: name,
            drug_type: request.drug_type,
            dosage: request.dosage,
            no_of_strips: request.no_of_strips,
            tablets_per_strip: request.tablets_per_strip,
            price_per_strip: request.price_per_strip,
            total_no_of_tablets: total,
        };
        self.repo.insert(ctx, &medicine).await?;
        info!(medicine = %code, "Medicine added to stock");
        Ok(medicine)
    }

    pub async fn update_medicine(
        &self,
        ctx: &RequestContext,
        code: &str,
        patch: MedicinePatch,
    ) -> ServiceResult<Medicine> {
        let current: Medicine = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;

        let mut changes = Document::new();
        if let Some(name) = patch.medicine_name {
            require("medicineName", &name)?;
            let name = name.trim().to_string();
            self.ensure_name_free(ctx, hospital_of(&current)?, &name, Some(code))
                .await?;
            changes.insert("medicineName".into(), Value::String(name));
        }
        if let Some(drug_type) = patch.drug_type {
            changes.insert("drugType".into(), Value::String(drug_type));
        }
        if let Some(dosage) = patch.dosage {
            changes.insert("dosage".into(), Value::String(dosage));
        }
        if let Some(price) = patch.price_per_strip {
            changes.insert("pricePerStrip".into(), json!(price));
        }
        if patch.no_of_strips.is_some() || patch.tablets_per_strip.is_some() {
            let strips = patch.no_of_strips.unwrap_or(current.no_of_strips);
            let per_strip = patch.tablets_per_strip.unwrap_or(current.tablets_per_strip);
            changes.insert("noOfStrips".into(), json!(strips));
            changes.insert("tabletsPerStrip".into(), json!(per_strip));
            changes.insert("totalNoOfTablets".into(), json!(total_tablets(strips, per_strip)?));
        }

        if changes.is_empty() {
            return Err(ServiceError::validation("no changes supplied"));
        }
        Ok(self.repo.update(ctx, code, changes).await?)
    }

    /// Bills the patient's latest appointment and closes the visit.
    ///
    /// The medical record is claimed first with a conditional write on an
    /// empty `billId`, so of two concurrent bills for one visit only one gets
    /// past the claim. Stock is then taken with conditional decrements. A
    /// failure after the claim returns the stock and releases the visit.
    pub async fn create_bill(&self, ctx: &RequestContext, request: NewBill) -> ServiceResult<Bill> {
        can_create(ctx.caller(), EntityKind::Bill)?;
        let deadline = ctx.deadline();
        let hospital = self.repo.caller_creator(ctx, EntityKind::Bill).await?;
        let patient: Patient =
            load_in_hospital(&self.repo, deadline, &hospital, &request.patient_id).await?;

        let Some(latest) = patient.latest_appointment() else {
            return Err(ServiceError::conflict(format!(
                "patient '{}' has no appointment to bill",
                patient.code()
            )));
        };
        let appointment: Appointment = load_in_hospital(&self.repo, deadline, &hospital, latest).await?;
        // Completed visits stay billable until the record carries a bill.
        if appointment.status == AppointmentStatus::Cancelled {
            return Err(ServiceError::conflict(format!(
                "appointment '{latest}' was cancelled"
            )));
        }
        let record: MedicalRecord =
            load_in_hospital(&self.repo, deadline, &hospital, &appointment.medical_record_id).await?;
        if let Some(bill) = &record.bill_id {
            return Err(already_billed(record.code(), bill));
        }

        let code = EntityKind::Bill.new_code();
        let claimed = self
            .repo
            .update_where::<MedicalRecord>(
                ctx,
                record.code(),
                Filter::new().eq("billId", Value::Null),
                document(json!({ "billId": code, "status": MedicalRecordStatus::Closed })),
            )
            .await?;
        let Some(claimed) = claimed else {
            return Err(ServiceError::conflict(format!(
                "medical record '{}' was billed concurrently",
                record.code()
            )));
        };

        let mut taken = Vec::new();
        let bill = match self
            .compose_bill(
                ctx,
                &code,
                Visit {
                    hospital: &hospital,
                    patient: &patient,
                    appointment: &appointment,
                    record: &claimed,
                },
                &mut taken,
            )
            .await
        {
            Ok(bill) => bill,
            Err(err) => {
                warn!(bill = %code, error = %err, "Billing failed; returning stock and releasing the visit");
                for (medicine, tablets) in &taken {
                    self.return_stock(ctx, medicine, *tablets).await;
                }
                self.release_visit(ctx, &record, &code).await;
                return Err(err);
            }
        };

        self.repo
            .update::<Appointment>(
                ctx,
                appointment.code(),
                document(json!({ "status": AppointmentStatus::Completed, "isProcessing": false })),
            )
            .await?;

        info!(
            bill = %code,
            patient = patient.code(),
            amount = bill.amount,
            "Bill created"
        );
        Ok(bill)
    }

    /// Prices the visit, takes stock and stores the bill.
    ///
    /// Every dispensed `(medicine, tablets)` is pushed to `taken` as soon as
    /// it leaves stock, so the caller can return it if a later step fails.
    async fn compose_bill(
        &self,
        ctx: &RequestContext,
        code: &str,
        visit: Visit<'_>,
        taken: &mut Vec<(String, u64)>,
    ) -> ServiceResult<Bill> {
        let Visit {
            hospital,
            patient,
            appointment,
            record,
        } = visit;
        let deadline = ctx.deadline();
        let mut lines = Vec::new();
        if let Some(prescription_id) = &record.prescription_id {
            let prescription: Prescription =
                load_in_hospital(&self.repo, deadline, hospital, prescription_id).await?;
            for prescribed in &prescription.medicines {
                let line = self
                    .take_stock(ctx, hospital, &prescribed.medicine_id, prescribed.required_tablets())
                    .await?;
                if line.is_dispensed {
                    taken.push((line.medicine_id.clone(), line.required_tablets));
                }
                lines.push(line);
            }
        }

        let mut tests = Vec::with_capacity(record.tests.len());
        for test_id in &record.tests {
            let test: LabTest = load_in_hospital(&self.repo, deadline, hospital, test_id).await?;
            tests.push(BillTest {
                test_id: test.code().to_string(),
                name: test.name,
                price: test.price,
            });
        }

        let amount_for_medicine = lines.iter().map(|l| l.amount).fold(0u64, u64::saturating_add);
        let amount_for_tests = tests.iter().map(|t| t.price).fold(0u64, u64::saturating_add);
        let bill = Bill {
            meta: RecordMeta::created(code, ctx.caller().code())
                .in_tenant(ctx.caller().tenant_id())
                .in_hospital(hospital),
            patient_id: patient.code().to_string(),
            appointment_id: appointment.code().to_string(),
            medical_record_id: record.code().to_string(),
            medicines: lines,
            tests,
            amount_for_medicine,
            amount_for_tests,
            service_charge: self.service_charge,
            amount: amount_for_medicine
                .saturating_add(amount_for_tests)
                .saturating_add(self.service_charge),
            status: BillStatus::Pending,
        };
        self.repo.insert(ctx, &bill).await?;
        Ok(bill)
    }

    /// Dispenses `required` tablets of a medicine.
    ///
    /// The decrement only applies while the stock still holds the level it
    /// was priced at; a concurrent change re-reads and re-prices the line.
    async fn take_stock(
        &self,
        ctx: &RequestContext,
        hospital: &str,
        medicine_id: &str,
        required: u64,
    ) -> ServiceResult<BillLine> {
        for attempt in 1..=STOCK_ATTEMPTS {
            let medicine: Medicine =
                load_in_hospital(&self.repo, ctx.deadline(), hospital, medicine_id).await?;
            let line = dispense(&medicine, required);
            if !line.is_dispensed {
                return Ok(line);
            }

            let remaining = medicine.total_no_of_tablets - required;
            let taken = self
                .repo
                .update_where::<Medicine>(
                    ctx,
                    medicine_id,
                    Filter::new().eq("totalNoOfTablets", medicine.total_no_of_tablets),
                    stock_level(&medicine, remaining),
                )
                .await?;
            if taken.is_some() {
                return Ok(line);
            }
            debug!(medicine = medicine_id, attempt, "Stock changed while billing; re-reading");
        }
        Err(ServiceError::conflict(format!(
            "stock of medicine '{medicine_id}' kept changing during billing"
        )))
    }

    /// Puts tablets taken by a failed bill back into stock. Best effort.
    async fn return_stock(&self, ctx: &RequestContext, medicine_id: &str, tablets: u64) {
        for _ in 0..STOCK_ATTEMPTS {
            let medicine = match self
                .repo
                .load_by_code::<Medicine>(ctx.deadline(), medicine_id)
                .await
            {
                Ok(Some(medicine)) => medicine,
                Ok(None) => break,
                Err(err) => {
                    warn!(medicine = medicine_id, tablets, error = %err, "Returning stock failed");
                    return;
                }
            };
            let restored = medicine.total_no_of_tablets.saturating_add(tablets);
            let result = self
                .repo
                .update_where::<Medicine>(
                    ctx,
                    medicine_id,
                    Filter::new().eq("totalNoOfTablets", medicine.total_no_of_tablets),
                    stock_level(&medicine, restored),
                )
                .await;
            match result {
                Ok(Some(_)) => return,
                Ok(None) => continue,
                Err(err) => {
                    warn!(medicine = medicine_id, tablets, error = %err, "Returning stock failed");
                    return;
                }
            }
        }
        warn!(medicine = medicine_id, tablets, "Stock could not be returned");
    }

    /// Clears the claim a failed bill put on the medical record.
    async fn release_visit(&self, ctx: &RequestContext, record: &MedicalRecord, bill: &str) {
        let result = self
            .repo
            .update_where::<MedicalRecord>(
                ctx,
                record.code(),
                Filter::new().eq("billId", bill),
                document(json!({ "billId": Value::Null, "status": record.status })),
            )
            .await;
        if let Err(err) = result {
            warn!(record = record.code(), bill, error = %err, "Releasing the billed visit failed");
        }
    }

    /// Marks a pending bill paid or cancelled.
    pub async fn update_bill(&self, ctx: &RequestContext, code: &str, patch: BillPatch) -> ServiceResult<Bill> {
        let current: Bill = self
            .repo
            .load_for_write(ctx, code, WriteAction::Update)
            .await?;
        if current.status != BillStatus::Pending || patch.status == BillStatus::Pending {
            return Err(ServiceError::conflict(format!(
                "bill '{code}' cannot move from {:?} to {:?}",
                current.status, patch.status
            )));
        }
        Ok(self
            .repo
            .update(ctx, code, document(json!({ "status": patch.status })))
            .await?)
    }

    async fn ensure_name_free(
        &self,
        ctx: &RequestContext,
        hospital: &str,
        name: &str,
        except: Option<&str>,
    ) -> ServiceResult<()> {
        let taken = self
            .repo
            .find_all_by::<Medicine>(ctx.deadline(), &Filter::new().eq("hospitalId", hospital))
            .await?
            .iter()
            .any(|m| m.medicine_name.eq_ignore_ascii_case(name) && Some(m.code()) != except);
        if taken {
            return Err(ServiceError::conflict(format!(
                "medicine '{name}' is already stocked"
            )));
        }
        Ok(())
    }
}

fn already_billed(record: &str, bill: &str) -> ServiceError {
    ServiceError::conflict(format!("medical record '{record}' is already billed by '{bill}'"))
}

/// Strip and tablet counts for a new stock level.
fn stock_level(medicine: &Medicine, tablets: u64) -> Document {
    let strips = tablets.checked_div(medicine.tablets_per_strip).unwrap_or(0);
    document(json!({ "noOfStrips": strips, "totalNoOfTablets": tablets }))
}

fn total_tablets(strips: u64, per_strip: u64) -> ServiceResult<u64> {
    if per_strip == 0 {
        return Err(ServiceError::validation("tabletsPerStrip must be positive"));
    }
    strips
        .checked_mul(per_strip)
        .ok_or_else(|| ServiceError::validation("stock quantity is too large"))
}

/// Prices one prescribed medicine. Lines that cannot be filled from stock
/// are listed undispensed at no charge.
fn dispense(medicine: &Medicine, required: u64) -> BillLine {
    let cost_per_tablet = medicine.cost_per_tablet();
    let available = medicine.total_no_of_tablets;
    let is_dispensed = available >= required;
    BillLine {
        medicine_id: medicine.code().to_string(),
        required_tablets: required,
        cost_per_tablet,
        available_tablets: available,
        is_dispensed,
        amount: if is_dispensed {
            required.saturating_mul(cost_per_tablet)
        } else {
            0
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn medicine(total: u64) -> Medicine {
        Medicine {
            meta: RecordMeta::created("MDN1", "PHA1"),
            medicine_name: "Amoxicillin".into(),
            drug_type: None,
            dosage: None,
            no_of_strips: total / 10,
            tablets_per_strip: 10,
            price_per_strip: 120,
            total_no_of_tablets: total,
        }
    }

    #[test]
    fn dispensing_charges_per_tablet() {
        let line = dispense(&medicine(100), 20);
        assert!(line.is_dispensed);
        assert_eq!(line.cost_per_tablet, 12);
        assert_eq!(line.amount, 240);
    }

    #[test]
    fn short_stock_is_listed_free_and_undispensed() {
        let line = dispense(&medicine(5), 20);
        assert!(!line.is_dispensed);
        assert_eq!(line.amount, 0);
        assert_eq!(line.available_tablets, 5);
    }

    #[test]
    fn exact_stock_is_dispensed() {
        assert!(dispense(&medicine(20), 20).is_dispensed);
    }

    #[test]
    fn totals_reject_zero_and_overflow() {
        assert_eq!(total_tablets(3, 10).unwrap(), 30);
        assert!(total_tablets(3, 0).is_err());
        assert!(total_tablets(u64::MAX, 2).is_err());
    }
}
