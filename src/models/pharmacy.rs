//! Pharmacy stock, lab test catalogue and bills.
//!
//! Monetary amounts are integer minor units.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Entity, EntityKind, OwnerField, OwnerRef, RecordMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Medicine {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub medicine_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drug_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    pub no_of_strips: u64,
    pub tablets_per_strip: u64,
    pub price_per_strip: u64,
    pub total_no_of_tablets: u64,
}

impl Medicine {
    /// Integer price of one tablet; fractions of a minor unit are dropped.
    pub fn cost_per_tablet(&self) -> u64 {
        self.price_per_strip
            .checked_div(self.tablets_per_strip)
            .unwrap_or(0)
    }
}

impl Entity for Medicine {
    const KIND: EntityKind = EntityKind::Medicine;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabTest {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Entity for LabTest {
    const KIND: EntityKind = EntityKind::LabTest;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    #[default]
    Pending,
    Paid,
    Cancelled,
}

/// One prescribed medicine on a bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillLine {
    pub medicine_id: String,
    pub required_tablets: u64,
    pub cost_per_tablet: u64,
    /// Stock before dispensing.
    pub available_tablets: u64,
    pub is_dispensed: bool,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BillTest {
    pub test_id: String,
    pub name: String,
    pub price: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub patient_id: String,
    pub appointment_id: String,
    pub medical_record_id: String,
    #[serde(default)]
    pub medicines: Vec<BillLine>,
    #[serde(default)]
    pub tests: Vec<BillTest>,
    pub amount_for_medicine: u64,
    pub amount_for_tests: u64,
    pub service_charge: u64,
    pub amount: u64,
    #[serde(default)]
    pub status: BillStatus,
}

impl Entity for Bill {
    const KIND: EntityKind = EntityKind::Bill;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn domain_ref(&self, field: OwnerField) -> OwnerRef<'_> {
        match field {
            OwnerField::PatientId => OwnerRef::required(Some(&self.patient_id)),
            _ => OwnerRef::Missing,
        }
    }
}
