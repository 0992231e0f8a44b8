//! Document entity model
//!
//! SeaORM model for the `documents` table backing the database document
//! store. Each row is one record of one collection; the ownership markers and
//! login contact fields are mirrored into columns so filters on them can be
//! pushed down to SQL.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Collection name, e.g. `DOCTOR`
    pub collection: String,

    /// Record code, unique within the collection
    pub code: String,

    pub tenant_id: Option<String>,

    pub hospital_id: Option<String>,

    pub created_by: Option<String>,

    /// Login contact fields, mirrored for indexed lookups
    pub email: Option<String>,

    pub phone_no: Option<String>,

    /// Bumped on every update; updates are conditional on it
    pub version: i64,

    /// Full record as JSON
    #[sea_orm(column_type = "JsonBinary")]
    pub body: JsonValue,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
