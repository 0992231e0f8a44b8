//! SeaORM-backed document store over the `documents` table.
//!
//! Filter terms on the mirrored columns (`code`, `tenantId`, `hospitalId`,
//! `createdBy`, `email`, `phoneNo`) are pushed down to SQL; any remaining
//! terms are evaluated against the decoded body.
//!
//! Updates are compare-and-set on the row `version`: a merge computed from a
//! stale read is rejected by the database and recomputed from a fresh one.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, RuntimeErr, Select, Set,
};
use serde_json::Value;
use uuid::Uuid;

use super::{Document, DocumentStore, Filter, StoreError, document_code};
use crate::models::document::{
    ActiveModel as DocumentActiveModel, Column, Entity as Documents, Model as DocumentModel,
};

/// Attempts at a conditional update before giving up on a contended row.
const MAX_UPDATE_ATTEMPTS: usize = 64;

/// Body fields mirrored into their own columns.
const MIRRORED: [(&str, Column); 6] = [
    ("code", Column::Code),
    ("tenantId", Column::TenantId),
    ("hospitalId", Column::HospitalId),
    ("createdBy", Column::CreatedBy),
    ("email", Column::Email),
    ("phoneNo", Column::PhoneNo),
];

/// Document store persisting every collection in one SQL table.
#[derive(Clone)]
pub struct DatabaseStore {
    db: Arc<DatabaseConnection>,
}

impl DatabaseStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Builds the SQL select for `filter` and returns the terms SQL cannot evaluate.
    fn select(&self, collection: &str, filter: &Filter) -> (Select<Documents>, Filter) {
        let mut query = Documents::find().filter(Column::Collection.eq(collection));
        let mut residual = Filter::new();

        for (field, value) in filter.terms() {
            match (indexed_column(field), value.as_str()) {
                (Some(column), Some(text)) => query = query.filter(column.eq(text)),
                _ => residual = residual.eq(field, value.clone()),
            }
        }

        let query = query
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);
        (query, residual)
    }

    async fn first_match(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<(DocumentModel, Document)>, StoreError> {
        let (query, residual) = self.select(collection, filter);
        for model in query.all(self.db.as_ref()).await? {
            let document = decode_body(&model)?;
            if residual.matches(&document) {
                return Ok(Some((model, document)));
            }
        }
        Ok(None)
    }

    /// Writes `document` over `model` only if the row still has the version it was read at.
    async fn compare_and_set(
        &self,
        model: &DocumentModel,
        document: Document,
    ) -> Result<bool, StoreError> {
        let mut row = DocumentActiveModel {
            version: Set(model.version + 1),
            updated_at: Set(Utc::now().into()),
            ..Default::default()
        };
        mirror(&mut row, &document);
        row.body = Set(Value::Object(document));

        let result = Documents::update_many()
            .set(row)
            .filter(Column::Id.eq(model.id))
            .filter(Column::Version.eq(model.version))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }
}

fn indexed_column(field: &str) -> Option<Column> {
    MIRRORED
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, column)| *column)
}

/// Copies the mirrored body fields onto their columns. `code` never changes.
fn mirror(row: &mut DocumentActiveModel, document: &Document) {
    row.tenant_id = Set(string_field(document, "tenantId"));
    row.hospital_id = Set(string_field(document, "hospitalId"));
    row.created_by = Set(string_field(document, "createdBy"));
    row.email = Set(string_field(document, "email"));
    row.phone_no = Set(string_field(document, "phoneNo"));
}

fn string_field(document: &Document, field: &str) -> Option<String> {
    document
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn decode_body(model: &DocumentModel) -> Result<Document, StoreError> {
    Ok(serde_json::from_value(model.body.clone())?)
}

fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

#[async_trait]
impl DocumentStore for DatabaseStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self
            .first_match(collection, filter)
            .await?
            .map(|(_, document)| document))
    }

    async fn find_all(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let (query, residual) = self.select(collection, filter);
        let mut documents = Vec::new();
        for model in query.all(self.db.as_ref()).await? {
            let document = decode_body(&model)?;
            if residual.matches(&document) {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<(), StoreError> {
        let code = document_code(&document)?.to_string();
        let now = Utc::now();

        let mut row = DocumentActiveModel {
            id: Set(Uuid::new_v4()),
            collection: Set(collection.to_string()),
            code: Set(code.clone()),
            version: Set(0),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        mirror(&mut row, &document);
        row.body = Set(Value::Object(document));

        match row.insert(self.db.as_ref()).await {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                tracing::debug!(collection, code = %code, "Duplicate document code");
                Err(StoreError::Duplicate {
                    collection: collection.to_string(),
                    code,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: Document,
    ) -> Result<u64, StoreError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Some((model, mut document)) = self.first_match(collection, filter).await? else {
                return Ok(0);
            };

            for (field, value) in set.clone() {
                document.insert(field, value);
            }

            if self.compare_and_set(&model, document).await? {
                return Ok(1);
            }
            tracing::debug!(collection, code = %model.code, attempt, "Document changed underneath update; retrying");
            tokio::task::yield_now().await;
        }

        let code = filter
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Err(StoreError::Contention {
            collection: collection.to_string(),
            code,
        })
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let Some((model, _)) = self.first_match(collection, filter).await? else {
            return Ok(0);
        };
        let result = Documents::delete_by_id(model.id)
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    async fn store() -> DatabaseStore {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        DatabaseStore::new(Arc::new(db))
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn pushes_down_indexed_terms_and_filters_the_rest() {
        let store = store().await;
        store
            .insert_one(
                "APPOINTMENT",
                doc(json!({"code": "A1", "hospitalId": "H1", "doctorId": "D1"})),
            )
            .await
            .unwrap();
        store
            .insert_one(
                "APPOINTMENT",
                doc(json!({"code": "A2", "hospitalId": "H1", "doctorId": "D2"})),
            )
            .await
            .unwrap();
        store
            .insert_one(
                "APPOINTMENT",
                doc(json!({"code": "A3", "hospitalId": "H2", "doctorId": "D1"})),
            )
            .await
            .unwrap();

        let found = store
            .find_all(
                "APPOINTMENT",
                &Filter::new().eq("hospitalId", "H1").eq("doctorId", "D1"),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["code"], json!("A1"));

        let by_doctor = store
            .find_all("APPOINTMENT", &Filter::new().eq("doctorId", "D1"))
            .await
            .unwrap();
        assert_eq!(by_doctor.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_code_is_reported() {
        let store = store().await;
        store
            .insert_one("DOCTOR", doc(json!({"code": "D1"})))
            .await
            .unwrap();
        let err = store
            .insert_one("DOCTOR", doc(json!({"code": "D1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn update_merges_and_delete_counts() {
        let store = store().await;
        store
            .insert_one("PATIENT", doc(json!({"code": "P1", "name": "old", "createdBy": "R1"})))
            .await
            .unwrap();

        let modified = store
            .update_one("PATIENT", &Filter::by_code("P1"), doc(json!({"name": "new"})))
            .await
            .unwrap();
        assert_eq!(modified, 1);

        let found = store
            .find_one("PATIENT", &Filter::new().eq("createdBy", "R1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], json!("new"));

        assert_eq!(
            store
                .delete_one("PATIENT", &Filter::by_code("P1"))
                .await
                .unwrap(),
            1
        );
        assert!(
            store
                .find_one("PATIENT", &Filter::by_code("P1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn stale_writes_are_rejected_by_version() {
        let store = store().await;
        store
            .insert_one("BILL", doc(json!({"code": "B1", "status": "Unpaid"})))
            .await
            .unwrap();
        let (stale, _) = store
            .first_match("BILL", &Filter::by_code("B1"))
            .await
            .unwrap()
            .unwrap();

        store
            .update_one("BILL", &Filter::by_code("B1"), doc(json!({"status": "Paid"})))
            .await
            .unwrap();

        let applied = store
            .compare_and_set(&stale, doc(json!({"code": "B1", "status": "Unpaid"})))
            .await
            .unwrap();
        assert!(!applied);

        let (current, body) = store
            .first_match("BILL", &Filter::by_code("B1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.version, stale.version + 1);
        assert_eq!(body["status"], json!("Paid"));
    }

    #[tokio::test]
    async fn contact_indexes_are_scoped_by_collection() {
        use sea_orm::{ConnectionTrait, Statement};

        let store = store().await;
        let backend = store.db.get_database_backend();
        for (index, columns) in [
            ("idx_documents_collection_email", ["collection", "email"]),
            ("idx_documents_collection_phone_no", ["collection", "phone_no"]),
        ] {
            let rows = store
                .db
                .query_all(Statement::from_string(
                    backend,
                    format!("SELECT name FROM pragma_index_info('{index}') ORDER BY seqno"),
                ))
                .await
                .unwrap();
            let names: Vec<String> = rows
                .iter()
                .map(|row| row.try_get::<String>("", "name").unwrap())
                .collect();
            assert_eq!(names, columns, "{index}");
        }
    }

    #[tokio::test]
    async fn login_contacts_are_looked_up_through_columns() {
        let store = store().await;
        store
            .insert_one(
                "LOGIN",
                doc(json!({"code": "DOC1", "email": "doc@example.com", "phoneNo": "900"})),
            )
            .await
            .unwrap();

        let (query, residual) =
            store.select("LOGIN", &Filter::new().eq("email", "doc@example.com"));
        assert!(residual.is_empty());
        assert_eq!(query.all(store.db.as_ref()).await.unwrap().len(), 1);

        store
            .update_one("LOGIN", &Filter::by_code("DOC1"), doc(json!({"phoneNo": "901"})))
            .await
            .unwrap();
        let found = store
            .find_one("LOGIN", &Filter::new().eq("phoneNo", "901"))
            .await
            .unwrap();
        assert!(found.is_some());
        assert!(
            store
                .find_one("LOGIN", &Filter::new().eq("phoneNo", "900"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
