//! Database migrations for the HealthHub service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_090000_create_documents;
mod m2026_01_12_090000_add_document_version_and_contacts;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_090000_create_documents::Migration),
            Box::new(m2026_01_12_090000_add_document_version_and_contacts::Migration),
        ]
    }
}
