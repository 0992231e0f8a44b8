//! Migration to create the documents table.
//!
//! Every entity collection (tenants, hospitals, staff, patients, appointments,
//! bills, ...) is stored as a JSON document keyed by `(collection, code)`. The
//! ownership markers used by the access policy are mirrored into columns so
//! scope filters can be pushed down to SQL.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Documents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Documents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Documents::Collection).text().not_null())
                    .col(ColumnDef::new(Documents::Code).text().not_null())
                    .col(ColumnDef::new(Documents::TenantId).text().null())
                    .col(ColumnDef::new(Documents::HospitalId).text().null())
                    .col(ColumnDef::new(Documents::CreatedBy).text().null())
                    .col(ColumnDef::new(Documents::Body).json_binary().not_null())
                    .col(
                        ColumnDef::new(Documents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Documents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Codes are unique within a collection
        manager
            .create_index(
                Index::create()
                    .name("idx_documents_collection_code")
                    .table(Documents::Table)
                    .col(Documents::Collection)
                    .col(Documents::Code)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_documents_collection_tenant")
                    .table(Documents::Table)
                    .col(Documents::Collection)
                    .col(Documents::TenantId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_documents_collection_hospital")
                    .table(Documents::Table)
                    .col(Documents::Collection)
                    .col(Documents::HospitalId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_documents_collection_created_by")
                    .table(Documents::Table)
                    .col(Documents::Collection)
                    .col(Documents::CreatedBy)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_documents_collection_created_by",
            "idx_documents_collection_hospital",
            "idx_documents_collection_tenant",
            "idx_documents_collection_code",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Documents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Documents {
    Table,
    Id,
    Collection,
    Code,
    TenantId,
    HospitalId,
    CreatedBy,
    Body,
    CreatedAt,
    UpdatedAt,
}
