//! Create `service` table.
//!
//! One row per declared hub service, keyed by its unique name.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Service::Table)
                    .if_not_exists()
                    .col(uuid(Service::Id).primary_key())
                    .col(string_len(Service::Name, 255).unique_key().not_null())
                    .col(boolean(Service::Admin).not_null())
                    .col(timestamp_with_time_zone_null(Service::LastActivity))
                    .col(timestamp_with_time_zone(Service::CreatedAt).not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Service::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Service { Table, Id, Name, Admin, LastActivity, CreatedAt }
