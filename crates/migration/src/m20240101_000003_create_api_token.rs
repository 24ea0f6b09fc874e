//! Create `api_token` table.
//!
//! Tokens are never stored in clear: a short prefix narrows the lookup and
//! the argon2 hash verifies it.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiToken::Table)
                    .if_not_exists()
                    .col(uuid(ApiToken::Id).primary_key())
                    .col(uuid(ApiToken::ServiceId).not_null())
                    .col(string_len(ApiToken::Prefix, 16).not_null())
                    .col(string_len(ApiToken::Hashed, 255).not_null())
                    .col(string_len(ApiToken::Note, 255).not_null())
                    .col(timestamp_with_time_zone(ApiToken::CreatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_api_token_service")
                            .from(ApiToken::Table, ApiToken::ServiceId)
                            .to(Service::Table, Service::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(ApiToken::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum ApiToken { Table, Id, ServiceId, Prefix, Hashed, Note, CreatedAt }

#[derive(DeriveIden)]
enum Service { Table, Id }
