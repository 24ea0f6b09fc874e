use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ApiToken: lookups go by prefix first
        manager
            .create_index(
                Index::create()
                    .name("idx_api_token_prefix")
                    .table(ApiToken::Table)
                    .col(ApiToken::Prefix)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_api_token_service")
                    .table(ApiToken::Table)
                    .col(ApiToken::ServiceId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_api_token_service").table(ApiToken::Table).to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_api_token_prefix").table(ApiToken::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ApiToken { Table, ServiceId, Prefix }
