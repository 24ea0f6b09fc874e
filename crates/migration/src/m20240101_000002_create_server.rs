//! Create `server` table.
//!
//! Endpoint descriptor of a service: where the proxy sends its traffic.
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Server::Table)
                    .if_not_exists()
                    .col(uuid(Server::Id).primary_key())
                    .col(uuid(Server::ServiceId).unique_key().not_null())
                    .col(string_len(Server::Proto, 16).not_null())
                    .col(string_len(Server::Ip, 255).not_null())
                    .col(integer(Server::Port).not_null())
                    .col(string_len(Server::BaseUrl, 255).not_null())
                    .col(string_len(Server::CookieName, 255).not_null())
                    .col(timestamp_with_time_zone(Server::CreatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_server_service")
                            .from(Server::Table, Server::ServiceId)
                            .to(Service::Table, Service::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Server::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Server { Table, Id, ServiceId, Proto, Ip, Port, BaseUrl, CookieName, CreatedAt }

#[derive(DeriveIden)]
enum Service { Table, Id }
