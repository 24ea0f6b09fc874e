use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, EntityTrait, TransactionTrait};
use tracing::debug;
use uuid::Uuid;

use models::{api_token, server, service};

use crate::endpoint::EndpointDescriptor;
use crate::errors::ServiceError;
use crate::repository::{ApplyOutcome, ReconcilePlan, ServiceRepository, StoredService};
use crate::tokens;

pub struct SeaOrmServiceRepository {
    pub db: DatabaseConnection,
}

impl SeaOrmServiceRepository {
    pub fn new(db: DatabaseConnection) -> Self { Self { db } }
}

fn endpoint_from_row(row: server::Model) -> Option<EndpointDescriptor> {
    let port = u16::try_from(row.port).ok()?;
    Some(EndpointDescriptor { proto: row.proto, ip: row.ip, port, base_url: row.base_url })
}

#[async_trait::async_trait]
impl ServiceRepository for SeaOrmServiceRepository {
    async fn list_services(&self) -> Result<Vec<StoredService>, ServiceError> {
        let rows = service::Entity::find()
            .find_also_related(server::Entity)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(svc, srv)| StoredService {
                id: svc.id,
                name: svc.name,
                admin: svc.admin,
                endpoint: srv.and_then(endpoint_from_row),
            })
            .collect())
    }

    async fn apply_plan(&self, plan: &ReconcilePlan) -> Result<ApplyOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let mut outcome = ApplyOutcome::default();

        for planned in &plan.services {
            if planned.create {
                service::create_with_id(&txn, planned.id, &planned.name, planned.admin).await?;
                outcome.created += 1;
            } else {
                service::set_admin(&txn, planned.id, planned.admin).await?;
                outcome.updated += 1;
            }

            match &planned.endpoint {
                Some(ep) => {
                    server::replace(&txn, planned.id, &ep.proto, &ep.ip, ep.port, &ep.base_url).await?;
                }
                None => {
                    server::delete_for_service(&txn, planned.id).await?;
                }
            }

            if let Some(token) = &planned.new_token {
                api_token::delete_for_service_with_note(&txn, planned.id, tokens::GENERATED_NOTE).await?;
                let (prefix, hashed) = tokens::hash_token(token)?;
                api_token::create(&txn, planned.id, &prefix, &hashed, tokens::GENERATED_NOTE).await?;
            }
        }

        outcome.deleted = service::delete_except(&txn, &plan.names()).await?;
        txn.commit().await?;
        debug!(created = outcome.created, updated = outcome.updated, deleted = outcome.deleted, "service plan committed");
        Ok(outcome)
    }

    async fn set_endpoint_ip(&self, service_id: Uuid, ip: &str) -> Result<(), ServiceError> {
        if !server::set_ip(&self.db, service_id, ip).await? {
            return Err(ServiceError::not_found("server"));
        }
        Ok(())
    }

    async fn delete_endpoint(&self, service_id: Uuid) -> Result<(), ServiceError> {
        server::delete_for_service(&self.db, service_id).await?;
        Ok(())
    }

    async fn find_service_by_token(&self, token: &str) -> Result<Option<String>, ServiceError> {
        let candidates = api_token::find_by_prefix(&self.db, tokens::prefix_of(token)).await?;
        let Some(row) = candidates.into_iter().find(|row| tokens::verify_token(token, &row.hashed)) else {
            return Ok(None);
        };
        let owner = service::Entity::find_by_id(row.service_id).one(&self.db).await?;
        Ok(owner.map(|svc| svc.name))
    }

    async fn touch_service(&self, name: &str, at: DateTime<Utc>) -> Result<bool, ServiceError> {
        Ok(service::touch(&self.db, name, at.into()).await?)
    }
}
