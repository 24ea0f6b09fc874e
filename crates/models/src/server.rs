use sea_orm::{entity::prelude::*, sea_query::Expr, ConnectionTrait, QueryFilter, Set};
use uuid::Uuid;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{errors, service};

pub const SERVICE_COOKIE_NAME: &str = "jupyterhub-services";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "server")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub service_id: Uuid,
    pub proto: String,
    pub ip: String,
    pub port: i32,
    pub base_url: String,
    pub cookie_name: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation { Service }

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::Service => Entity::belongs_to(service::Entity)
                .from(Column::ServiceId)
                .to(service::Column::Id)
                .into(),
        }
    }
}

impl Related<service::Entity> for Entity {
    fn to() -> RelationDef { Relation::Service.def() }
}

impl ActiveModelBehavior for ActiveModel {}

pub async fn find_for_service<C: ConnectionTrait>(db: &C, service_id: Uuid) -> Result<Option<Model>, errors::ModelError> {
    Ok(Entity::find().filter(Column::ServiceId.eq(service_id)).one(db).await?)
}

/// Replace the endpoint of a service: at most one server row per service.
pub async fn replace<C: ConnectionTrait>(
    db: &C,
    service_id: Uuid,
    proto: &str,
    ip: &str,
    port: u16,
    base_url: &str,
) -> Result<Model, errors::ModelError> {
    if !base_url.starts_with('/') { return Err(errors::ModelError::Validation("base_url must start with '/'".into())); }
    delete_for_service(db, service_id).await?;
    let am = ActiveModel {
        id: Set(Uuid::new_v4()),
        service_id: Set(service_id),
        proto: Set(proto.to_string()),
        ip: Set(ip.to_string()),
        port: Set(i32::from(port)),
        base_url: Set(base_url.to_string()),
        cookie_name: Set(SERVICE_COOKIE_NAME.to_string()),
        created_at: Set(Utc::now().into()),
    };
    Ok(am.insert(db).await?)
}

pub async fn set_ip<C: ConnectionTrait>(db: &C, service_id: Uuid, ip: &str) -> Result<bool, errors::ModelError> {
    let res = Entity::update_many()
        .col_expr(Column::Ip, Expr::value(ip.to_string()))
        .filter(Column::ServiceId.eq(service_id))
        .exec(db)
        .await?;
    Ok(res.rows_affected > 0)
}

pub async fn delete_for_service<C: ConnectionTrait>(db: &C, service_id: Uuid) -> Result<u64, errors::ModelError> {
    let res = Entity::delete_many().filter(Column::ServiceId.eq(service_id)).exec(db).await?;
    Ok(res.rows_affected)
}
