use sea_orm::{entity::prelude::*, sea_query::Expr, ConnectionTrait, QueryFilter, Set};
use uuid::Uuid;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{api_token, errors, server};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    pub admin: bool,
    pub last_activity: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation { Server, ApiToken }

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self {
            Relation::Server => Entity::has_one(server::Entity).into(),
            Relation::ApiToken => Entity::has_many(api_token::Entity).into(),
        }
    }
}

impl Related<server::Entity> for Entity {
    fn to() -> RelationDef { Relation::Server.def() }
}

impl Related<api_token::Entity> for Entity {
    fn to() -> RelationDef { Relation::ApiToken.def() }
}

impl ActiveModelBehavior for ActiveModel {}

pub async fn find_by_name<C: ConnectionTrait>(db: &C, name: &str) -> Result<Option<Model>, errors::ModelError> {
    Ok(Entity::find().filter(Column::Name.eq(name)).one(db).await?)
}

pub async fn create<C: ConnectionTrait>(db: &C, name: &str, admin: bool) -> Result<Model, errors::ModelError> {
    create_with_id(db, Uuid::new_v4(), name, admin).await
}

/// Insert with a caller-chosen id, so plans can reference rows before they exist.
pub async fn create_with_id<C: ConnectionTrait>(db: &C, id: Uuid, name: &str, admin: bool) -> Result<Model, errors::ModelError> {
    if name.trim().is_empty() { return Err(errors::ModelError::Validation("service name required".into())); }
    let am = ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        admin: Set(admin),
        last_activity: Set(None),
        created_at: Set(Utc::now().into()),
    };
    Ok(am.insert(db).await?)
}

pub async fn set_admin<C: ConnectionTrait>(db: &C, id: Uuid, admin: bool) -> Result<(), errors::ModelError> {
    let am = ActiveModel { id: Set(id), admin: Set(admin), ..Default::default() };
    am.update(db).await?;
    Ok(())
}

pub async fn touch<C: ConnectionTrait>(db: &C, name: &str, at: DateTimeWithTimeZone) -> Result<bool, errors::ModelError> {
    let res = Entity::update_many()
        .col_expr(Column::LastActivity, Expr::value(Some(at)))
        .filter(Column::Name.eq(name))
        .exec(db)
        .await?;
    Ok(res.rows_affected > 0)
}

/// Delete every service whose name is not in `keep`; dependants cascade.
pub async fn delete_except<C: ConnectionTrait>(db: &C, keep: &[String]) -> Result<u64, errors::ModelError> {
    let res = Entity::delete_many()
        .filter(Column::Name.is_not_in(keep.iter().cloned()))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}
