use sea_orm::{entity::prelude::*, ConnectionTrait, QueryFilter, Set};
use uuid::Uuid;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{errors, service};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_token")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub service_id: Uuid,
    pub prefix: String,
    pub hashed: String,
    pub note: String,
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

pub async fn create<C: ConnectionTrait>(db: &C, service_id: Uuid, prefix: &str, hashed: &str, note: &str) -> Result<Model, errors::ModelError> {
    if prefix.is_empty() || hashed.len() < 12 { return Err(errors::ModelError::Validation("token prefix/hash missing".into())); }
    let am = ActiveModel {
        id: Set(Uuid::new_v4()),
        service_id: Set(service_id),
        prefix: Set(prefix.to_string()),
        hashed: Set(hashed.to_string()),
        note: Set(note.to_string()),
        created_at: Set(Utc::now().into()),
    };
    Ok(am.insert(db).await?)
}

/// Candidate rows for a presented token; the caller verifies the hash.
pub async fn find_by_prefix<C: ConnectionTrait>(db: &C, prefix: &str) -> Result<Vec<Model>, errors::ModelError> {
    Ok(Entity::find().filter(Column::Prefix.eq(prefix)).all(db).await?)
}

pub async fn delete_for_service_with_note<C: ConnectionTrait>(db: &C, service_id: Uuid, note: &str) -> Result<u64, errors::ModelError> {
    let res = Entity::delete_many()
        .filter(Column::ServiceId.eq(service_id))
        .filter(Column::Note.eq(note))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}
