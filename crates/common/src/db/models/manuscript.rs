//! Manuscript entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "manuscripts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub visibility: String,

    /// `{metadata, content, download}` thresholds as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub access_level: serde_json::Value,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub view_count: i64,

    pub download_count: i64,

    pub access_request_count: i64,

    pub deleted_at: Option<DateTimeWithTimeZone>,

    pub deleted_by: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::manuscript_file::Entity")]
    Files,

    #[sea_orm(has_many = "super::access_request::Entity")]
    AccessRequests,
}

impl Related<super::manuscript_file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Files.def()
    }
}

impl Related<super::access_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AccessRequests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
