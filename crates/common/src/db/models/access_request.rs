//! Access request entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "access_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub manuscript_id: Uuid,

    pub requester_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub requested_level: String,

    #[sea_orm(column_type = "Text")]
    pub justification: String,

    #[sea_orm(column_type = "Text")]
    pub purpose: String,

    #[sea_orm(column_type = "Text")]
    pub institution: String,

    pub requested_duration_days: Option<i32>,

    /// pending | approved | rejected
    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub approved_level: Option<String>,

    pub approved_duration_days: Option<i32>,

    pub reviewed_by: Option<Uuid>,

    pub reviewed_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub review_notes: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::manuscript::Entity",
        from = "Column::ManuscriptId",
        to = "super::manuscript::Column::Id"
    )]
    Manuscript,
}

impl Related<super::manuscript::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Manuscript.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
