//! Stored file entity
//!
//! Slots are not stored. A file's slot is its rank by `seq` within the
//! manuscript, so removing a row renumbers the rest without rewriting them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "manuscript_files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub manuscript_id: Uuid,

    /// Insertion order, assigned by a database sequence
    pub seq: i64,

    #[sea_orm(column_type = "Text")]
    pub file_type: String,

    #[sea_orm(column_type = "Text", unique)]
    pub storage_key: String,

    #[sea_orm(column_type = "Text")]
    pub checksum: String,

    pub size: i64,

    #[sea_orm(column_type = "Text")]
    pub mime_type: String,

    #[sea_orm(column_type = "Text")]
    pub original_name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub encryption_key_id: Option<String>,

    pub uploaded_by: Uuid,

    pub uploaded_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::manuscript::Entity",
        from = "Column::ManuscriptId",
        to = "super::manuscript::Column::Id",
        on_delete = "Cascade"
    )]
    Manuscript,
}

impl Related<super::manuscript::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Manuscript.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
