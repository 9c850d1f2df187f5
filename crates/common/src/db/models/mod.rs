//! SeaORM entity models
//!
//! Database entities backing the PostgreSQL record store

mod access_request;
mod manuscript;
mod manuscript_file;
mod setting;

pub use manuscript::{
    Entity as ManuscriptEntity,
    Model as ManuscriptRow,
    ActiveModel as ManuscriptActiveModel,
    Column as ManuscriptColumn,
};

pub use manuscript_file::{
    Entity as ManuscriptFileEntity,
    Model as ManuscriptFileRow,
    ActiveModel as ManuscriptFileActiveModel,
    Column as ManuscriptFileColumn,
};

pub use access_request::{
    Entity as AccessRequestEntity,
    Model as AccessRequestRow,
    ActiveModel as AccessRequestActiveModel,
    Column as AccessRequestColumn,
};

pub use setting::{
    Entity as SettingEntity,
    Model as SettingRow,
    ActiveModel as SettingActiveModel,
    Column as SettingColumn,
};
