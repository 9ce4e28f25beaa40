use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Static definition of a class of artifacts, reconciled from configuration
/// at startup.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "resource_type")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub type_key: String,
    pub type_name: String,

    /// JSON Schema describing the upload form for this type.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub schema_def: Option<Json>,
    /// "flat" or "tree".
    pub category_mode: String,
    pub integration_mode: String,
    pub upload_mode: String,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub process_conf: Option<Json>,
    /// External processor command; versions of a type without one go ACTIVE
    /// immediately.
    #[sea_orm(column_type = "Text", nullable)]
    pub processor_cmd: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
