use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A node in the optional per-type category tree. The core does not enforce
/// acyclicity; callers must not create cycles.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "category")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub type_key: String,
    pub name: String,
    /// Parent category id; empty string means root.
    pub parent_id: String,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
