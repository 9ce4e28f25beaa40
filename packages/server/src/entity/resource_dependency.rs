use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A directed edge from a version to another resource. Cycles are permitted
/// in storage; resolvers carry a visited set.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "resource_dependency")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub source_version_id: String,
    pub target_resource_id: String,
    /// Semver range or the literal "latest".
    pub version_constraint: String,
    /// Optional pin to a concrete target version.
    pub target_version_id: Option<String>,

    #[sea_orm(belongs_to, from = "source_version_id", to = "id")]
    pub source_version: HasOne<super::resource_version::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
