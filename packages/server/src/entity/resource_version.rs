use common::VersionState;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An immutable-once-ACTIVE revision of a resource.
///
/// `(resource_id, semver)` is unique; `version_num` is gap-free and monotonic
/// per resource. A PENDING or ERROR row may be overwritten by a same-semver
/// upload, preserving `id` and `version_num`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "resource_version")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub resource_id: String,
    pub version_num: i32,
    pub semver: String,

    /// Blob key of the primary object.
    pub file_path: String,
    pub file_hash: Option<String>,
    pub file_size: i64,

    /// Free-form metadata map; processors merge keys into it.
    #[sea_orm(column_type = "JsonBinary")]
    pub meta_data: Json,

    pub state: VersionState,

    #[sea_orm(belongs_to, from = "resource_id", to = "id")]
    pub resource: HasOne<super::resource::Entity>,
    #[sea_orm(has_many)]
    pub dependencies: HasMany<super::resource_dependency::Entity>,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode the stored metadata object.
    pub fn metadata_map(&self) -> Map<String, Value> {
        self.meta_data.as_object().cloned().unwrap_or_default()
    }
}
