use common::ResourceScope;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// The logical artifact. At most one non-deleted row exists per
/// `(type_key, category_id, name, owner_id)` tuple; re-uploads with the same
/// tuple reuse the row.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "resource")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub type_key: String,
    /// Owning category; empty string means uncategorized.
    pub category_id: String,
    pub name: String,
    pub owner_id: String,
    pub scope: ResourceScope,

    /// Tag set stored as a JSON array of strings.
    #[sea_orm(column_type = "JsonBinary")]
    pub tags: Json,

    pub is_deleted: bool,
    /// Pointer to the published version; empty until the first version lands.
    /// Retargeted only through the explicit set-latest operation.
    pub latest_version_id: String,

    #[sea_orm(has_many)]
    pub versions: HasMany<super::resource_version::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode the stored tag array.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Encode a tag set for storage.
pub fn tags_json(tags: &[String]) -> Json {
    serde_json::json!(tags)
}
