use chrono::{DateTime, Utc};
use common::{ResourceScope, VersionState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};

use crate::entity::{resource, resource_version};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VersionResponse {
    pub id: String,
    pub version_num: i32,
    pub semver: String,
    pub file_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[schema(value_type = Object)]
    pub meta_data: Value,
    pub state: VersionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VersionResponse {
    pub fn from_model(model: resource_version::Model, download_url: Option<String>) -> Self {
        Self {
            id: model.id,
            version_num: model.version_num,
            semver: model.semver,
            file_size: model.file_size,
            file_hash: model.file_hash,
            meta_data: model.meta_data,
            state: model.state,
            download_url,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResourceResponse {
    pub id: String,
    pub type_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub category_id: String,
    pub name: String,
    pub owner_id: String,
    pub scope: ResourceScope,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<VersionResponse>,
}

impl ResourceResponse {
    pub fn from_model(model: resource::Model, latest_version: Option<VersionResponse>) -> Self {
        let tags = model.tag_list();
        Self {
            id: model.id,
            type_key: model.type_key,
            category_id: model.category_id,
            name: model.name,
            owner_id: model.owner_id,
            scope: model.scope,
            tags,
            created_at: model.created_at,
            latest_version,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResourceListResponse {
    pub items: Vec<ResourceResponse>,
    /// Total matching rows before pagination.
    pub total: u64,
    pub page: u64,
    pub size: u64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListResourcesQuery {
    /// Filter by resource type key.
    #[serde(rename = "type")]
    pub type_key: Option<String>,
    pub category_id: Option<String>,
    pub owner_id: Option<String>,
    /// "PUBLIC", "PRIVATE", or unset for everything visible to the owner.
    pub scope: Option<String>,
    /// Substring match against name or tags.
    #[serde(rename = "query")]
    pub keyword: Option<String>,
    pub page: Option<u64>,
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TypeFilterQuery {
    #[serde(rename = "type")]
    pub type_key: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateResourceRequest {
    pub name: Option<String>,
    pub category_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateScopeRequest {
    pub scope: ResourceScope,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateVersionMetadataRequest {
    #[schema(value_type = Object)]
    pub meta_data: Map<String, Value>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetLatestVersionRequest {
    pub version_id: String,
}

/// One node of the recursive dependency resolution. A version id appears at
/// most once in the whole tree, which keeps cyclic graphs finite.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DependencyTreeNode {
    pub resource_id: String,
    pub resource_name: String,
    pub type_key: String,
    pub version_id: String,
    pub semver: String,
    pub constraint: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyTreeNode>,
}

/// One entry of a bundle: a version plus everything needed to fetch it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BundleItem {
    pub version_id: String,
    pub resource_id: String,
    pub resource_name: String,
    pub type_key: String,
    pub semver: String,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub size: i64,
}

/// `manifest.json` written as the first entry of a bundle archive.
#[derive(Debug, Serialize)]
pub struct BundleManifest {
    pub root_version_id: String,
    pub generated_at: String,
    pub items: Vec<BundleItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncResponse {
    /// Number of versions newly created from storage.
    pub count: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearResponse {
    pub cleared: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub message: String,
}
