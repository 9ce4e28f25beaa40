use common::ResourceScope;
use common::storage::{Part, StsCredentials};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::writer::DependencySpec;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadTicketRequest {
    pub resource_type: String,
    pub filename: String,
    /// Client-declared size; informational only, the authoritative size
    /// comes from the stat at confirmation time.
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub checksum: String,
    /// "presigned" (default) or "sts".
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadTicketResponse {
    /// Stateless handle: `{uuid}::{object_key}`.
    pub ticket_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presigned_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<StsCredentials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmUploadRequest {
    pub ticket_id: String,
    pub type_key: String,
    #[serde(default)]
    pub category_id: String,
    pub name: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub scope: Option<ResourceScope>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub size: i64,
    pub semver: String,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub extra_meta: Map<String, Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmUploadResponse {
    pub resource_id: String,
    pub version_id: String,
    pub version_num: i32,
    /// "PENDING" when a processor will run, "ACTIVE" otherwise.
    pub state: common::VersionState,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitMultipartUploadRequest {
    pub resource_type: String,
    pub filename: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitMultipartUploadResponse {
    pub ticket_id: String,
    pub upload_id: String,
    pub bucket: String,
    pub object_key: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GetPartUrlRequest {
    pub ticket_id: String,
    pub upload_id: String,
    pub part_number: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GetPartUrlResponse {
    pub url: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompleteMultipartUploadRequest {
    pub ticket_id: String,
    pub upload_id: String,
    pub parts: Vec<Part>,
    pub type_key: String,
    #[serde(default)]
    pub category_id: String,
    pub name: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub scope: Option<ResourceScope>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub semver: String,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub extra_meta: Map<String, Value>,
}
