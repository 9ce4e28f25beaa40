use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use super::error::StorageError;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Metadata describing a stored object.
#[derive(Clone, Debug, Default)]
pub struct ObjectInfo {
    /// Bucket-relative key, `/`-separated.
    pub key: String,
    pub size: i64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub user_meta: HashMap<String, String>,
}

/// One part of a multipart upload, as reported back by the client.
#[derive(Clone, Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Part {
    pub part_number: i32,
    pub etag: String,
}

/// Temporary credentials scoped to a key prefix.
#[derive(Clone, Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StsCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

/// Object storage used for resource payloads and their sidecars.
///
/// The catalog treats the store as eventually consistent for listings but
/// read-your-writes for `stat` after a successful `put`/`complete_multipart`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch object metadata. Fails with [`StorageError::NotFound`] if absent.
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectInfo, StorageError>;

    /// Open a streaming reader over the object's bytes.
    async fn get(&self, bucket: &str, key: &str) -> Result<BoxReader, StorageError>;

    /// Write an object, overwriting any previous content. `size` may be -1
    /// for writes whose length is not known upfront.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        reader: BoxReader,
        size: i64,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Lazily list objects under a prefix. The receiver yields objects as the
    /// backend produces them and closes on completion or on the first error.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> mpsc::Receiver<Result<ObjectInfo, StorageError>>;

    /// Vend a time-limited URL allowing a direct PUT of one object.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, StorageError>;

    /// Vend a time-limited URL allowing a direct GET of one object.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, StorageError>;

    /// Begin a multipart upload, returning its upload id.
    async fn init_multipart(&self, bucket: &str, key: &str) -> Result<String, StorageError>;

    /// Vend a URL for uploading a single part.
    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expiry: Duration,
    ) -> Result<String, StorageError>;

    /// Assemble previously uploaded parts into the final object.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<(), StorageError>;

    /// Abandon a multipart upload and discard its parts.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError>;
}

/// Optional capability: vend temporary credentials for direct client uploads.
/// Backed by the cloud provider's STS service; not every backend has one.
#[async_trait]
pub trait SecurityTokenProvider: Send + Sync {
    async fn generate_sts_token(
        &self,
        bucket: &str,
        prefix: &str,
        duration: Duration,
    ) -> Result<StsCredentials, StorageError>;
}
