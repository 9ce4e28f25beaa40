use std::sync::Arc;
use std::time::Duration;

use common::storage::{BlobStore, ObjectInfo, SecurityTokenProvider};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::upload::{
    CompleteMultipartUploadRequest, ConfirmUploadRequest, GetPartUrlRequest, GetPartUrlResponse,
    InitMultipartUploadRequest, InitMultipartUploadResponse, UploadTicketRequest,
    UploadTicketResponse,
};
use crate::utils::object_name::validate_object_filename;
use crate::writer::{ResourceWriter, UpsertOutcome, UpsertRequest};

/// Byte offset of the object key inside a ticket: a 36-character UUID
/// followed by the `::` separator.
const TICKET_KEY_OFFSET: usize = 38;

/// Vends upload tickets and finalizes uploads into the catalog.
///
/// Tickets are stateless: `{uuid}::{object_key}` carries everything needed
/// to confirm, so no server-side ticket store exists.
pub struct UploadManager {
    store: Option<Arc<dyn BlobStore>>,
    sts_provider: Option<Arc<dyn SecurityTokenProvider>>,
    bucket: String,
    writer: Arc<ResourceWriter>,
    presign_expiry: Duration,
}

impl UploadManager {
    pub fn new(
        store: Option<Arc<dyn BlobStore>>,
        sts_provider: Option<Arc<dyn SecurityTokenProvider>>,
        bucket: impl Into<String>,
        writer: Arc<ResourceWriter>,
        presign_expiry: Duration,
    ) -> Self {
        Self {
            store,
            sts_provider,
            bucket: bucket.into(),
            writer,
            presign_expiry,
        }
    }

    fn store(&self) -> Result<&Arc<dyn BlobStore>, AppError> {
        self.store.as_ref().ok_or(AppError::StorageUnavailable)
    }

    /// Mint a fresh ticket uuid and the object key it maps to.
    fn mint_object_key(
        &self,
        resource_type: &str,
        filename: &str,
    ) -> Result<(String, String), AppError> {
        if resource_type.trim().is_empty() || resource_type.contains(['/', '\\', '\0']) {
            return Err(AppError::Validation("invalid resource_type".into()));
        }
        let filename = validate_object_filename(filename)
            .map_err(|e| AppError::Validation(e.message().into()))?;

        let ticket_uuid = Uuid::new_v4().to_string();
        let object_key = format!("resources/{resource_type}/{ticket_uuid}/{filename}");
        Ok((ticket_uuid, object_key))
    }

    /// Vend an upload ticket: a presigned PUT URL by default, or temporary
    /// credentials when `mode` is "sts".
    #[instrument(skip(self, req), fields(resource_type = %req.resource_type, mode = %req.mode))]
    pub async fn request_ticket(
        &self,
        req: UploadTicketRequest,
    ) -> Result<UploadTicketResponse, AppError> {
        let store = self.store()?;
        let (ticket_uuid, object_key) = self.mint_object_key(&req.resource_type, &req.filename)?;
        let ticket_id = format!("{ticket_uuid}::{object_key}");

        if req.mode == "sts" {
            let sts = self
                .sts_provider
                .as_ref()
                .ok_or_else(|| AppError::Validation("sts provider not configured".into()))?;
            let credentials = sts
                .generate_sts_token(&self.bucket, &object_key, self.presign_expiry)
                .await?;
            return Ok(UploadTicketResponse {
                ticket_id,
                presigned_url: None,
                credentials: Some(credentials),
                bucket: Some(self.bucket.clone()),
                object_key: Some(object_key),
            });
        }

        let url = store
            .presign_put(&self.bucket, &object_key, self.presign_expiry)
            .await?;
        Ok(UploadTicketResponse {
            ticket_id,
            presigned_url: Some(url),
            credentials: None,
            bucket: None,
            object_key: None,
        })
    }

    /// Begin a multipart upload, minting the ticket exactly like the
    /// single-shot path.
    pub async fn init_multipart(
        &self,
        req: InitMultipartUploadRequest,
    ) -> Result<InitMultipartUploadResponse, AppError> {
        let store = self.store()?;
        let (ticket_uuid, object_key) = self.mint_object_key(&req.resource_type, &req.filename)?;

        let upload_id = store.init_multipart(&self.bucket, &object_key).await?;
        Ok(InitMultipartUploadResponse {
            ticket_id: format!("{ticket_uuid}::{object_key}"),
            upload_id,
            bucket: self.bucket.clone(),
            object_key,
        })
    }

    /// Vend a URL for one part of a multipart upload.
    pub async fn part_url(&self, req: GetPartUrlRequest) -> Result<GetPartUrlResponse, AppError> {
        let store = self.store()?;
        let (_, object_key) = parse_ticket(&req.ticket_id)?;
        let url = store
            .presign_part(
                &self.bucket,
                object_key,
                &req.upload_id,
                req.part_number,
                self.presign_expiry,
            )
            .await?;
        Ok(GetPartUrlResponse { url })
    }

    /// Finish a multipart upload in the backend, then register the object
    /// like a confirmed single-shot upload.
    #[instrument(skip(self, req), fields(type_key = %req.type_key, name = %req.name))]
    pub async fn complete_multipart(
        &self,
        req: CompleteMultipartUploadRequest,
    ) -> Result<UpsertOutcome, AppError> {
        let store = self.store()?;
        let (_, object_key) = parse_ticket(&req.ticket_id)?;

        store
            .complete_multipart(&self.bucket, object_key, &req.upload_id, &req.parts)
            .await?;

        let info = self.stat_uploaded(object_key).await?;
        self.writer
            .register_upload(UpsertRequest {
                type_key: req.type_key,
                category_id: req.category_id,
                name: req.name,
                owner_id: req.owner_id,
                scope: req.scope,
                object_key: object_key.to_string(),
                size: info.size,
                file_hash: info.etag,
                tags: req.tags,
                semver: req.semver,
                dependencies: req.dependencies,
                meta_data: req.extra_meta,
            })
            .await
    }

    /// Confirm a single-shot upload: stat the object for the authoritative
    /// size, then upsert resource and version in one catalog transaction.
    #[instrument(skip(self, req), fields(type_key = %req.type_key, name = %req.name))]
    pub async fn confirm(&self, req: ConfirmUploadRequest) -> Result<UpsertOutcome, AppError> {
        let (_, object_key) = parse_ticket(&req.ticket_id)?;

        let info = self.stat_uploaded(object_key).await?;
        info!(key = %object_key, size = info.size, "Upload confirmed, registering");

        self.writer
            .register_upload(UpsertRequest {
                type_key: req.type_key,
                category_id: req.category_id,
                name: req.name,
                owner_id: req.owner_id,
                scope: req.scope,
                object_key: object_key.to_string(),
                size: info.size,
                file_hash: info.etag,
                tags: req.tags,
                semver: req.semver,
                dependencies: req.dependencies,
                meta_data: req.extra_meta,
            })
            .await
    }

    /// Stat the uploaded object; the stat size is authoritative, never the
    /// client-declared one.
    async fn stat_uploaded(&self, object_key: &str) -> Result<ObjectInfo, AppError> {
        let store = self.store()?;
        match store.stat(&self.bucket, object_key).await {
            Ok(info) => Ok(info),
            Err(e) if e.is_not_found() => Err(AppError::NotFound(format!(
                "uploaded file not found: {object_key}"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Decode a ticket into its uuid and object key parts.
///
/// The uuid is fixed-length (36 characters) and followed by `::`; the object
/// key is everything after byte 38. Bounds are checked before slicing.
pub fn parse_ticket(ticket_id: &str) -> Result<(&str, &str), AppError> {
    if ticket_id.len() <= TICKET_KEY_OFFSET
        || !ticket_id.is_char_boundary(36)
        || !ticket_id.is_char_boundary(TICKET_KEY_OFFSET)
    {
        return Err(AppError::Validation("malformed upload ticket".into()));
    }

    let (uuid_part, rest) = ticket_id.split_at(36);
    let object_key = rest
        .strip_prefix("::")
        .ok_or_else(|| AppError::Validation("malformed upload ticket".into()))?;

    if Uuid::parse_str(uuid_part).is_err() || object_key.is_empty() {
        return Err(AppError::Validation("malformed upload ticket".into()));
    }

    Ok((uuid_part, object_key))
}
