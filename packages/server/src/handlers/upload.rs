use axum::Json;
use axum::extract::State;
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::extractors::principal::Principal;
use crate::models::upload::{
    CompleteMultipartUploadRequest, ConfirmUploadRequest, ConfirmUploadResponse,
    GetPartUrlRequest, GetPartUrlResponse, InitMultipartUploadRequest,
    InitMultipartUploadResponse, UploadTicketRequest, UploadTicketResponse,
};
use crate::state::AppState;
use crate::writer::UpsertOutcome;

fn confirm_response(outcome: UpsertOutcome) -> ConfirmUploadResponse {
    ConfirmUploadResponse {
        resource_id: outcome.resource_id,
        version_id: outcome.version_id,
        version_num: outcome.version_num,
        state: outcome.initial_state,
    }
}

#[utoipa::path(
    post,
    path = "/ticket",
    tag = "Uploads",
    operation_id = "requestUploadTicket",
    summary = "Request an upload ticket",
    description = "Vends a stateless upload ticket together with a presigned PUT URL, \
        or temporary credentials when `mode` is \"sts\".",
    request_body = UploadTicketRequest,
    responses(
        (status = 200, description = "Ticket vended", body = UploadTicketResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 503, description = "No blob store configured (STORAGE_UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req))]
pub async fn request_ticket(
    principal: Principal,
    State(state): State<AppState>,
    Json(req): Json<UploadTicketRequest>,
) -> Result<Json<UploadTicketResponse>, AppError> {
    principal.require_permission("resource:create")?;
    Ok(Json(state.uploader.request_ticket(req).await?))
}

#[utoipa::path(
    post,
    path = "/confirm",
    tag = "Uploads",
    operation_id = "confirmUpload",
    summary = "Confirm an upload and register it in the catalog",
    description = "Stats the uploaded object (the stat size is authoritative), then upserts \
        resource, version and dependency edges. Versions of a type with a processor start \
        PENDING and are processed asynchronously; poll the resource to observe the outcome.",
    request_body = ConfirmUploadRequest,
    responses(
        (status = 200, description = "Upload registered", body = ConfirmUploadResponse),
        (status = 400, description = "Malformed ticket (VALIDATION_ERROR)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Uploaded object not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Semver already ACTIVE (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req))]
pub async fn confirm_upload(
    principal: Principal,
    State(state): State<AppState>,
    Json(mut req): Json<ConfirmUploadRequest>,
) -> Result<Json<ConfirmUploadResponse>, AppError> {
    principal.require_permission("resource:create")?;
    if req.owner_id.is_empty() {
        req.owner_id = principal.owner_id;
    }
    let outcome = state.uploader.confirm(req).await?;
    Ok(Json(confirm_response(outcome)))
}

#[utoipa::path(
    post,
    path = "/multipart/init",
    tag = "Uploads",
    operation_id = "initMultipartUpload",
    summary = "Begin a multipart upload",
    request_body = InitMultipartUploadRequest,
    responses(
        (status = 200, description = "Multipart upload started", body = InitMultipartUploadResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 503, description = "No blob store configured (STORAGE_UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req))]
pub async fn init_multipart(
    principal: Principal,
    State(state): State<AppState>,
    Json(req): Json<InitMultipartUploadRequest>,
) -> Result<Json<InitMultipartUploadResponse>, AppError> {
    principal.require_permission("resource:create")?;
    Ok(Json(state.uploader.init_multipart(req).await?))
}

#[utoipa::path(
    post,
    path = "/multipart/part-url",
    tag = "Uploads",
    operation_id = "getMultipartPartUrl",
    summary = "Vend a URL for one part of a multipart upload",
    request_body = GetPartUrlRequest,
    responses(
        (status = 200, description = "Part URL vended", body = GetPartUrlResponse),
        (status = 400, description = "Malformed ticket (VALIDATION_ERROR)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req))]
pub async fn part_url(
    principal: Principal,
    State(state): State<AppState>,
    Json(req): Json<GetPartUrlRequest>,
) -> Result<Json<GetPartUrlResponse>, AppError> {
    principal.require_permission("resource:create")?;
    Ok(Json(state.uploader.part_url(req).await?))
}

#[utoipa::path(
    post,
    path = "/multipart/complete",
    tag = "Uploads",
    operation_id = "completeMultipartUpload",
    summary = "Assemble a multipart upload and register it in the catalog",
    request_body = CompleteMultipartUploadRequest,
    responses(
        (status = 200, description = "Upload registered", body = ConfirmUploadResponse),
        (status = 400, description = "Malformed ticket (VALIDATION_ERROR)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Upload or parts missing (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Semver already ACTIVE (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req))]
pub async fn complete_multipart(
    principal: Principal,
    State(state): State<AppState>,
    Json(mut req): Json<CompleteMultipartUploadRequest>,
) -> Result<Json<ConfirmUploadResponse>, AppError> {
    principal.require_permission("resource:create")?;
    if req.owner_id.is_empty() {
        req.owner_id = principal.owner_id;
    }
    let outcome = state.uploader.complete_multipart(req).await?;
    Ok(Json(confirm_response(outcome)))
}
