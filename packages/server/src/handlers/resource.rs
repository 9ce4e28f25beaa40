use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use axum::Json;
use common::job::ProcessResultRequest;
use sea_orm::EntityTrait;
use tokio_util::io::ReaderStream;
use tracing::{error, instrument};

use crate::entity::resource_version;
use crate::error::{AppError, ErrorBody};
use crate::extractors::principal::Principal;
use crate::models::resource::{
    BundleItem, ClearResponse, DependencyTreeNode, ListResourcesQuery, ResourceListResponse,
    ResourceResponse, SetLatestVersionRequest, StatusResponse, SyncResponse, TypeFilterQuery,
    UpdateResourceRequest, UpdateScopeRequest, UpdateTagsRequest, UpdateVersionMetadataRequest,
    VersionResponse,
};
use crate::state::AppState;
use crate::writer::DependencySpec;

#[utoipa::path(
    get,
    path = "/",
    tag = "Resources",
    operation_id = "listResources",
    summary = "List resources",
    description = "Paginated listing with type/category/keyword filters. Scope logic: \
        \"PUBLIC\" shows public resources, \"PRIVATE\" the owner's private ones, and no \
        scope with an owner shows everything visible to that owner.",
    params(ListResourcesQuery),
    responses(
        (status = 200, description = "Resource list", body = ResourceListResponse),
    ),
)]
#[instrument(skip(state, query))]
pub async fn list_resources(
    State(state): State<AppState>,
    Query(query): Query<ListResourcesQuery>,
) -> Result<Json<ResourceListResponse>, AppError> {
    let (items, total, page, size) = state.reader.list_resources(&query).await?;
    Ok(Json(ResourceListResponse {
        items,
        total,
        page,
        size,
    }))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Resources",
    operation_id = "getResource",
    summary = "Get resource details",
    description = "Returns the resource with its latest version and a presigned download URL.",
    params(("id" = String, Path, description = "Resource ID")),
    responses(
        (status = 200, description = "Resource details", body = ResourceResponse),
        (status = 404, description = "Resource not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(resource_id = %id))]
pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResourceResponse>, AppError> {
    Ok(Json(state.reader.get_resource(&id).await?))
}

#[utoipa::path(
    patch,
    path = "/{id}",
    tag = "Resources",
    operation_id = "updateResource",
    summary = "Rename a resource or move it to another category",
    params(("id" = String, Path, description = "Resource ID")),
    request_body = UpdateResourceRequest,
    responses(
        (status = 200, description = "Resource updated", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Resource not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req), fields(resource_id = %id))]
pub async fn update_resource(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateResourceRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:update")?;
    state
        .writer
        .update_resource(&id, req.name, req.category_id)
        .await?;
    Ok(Json(StatusResponse {
        message: "Resource updated".into(),
    }))
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "Resources",
    operation_id = "deleteResource",
    summary = "Soft-delete a resource",
    description = "Marks the resource deleted; blob and sidecar cleanup happen out of band.",
    params(("id" = String, Path, description = "Resource ID")),
    responses(
        (status = 200, description = "Resource deleted", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Resource not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal), fields(resource_id = %id))]
pub async fn delete_resource(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:delete")?;
    state.writer.delete_resource(&id).await?;
    Ok(Json(StatusResponse {
        message: "Resource deleted".into(),
    }))
}

#[utoipa::path(
    post,
    path = "/clear",
    tag = "Resources",
    operation_id = "clearResources",
    summary = "Soft-delete all resources of a type",
    params(TypeFilterQuery),
    responses(
        (status = 200, description = "Repository cleared", body = ClearResponse),
        (status = 400, description = "Missing type (VALIDATION_ERROR)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, query))]
pub async fn clear_resources(
    principal: Principal,
    State(state): State<AppState>,
    Query(query): Query<TypeFilterQuery>,
) -> Result<Json<ClearResponse>, AppError> {
    principal.require_permission("resource:delete")?;
    let cleared = state
        .writer
        .clear_resources(query.type_key.as_deref().unwrap_or(""))
        .await?;
    Ok(Json(ClearResponse { cleared }))
}

#[utoipa::path(
    post,
    path = "/sync",
    tag = "Resources",
    operation_id = "syncFromStorage",
    summary = "Rehydrate catalog rows from the blob store",
    description = "Scans the resources/ prefix and creates versions for objects the catalog \
        does not know, using sidecars to restore names, tags and metadata.",
    responses(
        (status = 200, description = "Sync completed", body = SyncResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 503, description = "No blob store configured (STORAGE_UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal))]
pub async fn sync_from_storage(
    principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<SyncResponse>, AppError> {
    principal.require_permission("resource:sync")?;
    let count = state.writer.sync_from_storage().await?;
    Ok(Json(SyncResponse { count }))
}

#[utoipa::path(
    patch,
    path = "/{id}/tags",
    tag = "Resources",
    operation_id = "updateResourceTags",
    summary = "Replace a resource's tag set",
    params(("id" = String, Path, description = "Resource ID")),
    request_body = UpdateTagsRequest,
    responses(
        (status = 200, description = "Tags updated", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Resource not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req), fields(resource_id = %id))]
pub async fn update_tags(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTagsRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:update")?;
    state.writer.update_tags(&id, req.tags).await?;
    Ok(Json(StatusResponse {
        message: "Tags updated".into(),
    }))
}

#[utoipa::path(
    patch,
    path = "/{id}/scope",
    tag = "Resources",
    operation_id = "updateResourceScope",
    summary = "Flip a resource between PRIVATE and PUBLIC",
    params(("id" = String, Path, description = "Resource ID")),
    request_body = UpdateScopeRequest,
    responses(
        (status = 200, description = "Scope updated", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Resource not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req), fields(resource_id = %id))]
pub async fn update_scope(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateScopeRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:update")?;
    state.writer.update_scope(&id, req.scope).await?;
    Ok(Json(StatusResponse {
        message: "Scope updated".into(),
    }))
}

#[utoipa::path(
    post,
    path = "/{id}/latest",
    tag = "Resources",
    operation_id = "setLatestVersion",
    summary = "Point the latest pointer at a specific version",
    params(("id" = String, Path, description = "Resource ID")),
    request_body = SetLatestVersionRequest,
    responses(
        (status = 200, description = "Latest version updated", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Version not found on resource (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req), fields(resource_id = %id))]
pub async fn set_latest_version(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetLatestVersionRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:update")?;
    state.writer.set_latest_version(&id, &req.version_id).await?;
    Ok(Json(StatusResponse {
        message: "Latest version updated".into(),
    }))
}

#[utoipa::path(
    get,
    path = "/{id}/versions",
    tag = "Resources",
    operation_id = "listResourceVersions",
    summary = "List a resource's version history",
    params(("id" = String, Path, description = "Resource ID")),
    responses(
        (status = 200, description = "Version history", body = [VersionResponse]),
    ),
)]
#[instrument(skip(state), fields(resource_id = %id))]
pub async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<VersionResponse>>, AppError> {
    Ok(Json(state.reader.list_versions(&id).await?))
}

/// Result callback used by remote workers running without a broker.
#[utoipa::path(
    patch,
    path = "/{id}/process-result",
    tag = "Resources",
    operation_id = "reportProcessResult",
    summary = "Report a processing outcome for a version",
    description = "Merges processor-contributed metadata into the version and applies the \
        terminal state. Activation schedules a sidecar refresh.",
    params(("id" = String, Path, description = "Version ID")),
    request_body = ProcessResultRequest,
    responses(
        (status = 200, description = "Result applied", body = StatusResponse),
        (status = 404, description = "Version not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, req), fields(version_id = %id))]
pub async fn report_process_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ProcessResultRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    state.writer.report_process_result(&id, req).await?;
    Ok(Json(StatusResponse {
        message: "Result reported".into(),
    }))
}

#[utoipa::path(
    get,
    path = "/versions/{vid}/dependencies",
    tag = "Dependencies",
    operation_id = "getDependencies",
    summary = "List a version's direct dependencies",
    params(("vid" = String, Path, description = "Version ID")),
    responses(
        (status = 200, description = "Dependency edges", body = [DependencySpec]),
    ),
)]
#[instrument(skip(state), fields(version_id = %vid))]
pub async fn get_dependencies(
    State(state): State<AppState>,
    Path(vid): Path<String>,
) -> Result<Json<Vec<DependencySpec>>, AppError> {
    Ok(Json(state.reader.get_dependencies(&vid).await?))
}

#[utoipa::path(
    patch,
    path = "/versions/{vid}/dependencies",
    tag = "Dependencies",
    operation_id = "updateDependencies",
    summary = "Replace a version's dependency edges",
    params(("vid" = String, Path, description = "Version ID")),
    request_body = Vec<DependencySpec>,
    responses(
        (status = 200, description = "Dependencies updated", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 409, description = "Version does not exist (CONFLICT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req), fields(version_id = %vid))]
pub async fn update_dependencies(
    principal: Principal,
    State(state): State<AppState>,
    Path(vid): Path<String>,
    Json(req): Json<Vec<DependencySpec>>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:update")?;
    state.writer.update_dependencies(&vid, req).await?;
    Ok(Json(StatusResponse {
        message: "Dependencies updated".into(),
    }))
}

#[utoipa::path(
    patch,
    path = "/versions/{vid}/metadata",
    tag = "Resources",
    operation_id = "updateVersionMetadata",
    summary = "Merge keys into a version's metadata",
    params(("vid" = String, Path, description = "Version ID")),
    request_body = UpdateVersionMetadataRequest,
    responses(
        (status = 200, description = "Metadata updated", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Version not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req), fields(version_id = %vid))]
pub async fn update_version_metadata(
    principal: Principal,
    State(state): State<AppState>,
    Path(vid): Path<String>,
    Json(req): Json<UpdateVersionMetadataRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:update")?;
    state
        .writer
        .update_version_metadata(&vid, req.meta_data)
        .await?;
    Ok(Json(StatusResponse {
        message: "Metadata updated".into(),
    }))
}

#[utoipa::path(
    get,
    path = "/versions/{vid}/dependency-tree",
    tag = "Dependencies",
    operation_id = "getDependencyTree",
    summary = "Resolve a version's dependency tree",
    description = "Depth-first resolution with cycle safety: each version is expanded at \
        most once, so the tree is finite on any graph.",
    params(("vid" = String, Path, description = "Version ID")),
    responses(
        (status = 200, description = "Dependency tree", body = [DependencyTreeNode]),
        (status = 404, description = "Version not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(version_id = %vid))]
pub async fn get_dependency_tree(
    State(state): State<AppState>,
    Path(vid): Path<String>,
) -> Result<Json<Vec<DependencyTreeNode>>, AppError> {
    Ok(Json(state.reader.get_dependency_tree(&vid).await?))
}

#[utoipa::path(
    get,
    path = "/versions/{vid}/bundle",
    tag = "Dependencies",
    operation_id = "getResourceBundle",
    summary = "Enumerate a version's bundle",
    description = "Flat map of version id to bundle entry covering the version and its \
        transitive dependencies, each with a 24-hour download URL.",
    params(("vid" = String, Path, description = "Version ID")),
    responses(
        (status = 200, description = "Flat map of version id to bundle entry"),
        (status = 404, description = "Version not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(version_id = %vid))]
pub async fn get_bundle(
    State(state): State<AppState>,
    Path(vid): Path<String>,
) -> Result<Json<BTreeMap<String, BundleItem>>, AppError> {
    Ok(Json(state.reader.get_resource_bundle(&vid).await?))
}

#[utoipa::path(
    get,
    path = "/versions/{vid}/download-pack",
    tag = "Dependencies",
    operation_id = "downloadBundle",
    summary = "Stream a bundle as a ZIP archive",
    description = "manifest.json first, then one entry per bundle item streamed straight \
        from the blob store. Unreadable entries are skipped; the archive still completes.",
    params(("vid" = String, Path, description = "Version ID")),
    responses(
        (status = 200, description = "ZIP archive", content_type = "application/zip"),
        (status = 404, description = "Version not found (NOT_FOUND)", body = ErrorBody),
        (status = 503, description = "No blob store configured (STORAGE_UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state), fields(version_id = %vid))]
pub async fn download_bundle(
    State(state): State<AppState>,
    Path(vid): Path<String>,
) -> Result<Response, AppError> {
    // Fail before the response starts streaming; mid-stream errors can only
    // truncate the archive.
    resource_version::Entity::find_by_id(vid.as_str())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("version {vid} not found")))?;
    if state.blob_store.is_none() {
        return Err(AppError::StorageUnavailable);
    }

    let (read_half, write_half) = tokio::io::duplex(64 * 1024);
    let reader = state.reader.clone();
    let version_id = vid.clone();
    tokio::spawn(async move {
        if let Err(e) = reader.download_bundle_zip(&version_id, write_half).await {
            error!(version_id = %version_id, error = %e, "Bundle packaging failed");
        }
    });

    let body = Body::from_stream(ReaderStream::new(read_half));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"bundle-{vid}.zip\""),
        )
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}
