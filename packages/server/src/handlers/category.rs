use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::extractors::principal::Principal;
use crate::models::category::{
    CategoryResponse, CreateCategoryRequest, ListCategoriesQuery, UpdateCategoryRequest,
};
use crate::models::resource::StatusResponse;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/",
    tag = "Categories",
    operation_id = "listCategories",
    summary = "List categories",
    params(ListCategoriesQuery),
    responses(
        (status = 200, description = "Category list", body = [CategoryResponse]),
    ),
)]
#[instrument(skip(state, query))]
pub async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<ListCategoriesQuery>,
) -> Result<Json<Vec<CategoryResponse>>, AppError> {
    Ok(Json(
        state
            .reader
            .list_categories(query.type_key.as_deref())
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Categories",
    operation_id = "createCategory",
    summary = "Create a category",
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Category created", body = CategoryResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req))]
pub async fn create_category(
    principal: Principal,
    State(state): State<AppState>,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    principal.require_permission("resource:update")?;
    let category = state
        .writer
        .create_category(req.type_key, req.name, req.parent_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CategoryResponse::from(category)),
    ))
}

#[utoipa::path(
    patch,
    path = "/{id}",
    tag = "Categories",
    operation_id = "updateCategory",
    summary = "Rename or reparent a category",
    params(("id" = String, Path, description = "Category ID")),
    request_body = UpdateCategoryRequest,
    responses(
        (status = 200, description = "Category updated", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Category not found (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal, req), fields(category_id = %id))]
pub async fn update_category(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:update")?;
    state
        .writer
        .update_category(&id, req.name, req.parent_id)
        .await?;
    Ok(Json(StatusResponse {
        message: "Category updated".into(),
    }))
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "Categories",
    operation_id = "deleteCategory",
    summary = "Delete a category",
    params(("id" = String, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Category deleted", body = StatusResponse),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, principal), fields(category_id = %id))]
pub async fn delete_category(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    principal.require_permission("resource:delete")?;
    state.writer.delete_category(&id).await?;
    Ok(Json(StatusResponse {
        message: "Category deleted".into(),
    }))
}
