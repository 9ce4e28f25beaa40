use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use sea_orm::EntityTrait;
use tracing::instrument;

use crate::entity::resource_type;
use crate::error::AppError;
use crate::models::resource_type::ResourceTypeResponse;
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/",
    tag = "Resource Types",
    operation_id = "listResourceTypes",
    summary = "List resource type definitions",
    description = "Returns every registered type, ordered as in configuration.",
    responses(
        (status = 200, description = "Resource types", body = [ResourceTypeResponse]),
    ),
)]
#[instrument(skip(state))]
pub async fn list_resource_types(
    State(state): State<AppState>,
) -> Result<Json<Vec<ResourceTypeResponse>>, AppError> {
    let types = resource_type::Entity::find().all(&state.db).await?;

    // Preserve configuration ordering; unknown keys (if any) go last.
    let mut by_key: HashMap<String, resource_type::Model> = types
        .into_iter()
        .map(|t| (t.type_key.clone(), t))
        .collect();

    let mut ordered = Vec::with_capacity(by_key.len());
    for def in &state.config.resource_types {
        if let Some(model) = by_key.remove(&def.type_key) {
            ordered.push(model);
        }
    }
    let mut rest: Vec<_> = by_key.into_values().collect();
    rest.sort_by(|a, b| a.type_key.cmp(&b.type_key));
    ordered.extend(rest);

    Ok(Json(
        ordered.into_iter().map(ResourceTypeResponse::from).collect(),
    ))
}
