pub mod config;
pub mod consumers;
pub mod database;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod events;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod reader;
pub mod routes;
pub mod seed;
pub mod sidecar;
pub mod state;
pub mod uploader;
pub mod utils;
pub mod writer;

use axum::Json;
use axum::routing::get;

use crate::state::AppState;

/// Build the application router.
pub fn build_router(state: AppState) -> axum::Router {
    let (router, api) = utoipa_axum::router::OpenApiRouter::new()
        .nest("/api/v1", routes::v1::routes())
        .split_for_parts();

    router
        .route(
            "/api/v1/openapi.json",
            get(move || {
                let api = api.clone();
                async move { Json(api) }
            }),
        )
        .with_state(state)
}
