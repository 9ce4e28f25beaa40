use utoipa_axum::{router::OpenApiRouter, routes};

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest("/uploads", upload_routes())
        .nest("/resource-types", resource_type_routes())
        .nest("/resources", resource_routes())
        .nest("/categories", category_routes())
}

fn upload_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::upload::request_ticket))
        .routes(routes!(handlers::upload::confirm_upload))
        .routes(routes!(handlers::upload::init_multipart))
        .routes(routes!(handlers::upload::part_url))
        .routes(routes!(handlers::upload::complete_multipart))
}

fn resource_type_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(handlers::resource_type::list_resource_types))
}

fn resource_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::resource::list_resources))
        .routes(routes!(handlers::resource::sync_from_storage))
        .routes(routes!(handlers::resource::clear_resources))
        .routes(routes!(
            handlers::resource::get_resource,
            handlers::resource::update_resource,
            handlers::resource::delete_resource,
        ))
        .routes(routes!(handlers::resource::update_tags))
        .routes(routes!(handlers::resource::update_scope))
        .routes(routes!(handlers::resource::set_latest_version))
        .routes(routes!(handlers::resource::list_versions))
        .routes(routes!(handlers::resource::report_process_result))
        .routes(routes!(
            handlers::resource::get_dependencies,
            handlers::resource::update_dependencies,
        ))
        .routes(routes!(handlers::resource::update_version_metadata))
        .routes(routes!(handlers::resource::get_dependency_tree))
        .routes(routes!(handlers::resource::get_bundle))
        .routes(routes!(handlers::resource::download_bundle))
}

fn category_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(
            handlers::category::list_categories,
            handlers::category::create_category,
        ))
        .routes(routes!(
            handlers::category::update_category,
            handlers::category::delete_category,
        ))
}
