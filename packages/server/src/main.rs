use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderName, HeaderValue, Method};
use common::storage::BlobStore;
use common::storage::filesystem::FilesystemBlobStore;
use mq::{Mq, MqConfig};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Level, info, warn};

use server::config::AppConfig;
use server::state::AppState;
use server::{build_router, database, seed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = AppConfig::load().context("Failed to load config")?;

    let db = database::init_db(&config.database)
        .await
        .context("Failed to initialize database")?;
    seed::sync_resource_types(&db, &config.resource_types).await?;
    seed::ensure_indexes(&db).await?;

    let blob_store: Option<Arc<dyn BlobStore>> = if config.storage.enabled {
        let store = FilesystemBlobStore::new(
            PathBuf::from(&config.storage.root),
            config.storage.public_url.clone(),
        )
        .await
        .context("Failed to initialize blob store")?;
        Some(Arc::new(store))
    } else {
        warn!("Blob storage disabled; upload and bundle APIs will fail fast");
        None
    };

    let mq = if config.mq.enabled {
        match Mq::connect(MqConfig {
            url: config.mq.url.clone(),
            pool_size: config.mq.pool_size,
        })
        .await
        {
            Ok(queue) => {
                info!(
                    job_queue = %config.mq.job_queue_name,
                    result_queue = %config.mq.result_queue_name,
                    "MQ connected"
                );
                Some(Arc::new(queue))
            }
            Err(e) => {
                warn!(error = %e, "MQ unavailable, degrading to in-process dispatch");
                None
            }
        }
    } else {
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let cors = build_cors(&config);

    let state = AppState::build(db, config, blob_store, None, mq);
    let app = build_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!("Server running at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_cors(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors
        .allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-principal-id"),
            HeaderName::from_static("x-principal-permissions"),
        ])
        .max_age(Duration::from_secs(config.server.cors.max_age))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received, draining");
}
