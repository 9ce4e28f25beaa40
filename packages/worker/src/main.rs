mod config;
mod emitter;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use common::job::{JobAction, ProcessJob, ResultEmitter};
use common::processor::ProcessorRunner;
use common::storage::BlobStore;
use common::storage::filesystem::FilesystemBlobStore;
use mq::{Mq, MqConfig, QueueName};
use tracing::{error, info, warn};

use crate::emitter::{HttpResultEmitter, MqResultEmitter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = config::WorkerConfig::from_env().context("Failed to load config")?;
    info!("Worker starting: {}", config.worker.id);

    let mq = Arc::new(
        Mq::connect(MqConfig {
            url: config.mq.url.clone(),
            pool_size: config.mq.pool_size,
        })
        .await
        .context("Failed to connect to broker")?,
    );

    let job_queue = QueueName::new(config.mq.job_queue.clone());
    info!(
        job_queue = %job_queue,
        result_queue = %config.mq.result_queue,
        processors = config.processors.len(),
        "Broker connected"
    );

    let store: Arc<dyn BlobStore> = Arc::new(
        FilesystemBlobStore::new(
            PathBuf::from(&config.storage.root),
            config.storage.public_url.clone(),
        )
        .await
        .context("Failed to initialize blob store")?,
    );

    let runner = Arc::new(ProcessorRunner::new(
        Some(store),
        config.storage.bucket.clone(),
        config.processors.clone(),
    ));

    // Prefer the broker result queue; an empty queue name selects the HTTP
    // callback against the API node.
    let result_emitter: Arc<dyn ResultEmitter> = if config.mq.result_queue.is_empty() {
        info!(base_url = %config.api.base_url, "Reporting results over HTTP callback");
        Arc::new(HttpResultEmitter::new(config.api.base_url.clone()))
    } else {
        Arc::new(MqResultEmitter::new(
            Arc::clone(&mq),
            QueueName::new(config.mq.result_queue.clone()),
        ))
    };

    let result = mq
        .process_messages(&job_queue, move |job: ProcessJob| {
            let runner = Arc::clone(&runner);
            let result_emitter = Arc::clone(&result_emitter);
            async move {
                handle_job(job, &runner, result_emitter.as_ref()).await;
            }
        })
        .await;

    if let Err(e) = result {
        error!(error = %e, "Worker stopped unexpectedly");
    }

    Ok(())
}

async fn handle_job(job: ProcessJob, runner: &ProcessorRunner, result_emitter: &dyn ResultEmitter) {
    info!(
        job_id = %job.job_id,
        action = ?job.action,
        version_id = %job.version_id,
        object_key = %job.object_key,
        "Received job"
    );

    match job.action {
        JobAction::Refresh => {
            // Refresh needs catalog access to compose the sidecar; the
            // dispatcher keeps those jobs on API nodes.
            warn!(
                version_id = %job.version_id,
                "Worker received REFRESH job but has no catalog access, dropping"
            );
        }
        JobAction::Process => {
            let result = runner.process(&job).await;
            if let Err(e) = result_emitter.emit_result(&job.version_id, result).await {
                error!(
                    version_id = %job.version_id,
                    error = %e,
                    "Failed to report process result"
                );
            }
        }
    }
}
