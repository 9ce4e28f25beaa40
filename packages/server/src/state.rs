use std::sync::Arc;
use std::time::Duration;

use common::job::ResultEmitter;
use common::processor::ProcessorRunner;
use common::storage::{BlobStore, SecurityTokenProvider};
use mq::{Mq, QueueName};
use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::consumers;
use crate::dispatcher::{JobDispatcher, LocalResultEmitter};
use crate::events::EventEmitter;
use crate::reader::ResourceReader;
use crate::sidecar::SidecarSyncer;
use crate::uploader::UploadManager;
use crate::writer::ResourceWriter;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub blob_store: Option<Arc<dyn BlobStore>>,
    pub mq: Option<Arc<Mq>>,
    pub writer: Arc<ResourceWriter>,
    pub reader: Arc<ResourceReader>,
    pub uploader: Arc<UploadManager>,
    pub dispatcher: Arc<JobDispatcher>,
}

impl AppState {
    /// Wire the core components and start this node's background tasks.
    ///
    /// The Writer and the Dispatcher reference each other (the writer
    /// dispatches jobs; results come back through the writer). The cycle
    /// resolves in two phases: build the writer without a dispatcher, point
    /// the dispatcher's result emitter at the writer, then inject the
    /// dispatcher into the writer.
    pub fn build(
        db: DatabaseConnection,
        config: AppConfig,
        blob_store: Option<Arc<dyn BlobStore>>,
        sts_provider: Option<Arc<dyn SecurityTokenProvider>>,
        mq: Option<Arc<Mq>>,
    ) -> Self {
        let handlers = config.processor_handlers();
        let bucket = config.storage.bucket.clone();
        let presign_expiry = Duration::from_secs(config.storage.presign_expiry_secs);
        let bundle_expiry = Duration::from_secs(config.storage.bundle_url_expiry_secs);

        let emitter = Arc::new(EventEmitter::new(
            mq.clone(),
            QueueName::new(config.mq.event_queue_name.clone()),
        ));
        let writer = Arc::new(ResourceWriter::new(
            db.clone(),
            blob_store.clone(),
            bucket.clone(),
            emitter,
            handlers.clone(),
        ));
        let reader = Arc::new(ResourceReader::new(
            db.clone(),
            blob_store.clone(),
            bucket.clone(),
            presign_expiry,
            bundle_expiry,
        ));
        let uploader = Arc::new(UploadManager::new(
            blob_store.clone(),
            sts_provider,
            bucket.clone(),
            writer.clone(),
            presign_expiry,
        ));

        let sidecar = Arc::new(SidecarSyncer::new(
            db.clone(),
            blob_store.clone(),
            bucket.clone(),
        ));
        let runner = Arc::new(ProcessorRunner::new(blob_store.clone(), bucket, handlers));
        let result_emitter: Arc<dyn ResultEmitter> =
            Arc::new(LocalResultEmitter::new(writer.clone()));

        let dispatcher = Arc::new(JobDispatcher::new(
            config.node.role,
            mq.clone(),
            QueueName::new(config.mq.job_queue_name.clone()),
            config.node.local_queue_capacity,
            config.node.local_workers,
            sidecar,
            runner,
            result_emitter,
        ));
        dispatcher.start();
        writer.set_dispatcher(dispatcher.clone());

        // API-role nodes apply results published by remote workers.
        if let Some(mq_conn) = mq.clone() {
            tokio::spawn(consumers::process_result::consume_process_results(
                writer.clone(),
                mq_conn,
                QueueName::new(config.mq.result_queue_name.clone()),
            ));
        }

        Self {
            db,
            config,
            blob_store,
            mq,
            writer,
            reader,
            uploader,
            dispatcher,
        }
    }
}
