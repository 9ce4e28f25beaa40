use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::job::{EmitError, JobAction, ProcessJob, ProcessResultRequest, ResultEmitter};
use common::processor::ProcessorRunner;
use mq::{Mq, QueueName};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::NodeRole;
use crate::sidecar::SidecarSyncer;
use crate::writer::ResourceWriter;

/// Routes jobs to the broker or the in-process queue, and hosts the local
/// execution pool on nodes that run processors.
///
/// Refresh jobs never leave the node: they need catalog access to compose
/// the sidecar payload, so they are spawned locally regardless of the broker.
pub struct JobDispatcher {
    role: NodeRole,
    mq: Option<Arc<Mq>>,
    job_queue: QueueName,
    local_tx: mpsc::Sender<ProcessJob>,
    /// Taken once by `start`; the pool tasks share the receiver.
    local_rx: Mutex<Option<mpsc::Receiver<ProcessJob>>>,
    local_workers: usize,
    sidecar: Arc<SidecarSyncer>,
    runner: Arc<ProcessorRunner>,
    result_emitter: Arc<dyn ResultEmitter>,
}

impl JobDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: NodeRole,
        mq: Option<Arc<Mq>>,
        job_queue: QueueName,
        queue_capacity: usize,
        local_workers: usize,
        sidecar: Arc<SidecarSyncer>,
        runner: Arc<ProcessorRunner>,
        result_emitter: Arc<dyn ResultEmitter>,
    ) -> Self {
        let (local_tx, local_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            role,
            mq,
            job_queue,
            local_tx,
            local_rx: Mutex::new(Some(local_rx)),
            local_workers: local_workers.max(1),
            sidecar,
            runner,
            result_emitter,
        }
    }

    /// Route one job. Never surfaces an error to the caller: broker publish
    /// failures degrade to the local queue, and a full local queue is
    /// logged and dropped.
    pub async fn dispatch(&self, job: ProcessJob) {
        if job.action == JobAction::Refresh {
            let sidecar = Arc::clone(&self.sidecar);
            tokio::spawn(async move {
                sidecar.refresh(&job).await;
            });
            return;
        }

        if let Some(mq) = &self.mq {
            match mq.publish(&self.job_queue, &job).await {
                Ok(()) => {
                    debug!(job_id = %job.job_id, version_id = %job.version_id, "Job published to broker");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Broker publish failed, falling back to local queue");
                }
            }
        }

        if let Err(e) = self.local_tx.try_send(job) {
            error!(error = %e, "Local job queue full, dropping job");
        }
    }

    /// Start this node's consumers: the broker subscription when a broker
    /// is configured, otherwise the fixed in-process pool.
    pub fn start(self: &Arc<Self>) {
        if !self.role.executes_jobs() {
            info!("API-role node, not starting local job executors");
            return;
        }

        if let Some(mq) = self.mq.clone() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.consume_broker_jobs(mq).await;
            });
            return;
        }

        let receiver = self
            .local_rx
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take());
        let Some(receiver) = receiver else {
            warn!("Dispatcher already started");
            return;
        };

        let receiver = Arc::new(Mutex::new(receiver));
        for worker_id in 0..self.local_workers {
            let this = Arc::clone(self);
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                info!(worker_id, "Local worker started");
                loop {
                    let job = { receiver.lock().await.recv().await };
                    match job {
                        Some(job) => this.handle_job(job).await,
                        None => break,
                    }
                }
            });
        }
    }

    async fn consume_broker_jobs(self: Arc<Self>, mq: Arc<Mq>) {
        info!(queue = %self.job_queue, "Broker job consumer started");
        let poll_timeout = Duration::from_secs(1);

        loop {
            match mq
                .consume_batch::<ProcessJob>(&self.job_queue, 10, poll_timeout)
                .await
            {
                Ok(batch) => {
                    for job in batch {
                        self.handle_job(job).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "MQ consume error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Execute one job on this node. Delivery is at-least-once, so both
    /// actions are idempotent: re-processing overwrites metadata, a repeated
    /// refresh rewrites the same sidecar.
    pub async fn handle_job(&self, job: ProcessJob) {
        debug!(job_id = %job.job_id, action = ?job.action, version_id = %job.version_id, "Handling job");
        match job.action {
            JobAction::Process => {
                let result = self.runner.process(&job).await;
                if let Err(e) = self
                    .result_emitter
                    .emit_result(&job.version_id, result)
                    .await
                {
                    error!(version_id = %job.version_id, error = %e, "Failed to report process result");
                }
            }
            JobAction::Refresh => self.sidecar.refresh(&job).await,
        }
    }
}

/// In-process result channel: hand the result straight to the writer.
pub struct LocalResultEmitter {
    writer: Arc<ResourceWriter>,
}

impl LocalResultEmitter {
    pub fn new(writer: Arc<ResourceWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl ResultEmitter for LocalResultEmitter {
    async fn emit_result(
        &self,
        version_id: &str,
        result: ProcessResultRequest,
    ) -> Result<(), EmitError> {
        self.writer
            .report_process_result(version_id, result)
            .await
            .map_err(|e| EmitError::Rejected(e.to_string()))
    }
}
