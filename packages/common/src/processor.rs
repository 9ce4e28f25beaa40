use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::job::{ProcessJob, ProcessResultRequest};
use crate::storage::{BlobStore, StorageError};

/// Ceiling applied to processor execution when the caller supplies no
/// tighter deadline.
const PROCESSOR_TIMEOUT: Duration = Duration::from_secs(600);

/// Name reported under the `processed_by` metadata key.
const PROCESSED_BY: &str = "simhub-worker";

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("storage backend is not configured")]
    StorageUnavailable,

    #[error("processor command for type '{0}' is empty")]
    EmptyCommand(String),

    #[error("failed to download object: {0}")]
    Download(#[from] StorageError),

    #[error("failed to stage temp file: {0}")]
    Io(#[from] std::io::Error),

    #[error("processor timed out after {0} seconds")]
    Timeout(u64),

    #[error("processor failed with {status}, stderr: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Executes per-type processor commands against downloaded artifacts.
///
/// The same runner backs both execution paths: the in-process worker pool on
/// combined nodes and the standalone worker binary consuming broker jobs.
pub struct ProcessorRunner {
    store: Option<Arc<dyn BlobStore>>,
    bucket: String,
    /// type_key -> processor command line (whitespace-split into argv).
    handlers: HashMap<String, String>,
}

impl ProcessorRunner {
    pub fn new(
        store: Option<Arc<dyn BlobStore>>,
        bucket: impl Into<String>,
        handlers: HashMap<String, String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            handlers,
        }
    }

    fn handler_for(&self, type_key: &str) -> Option<&str> {
        self.handlers
            .get(type_key)
            .map(String::as_str)
            .filter(|cmd| !cmd.trim().is_empty())
    }

    /// Run the Process action for one job and produce the result to report.
    ///
    /// Never returns an error: every failure mode collapses into an ERROR
    /// result so the version row always reaches a terminal state.
    pub async fn process(&self, job: &ProcessJob) -> ProcessResultRequest {
        let Some(command) = self.handler_for(&job.type_key) else {
            debug!(type_key = %job.type_key, "No processor configured, skipping");
            let mut meta = Map::new();
            meta.insert("status".to_string(), Value::String("skipped".to_string()));
            return ProcessResultRequest::active(meta);
        };

        match self.run_processor(command, job).await {
            Ok(meta) => ProcessResultRequest::active(meta),
            Err(e) => {
                warn!(
                    version_id = %job.version_id,
                    object_key = %job.object_key,
                    error = %e,
                    "Processor execution failed"
                );
                ProcessResultRequest::error(e.to_string())
            }
        }
    }

    async fn run_processor(
        &self,
        command: &str,
        job: &ProcessJob,
    ) -> Result<Map<String, Value>, ProcessorError> {
        let store = self
            .store
            .as_ref()
            .ok_or(ProcessorError::StorageUnavailable)?;

        let temp_path = temp_file_path(&job.object_key);
        let result = self
            .download_and_execute(store.as_ref(), command, job, &temp_path)
            .await;
        let _ = tokio::fs::remove_file(&temp_path).await;
        result
    }

    async fn download_and_execute(
        &self,
        store: &dyn BlobStore,
        command: &str,
        job: &ProcessJob,
        temp_path: &Path,
    ) -> Result<Map<String, Value>, ProcessorError> {
        // Stage the artifact locally; processors read files, not streams.
        let mut reader = store.get(&self.bucket, &job.object_key).await?;
        let mut temp_file = tokio::fs::File::create(temp_path).await?;
        tokio::io::copy(&mut reader, &mut temp_file).await?;
        temp_file.flush().await?;
        drop(temp_file);

        // Whitespace-split argv, not shell interpolation.
        let mut tokens = command.split_whitespace();
        let program = tokens
            .next()
            .ok_or_else(|| ProcessorError::EmptyCommand(job.type_key.clone()))?;

        debug!(cmd = %command, file = %temp_path.display(), "Executing processor");

        let started = Instant::now();
        let output = tokio::time::timeout(
            PROCESSOR_TIMEOUT,
            Command::new(program)
                .args(tokens)
                .arg(temp_path)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ProcessorError::Timeout(PROCESSOR_TIMEOUT.as_secs()))??;
        let duration = started.elapsed();

        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|c| format!("exit status {c}"))
                .unwrap_or_else(|| "signal".to_string());
            return Err(ProcessorError::Failed {
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut meta = parse_processor_output(&stdout);
        meta.insert(
            "processed_by".to_string(),
            Value::String(PROCESSED_BY.to_string()),
        );
        meta.insert(
            "processed_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        meta.insert(
            "processor_duration_ms".to_string(),
            Value::from(duration.as_millis() as u64),
        );
        Ok(meta)
    }
}

/// Pick a temp path that preserves the artifact's extension; processors often
/// dispatch on it.
fn temp_file_path(object_key: &str) -> PathBuf {
    let ext = Path::new(object_key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    std::env::temp_dir().join(format!("simhub-resource-{}{ext}", Uuid::new_v4()))
}

/// Interpret processor stdout as metadata.
///
/// Takes the first JSON value on stdout and requires it to be an object;
/// anything after it (processors commonly echo the input path) is ignored.
/// Non-JSON output is preserved verbatim under `raw_output`.
fn parse_processor_output(stdout: &str) -> Map<String, Value> {
    let mut values = serde_json::Deserializer::from_str(stdout).into_iter::<Value>();
    match values.next() {
        Some(Ok(Value::Object(map))) => map,
        _ => {
            let mut map = Map::new();
            map.insert(
                "raw_output".to_string(),
                Value::String(stdout.to_string()),
            );
            map
        }
    }
}
