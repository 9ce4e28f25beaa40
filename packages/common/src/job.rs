use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::VersionState;
use crate::mq::Message;

/// What a job asks a node to do with a resource version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobAction {
    /// Download the blob, run the per-type processor, report the result.
    Process,
    /// Rewrite the version's sidecar from current catalog state.
    Refresh,
}

/// A unit of asynchronous work dispatched after a catalog mutation.
///
/// Travels either over the broker job queue or through the in-process queue;
/// both deliveries are at-least-once, so handlers must be idempotent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessJob {
    /// Job identifier (UUID), used for MQ bookkeeping and log correlation.
    pub job_id: String,
    pub action: JobAction,
    /// Resource type key; selects the processor command. Empty for Refresh.
    #[serde(default)]
    pub type_key: String,
    /// Blob key of the primary object.
    pub object_key: String,
    /// Version row the result is reported against.
    pub version_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ProcessJob {
    pub fn process(
        type_key: impl Into<String>,
        object_key: impl Into<String>,
        version_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            action: JobAction::Process,
            type_key: type_key.into(),
            object_key: object_key.into(),
            version_id: version_id.into(),
            trace_id: None,
        }
    }

    pub fn refresh(object_key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            action: JobAction::Refresh,
            type_key: String::new(),
            object_key: object_key.into(),
            version_id: version_id.into(),
            trace_id: None,
        }
    }
}

impl Message for ProcessJob {
    fn message_type() -> &'static str {
        "process_job"
    }

    fn message_id(&self) -> &str {
        &self.job_id
    }
}

/// Outcome of processing a version, reported back into the catalog.
#[derive(Clone, Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProcessResultRequest {
    /// Processor-contributed metadata, merged key-by-key into the version.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub meta_data: Map<String, Value>,
    /// New state for the version: ACTIVE or ERROR.
    pub state: VersionState,
    /// Human-readable failure description. Informational only; the catalog
    /// stores it only if the caller also placed it under `meta_data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProcessResultRequest {
    pub fn active(meta_data: Map<String, Value>) -> Self {
        Self {
            meta_data,
            state: VersionState::Active,
            message: None,
        }
    }

    /// Build an ERROR result. The message is mirrored into `meta_data` so it
    /// survives the catalog's metadata merge and is visible to API consumers.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut meta_data = Map::new();
        meta_data.insert("message".to_string(), Value::String(message.clone()));
        Self {
            meta_data,
            state: VersionState::Error,
            message: Some(message),
        }
    }
}

/// Envelope pairing a result with its version, published on the result queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessResultEnvelope {
    pub version_id: String,
    pub result: ProcessResultRequest,
}

impl Message for ProcessResultEnvelope {
    fn message_type() -> &'static str {
        "process_result"
    }

    fn message_id(&self) -> &str {
        &self.version_id
    }
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("result channel error: {0}")]
    Channel(String),

    #[error("result rejected: {0}")]
    Rejected(String),
}

/// How a worker hands a finished [`ProcessResultRequest`] back to the catalog.
///
/// The local emitter calls the writer directly; broker and HTTP emitters cross
/// a process boundary and converge on the same report path at the API node.
#[async_trait]
pub trait ResultEmitter: Send + Sync {
    async fn emit_result(
        &self,
        version_id: &str,
        result: ProcessResultRequest,
    ) -> Result<(), EmitError>;
}
