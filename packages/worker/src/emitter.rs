use std::sync::Arc;

use async_trait::async_trait;
use common::job::{EmitError, ProcessResultEnvelope, ProcessResultRequest, ResultEmitter};
use mq::{Mq, QueueName};
use tracing::debug;

/// Publish results onto the broker result queue; the API node's consumer
/// applies them to the catalog.
pub struct MqResultEmitter {
    mq: Arc<Mq>,
    queue: QueueName,
}

impl MqResultEmitter {
    pub fn new(mq: Arc<Mq>, queue: QueueName) -> Self {
        Self { mq, queue }
    }
}

#[async_trait]
impl ResultEmitter for MqResultEmitter {
    async fn emit_result(
        &self,
        version_id: &str,
        result: ProcessResultRequest,
    ) -> Result<(), EmitError> {
        let envelope = ProcessResultEnvelope {
            version_id: version_id.to_string(),
            result,
        };
        self.mq
            .publish(&self.queue, &envelope)
            .await
            .map_err(|e| EmitError::Channel(e.to_string()))?;
        debug!(version_id, queue = %self.queue, "Result published");
        Ok(())
    }
}

/// Report results through the API node's HTTP callback. Fallback path for
/// remote workers that cannot reach the broker result queue.
pub struct HttpResultEmitter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResultEmitter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ResultEmitter for HttpResultEmitter {
    async fn emit_result(
        &self,
        version_id: &str,
        result: ProcessResultRequest,
    ) -> Result<(), EmitError> {
        let url = format!(
            "{}/api/v1/resources/{version_id}/process-result",
            self.base_url
        );
        let response = self
            .client
            .patch(&url)
            .json(&result)
            .send()
            .await
            .map_err(|e| EmitError::Channel(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmitError::Rejected(format!(
                "callback failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
