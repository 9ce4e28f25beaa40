use std::fmt;
use std::future::Future;
use std::time::Duration;

use broccoli_queue::brokers::broker::BrokerMessage;
use broccoli_queue::queue::BroccoliQueue;
use common::mq::Message;
use tracing::debug;

use crate::config::MqConfig;
use crate::error::MqError;

/// Name of a SimHub broker queue.
///
/// The three well-known queues cover the resource pipeline; ad-hoc names
/// stay possible for deployments that shard queues by resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Process/refresh jobs: the API node publishes, workers consume.
    pub fn jobs() -> Self {
        Self("simhub.jobs.resource".into())
    }

    /// Processing results: workers publish, the API node consumes.
    pub fn results() -> Self {
        Self("simhub.results.resource".into())
    }

    /// Lifecycle events consumed by downstream indexers.
    pub fn events() -> Self {
        Self("simhub.events.resource".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SimHub's broker handle: typed publish/consume of [`Message`] payloads
/// over named queues, backed by a pooled broccoli connection.
///
/// Delivery is at-least-once end to end; handlers must tolerate replays.
pub struct Mq {
    queue: BroccoliQueue,
}

impl Mq {
    pub async fn connect(config: MqConfig) -> Result<Self, MqError> {
        let queue = BroccoliQueue::builder(&config.url)
            .pool_connections(config.pool_size)
            .build()
            .await
            .map_err(|e| MqError::Connect(e.to_string()))?;
        Ok(Self { queue })
    }

    pub async fn publish<M: Message>(
        &self,
        queue: &QueueName,
        message: &M,
    ) -> Result<(), MqError> {
        debug!(
            queue = %queue,
            message_type = M::message_type(),
            message_id = message.message_id(),
            "Publishing message"
        );
        self.queue
            .publish(queue.as_str(), None, message, None)
            .await
            .map(|_| ())
            .map_err(|e| MqError::Publish {
                queue: queue.to_string(),
                detail: e.to_string(),
            })
    }

    /// Poll one batch of messages and return the decoded payloads.
    pub async fn consume_batch<M: Message + 'static>(
        &self,
        queue: &QueueName,
        batch_size: usize,
        poll_timeout: Duration,
    ) -> Result<Vec<M>, MqError> {
        let timeout = time::Duration::try_from(poll_timeout)
            .unwrap_or_else(|_| time::Duration::seconds(1));
        let batch = self
            .queue
            .consume_batch::<M>(queue.as_str(), batch_size, timeout, None)
            .await
            .map_err(|e| MqError::Consume {
                queue: queue.to_string(),
                detail: e.to_string(),
            })?;
        Ok(batch.into_iter().map(|message| message.payload).collect())
    }

    /// Run `handler` for every message on `queue` until the connection
    /// drops. Handler outcomes are the handler's business; delivery is
    /// acknowledged either way.
    pub async fn process_messages<M, F, Fut>(
        &self,
        queue: &QueueName,
        handler: F,
    ) -> Result<(), MqError>
    where
        M: Message + 'static,
        F: Fn(M) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let queue_name = queue.to_string();
        self.queue
            .process_messages(
                queue.as_str(),
                None,
                None,
                move |message: BrokerMessage<M>| {
                    let handler = handler.clone();
                    async move {
                        handler(message.payload).await;
                        Ok(())
                    }
                },
            )
            .await
            .map_err(|e| MqError::Consume {
                queue: queue_name,
                detail: e.to_string(),
            })
    }
}
