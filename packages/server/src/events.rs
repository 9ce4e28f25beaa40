use std::sync::Arc;

use common::event::LifecycleEvent;
use mq::{Mq, QueueName};
use tracing::{info, warn};

/// Publishes catalog lifecycle events to the broker event queue.
///
/// Events are best-effort: publish failures are logged and never fail the
/// mutation that produced them. Without a broker, events are log-only.
pub struct EventEmitter {
    mq: Option<Arc<Mq>>,
    queue: QueueName,
}

impl EventEmitter {
    pub fn new(mq: Option<Arc<Mq>>, queue: QueueName) -> Self {
        Self { mq, queue }
    }

    pub fn emit(&self, event: LifecycleEvent) {
        info!(
            kind = event.kind.as_str(),
            resource_id = %event.resource_id,
            version_id = ?event.version_id,
            "Lifecycle event"
        );

        let Some(mq) = self.mq.clone() else {
            return;
        };
        let queue = self.queue.clone();
        tokio::spawn(async move {
            if let Err(e) = mq.publish(&queue, &event).await {
                warn!(error = %e, kind = event.kind.as_str(), "Failed to publish lifecycle event");
            }
        });
    }
}
