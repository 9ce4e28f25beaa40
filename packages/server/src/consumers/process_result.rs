use std::sync::Arc;
use std::time::Duration;

use common::job::ProcessResultEnvelope;
use mq::{Mq, QueueName};
use tracing::{error, info, warn};

use crate::writer::ResourceWriter;

/// Consume process results from the result queue and apply them to the
/// catalog. Runs on API-role nodes when a broker is configured.
pub async fn consume_process_results(
    writer: Arc<ResourceWriter>,
    mq: Arc<Mq>,
    queue: QueueName,
) {
    info!(queue = %queue, "Starting process result consumer");

    let poll_timeout = Duration::from_secs(1);
    let mut consecutive_failures: u32 = 0;
    const MAX_BACKOFF_SECS: u64 = 30;

    loop {
        match mq
            .consume_batch::<ProcessResultEnvelope>(&queue, 10, poll_timeout)
            .await
        {
            Ok(batch) => {
                for envelope in batch {
                    let version_id = envelope.version_id.clone();
                    if let Err(e) = writer
                        .report_process_result(&version_id, envelope.result)
                        .await
                    {
                        error!(
                            version_id = %version_id,
                            error = %e,
                            "Failed to apply process result"
                        );
                        consecutive_failures = consecutive_failures.saturating_add(1);

                        if consecutive_failures >= 3 {
                            let backoff_secs =
                                (2_u64.pow(consecutive_failures - 3)).min(MAX_BACKOFF_SECS);
                            warn!(
                                consecutive_failures,
                                backoff_secs, "Multiple result failures, backing off"
                            );
                            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        }
                    } else {
                        consecutive_failures = 0;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "MQ consume error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
