use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("broker connection failed: {0}")]
    Connect(String),

    #[error("publish to queue '{queue}' failed: {detail}")]
    Publish { queue: String, detail: String },

    #[error("consume from queue '{queue}' failed: {detail}")]
    Consume { queue: String, detail: String },
}
