pub mod config;
pub mod error;
pub mod queue;

pub use config::MqConfig;
pub use error::MqError;
pub use queue::{Mq, QueueName};
