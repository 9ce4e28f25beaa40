use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Contract for payloads that travel over the broker queues.
///
/// Every queue payload (jobs, results, lifecycle events) carries a stable
/// type name and an id; the broker wrapper records both when publishing,
/// which is what makes replays traceable in logs.
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + Clone {
    fn message_type() -> &'static str
    where
        Self: Sized;

    fn message_id(&self) -> &str;
}
