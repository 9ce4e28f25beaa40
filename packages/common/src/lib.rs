pub mod event;
pub mod job;
pub mod mq;
pub mod processor;
pub mod resource_state;
pub mod storage;

pub use resource_state::{ResourceScope, VersionState};
