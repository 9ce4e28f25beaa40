use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mq::Message;

/// Catalog lifecycle event kinds, published for downstream consumers
/// (e.g. the search indexer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEventKind {
    #[serde(rename = "resource.created")]
    ResourceCreated,
    #[serde(rename = "resource.updated")]
    ResourceUpdated,
    #[serde(rename = "resource.deleted")]
    ResourceDeleted,
    #[serde(rename = "version.activated")]
    VersionActivated,
    #[serde(rename = "version.deleted")]
    VersionDeleted,
}

impl LifecycleEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceCreated => "resource.created",
            Self::ResourceUpdated => "resource.updated",
            Self::ResourceDeleted => "resource.deleted",
            Self::VersionActivated => "version.activated",
            Self::VersionDeleted => "version.deleted",
        }
    }
}

/// Standard payload for lifecycle events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub kind: LifecycleEventKind,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default)]
    pub type_key: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            resource_id: resource_id.into(),
            version_id: None,
            type_key: String::new(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    pub fn with_type_key(mut self, type_key: impl Into<String>) -> Self {
        self.type_key = type_key.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl Message for LifecycleEvent {
    fn message_type() -> &'static str {
        "lifecycle_event"
    }

    fn message_id(&self) -> &str {
        &self.resource_id
    }
}
