use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use common::job::ProcessJob;
use common::storage::{BlobStore, BoxReader};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, warn};

use crate::entity::{resource, resource_version};
use crate::error::AppError;

/// The `.meta.json` document stored next to each blob. A best-effort
/// denormalization of catalog state; the catalog stays authoritative.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sidecar {
    pub resource_id: String,
    pub resource_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version_id: String,
    pub type_key: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub synced_at: String,
}

/// Key of the sidecar written next to an object. Writers always use the
/// `.meta.json` suffix; readers additionally accept the legacy `.json`.
pub fn sidecar_key(object_key: &str) -> String {
    format!("{object_key}.meta.json")
}

/// Read an object's sidecar, trying the canonical suffix first and the
/// legacy one as fallback. Returns None when neither parses.
pub async fn read_sidecar(
    store: &dyn BlobStore,
    bucket: &str,
    object_key: &str,
) -> Option<Sidecar> {
    for key in [sidecar_key(object_key), format!("{object_key}.json")] {
        let Ok(mut reader) = store.get(bucket, &key).await else {
            continue;
        };
        let mut buf = Vec::new();
        if reader.read_to_end(&mut buf).await.is_err() {
            continue;
        }
        match serde_json::from_slice::<Sidecar>(&buf) {
            Ok(sidecar) => return Some(sidecar),
            Err(e) => {
                debug!(key = %key, error = %e, "Sidecar did not parse, skipping");
            }
        }
    }
    None
}

/// Rewrites a version's sidecar from current catalog state.
///
/// Runs only on nodes with catalog access; the dispatcher routes Refresh
/// jobs here instead of publishing them.
pub struct SidecarSyncer {
    db: DatabaseConnection,
    store: Option<Arc<dyn BlobStore>>,
    bucket: String,
}

impl SidecarSyncer {
    pub fn new(
        db: DatabaseConnection,
        store: Option<Arc<dyn BlobStore>>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            db,
            store,
            bucket: bucket.into(),
        }
    }

    /// Handle one Refresh job. Sidecar failures are logged and never abort
    /// the operation that scheduled the refresh.
    pub async fn refresh(&self, job: &ProcessJob) {
        if let Err(e) = self.try_refresh(job).await {
            error!(
                version_id = %job.version_id,
                object_key = %job.object_key,
                error = %e,
                "Sidecar refresh failed"
            );
        }
    }

    async fn try_refresh(&self, job: &ProcessJob) -> Result<(), AppError> {
        let Some(store) = &self.store else {
            warn!("No blob store configured, skipping sidecar refresh");
            return Ok(());
        };

        let version = resource_version::Entity::find_by_id(job.version_id.as_str())
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("version {} not found for sidecar", job.version_id))
            })?;
        let owner = resource::Entity::find_by_id(version.resource_id.as_str())
            .one(&self.db)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("resource {} not found for sidecar", version.resource_id))
            })?;

        let sidecar = Sidecar {
            resource_id: owner.id.clone(),
            resource_name: owner.name.clone(),
            tags: owner.tag_list(),
            version_id: version.id.clone(),
            type_key: owner.type_key.clone(),
            metadata: version.metadata_map(),
            synced_at: Utc::now().to_rfc3339(),
        };

        let bytes = serde_json::to_vec_pretty(&sidecar)?;
        let size = bytes.len() as i64;
        let reader: BoxReader = Box::new(Cursor::new(bytes));
        store
            .put(
                &self.bucket,
                &sidecar_key(&version.file_path),
                reader,
                size,
                "application/json",
            )
            .await?;

        debug!(key = %sidecar_key(&version.file_path), "Sidecar refreshed");
        Ok(())
    }
}
