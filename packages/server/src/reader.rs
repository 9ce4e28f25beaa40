use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use chrono::Utc;
use common::storage::BlobStore;
use common::{ResourceScope, VersionState};
use sea_orm::sea_query::Alias;
use sea_orm::*;
use tokio_util::compat::FuturesAsyncWriteCompatExt;
use tracing::{instrument, warn};

use crate::entity::{category, resource, resource_dependency, resource_version};
use crate::error::AppError;
use crate::models::category::CategoryResponse;
use crate::models::resource::{
    BundleItem, BundleManifest, DependencyTreeNode, ListResourcesQuery, ResourceResponse,
    VersionResponse,
};
use crate::utils::object_name::basename;
use crate::writer::DependencySpec;

/// Read side of the catalog: lookups, listings, dependency resolution and
/// bundle assembly. Never mutates.
pub struct ResourceReader {
    db: DatabaseConnection,
    store: Option<Arc<dyn BlobStore>>,
    bucket: String,
    presign_expiry: Duration,
    bundle_url_expiry: Duration,
}

impl ResourceReader {
    pub fn new(
        db: DatabaseConnection,
        store: Option<Arc<dyn BlobStore>>,
        bucket: impl Into<String>,
        presign_expiry: Duration,
        bundle_url_expiry: Duration,
    ) -> Self {
        Self {
            db,
            store,
            bucket: bucket.into(),
            presign_expiry,
            bundle_url_expiry,
        }
    }

    async fn presign(&self, file_path: &str, expiry: Duration) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.presign_get(&self.bucket, file_path, expiry).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(key = %file_path, error = %e, "Failed to presign download URL");
                None
            }
        }
    }

    /// Resolve the version a resource's consumers should see: the latest
    /// pointer when valid, otherwise the highest version number.
    async fn resolve_latest_version(
        &self,
        res: &resource::Model,
    ) -> Result<Option<resource_version::Model>, AppError> {
        if !res.latest_version_id.is_empty()
            && let Some(version) = resource_version::Entity::find_by_id(res.latest_version_id.as_str())
                .one(&self.db)
                .await?
        {
            return Ok(Some(version));
        }

        Ok(resource_version::Entity::find()
            .filter(resource_version::Column::ResourceId.eq(&res.id))
            .order_by_desc(resource_version::Column::VersionNum)
            .one(&self.db)
            .await?)
    }

    /// The highest-numbered ACTIVE version of a resource. Minimum contract
    /// for dependency constraint resolution.
    async fn latest_active_version(
        &self,
        resource_id: &str,
    ) -> Result<Option<resource_version::Model>, AppError> {
        Ok(resource_version::Entity::find()
            .filter(resource_version::Column::ResourceId.eq(resource_id))
            .filter(resource_version::Column::State.eq(VersionState::Active))
            .order_by_desc(resource_version::Column::VersionNum)
            .one(&self.db)
            .await?)
    }

    pub async fn get_resource(&self, id: &str) -> Result<ResourceResponse, AppError> {
        let res = resource::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Resource not found".into()))?;

        let latest = match self.resolve_latest_version(&res).await? {
            Some(version) => {
                let url = self.presign(&version.file_path, self.presign_expiry).await;
                Some(VersionResponse::from_model(version, url))
            }
            None => None,
        };

        Ok(ResourceResponse::from_model(res, latest))
    }

    #[instrument(skip(self, query))]
    pub async fn list_resources(
        &self,
        query: &ListResourcesQuery,
    ) -> Result<(Vec<ResourceResponse>, u64, u64, u64), AppError> {
        let page = Ord::max(query.page.unwrap_or(1), 1);
        let size = query.size.unwrap_or(20).clamp(1, 100);
        let owner_id = query.owner_id.as_deref().unwrap_or("");

        let mut select = resource::Entity::find().filter(resource::Column::IsDeleted.eq(false));

        if let Some(type_key) = query.type_key.as_deref().filter(|s| !s.is_empty()) {
            select = select.filter(resource::Column::TypeKey.eq(type_key));
        }
        if let Some(category_id) = query.category_id.as_deref().filter(|s| !s.is_empty()) {
            select = select.filter(resource::Column::CategoryId.eq(category_id));
        }
        if let Some(keyword) = query.keyword.as_deref().filter(|s| !s.is_empty()) {
            // Tags are a serialized JSON array; a LIKE over its text form is
            // the keyword contract.
            let pattern = format!("%{keyword}%");
            select = select.filter(
                Condition::any()
                    .add(resource::Column::Name.like(&pattern))
                    .add(
                        sea_query::Expr::col(resource::Column::Tags)
                            .cast_as(Alias::new("TEXT"))
                            .like(&pattern),
                    ),
            );
        }

        select = match query.scope.as_deref() {
            Some("PUBLIC") => select.filter(resource::Column::Scope.eq(ResourceScope::Public)),
            Some("PRIVATE") => select
                .filter(resource::Column::Scope.eq(ResourceScope::Private))
                .filter(resource::Column::OwnerId.eq(owner_id)),
            _ if !owner_id.is_empty() => select.filter(
                Condition::any()
                    .add(resource::Column::Scope.eq(ResourceScope::Public))
                    .add(
                        Condition::all()
                            .add(resource::Column::Scope.eq(ResourceScope::Private))
                            .add(resource::Column::OwnerId.eq(owner_id)),
                    ),
            ),
            _ => select,
        };

        let total = select.clone().count(&self.db).await?;

        let rows = select
            .order_by_desc(resource::Column::CreatedAt)
            .offset((page - 1) * size)
            .limit(size)
            .all(&self.db)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for res in rows {
            let latest = match self.resolve_latest_version(&res).await? {
                Some(version) => {
                    let url = if version.state == VersionState::Active {
                        self.presign(&version.file_path, self.presign_expiry).await
                    } else {
                        None
                    };
                    Some(VersionResponse::from_model(version, url))
                }
                None => None,
            };
            items.push(ResourceResponse::from_model(res, latest));
        }

        Ok((items, total, page, size))
    }

    pub async fn list_versions(&self, resource_id: &str) -> Result<Vec<VersionResponse>, AppError> {
        let versions = resource_version::Entity::find()
            .filter(resource_version::Column::ResourceId.eq(resource_id))
            .order_by_desc(resource_version::Column::VersionNum)
            .all(&self.db)
            .await?;

        let mut out = Vec::with_capacity(versions.len());
        for version in versions {
            let url = self.presign(&version.file_path, self.presign_expiry).await;
            out.push(VersionResponse::from_model(version, url));
        }
        Ok(out)
    }

    pub async fn list_categories(
        &self,
        type_key: Option<&str>,
    ) -> Result<Vec<CategoryResponse>, AppError> {
        let mut select = category::Entity::find();
        if let Some(type_key) = type_key.filter(|s| !s.is_empty()) {
            select = select.filter(category::Column::TypeKey.eq(type_key));
        }
        let categories = select.all(&self.db).await?;
        Ok(categories.into_iter().map(CategoryResponse::from).collect())
    }

    /// Direct dependency edges of a version.
    pub async fn get_dependencies(
        &self,
        version_id: &str,
    ) -> Result<Vec<DependencySpec>, AppError> {
        let deps = resource_dependency::Entity::find()
            .filter(resource_dependency::Column::SourceVersionId.eq(version_id))
            .all(&self.db)
            .await?;

        Ok(deps
            .into_iter()
            .map(|d| DependencySpec {
                target_resource_id: d.target_resource_id,
                constraint: d.version_constraint,
            })
            .collect())
    }

    /// Recursively resolve a version's dependency tree. Each version id is
    /// expanded at most once; re-entry (cycles, diamonds) produces a leaf.
    pub async fn get_dependency_tree(
        &self,
        version_id: &str,
    ) -> Result<Vec<DependencyTreeNode>, AppError> {
        resource_version::Entity::find_by_id(version_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("version {version_id} not found")))?;

        let mut visited = HashSet::new();
        self.resolve_tree(version_id.to_string(), &mut visited).await
    }

    fn resolve_tree<'a>(
        &'a self,
        version_id: String,
        visited: &'a mut HashSet<String>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DependencyTreeNode>, AppError>> + Send + 'a>> {
        Box::pin(async move {
            if !visited.insert(version_id.clone()) {
                return Ok(vec![]);
            }

            let deps = resource_dependency::Entity::find()
                .filter(resource_dependency::Column::SourceVersionId.eq(&version_id))
                .all(&self.db)
                .await?;

            let mut nodes = Vec::with_capacity(deps.len());
            for dep in deps {
                let Some(target_res) = resource::Entity::find_by_id(dep.target_resource_id.as_str())
                    .one(&self.db)
                    .await?
                else {
                    continue;
                };
                let Some(target_ver) =
                    self.latest_active_version(&dep.target_resource_id).await?
                else {
                    continue;
                };

                let children = self.resolve_tree(target_ver.id.clone(), visited).await?;
                nodes.push(DependencyTreeNode {
                    resource_id: target_res.id,
                    resource_name: target_res.name,
                    type_key: target_res.type_key,
                    version_id: target_ver.id,
                    semver: target_ver.semver,
                    constraint: dep.version_constraint,
                    dependencies: children,
                });
            }

            Ok(nodes)
        })
    }

    /// Flatten a version plus its transitive dependencies into a map of
    /// version id to bundle entry. Terminates on any graph; each version
    /// appears at most once.
    pub async fn get_resource_bundle(
        &self,
        version_id: &str,
    ) -> Result<BTreeMap<String, BundleItem>, AppError> {
        resource_version::Entity::find_by_id(version_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("version {version_id} not found")))?;

        let mut items = BTreeMap::new();
        let mut stack = vec![version_id.to_string()];

        while let Some(vid) = stack.pop() {
            if items.contains_key(&vid) {
                continue;
            }
            let Some(version) = resource_version::Entity::find_by_id(vid.as_str())
                .one(&self.db)
                .await?
            else {
                continue;
            };
            let Some(res) = resource::Entity::find_by_id(version.resource_id.as_str())
                .one(&self.db)
                .await?
            else {
                continue;
            };

            let url = self.presign(&version.file_path, self.bundle_url_expiry).await;
            items.insert(
                vid.clone(),
                BundleItem {
                    version_id: version.id.clone(),
                    resource_id: res.id,
                    resource_name: res.name,
                    type_key: res.type_key,
                    semver: version.semver,
                    file_path: version.file_path,
                    download_url: url,
                    size: version.file_size,
                },
            );

            let deps = resource_dependency::Entity::find()
                .filter(resource_dependency::Column::SourceVersionId.eq(&vid))
                .all(&self.db)
                .await?;
            for dep in deps {
                if let Some(target) = self.latest_active_version(&dep.target_resource_id).await? {
                    stack.push(target.id);
                }
            }
        }

        Ok(items)
    }

    /// Stream a bundle as a ZIP archive into `writer`: the manifest first,
    /// then one entry per item, each copied straight from the blob store.
    /// A single unreadable entry is skipped; the archive still completes.
    #[instrument(skip(self, writer))]
    pub async fn download_bundle_zip<W>(
        &self,
        version_id: &str,
        writer: W,
    ) -> Result<(), AppError>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let store = self
            .store
            .as_ref()
            .ok_or(AppError::StorageUnavailable)?
            .clone();

        let bundle = self.get_resource_bundle(version_id).await?;

        let mut zip = ZipFileWriter::with_tokio(writer);

        let manifest = BundleManifest {
            root_version_id: version_id.to_string(),
            generated_at: Utc::now().to_rfc3339(),
            items: bundle.values().cloned().collect(),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        zip.write_entry_whole(
            ZipEntryBuilder::new("manifest.json".into(), Compression::Deflate),
            &manifest_bytes,
        )
        .await
        .map_err(zip_error)?;

        for item in bundle.values() {
            let mut reader = match store.get(&self.bucket, &item.file_path).await {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(key = %item.file_path, error = %e, "Skipping unreadable bundle entry");
                    continue;
                }
            };

            let entry_path = format!(
                "resources/{}/{}-{}/{}",
                item.type_key,
                item.resource_name,
                item.semver,
                basename(&item.file_path),
            );
            let entry = ZipEntryBuilder::new(entry_path.into(), Compression::Deflate);
            let mut entry_writer = zip
                .write_entry_stream(entry)
                .await
                .map_err(zip_error)?
                .compat_write();

            tokio::io::copy(&mut reader, &mut entry_writer)
                .await
                .map_err(|e| AppError::Internal(format!("bundle stream failed: {e}")))?;
            entry_writer.into_inner().close().await.map_err(zip_error)?;
        }

        zip.close().await.map_err(zip_error)?;
        Ok(())
    }
}

fn zip_error(e: async_zip::error::ZipError) -> AppError {
    AppError::Internal(format!("zip write failed: {e}"))
}
