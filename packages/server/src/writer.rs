use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use common::event::{LifecycleEvent, LifecycleEventKind};
use common::job::{ProcessJob, ProcessResultRequest};
use common::storage::{BlobStore, ObjectInfo};
use common::{ResourceScope, VersionState};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dispatcher::JobDispatcher;
use crate::entity::{category, resource, resource_dependency, resource_version};
use crate::error::AppError;
use crate::events::EventEmitter;
use crate::sidecar::{self, Sidecar};

/// Default owner recorded for resources rehydrated from storage.
const SYNC_OWNER: &str = "system-sync";

/// One requested dependency edge.
#[derive(Clone, Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DependencySpec {
    pub target_resource_id: String,
    /// Semver range or the literal "latest".
    pub constraint: String,
}

/// Arguments for the resource/version upsert, assembled by the uploader
/// after it has stat'ed the object.
#[derive(Clone, Debug)]
pub struct UpsertRequest {
    pub type_key: String,
    pub category_id: String,
    pub name: String,
    pub owner_id: String,
    pub scope: Option<ResourceScope>,
    pub object_key: String,
    pub size: i64,
    pub file_hash: Option<String>,
    pub tags: Vec<String>,
    pub semver: String,
    pub dependencies: Vec<DependencySpec>,
    pub meta_data: Map<String, Value>,
}

/// What the upsert did, used to drive post-commit side effects.
#[derive(Clone, Debug)]
pub struct UpsertOutcome {
    pub resource_id: String,
    pub version_id: String,
    pub version_num: i32,
    pub initial_state: VersionState,
    pub created_resource: bool,
}

/// The catalog write path: idempotent resource/version upsert, state
/// transitions, and the secondary mutations that keep sidecars in sync.
///
/// The writer dispatches jobs and the dispatcher reports results back into
/// the writer; the cycle is broken with two-phase construction
/// ([`ResourceWriter::set_dispatcher`]).
pub struct ResourceWriter {
    db: DatabaseConnection,
    store: Option<Arc<dyn BlobStore>>,
    bucket: String,
    emitter: Arc<EventEmitter>,
    /// type_key -> processor command; decides the initial version state.
    handlers: HashMap<String, String>,
    dispatcher: OnceLock<Arc<JobDispatcher>>,
}

impl ResourceWriter {
    pub fn new(
        db: DatabaseConnection,
        store: Option<Arc<dyn BlobStore>>,
        bucket: impl Into<String>,
        emitter: Arc<EventEmitter>,
        handlers: HashMap<String, String>,
    ) -> Self {
        Self {
            db,
            store,
            bucket: bucket.into(),
            emitter,
            handlers,
            dispatcher: OnceLock::new(),
        }
    }

    /// Late-bind the dispatcher (see struct docs).
    pub fn set_dispatcher(&self, dispatcher: Arc<JobDispatcher>) {
        if self.dispatcher.set(dispatcher).is_err() {
            warn!("Dispatcher already wired, ignoring");
        }
    }

    async fn dispatch(&self, job: ProcessJob) {
        match self.dispatcher.get() {
            Some(dispatcher) => dispatcher.dispatch(job).await,
            None => warn!(version_id = %job.version_id, "Dispatcher not wired, dropping job"),
        }
    }

    fn has_handler(&self, type_key: &str) -> bool {
        self.handlers
            .get(type_key)
            .is_some_and(|cmd| !cmd.trim().is_empty())
    }

    /// Register an uploaded object: upsert resource + version + dependency
    /// edges in one transaction, then dispatch processing or activate.
    #[instrument(skip(self, req), fields(type_key = %req.type_key, name = %req.name, semver = %req.semver))]
    pub async fn register_upload(&self, req: UpsertRequest) -> Result<UpsertOutcome, AppError> {
        let txn = self.db.begin().await?;
        let outcome = self.upsert_resource_and_version(&txn, &req).await?;
        txn.commit().await?;

        self.post_upsert_effects(&req, &outcome).await;
        Ok(outcome)
    }

    /// The core upsert. Runs entirely inside the caller's transaction; side
    /// effects belong to [`Self::post_upsert_effects`] after commit.
    async fn upsert_resource_and_version<C: ConnectionTrait>(
        &self,
        conn: &C,
        req: &UpsertRequest,
    ) -> Result<UpsertOutcome, AppError> {
        let scope = req.scope.unwrap_or_default();
        let now = Utc::now();

        // 1. Resource resolution by identity tuple; last write wins for
        // category, tags and scope at the resource level.
        let existing = resource::Entity::find()
            .filter(resource::Column::TypeKey.eq(&req.type_key))
            .filter(resource::Column::CategoryId.eq(&req.category_id))
            .filter(resource::Column::Name.eq(&req.name))
            .filter(resource::Column::OwnerId.eq(&req.owner_id))
            .filter(resource::Column::IsDeleted.eq(false))
            .one(conn)
            .await?;

        let (res, created_resource) = match existing {
            Some(model) => {
                let mut active: resource::ActiveModel = model.into();
                active.category_id = Set(req.category_id.clone());
                active.tags = Set(resource::tags_json(&req.tags));
                active.scope = Set(scope);
                active.updated_at = Set(now);
                (active.update(conn).await?, false)
            }
            None => {
                let model = resource::ActiveModel {
                    id: Set(Uuid::new_v4().to_string()),
                    type_key: Set(req.type_key.clone()),
                    category_id: Set(req.category_id.clone()),
                    name: Set(req.name.clone()),
                    owner_id: Set(req.owner_id.clone()),
                    scope: Set(scope),
                    tags: Set(resource::tags_json(&req.tags)),
                    is_deleted: Set(false),
                    latest_version_id: Set(String::new()),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                };
                (model.insert(conn).await?, true)
            }
        };

        // 2. Initial state: types without a processor activate immediately.
        let initial_state = if self.has_handler(&req.type_key) {
            VersionState::Pending
        } else {
            VersionState::Active
        };

        // 3. Version resolution by (resource_id, semver).
        let existing_version = resource_version::Entity::find()
            .filter(resource_version::Column::ResourceId.eq(&res.id))
            .filter(resource_version::Column::Semver.eq(&req.semver))
            .one(conn)
            .await?;

        let version = match existing_version {
            Some(v) if !v.state.is_overwritable() => {
                return Err(AppError::Conflict(format!(
                    "version {} already exists and is ACTIVE",
                    req.semver
                )));
            }
            Some(v) => {
                // Overwrite PENDING/ERROR in place, preserving id and
                // version_num; stale dependency edges go with the old bytes.
                resource_dependency::Entity::delete_many()
                    .filter(resource_dependency::Column::SourceVersionId.eq(&v.id))
                    .exec(conn)
                    .await?;

                let mut active: resource_version::ActiveModel = v.into();
                active.file_path = Set(req.object_key.clone());
                active.file_hash = Set(req.file_hash.clone());
                active.file_size = Set(req.size);
                active.meta_data = Set(Value::Object(req.meta_data.clone()));
                active.state = Set(initial_state);
                active.update(conn).await?
            }
            None => {
                let count = resource_version::Entity::find()
                    .filter(resource_version::Column::ResourceId.eq(&res.id))
                    .count(conn)
                    .await?;

                let model = resource_version::ActiveModel {
                    id: Set(Uuid::new_v4().to_string()),
                    resource_id: Set(res.id.clone()),
                    version_num: Set(count as i32 + 1),
                    semver: Set(req.semver.clone()),
                    file_path: Set(req.object_key.clone()),
                    file_hash: Set(req.file_hash.clone()),
                    file_size: Set(req.size),
                    meta_data: Set(Value::Object(req.meta_data.clone())),
                    state: Set(initial_state),
                    created_at: Set(now),
                    ..Default::default()
                };
                model.insert(conn).await?
            }
        };

        // 4. Dependency edges for this version.
        for dep in &req.dependencies {
            let edge = resource_dependency::ActiveModel {
                source_version_id: Set(version.id.clone()),
                target_resource_id: Set(dep.target_resource_id.clone()),
                version_constraint: Set(dep.constraint.clone()),
                target_version_id: Set(None),
                created_at: Set(now),
                ..Default::default()
            };
            edge.insert(conn).await?;
        }

        // 5. Latest pointer: only filled when unset; retargeting is an
        // explicit operation.
        if res.latest_version_id.is_empty() {
            let mut active: resource::ActiveModel = res.clone().into();
            active.latest_version_id = Set(version.id.clone());
            active.update(conn).await?;
        }

        Ok(UpsertOutcome {
            resource_id: res.id,
            version_id: version.id,
            version_num: version.version_num,
            initial_state,
            created_resource,
        })
    }

    async fn post_upsert_effects(&self, req: &UpsertRequest, outcome: &UpsertOutcome) {
        if outcome.initial_state == VersionState::Pending {
            self.dispatch(ProcessJob::process(
                &req.type_key,
                &req.object_key,
                &outcome.version_id,
            ))
            .await;
        } else {
            info!(type_key = %req.type_key, name = %req.name, "No processor for type, version active immediately");
            self.emitter.emit(
                LifecycleEvent::new(LifecycleEventKind::VersionActivated, &outcome.resource_id)
                    .with_version(&outcome.version_id)
                    .with_type_key(&req.type_key)
                    .with_data(json!({ "semver": req.semver, "file_path": req.object_key })),
            );
        }

        if outcome.created_resource {
            self.emitter.emit(
                LifecycleEvent::new(LifecycleEventKind::ResourceCreated, &outcome.resource_id)
                    .with_type_key(&req.type_key)
                    .with_data(json!({ "name": req.name })),
            );
        }
    }

    /// Apply a processing outcome to a version: merge metadata key-by-key,
    /// set the state, and on activation schedule the sidecar refresh.
    #[instrument(skip(self, result), fields(state = %result.state))]
    pub async fn report_process_result(
        &self,
        version_id: &str,
        result: ProcessResultRequest,
    ) -> Result<(), AppError> {
        let txn = self.db.begin().await?;

        let version = resource_version::Entity::find_by_id(version_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("version {version_id} not found")))?;

        let mut meta = version.metadata_map();
        for (key, value) in result.meta_data {
            meta.insert(key, value);
        }

        let mut active: resource_version::ActiveModel = version.clone().into();
        active.meta_data = Set(Value::Object(meta));
        active.state = Set(result.state);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(version_id, state = %result.state, "Process result applied");

        if result.state == VersionState::Active {
            self.dispatch(ProcessJob::refresh(&updated.file_path, &updated.id))
                .await;
            self.emitter.emit(
                LifecycleEvent::new(LifecycleEventKind::VersionActivated, &updated.resource_id)
                    .with_version(&updated.id)
                    .with_data(json!({ "semver": updated.semver, "file_path": updated.file_path })),
            );
        }

        Ok(())
    }

    /// Rename a resource and/or move it to another category.
    pub async fn update_resource(
        &self,
        id: &str,
        name: Option<String>,
        category_id: Option<String>,
    ) -> Result<(), AppError> {
        let mut updates = Map::new();
        if let Some(name) = &name {
            updates.insert("name".into(), Value::String(name.clone()));
        }
        if let Some(category_id) = &category_id {
            updates.insert("category_id".into(), Value::String(category_id.clone()));
        }
        if updates.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin().await?;
        let res = self.find_resource(&txn, id).await?;

        let mut active: resource::ActiveModel = res.into();
        if let Some(name) = name {
            active.name = Set(name);
        }
        if let Some(category_id) = category_id {
            active.category_id = Set(category_id);
        }
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let latest = self.newest_version(&txn, id).await?;
        txn.commit().await?;

        self.refresh_version(latest).await;
        self.emitter.emit(
            LifecycleEvent::new(LifecycleEventKind::ResourceUpdated, id)
                .with_data(Value::Object(updates)),
        );
        Ok(())
    }

    /// Replace a resource's tag set.
    pub async fn update_tags(&self, id: &str, tags: Vec<String>) -> Result<(), AppError> {
        let txn = self.db.begin().await?;
        let res = self.find_resource(&txn, id).await?;

        let mut active: resource::ActiveModel = res.into();
        active.tags = Set(resource::tags_json(&tags));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let latest = self.newest_version(&txn, id).await?;
        txn.commit().await?;

        self.refresh_version(latest).await;
        Ok(())
    }

    /// Flip a resource between PRIVATE and PUBLIC.
    pub async fn update_scope(&self, id: &str, scope: ResourceScope) -> Result<(), AppError> {
        let txn = self.db.begin().await?;
        let res = self.find_resource(&txn, id).await?;

        let mut active: resource::ActiveModel = res.into();
        active.scope = Set(scope);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let latest = self.newest_version(&txn, id).await?;
        txn.commit().await?;

        self.refresh_version(latest).await;
        Ok(())
    }

    /// Merge keys into a version's metadata.
    pub async fn update_version_metadata(
        &self,
        version_id: &str,
        meta: Map<String, Value>,
    ) -> Result<(), AppError> {
        let txn = self.db.begin().await?;
        let version = resource_version::Entity::find_by_id(version_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("version {version_id} not found")))?;

        let mut merged = version.metadata_map();
        for (key, value) in meta {
            merged.insert(key, value);
        }

        let mut active: resource_version::ActiveModel = version.clone().into();
        active.meta_data = Set(Value::Object(merged));
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.refresh_version(Some(updated)).await;
        Ok(())
    }

    /// Replace a version's dependency edges.
    pub async fn update_dependencies(
        &self,
        version_id: &str,
        deps: Vec<DependencySpec>,
    ) -> Result<(), AppError> {
        let txn = self.db.begin().await?;
        let version = resource_version::Entity::find_by_id(version_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!(
                    "cannot update dependencies: version {version_id} does not exist"
                ))
            })?;

        resource_dependency::Entity::delete_many()
            .filter(resource_dependency::Column::SourceVersionId.eq(version_id))
            .exec(&txn)
            .await?;

        let now = Utc::now();
        for dep in &deps {
            let edge = resource_dependency::ActiveModel {
                source_version_id: Set(version_id.to_string()),
                target_resource_id: Set(dep.target_resource_id.clone()),
                version_constraint: Set(dep.constraint.clone()),
                target_version_id: Set(None),
                created_at: Set(now),
                ..Default::default()
            };
            edge.insert(&txn).await?;
        }

        txn.commit().await?;

        self.refresh_version(Some(version)).await;
        Ok(())
    }

    /// Point a resource's latest pointer at a specific version (rollback or
    /// promote). The version must belong to the resource.
    pub async fn set_latest_version(
        &self,
        resource_id: &str,
        version_id: &str,
    ) -> Result<(), AppError> {
        let txn = self.db.begin().await?;

        let version = resource_version::Entity::find_by_id(version_id)
            .one(&txn)
            .await?
            .filter(|v| v.resource_id == resource_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "version {version_id} not found on resource {resource_id}"
                ))
            })?;

        let res = self.find_resource(&txn, resource_id).await?;
        let mut active: resource::ActiveModel = res.into();
        active.latest_version_id = Set(version_id.to_string());
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        txn.commit().await?;

        self.refresh_version(Some(version)).await;
        Ok(())
    }

    /// Soft-delete a resource. Blob cleanup happens out of band.
    pub async fn delete_resource(&self, id: &str) -> Result<(), AppError> {
        let txn = self.db.begin().await?;
        let res = self.find_resource(&txn, id).await?;

        let mut active: resource::ActiveModel = res.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        txn.commit().await?;

        self.emitter
            .emit(LifecycleEvent::new(LifecycleEventKind::ResourceDeleted, id));
        Ok(())
    }

    /// Soft-delete every non-deleted resource of a type.
    pub async fn clear_resources(&self, type_key: &str) -> Result<u64, AppError> {
        if type_key.trim().is_empty() {
            return Err(AppError::Validation("type_key is required".into()));
        }

        let result = resource::Entity::update_many()
            .col_expr(resource::Column::IsDeleted, sea_query::Expr::value(true))
            .col_expr(resource::Column::UpdatedAt, sea_query::Expr::value(Utc::now()))
            .filter(resource::Column::TypeKey.eq(type_key))
            .filter(resource::Column::IsDeleted.eq(false))
            .exec(&self.db)
            .await?;

        info!(type_key, cleared = result.rows_affected, "Cleared resource repository");
        Ok(result.rows_affected)
    }

    /// Scan the blob store and rehydrate catalog rows for objects that have
    /// none, using sidecars as the reconciliation anchor. Returns the number
    /// of newly created versions.
    #[instrument(skip(self))]
    pub async fn sync_from_storage(&self) -> Result<u64, AppError> {
        let store = self
            .store
            .as_ref()
            .ok_or(AppError::StorageUnavailable)?
            .clone();

        let mut objects = store.list_objects(&self.bucket, "resources/", true).await;
        let mut synced = 0u64;

        while let Some(item) = objects.recv().await {
            let object = item?;
            // Sidecars are consumed while handling their primary object.
            if object.key.ends_with(".meta.json") {
                continue;
            }
            if object.key.ends_with('/') && object.size == 0 {
                continue;
            }

            // Expected layout: resources/<type_key>/<uuid>/<filename>
            let parts: Vec<&str> = object.key.split('/').collect();
            if parts.len() < 4 || parts[0] != "resources" {
                continue;
            }
            let type_key = parts[1];
            let folder = parts[2];
            let file_name = parts[parts.len() - 1];

            let sidecar = sidecar::read_sidecar(store.as_ref(), &self.bucket, &object.key).await;

            match self
                .sync_object(&object, type_key, folder, file_name, sidecar)
                .await
            {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => warn!(key = %object.key, error = %e, "Failed to sync object"),
            }
        }

        info!(synced, "Storage sync completed");
        Ok(synced)
    }

    /// Rehydrate one scanned object. Returns true when a version row was
    /// created.
    async fn sync_object(
        &self,
        object: &ObjectInfo,
        type_key: &str,
        folder: &str,
        file_name: &str,
        sidecar: Option<Sidecar>,
    ) -> Result<bool, AppError> {
        let txn = self.db.begin().await?;

        let already = resource_version::Entity::find()
            .filter(resource_version::Column::FilePath.eq(&object.key))
            .count(&txn)
            .await?;
        if already > 0 {
            return Ok(false);
        }

        let now = Utc::now();
        let res = match resource::Entity::find_by_id(folder).one(&txn).await? {
            Some(model) => {
                if let Some(sc) = &sidecar {
                    let mut active: resource::ActiveModel = model.clone().into();
                    active.name = Set(sc.resource_name.clone());
                    active.tags = Set(resource::tags_json(&sc.tags));
                    active.updated_at = Set(now);
                    active.update(&txn).await?
                } else {
                    model
                }
            }
            None => {
                // The folder token is the stable id when the uploader minted
                // it; manual uploads with arbitrary folders get a fresh one.
                let id = if folder.len() == 36 {
                    folder.to_string()
                } else {
                    Uuid::new_v4().to_string()
                };
                let name = sidecar
                    .as_ref()
                    .map(|sc| sc.resource_name.clone())
                    .unwrap_or_else(|| file_name.to_string());
                let tags = sidecar
                    .as_ref()
                    .map(|sc| sc.tags.clone())
                    .unwrap_or_default();

                let model = resource::ActiveModel {
                    id: Set(id),
                    type_key: Set(type_key.to_string()),
                    category_id: Set(String::new()),
                    name: Set(name),
                    owner_id: Set(SYNC_OWNER.to_string()),
                    scope: Set(ResourceScope::Private),
                    tags: Set(resource::tags_json(&tags)),
                    is_deleted: Set(false),
                    latest_version_id: Set(String::new()),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                };
                model.insert(&txn).await?
            }
        };

        let count = resource_version::Entity::find()
            .filter(resource_version::Column::ResourceId.eq(&res.id))
            .count(&txn)
            .await?;

        let mut meta = sidecar.map(|sc| sc.metadata).unwrap_or_default();
        meta.insert("imported".to_string(), Value::Bool(true));

        let version = resource_version::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            resource_id: Set(res.id.clone()),
            version_num: Set(count as i32 + 1),
            semver: Set(format!("v1.0.{count}")),
            file_path: Set(object.key.clone()),
            file_hash: Set(object.etag.clone()),
            file_size: Set(object.size),
            meta_data: Set(Value::Object(meta)),
            state: Set(VersionState::Active),
            created_at: Set(now),
            ..Default::default()
        };
        let version = version.insert(&txn).await?;

        if res.latest_version_id.is_empty() {
            let mut active: resource::ActiveModel = res.into();
            active.latest_version_id = Set(version.id.clone());
            active.update(&txn).await?;
        }

        txn.commit().await?;
        debug!(key = %object.key, "Rehydrated version from storage");
        Ok(true)
    }

    // --- Categories ---

    pub async fn create_category(
        &self,
        type_key: String,
        name: String,
        parent_id: String,
    ) -> Result<category::Model, AppError> {
        let now = Utc::now();
        let model = category::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            type_key: Set(type_key),
            name: Set(name),
            parent_id: Set(parent_id),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn update_category(
        &self,
        id: &str,
        name: Option<String>,
        parent_id: Option<String>,
    ) -> Result<(), AppError> {
        if name.is_none() && parent_id.is_none() {
            return Ok(());
        }
        let model = category::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("category {id} not found")))?;

        let mut active: category::ActiveModel = model.into();
        if let Some(name) = name {
            active.name = Set(name);
        }
        if let Some(parent_id) = parent_id {
            active.parent_id = Set(parent_id);
        }
        active.updated_at = Set(Utc::now());
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn delete_category(&self, id: &str) -> Result<(), AppError> {
        category::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    // --- Helpers ---

    async fn find_resource<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
    ) -> Result<resource::Model, AppError> {
        resource::Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("resource {id} not found")))
    }

    /// Highest-numbered version of a resource, used as the sidecar target
    /// for resource-level mutations.
    async fn newest_version<C: ConnectionTrait>(
        &self,
        conn: &C,
        resource_id: &str,
    ) -> Result<Option<resource_version::Model>, AppError> {
        Ok(resource_version::Entity::find()
            .filter(resource_version::Column::ResourceId.eq(resource_id))
            .order_by_desc(resource_version::Column::VersionNum)
            .one(conn)
            .await?)
    }

    async fn refresh_version(&self, version: Option<resource_version::Model>) {
        if let Some(version) = version {
            self.dispatch(ProcessJob::refresh(&version.file_path, &version.id))
                .await;
        }
    }
}
