use std::collections::HashSet;

use chrono::Utc;
use sea_orm::sea_query::{Index, OnConflict, PostgresQueryBuilder};
use sea_orm::*;
use tracing::info;

use crate::config::ResourceTypeDef;
use crate::entity::{resource, resource_type, resource_version};

/// Reconcile the resource-type registry with configuration.
///
/// Config is the source of truth: every configured type is upserted by
/// `type_key`, and keys present in the catalog but absent from config are
/// deleted.
pub async fn sync_resource_types(
    db: &DatabaseConnection,
    types: &[ResourceTypeDef],
) -> Result<(), DbErr> {
    let existing: Vec<String> = resource_type::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|t| t.type_key)
        .collect();

    let configured: HashSet<&str> = types.iter().map(|t| t.type_key.as_str()).collect();
    let orphans: Vec<String> = existing
        .into_iter()
        .filter(|k| !configured.contains(k.as_str()))
        .collect();

    if !orphans.is_empty() {
        resource_type::Entity::delete_many()
            .filter(resource_type::Column::TypeKey.is_in(orphans.clone()))
            .exec(db)
            .await?;
        info!(count = orphans.len(), keys = ?orphans, "Deleted orphaned resource types");
    }

    let now = Utc::now();
    for def in types {
        let model = resource_type::ActiveModel {
            type_key: Set(def.type_key.clone()),
            type_name: Set(def.type_name.clone()),
            schema_def: Set(def.schema_def.clone()),
            category_mode: Set(def.category_mode.clone()),
            integration_mode: Set(def.integration_mode.clone()),
            upload_mode: Set(def.upload_mode.clone()),
            process_conf: Set(def.process_conf.clone()),
            processor_cmd: Set(def.processor_cmd.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        resource_type::Entity::insert(model)
            .on_conflict(
                OnConflict::column(resource_type::Column::TypeKey)
                    .update_columns([
                        resource_type::Column::TypeName,
                        resource_type::Column::SchemaDef,
                        resource_type::Column::CategoryMode,
                        resource_type::Column::IntegrationMode,
                        resource_type::Column::UploadMode,
                        resource_type::Column::ProcessConf,
                        resource_type::Column::ProcessorCmd,
                        resource_type::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
    }

    if !types.is_empty() {
        info!(count = types.len(), "Synced resource types to catalog");
    }

    Ok(())
}

/// Ensure required database indexes exist.
///
/// SeaORM's schema-sync doesn't support composite indexes, so we create them
/// manually on startup.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Uniqueness backing the at-most-one-version-per-semver invariant.
    let statements = [
        Index::create()
            .if_not_exists()
            .unique()
            .name("idx_resource_version_semver")
            .table(resource_version::Entity)
            .col(resource_version::Column::ResourceId)
            .col(resource_version::Column::Semver)
            .to_string(PostgresQueryBuilder),
        Index::create()
            .if_not_exists()
            .unique()
            .name("idx_resource_version_num")
            .table(resource_version::Entity)
            .col(resource_version::Column::ResourceId)
            .col(resource_version::Column::VersionNum)
            .to_string(PostgresQueryBuilder),
        // Lookup index for the resource identity tuple.
        Index::create()
            .if_not_exists()
            .name("idx_resource_identity")
            .table(resource::Entity)
            .col(resource::Column::TypeKey)
            .col(resource::Column::CategoryId)
            .col(resource::Column::Name)
            .col(resource::Column::OwnerId)
            .to_string(PostgresQueryBuilder),
    ];

    for stmt in statements {
        if let Err(e) = db.execute_unprepared(&stmt).await {
            tracing::warn!(statement = %stmt, "Failed to create index: {}", e);
        }
    }

    Ok(())
}
