use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec![],
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_db_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_db_timeout")]
    pub acquire_timeout_secs: u64,
    /// Log every SQL statement through the sqlx logger. Noisy; off by
    /// default.
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_db_max_connections() -> u32 {
    100
}
fn default_db_min_connections() -> u32 {
    5
}
fn default_db_timeout() -> u64 {
    8
}

impl DatabaseConfig {
    /// Config pointing at `url` with default pool settings.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_db_max_connections(),
            min_connections: default_db_min_connections(),
            connect_timeout_secs: default_db_timeout(),
            acquire_timeout_secs: default_db_timeout(),
            sqlx_logging: false,
        }
    }
}

/// Blob backend settings. The filesystem backend serves development and
/// tests; production deployments point `public_url` at the real endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Whether a blob store is configured at all. Upload APIs fail fast
    /// when disabled.
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Base URL clients use to reach vended object URLs.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Expiry for upload/download URLs, in seconds. Default: 1 hour.
    #[serde(default = "default_presign_expiry")]
    pub presign_expiry_secs: u64,
    /// Expiry for bundle entry URLs, in seconds. Default: 24 hours.
    #[serde(default = "default_bundle_expiry")]
    pub bundle_url_expiry_secs: u64,
}

fn default_storage_enabled() -> bool {
    true
}
fn default_storage_root() -> String {
    "./data/blobs".into()
}
fn default_bucket() -> String {
    "simhub".into()
}
fn default_presign_expiry() -> u64 {
    3600
}
fn default_bundle_expiry() -> u64 {
    86400
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            root: default_storage_root(),
            public_url: None,
            bucket: default_bucket(),
            presign_expiry_secs: default_presign_expiry(),
            bundle_url_expiry_secs: default_bundle_expiry(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Whether the broker is enabled. Without it, jobs flow through the
    /// in-process queue. Default: false (single-node mode).
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mq_url")]
    pub url: String,
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue carrying process/refresh jobs (API publishes, workers consume).
    #[serde(default = "default_job_queue")]
    pub job_queue_name: String,
    /// Queue carrying process results (workers publish, API consumes).
    #[serde(default = "default_result_queue")]
    pub result_queue_name: String,
    /// Queue carrying lifecycle events for downstream consumers.
    #[serde(default = "default_event_queue")]
    pub event_queue_name: String,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_job_queue() -> String {
    "simhub.jobs.resource".into()
}
fn default_result_queue() -> String {
    "simhub.results.resource".into()
}
fn default_event_queue() -> String {
    "simhub.events.resource".into()
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            job_queue_name: default_job_queue(),
            result_queue_name: default_result_queue(),
            event_queue_name: default_event_queue(),
        }
    }
}

/// What this node does with jobs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Serves the API and the catalog; never executes processors.
    Api,
    /// Executes processors only (the standalone worker binary).
    Worker,
    /// Both API and execution in one process.
    Combined,
}

impl NodeRole {
    pub fn executes_jobs(&self) -> bool {
        matches!(self, Self::Worker | Self::Combined)
    }
}

impl Default for NodeRole {
    fn default() -> Self {
        Self::Combined
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default)]
    pub role: NodeRole,
    /// Base URL remote workers use for the HTTP result callback.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Capacity of the in-process job queue.
    #[serde(default = "default_local_queue_capacity")]
    pub local_queue_capacity: usize,
    /// Number of in-process worker tasks when no broker is configured.
    #[serde(default = "default_local_workers")]
    pub local_workers: usize,
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_local_queue_capacity() -> usize {
    1000
}
fn default_local_workers() -> usize {
    4
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::default(),
            api_base_url: default_api_base_url(),
            local_queue_capacity: default_local_queue_capacity(),
            local_workers: default_local_workers(),
        }
    }
}

/// One resource type definition from configuration. Reconciled into the
/// catalog at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct ResourceTypeDef {
    pub type_key: String,
    pub type_name: String,
    #[serde(default)]
    pub schema_def: Option<serde_json::Value>,
    #[serde(default = "default_category_mode")]
    pub category_mode: String,
    #[serde(default = "default_integration_mode")]
    pub integration_mode: String,
    #[serde(default)]
    pub upload_mode: String,
    #[serde(default)]
    pub process_conf: Option<serde_json::Value>,
    /// External processor command line; empty means versions of this type
    /// go ACTIVE without processing.
    #[serde(default)]
    pub processor_cmd: Option<String>,
}

fn default_category_mode() -> String {
    "flat".into()
}
fn default_integration_mode() -> String {
    "internal".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub resource_types: Vec<ResourceTypeDef>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite://./data/simhub.db?mode=rwc")?
            // Load from config/config.toml
            .add_source(File::with_name("config/config").required(false))
            // Override from environment (e.g., SIMHUB__DATABASE__URL)
            .add_source(Environment::with_prefix("SIMHUB").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Map of type_key to processor command, for types that configure one.
    pub fn processor_handlers(&self) -> HashMap<String, String> {
        self.resource_types
            .iter()
            .filter_map(|rt| {
                let cmd = rt.processor_cmd.as_deref()?.trim();
                if cmd.is_empty() {
                    None
                } else {
                    Some((rt.type_key.clone(), cmd.to_string()))
                }
            })
            .collect()
    }
}
