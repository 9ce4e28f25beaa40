use std::collections::HashMap;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker: WorkerSettings,
    pub mq: MqSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub api: ApiSettings,
    /// type_key -> processor command line.
    #[serde(default)]
    pub processors: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqSettings {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u8,
    /// Queue to consume jobs from.
    #[serde(default = "default_job_queue")]
    pub job_queue: String,
    /// Queue to publish results to. Empty selects the HTTP callback.
    #[serde(default = "default_result_queue")]
    pub result_queue: String,
}

fn default_pool_size() -> u8 {
    5
}
fn default_job_queue() -> String {
    "simhub.jobs.resource".into()
}
fn default_result_queue() -> String {
    "simhub.results.resource".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub root: String,
    #[serde(default)]
    pub public_url: Option<String>,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// API node base URL for the HTTP result callback.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:8080".into()
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
        }
    }
}

impl WorkerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        let config = Config::builder()
            .add_source(File::new(&path, FileFormat::Toml))
            .add_source(Environment::with_prefix("SIMHUB_WORKER").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn from_env() -> Result<Self> {
        let path = std::env::var("SIMHUB_WORKER_CONFIG")
            .unwrap_or_else(|_| "./config/worker.toml".to_string());
        Self::load(path)
    }
}
