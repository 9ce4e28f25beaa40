use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::storage::filesystem::FilesystemBlobStore;
use common::storage::{BlobStore, BoxReader};
use reqwest::Client;
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};

use server::config::{
    AppConfig, CorsConfig, DatabaseConfig, MqAppConfig, NodeConfig, ResourceTypeDef,
    ServerConfig, StorageConfig,
};
use server::state::AppState;

pub const BUCKET: &str = "simhub";

pub mod routes {
    pub const UPLOAD_TICKET: &str = "/api/v1/uploads/ticket";
    pub const UPLOAD_CONFIRM: &str = "/api/v1/uploads/confirm";
    pub const MULTIPART_INIT: &str = "/api/v1/uploads/multipart/init";
    pub const MULTIPART_PART_URL: &str = "/api/v1/uploads/multipart/part-url";
    pub const MULTIPART_COMPLETE: &str = "/api/v1/uploads/multipart/complete";
    pub const RESOURCES: &str = "/api/v1/resources";
    pub const RESOURCES_SYNC: &str = "/api/v1/resources/sync";
    pub const RESOURCE_TYPES: &str = "/api/v1/resource-types";
    pub const CATEGORIES: &str = "/api/v1/categories";

    pub fn resource(id: &str) -> String {
        format!("/api/v1/resources/{id}")
    }

    pub fn resource_tags(id: &str) -> String {
        format!("/api/v1/resources/{id}/tags")
    }

    pub fn resource_scope(id: &str) -> String {
        format!("/api/v1/resources/{id}/scope")
    }

    pub fn resource_versions(id: &str) -> String {
        format!("/api/v1/resources/{id}/versions")
    }

    pub fn process_result(version_id: &str) -> String {
        format!("/api/v1/resources/{version_id}/process-result")
    }

    pub fn dependencies(version_id: &str) -> String {
        format!("/api/v1/resources/versions/{version_id}/dependencies")
    }

    pub fn dependency_tree(version_id: &str) -> String {
        format!("/api/v1/resources/versions/{version_id}/dependency-tree")
    }

    pub fn bundle(version_id: &str) -> String {
        format!("/api/v1/resources/versions/{version_id}/bundle")
    }

    pub fn download_pack(version_id: &str) -> String {
        format!("/api/v1/resources/versions/{version_id}/download-pack")
    }

    pub fn category(id: &str) -> String {
        format!("/api/v1/categories/{id}")
    }
}

/// Resource types registered in every test server.
///
/// - `doc`: no processor, versions activate immediately
/// - `model_glb`: `echo` processor emitting JSON metadata
/// - `crash`: processor that always fails
/// - `slowsim`: processor that never finishes (stays PENDING)
fn test_resource_types() -> Vec<ResourceTypeDef> {
    vec![
        ResourceTypeDef {
            type_key: "doc".into(),
            type_name: "Structured Document".into(),
            schema_def: None,
            category_mode: "flat".into(),
            integration_mode: "internal".into(),
            upload_mode: String::new(),
            process_conf: None,
            processor_cmd: None,
        },
        ResourceTypeDef {
            type_key: "model_glb".into(),
            type_name: "3D Model".into(),
            schema_def: None,
            category_mode: "tree".into(),
            integration_mode: "internal".into(),
            upload_mode: String::new(),
            process_conf: None,
            processor_cmd: Some(r#"echo {"poly":42}"#.into()),
        },
        ResourceTypeDef {
            type_key: "crash".into(),
            type_name: "Always Failing".into(),
            schema_def: None,
            category_mode: "flat".into(),
            integration_mode: "internal".into(),
            upload_mode: String::new(),
            process_conf: None,
            processor_cmd: Some("/bin/false".into()),
        },
        ResourceTypeDef {
            type_key: "slowsim".into(),
            type_name: "Never Finishing".into(),
            schema_def: None,
            category_mode: "flat".into(),
            integration_mode: "internal".into(),
            upload_mode: String::new(),
            process_conf: None,
            processor_cmd: Some("tail -f".into()),
        },
    ]
}

/// A running test server with its own SQLite catalog and blob root.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub store: Option<Arc<FilesystemBlobStore>>,
    pub blob_root: PathBuf,
    _dir: tempfile::TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub text: String,
    pub body: Value,
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_inner(true).await
    }

    pub async fn spawn_without_storage() -> Self {
        Self::spawn_inner(false).await
    }

    async fn spawn_inner(with_storage: bool) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_path = dir.path().join("simhub-test.db");
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

        // Small pool; SQLite does not appreciate many writers.
        let mut db_config = DatabaseConfig::with_url(db_url.clone());
        db_config.max_connections = 5;
        db_config.min_connections = 1;

        let db = server::database::init_db(&db_config)
            .await
            .expect("Failed to initialize test database");
        let types = test_resource_types();
        server::seed::sync_resource_types(&db, &types)
            .await
            .expect("Failed to sync resource types");
        server::seed::ensure_indexes(&db)
            .await
            .expect("Failed to ensure indexes");

        let blob_root = dir.path().join("blobs");
        let store = if with_storage {
            Some(Arc::new(
                FilesystemBlobStore::new(blob_root.clone(), None)
                    .await
                    .expect("Failed to create blob store"),
            ))
        } else {
            None
        };

        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors: CorsConfig::default(),
            },
            database: db_config,
            storage: StorageConfig {
                enabled: with_storage,
                root: blob_root.display().to_string(),
                public_url: None,
                bucket: BUCKET.to_string(),
                presign_expiry_secs: 3600,
                bundle_url_expiry_secs: 86400,
            },
            mq: MqAppConfig::default(),
            node: NodeConfig::default(),
            resource_types: types,
        };

        let blob_store: Option<Arc<dyn BlobStore>> =
            store.clone().map(|s| s as Arc<dyn BlobStore>);
        let state = AppState::build(db.clone(), config, blob_store, None, None);
        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            store,
            blob_root,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");
        TestResponse::from_response(res).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");
        TestResponse::from_response(res).await
    }

    /// POST as a gateway-identified principal with an explicit permission
    /// grant (comma-separated, may be empty).
    pub async fn post_as(
        &self,
        path: &str,
        body: &Value,
        principal: &str,
        permissions: &str,
    ) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header("x-principal-id", principal)
            .header("x-principal-permissions", permissions)
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");
        TestResponse::from_response(res).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> TestResponse {
        let res = self
            .client
            .patch(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send PATCH request");
        TestResponse::from_response(res).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("Failed to send DELETE request");
        TestResponse::from_response(res).await
    }

    /// Write an object straight into the blob store, simulating the client's
    /// PUT against the presigned URL.
    pub async fn put_object(&self, key: &str, bytes: &[u8]) {
        let store = self.store.as_ref().expect("test app has no store");
        let reader: BoxReader = Box::new(std::io::Cursor::new(bytes.to_vec()));
        store
            .put(BUCKET, key, reader, bytes.len() as i64, "application/octet-stream")
            .await
            .expect("Failed to write object");
    }

    /// Filesystem path of an object inside the test blob root.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.blob_root.join(BUCKET).join(key)
    }

    /// Vend a ticket and return `(ticket_id, object_key)`.
    pub async fn request_ticket(&self, resource_type: &str, filename: &str) -> (String, String) {
        let res = self
            .post(
                routes::UPLOAD_TICKET,
                &json!({ "resource_type": resource_type, "filename": filename }),
            )
            .await;
        assert_eq!(res.status, 200, "ticket request failed: {}", res.text);
        let ticket_id = res.body["ticket_id"].as_str().unwrap().to_string();
        let object_key = ticket_id[38..].to_string();
        (ticket_id, object_key)
    }

    /// Full happy path: ticket, PUT bytes, confirm. Returns the confirm
    /// response plus the ticket id.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_and_confirm(
        &self,
        resource_type: &str,
        filename: &str,
        bytes: &[u8],
        name: &str,
        semver: &str,
        tags: &[&str],
        dependencies: Value,
        owner_id: &str,
        scope: Option<&str>,
    ) -> (TestResponse, String) {
        let (ticket_id, object_key) = self.request_ticket(resource_type, filename).await;
        self.put_object(&object_key, bytes).await;

        let mut req = json!({
            "ticket_id": ticket_id,
            "type_key": resource_type,
            "name": name,
            "owner_id": owner_id,
            "semver": semver,
            "tags": tags,
            "dependencies": dependencies,
        });
        if let Some(scope) = scope {
            req["scope"] = json!(scope);
        }

        let res = self.post(routes::UPLOAD_CONFIRM, &req).await;
        (res, ticket_id)
    }

    /// Shorthand for a private upload owned by "tester" with no deps.
    pub async fn simple_upload(
        &self,
        resource_type: &str,
        filename: &str,
        bytes: &[u8],
        name: &str,
        semver: &str,
    ) -> TestResponse {
        let (res, _) = self
            .upload_and_confirm(
                resource_type,
                filename,
                bytes,
                name,
                semver,
                &[],
                json!([]),
                "tester",
                None,
            )
            .await;
        assert_eq!(res.status, 200, "upload failed: {}", res.text);
        res
    }

    /// Poll a resource until its latest version reaches `want` or the
    /// timeout expires. Returns the final resource body.
    pub async fn wait_for_version_state(&self, resource_id: &str, want: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let res = self.get(&routes::resource(resource_id)).await;
            if res.status == 200 && res.body["latest_version"]["state"] == want {
                return res.body;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "resource {resource_id} never reached state {want}; last: {}",
                    res.text
                );
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Wait until a file exists under the blob root.
    pub async fn wait_for_file(&self, key: &str) {
        let path = self.object_path(key);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !path.exists() {
            if tokio::time::Instant::now() > deadline {
                panic!("file {} never appeared", path.display());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
