use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::StorageError;
use super::traits::{BlobStore, BoxReader, ObjectInfo, Part};

/// Filesystem-backed blob store.
///
/// Objects live at `{root}/{bucket}/{key}`; writes go through a temp file in
/// `{root}/.tmp` and are moved into place with a rename. Multipart parts are
/// staged under `{root}/.multipart/{upload_id}` until completion.
///
/// This is the development and test backend. "Presigned" URLs are plain URLs
/// under the configured public base (or `file://` when none is set); they are
/// not cryptographically signed.
pub struct FilesystemBlobStore {
    root: PathBuf,
    public_url: Option<String>,
    /// Content hashes recorded at write time, served as ETags by `stat`.
    /// Lost on restart; `stat` then falls back to a weak metadata ETag.
    etags: Mutex<HashMap<String, String>>,
}

const READ_BUF_SIZE: usize = 64 * 1024;

impl FilesystemBlobStore {
    /// Create a new filesystem blob store rooted at `root`.
    pub async fn new(
        root: PathBuf,
        public_url: Option<String>,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        fs::create_dir_all(root.join(".multipart")).await?;
        Ok(Self {
            root,
            public_url,
            etags: Mutex::new(HashMap::new()),
        })
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(".tmp").join(Uuid::new_v4().to_string())
    }

    fn multipart_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(".multipart").join(upload_id)
    }

    /// Staging path for one part of a multipart upload.
    ///
    /// Local clients write part files here directly; S3-compatible
    /// deployments upload through the vended part URLs instead.
    pub fn part_path(&self, upload_id: &str, part_number: i32) -> PathBuf {
        self.multipart_dir(upload_id)
            .join(format!("part-{part_number}"))
    }

    fn base_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("file://{}", self.root.display()))
    }

    fn record_etag(&self, bucket: &str, key: &str, etag: String) {
        let mut etags = self.etags.lock().expect("etag map poisoned");
        etags.insert(format!("{bucket}/{key}"), etag);
    }

    fn known_etag(&self, bucket: &str, key: &str) -> Option<String> {
        let etags = self.etags.lock().expect("etag map poisoned");
        etags.get(&format!("{bucket}/{key}")).cloned()
    }

    /// Move a fully written temp file into its final location.
    async fn promote(&self, temp: &Path, dest: &Path) -> Result<(), StorageError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::rename(temp, dest).await {
            let _ = fs::remove_file(temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

fn validate_bucket(bucket: &str) -> Result<(), StorageError> {
    if bucket.is_empty()
        || bucket == "."
        || bucket == ".."
        || bucket.starts_with('.')
        || bucket.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidKey(format!("bad bucket '{bucket}'")));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.contains(['\\', '\0']) || key.starts_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
    }
    Ok(())
}

fn expires_at(expiry: Duration) -> i64 {
    Utc::now().timestamp() + expiry.as_secs() as i64
}

/// Weak ETag derived from file metadata, used when the write-time hash is
/// no longer in memory.
fn weak_etag(meta: &std::fs::Metadata) -> String {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("W/{:x}-{:x}", meta.len(), mtime)
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectInfo, StorageError> {
        let path = self.object_path(bucket, key)?;
        let meta = match fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StorageError::NotFound(key.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let etag = self
            .known_etag(bucket, key)
            .unwrap_or_else(|| weak_etag(&meta));
        let last_modified = meta.modified().ok().map(DateTime::<Utc>::from);
        let content_type = mime_guess::from_path(key).first().map(|m| m.to_string());

        Ok(ObjectInfo {
            key: key.to_string(),
            size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
            etag: Some(etag),
            last_modified,
            content_type,
            user_meta: HashMap::new(),
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<BoxReader, StorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut reader: BoxReader,
        size: i64,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let dest = self.object_path(bucket, key)?;
        let temp = self.temp_path();

        let mut hasher = Sha256::new();
        let mut total: i64 = 0;
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut temp_file = fs::File::create(&temp).await?;

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(temp_file);
                    let _ = fs::remove_file(&temp).await;
                    return Err(e.into());
                }
            };
            total += n as i64;
            hasher.update(&buf[..n]);
            if let Err(e) = temp_file.write_all(&buf[..n]).await {
                drop(temp_file);
                let _ = fs::remove_file(&temp).await;
                return Err(e.into());
            }
        }

        temp_file.flush().await?;
        drop(temp_file);

        if size >= 0 && total != size {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::SizeMismatch {
                declared: size,
                received: total,
            });
        }

        self.promote(&temp, &dest).await?;
        self.record_etag(bucket, key, format!("{:x}", hasher.finalize()));
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut etags = self.etags.lock().expect("etag map poisoned");
        etags.remove(&format!("{bucket}/{key}"));
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> mpsc::Receiver<Result<ObjectInfo, StorageError>> {
        let (tx, rx) = mpsc::channel(32);

        if let Err(e) = validate_bucket(bucket) {
            let _ = tx.try_send(Err(e));
            return rx;
        }

        let base = self.root.join(bucket);
        let prefix = prefix.to_string();
        tokio::spawn(async move {
            let mut stack = vec![base.clone()];
            while let Some(dir) = stack.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e.into())).await;
                            return;
                        }
                    };
                    let path = entry.path();
                    let Ok(meta) = entry.metadata().await else {
                        continue;
                    };
                    if meta.is_dir() {
                        if recursive {
                            stack.push(path);
                        }
                        continue;
                    }
                    let Ok(rel) = path.strip_prefix(&base) else {
                        continue;
                    };
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    if !key.starts_with(&prefix) {
                        continue;
                    }
                    let info = ObjectInfo {
                        key,
                        size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
                        etag: None,
                        last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                        content_type: None,
                        user_meta: HashMap::new(),
                    };
                    if tx.send(Ok(info)).await.is_err() {
                        return;
                    }
                }
            }
        });

        rx
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, StorageError> {
        self.object_path(bucket, key)?;
        Ok(format!(
            "{}/{bucket}/{key}?X-SimHub-Expires={}",
            self.base_url(),
            expires_at(expiry)
        ))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, StorageError> {
        self.object_path(bucket, key)?;
        Ok(format!(
            "{}/{bucket}/{key}?X-SimHub-Expires={}",
            self.base_url(),
            expires_at(expiry)
        ))
    }

    async fn init_multipart(&self, bucket: &str, key: &str) -> Result<String, StorageError> {
        self.object_path(bucket, key)?;
        let upload_id = Uuid::new_v4().simple().to_string();
        fs::create_dir_all(self.multipart_dir(&upload_id)).await?;
        Ok(upload_id)
    }

    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expiry: Duration,
    ) -> Result<String, StorageError> {
        self.object_path(bucket, key)?;
        Ok(format!(
            "{}/{bucket}/{key}?uploadId={upload_id}&partNumber={part_number}&X-SimHub-Expires={}",
            self.base_url(),
            expires_at(expiry)
        ))
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<(), StorageError> {
        let dest = self.object_path(bucket, key)?;
        let dir = self.multipart_dir(upload_id);
        if !dir.is_dir() {
            return Err(StorageError::UploadNotFound(upload_id.to_string()));
        }
        if parts.is_empty() {
            return Err(StorageError::UploadNotFound(format!(
                "upload {upload_id} has no parts"
            )));
        }

        let mut ordered: Vec<&Part> = parts.iter().collect();
        ordered.sort_by_key(|p| p.part_number);

        let temp = self.temp_path();
        let mut hasher = Sha256::new();
        let mut temp_file = fs::File::create(&temp).await?;
        let mut buf = vec![0u8; READ_BUF_SIZE];

        for part in ordered {
            let part_file = self.part_path(upload_id, part.part_number);
            let mut reader = match fs::File::open(&part_file).await {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    drop(temp_file);
                    let _ = fs::remove_file(&temp).await;
                    return Err(StorageError::UploadNotFound(format!(
                        "upload {upload_id} is missing part {}",
                        part.part_number
                    )));
                }
                Err(e) => {
                    drop(temp_file);
                    let _ = fs::remove_file(&temp).await;
                    return Err(e.into());
                }
            };
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                temp_file.write_all(&buf[..n]).await?;
            }
        }

        temp_file.flush().await?;
        drop(temp_file);

        self.promote(&temp, &dest).await?;
        self.record_etag(bucket, key, format!("{:x}", hasher.finalize()));
        let _ = fs::remove_dir_all(&dir).await;
        Ok(())
    }

    async fn abort_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        match fs::remove_dir_all(self.multipart_dir(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
