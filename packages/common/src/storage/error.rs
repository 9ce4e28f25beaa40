use thiserror::Error;

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The object key or bucket name is malformed (empty segments,
    /// traversal, absolute paths).
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// The multipart upload id is unknown or a part is missing.
    #[error("multipart upload error: {0}")]
    UploadNotFound(String),

    /// The declared size does not match the bytes received.
    #[error("size mismatch: declared {declared}, received {received} bytes")]
    SizeMismatch { declared: i64, received: i64 },

    /// The backend does not implement this capability.
    #[error("storage backend does not support {0}")]
    Unsupported(&'static str),

    /// An I/O error occurred.
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this error means the object simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
