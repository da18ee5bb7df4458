use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("not authenticated for {0}")]
    Unauthorized(String),

    #[error("access denied to {0}")]
    Forbidden(String),

    #[error("unexpected status {status} for {path}")]
    Status { path: String, status: u16 },

    #[error("transport error: {0}")]
    Transport(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Folder/file access to a pod.
///
/// Folder paths end with `/`. Every call is independently fallible.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Create a folder. Succeeds if the folder already exists.
    async fn create_folder(&self, path: &str) -> Result<(), StorageError>;

    /// Create a new file. Fails with `AlreadyExists` rather than overwrite.
    async fn create_file(&self, path: &str, body: &str) -> Result<(), StorageError>;

    /// List the direct children of a folder as absolute paths.
    async fn read_folder(&self, path: &str) -> Result<Vec<String>, StorageError>;

    async fn read_file(&self, path: &str) -> Result<String, StorageError>;

    /// Create or replace a file.
    async fn update_file(&self, path: &str, body: &str) -> Result<(), StorageError>;

    /// Delete a folder and everything below it. A missing folder is not an error.
    async fn delete_folder(&self, path: &str) -> Result<(), StorageError>;
}
