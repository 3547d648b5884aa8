//! Local-disk storage for message attachments.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub storage_key: String,
    pub url: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

/// Reduces a client-supplied name to a single safe path component.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.contains("..") || key.contains('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    public_url_prefix: String,
}

impl FileStorage {
    pub async fn new(root: impl Into<PathBuf>, public_url_prefix: &str) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            public_url_prefix: public_url_prefix.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn upload(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<StoredFile, StorageError> {
        let storage_key = format!("{}_{}", uuid::Uuid::new_v4(), sanitize_file_name(file_name));
        let path = self.root.join(&storage_key);

        tokio::fs::write(&path, bytes).await?;
        debug!(key = %storage_key, size = bytes.len(), "Stored attachment");

        Ok(StoredFile {
            url: self.public_url(&storage_key),
            storage_key,
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    /// Absolute path of an existing stored file.
    pub async fn path_for(&self, storage_key: &str) -> Result<PathBuf, StorageError> {
        validate_key(storage_key)?;
        let path = self.root.join(storage_key);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }
        Ok(path)
    }

    pub async fn download(&self, storage_key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(storage_key).await?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Removes a stored file. Missing files are not an error.
    pub async fn delete(&self, storage_key: &str) -> Result<(), StorageError> {
        validate_key(storage_key)?;
        match tokio::fs::remove_file(self.root.join(storage_key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn public_url(&self, storage_key: &str) -> String {
        format!("{}/{}", self.public_url_prefix, storage_key)
    }
}
