//! Raw document bytes.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },

    #[error("Invalid blob path '{0}'")]
    InvalidPath(String),

    #[error("Failed to read blob '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write blob '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Storage the intake and OCR stages download documents from.
///
/// Errors are treated as transient by the workers: the job is retried.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BlobError>;
}

/// Blobs as files under `<root>/<bucket>/<path>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a bucket/path pair, rejecting anything that could escape the
    /// root.
    fn resolve(&self, bucket: &str, path: &str) -> Result<PathBuf, BlobError> {
        let mut resolved = self.root.clone();
        for part in [bucket, path] {
            let relative = Path::new(part);
            if part.is_empty()
                || !relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
            {
                return Err(BlobError::InvalidPath(format!("{}/{}", bucket, path)));
            }
            resolved.push(relative);
        }
        Ok(resolved)
    }

    pub async fn upload(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<PathBuf, BlobError> {
        let target = self.resolve(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Write {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| BlobError::Write {
                path: target.clone(),
                source: e,
            })?;
        Ok(target)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, BlobError> {
        let target = self.resolve(bucket, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            }),
            Err(e) => Err(BlobError::Read {
                path: target,
                source: e,
            }),
        }
    }
}
