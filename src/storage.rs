// src/storage.rs

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;

/// Reference to an uploaded object: a public URL plus the storage-side id
/// needed to delete it later.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub url: String,
    pub id: String,
}

/// External object-storage collaborator. Progress submissions may carry an
/// attachment; the engine only ever uploads and deletes whole objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<StoredObject, AppError>;
    async fn delete(&self, id: &str) -> Result<(), AppError>;
}

pub type DynObjectStore = Arc<dyn ObjectStore>;

/// Filesystem-backed store. Objects are written under `root` with a uuid
/// prefix and served by the router's `/uploads` static route.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<StoredObject, AppError> {
        // Strip any path components the client sent.
        let base_name = file_name.rsplit(['/', '\\']).next().unwrap_or("file");
        let id = format!("{}-{}", Uuid::new_v4(), base_name);

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(&id), bytes).await?;

        Ok(StoredObject {
            url: format!("{}/uploads/{}", self.public_base, id),
            id,
        })
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            // Already gone: deletion is idempotent.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
