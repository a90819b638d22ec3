//! Local object store using the filesystem
//!
//! Objects live at `<root>/<key>` with a `<key>.meta.json` sidecar holding
//! the content type and user metadata.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

use super::object_store::{ObjectStore, StoredObject};

/// Filesystem-backed object store
pub struct LocalObjectStore {
    /// Directory objects are stored under
    root: PathBuf,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    content_type: Option<String>,
    size: u64,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl LocalObjectStore {
    /// Create a new store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve a key to a path, rejecting keys that escape the root
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::InvalidInput(format!("Invalid object key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".meta.json");
        PathBuf::from(name)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_object(&self, key: &str) -> Result<StoredObject> {
        let path = self.object_path(key)?;

        let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::ObjectNotFound(key.to_string()),
            _ => Error::storage(format!("Failed to read object {}: {}", key, e)),
        })?;

        // A missing sidecar is tolerated; the bytes are what matter
        let meta = match tokio::fs::read(Self::meta_path(&path)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => ObjectMeta::default(),
        };

        Ok(StoredObject {
            key: key.to_string(),
            data,
            content_type: meta.content_type,
            metadata: meta.metadata,
        })
    }

    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage(format!("Failed to create directory for {}: {}", key, e))
            })?;
        }

        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::storage(format!("Failed to write object {}: {}", key, e)))?;

        let meta = ObjectMeta {
            content_type: content_type.map(String::from),
            size: data.len() as u64,
            metadata,
        };
        let meta_json = serde_json::to_string_pretty(&meta)?;
        tokio::fs::write(Self::meta_path(&path), meta_json)
            .await
            .map_err(|e| Error::storage(format!("Failed to write metadata for {}: {}", key, e)))?;

        tracing::debug!(key = %key, bytes = data.len(), "Stored object");
        Ok(())
    }

    fn name(&self) -> &str {
        "local-fs"
    }
}
