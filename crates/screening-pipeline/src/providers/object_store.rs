//! Object store trait for raw uploaded files

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;

/// A stored object with its metadata
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Trait for raw object storage
///
/// Implementations:
/// - `LocalObjectStore`: files under a local directory
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; a missing key is `Error::ObjectNotFound`
    async fn get_object(&self, key: &str) -> Result<StoredObject>;

    /// Store an object, replacing any previous version
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Get store name for logging
    fn name(&self) -> &str;
}
