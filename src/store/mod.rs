//! Content-store access: enumerate and fetch opaque blobs by name.
//!
//! The store knows nothing about documents. It hands out names and bytes;
//! [`filter_documents`] narrows the listing to names carrying the document
//! extension.
//!
//! ## Backends
//!
//! | Backend | Connection string | Use |
//! |---------|-------------------|-----|
//! | [`AzureBlobStore`]  | Azure storage connection string | production |
//! | [`FsBlobStore`]     | `file:///path/to/root`          | offline runs |
//! | [`MemoryBlobStore`] | -                               | tests, embedding |
//!
//! ## Client lifecycle
//!
//! A store is constructed once at startup from [`StoreConfig`] and shared
//! read-only afterwards. There is no reconnect logic: a store whose
//! credentials expire must be rebuilt by the caller.

mod azure;
mod fs;
mod memory;

pub use azure::{AzureBlobStore, ConnectionString, Credentials};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use crate::config::StoreConfig;
use crate::error::{StoreError, ViewerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifies a blob in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub name: String,
}

impl BlobDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for BlobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The full encoded content of one blob.
///
/// Cloning shares the buffer; nothing hands out mutable access to it.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentBytes {
    data: Arc<Vec<u8>>,
}

impl DocumentBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the buffer, copying only when another clone still shares it.
    pub fn into_vec(self) -> Vec<u8> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| shared.as_ref().clone())
    }
}

impl From<Vec<u8>> for DocumentBytes {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for DocumentBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentBytes")
            .field("len", &self.data.len())
            .finish()
    }
}

/// A named-blob store scoped to one container.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Every blob in the container, in the order the store returns them.
    async fn enumerate(&self) -> Result<Vec<BlobDescriptor>, StoreError>;

    /// Download the full content of `name`. Never cached.
    async fn fetch(&self, name: &str) -> Result<DocumentBytes, StoreError>;

    /// Blobs whose name ends with `extension` (case-sensitive).
    async fn list(&self, extension: &str) -> Result<Vec<BlobDescriptor>, StoreError> {
        let all = self.enumerate().await?;
        Ok(filter_documents(all, extension))
    }
}

#[async_trait]
impl<S: BlobStore + ?Sized> BlobStore for Arc<S> {
    async fn enumerate(&self) -> Result<Vec<BlobDescriptor>, StoreError> {
        (**self).enumerate().await
    }

    async fn fetch(&self, name: &str) -> Result<DocumentBytes, StoreError> {
        (**self).fetch(name).await
    }

    async fn list(&self, extension: &str) -> Result<Vec<BlobDescriptor>, StoreError> {
        (**self).list(extension).await
    }
}

#[async_trait]
impl<S: BlobStore + ?Sized> BlobStore for Box<S> {
    async fn enumerate(&self) -> Result<Vec<BlobDescriptor>, StoreError> {
        (**self).enumerate().await
    }

    async fn fetch(&self, name: &str) -> Result<DocumentBytes, StoreError> {
        (**self).fetch(name).await
    }

    async fn list(&self, extension: &str) -> Result<Vec<BlobDescriptor>, StoreError> {
        (**self).list(extension).await
    }
}

/// Keep descriptors whose name ends with `extension`, preserving order.
pub fn filter_documents(blobs: Vec<BlobDescriptor>, extension: &str) -> Vec<BlobDescriptor> {
    blobs
        .into_iter()
        .filter(|b| b.name.ends_with(extension))
        .collect()
}

/// Build the store named by `config`.
///
/// `file://` connection strings select [`FsBlobStore`]; anything else is
/// parsed as an Azure storage connection string.
pub fn connect(config: &StoreConfig, timeout: Duration) -> Result<Box<dyn BlobStore>, ViewerError> {
    if let Some(root) = config.connection_string.strip_prefix("file://") {
        let dir = std::path::Path::new(root).join(&config.container);
        return Ok(Box::new(FsBlobStore::new(dir)));
    }
    let conn = ConnectionString::parse(&config.connection_string)?;
    let store = AzureBlobStore::new(conn, &config.container, timeout)?;
    Ok(Box::new(store))
}
