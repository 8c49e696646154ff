//! A local directory acting as a container.
//!
//! Blob names are paths relative to the root, `/`-separated, exactly like
//! virtual directories in a blob container.

use super::{BlobDescriptor, BlobStore, DocumentBytes};
use crate::error::StoreError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a blob name onto the root, refusing anything that could escape it.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let rel = Path::new(name);
        if name.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn enumerate(&self) -> Result<Vec<BlobDescriptor>, StoreError> {
        let mut out = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                StoreError::unavailable(format!("cannot read '{}': {e}", dir.display()))
            })?;
            let mut files = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::unavailable(e.to_string()))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::unavailable(e.to_string()))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let full = format!("{prefix}{name}");
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{full}/")));
                } else if file_type.is_file() {
                    files.push(full);
                }
            }
            // read_dir order is platform-defined; sort each directory so
            // listings are stable between runs.
            files.sort();
            out.extend(files.into_iter().map(BlobDescriptor::new));
        }

        debug!("Enumerated {} blobs under {}", out.len(), self.root.display());
        Ok(out)
    }

    async fn fetch(&self, name: &str) -> Result<DocumentBytes, StoreError> {
        let not_found = || StoreError::NotFound {
            name: name.to_string(),
        };
        let path = self.resolve(name).ok_or_else(not_found)?;

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(DocumentBytes::new(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(StoreError::unavailable(format!(
                "cannot read '{}': {e}",
                path.display()
            ))),
        }
    }
}
