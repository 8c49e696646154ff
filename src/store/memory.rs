//! In-process blob store.

use super::{BlobDescriptor, BlobStore, DocumentBytes};
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Blobs held in memory, enumerated in insertion order.
///
/// [`set_offline`](Self::set_offline) makes every call fail with
/// [`StoreError::Unavailable`], which is how tests model an outage.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<Vec<(String, DocumentBytes)>>,
    offline: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`. A replaced blob keeps its position.
    pub fn insert(&self, name: impl Into<String>, data: impl Into<DocumentBytes>) {
        let name = name.into();
        let data = data.into();
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        match blobs.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = data,
            None => blobs.push((name, data)),
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        let before = blobs.len();
        blobs.retain(|(n, _)| n != name);
        blobs.len() != before
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `fetch` calls that reached the store.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn enumerate(&self) -> Result<Vec<BlobDescriptor>, StoreError> {
        self.check_online()?;
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        Ok(blobs.iter().map(|(n, _)| BlobDescriptor::new(n)).collect())
    }

    async fn fetch(&self, name: &str) -> Result<DocumentBytes, StoreError> {
        self.check_online()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        blobs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_in_insertion_order_and_filters() {
        let store = MemoryBlobStore::new();
        store.insert("Q1.pdf", b"%PDF-a".to_vec());
        store.insert("notes.txt", b"hello".to_vec());
        store.insert("Q2.PDF", b"%PDF-b".to_vec());

        let all = store.enumerate().await.unwrap();
        assert_eq!(all.len(), 3);

        let docs = store.list(".pdf").await.unwrap();
        assert_eq!(docs, vec![BlobDescriptor::new("Q1.pdf")]);
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        store.insert("Q1.pdf", b"%PDF".to_vec());
        assert!(store.remove("Q1.pdf"));

        let err = store.fetch("Q1.pdf").await.unwrap_err();
        assert_eq!(
            err,
            StoreError::NotFound {
                name: "Q1.pdf".into()
            }
        );
    }

    #[tokio::test]
    async fn every_fetch_hits_the_store() {
        let store = MemoryBlobStore::new();
        store.insert("a.pdf", b"%PDF".to_vec());
        store.fetch("a.pdf").await.unwrap();
        store.fetch("a.pdf").await.unwrap();
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let store = MemoryBlobStore::new();
        store.insert("a.pdf", b"%PDF".to_vec());
        store.set_offline(true);
        assert!(matches!(
            store.list(".pdf").await,
            Err(StoreError::Unavailable { .. })
        ));
        assert!(matches!(
            store.fetch("a.pdf").await,
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn replacing_keeps_position() {
        let store = MemoryBlobStore::new();
        store.insert("a.pdf", b"1".to_vec());
        store.insert("b.pdf", b"2".to_vec());
        store.insert("a.pdf", b"3".to_vec());
        let all = tokio_test::block_on(store.enumerate()).unwrap();
        assert_eq!(all[0].name, "a.pdf");
        let a = tokio_test::block_on(store.fetch("a.pdf")).unwrap();
        assert_eq!(a.as_slice(), b"3");
    }
}
