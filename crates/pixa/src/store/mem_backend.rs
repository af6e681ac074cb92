use super::blob::BlobStore;
use super::document::{DocKey, DocumentStore};
use crate::error::{PixaError, Result};
use crate::model::BlobKey;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// In-memory storage backend for testing.
///
/// Shareable across tokio tasks and the blocking pool. Writes can be made to
/// fail on demand, and successful blob writes are counted.
#[derive(Default)]
pub struct MemBackend {
    documents: Mutex<HashMap<DocKey, String>>,
    blobs: Mutex<BTreeMap<BlobKey, Vec<u8>>>,
    simulate_write_error: AtomicBool,
    blob_writes: AtomicUsize,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable write error simulation for testing error handling.
    pub fn set_simulate_write_error(&self, simulate: bool) {
        self.simulate_write_error.store(simulate, Ordering::SeqCst);
    }

    /// Number of successful `put` calls so far.
    pub fn blob_writes(&self) -> usize {
        self.blob_writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.simulate_write_error.load(Ordering::SeqCst) {
            return Err(PixaError::Store("Simulated write error".to_string()));
        }
        Ok(())
    }
}

impl DocumentStore for MemBackend {
    fn read_document(&self, key: DocKey) -> Result<Option<String>> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(&key).cloned())
    }

    fn write_document(&self, key: DocKey, json: &str) -> Result<()> {
        self.check_writable()?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        documents.insert(key, json.to_string());
        Ok(())
    }
}

impl BlobStore for MemBackend {
    fn put(&self, key: &BlobKey, bytes: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(key.clone(), bytes.to_vec());
        self.blob_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(key).cloned())
    }

    fn delete(&self, key: &BlobKey) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<BTreeSet<BlobKey>> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.keys().cloned().collect())
    }

    fn contains(&self, key: &BlobKey) -> Result<bool> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_operations_are_idempotent() {
        let backend = MemBackend::new();
        let key = BlobKey::output("gen-1", 0);

        backend.put(&key, b"one").unwrap();
        backend.put(&key, b"two").unwrap();
        assert_eq!(backend.get(&key).unwrap(), Some(b"two".to_vec()));
        assert_eq!(backend.list_keys().unwrap().len(), 1);

        backend.delete(&key).unwrap();
        backend.delete(&key).unwrap();
        assert_eq!(backend.get(&key).unwrap(), None);
        assert!(!backend.contains(&key).unwrap());
    }

    #[test]
    fn simulated_write_error_blocks_writes_but_not_reads() {
        let backend = MemBackend::new();
        backend
            .write_document(DocKey::Favorites, "[\"g:1\"]")
            .unwrap();
        backend.set_simulate_write_error(true);

        assert!(backend.write_document(DocKey::Favorites, "[]").is_err());
        assert!(backend.put(&BlobKey::output("g", 0), b"x").is_err());
        assert_eq!(
            backend.read_document(DocKey::Favorites).unwrap().as_deref(),
            Some("[\"g:1\"]")
        );
    }

    #[test]
    fn writes_from_another_thread_are_visible() {
        let backend = std::sync::Arc::new(MemBackend::new());
        let writer = backend.clone();

        std::thread::spawn(move || writer.put(&BlobKey::output("g", 0), b"x"))
            .join()
            .unwrap()
            .unwrap();

        assert!(backend.contains(&BlobKey::output("g", 0)).unwrap());
        assert_eq!(backend.blob_writes(), 1);
    }

    #[test]
    fn documents_are_independent() {
        let backend = MemBackend::new();
        backend.write_document(DocKey::Records, "[]").unwrap();

        assert!(backend.read_document(DocKey::Records).unwrap().is_some());
        assert!(backend.read_document(DocKey::Pending).unwrap().is_none());
    }
}
