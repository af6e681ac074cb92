use crate::error::Result;
use crate::model::BlobKey;
use std::collections::BTreeSet;

/// Key to binary persistent store.
///
/// Every operation is idempotent: putting the same key twice overwrites,
/// deleting a missing key succeeds. Keys never collide because they are
/// derived from the owning record (see [`BlobKey`]).
pub trait BlobStore {
    /// Store `bytes` under `key`, replacing any previous payload.
    /// MUST be atomic so a crash never leaves a torn payload.
    fn put(&self, key: &BlobKey, bytes: &[u8]) -> Result<()>;

    /// Returns Ok(None) if nothing is stored under `key`.
    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>>;

    fn delete(&self, key: &BlobKey) -> Result<()>;

    fn list_keys(&self) -> Result<BTreeSet<BlobKey>>;

    /// Existence check. Backends override this when they can answer
    /// without reading the payload.
    fn contains(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}
