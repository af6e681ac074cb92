use super::document::{DocKey, DocumentStore};
use crate::error::{PixaError, Result};
use crate::model::{FavoriteSet, GenerationRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Typed access to the three persisted documents.
///
/// Each document is read and written as a whole array. Callers do
/// read-modify-write on their in-memory copy and hand the full array back,
/// so two mutators can never interleave field updates inside a document.
pub struct LocalStore<D: DocumentStore + ?Sized> {
    docs: Arc<D>,
}

impl<D: DocumentStore + ?Sized> LocalStore<D> {
    pub fn new(docs: Arc<D>) -> Self {
        Self { docs }
    }

    pub fn load_records(&self) -> Result<Vec<GenerationRecord>> {
        self.load(DocKey::Records)
    }

    pub fn save_records(&self, records: &[GenerationRecord]) -> Result<()> {
        self.save(DocKey::Records, records)
    }

    pub fn load_pending(&self) -> Result<Vec<GenerationRecord>> {
        self.load(DocKey::Pending)
    }

    pub fn save_pending(&self, pending: &[GenerationRecord]) -> Result<()> {
        self.save(DocKey::Pending, pending)
    }

    pub fn load_favorites(&self) -> Result<FavoriteSet> {
        self.load(DocKey::Favorites)
    }

    pub fn save_favorites(&self, favorites: &FavoriteSet) -> Result<()> {
        self.save(DocKey::Favorites, favorites)
    }

    fn load<T: DeserializeOwned + Default>(&self, key: DocKey) -> Result<T> {
        match self.docs.read_document(key)? {
            Some(json) if !json.trim().is_empty() => {
                serde_json::from_str(&json).map_err(PixaError::Serialization)
            }
            _ => Ok(T::default()),
        }
    }

    fn save<T: Serialize + ?Sized>(&self, key: DocKey, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).map_err(PixaError::Serialization)?;
        self.docs.write_document(key, &json)
    }
}
