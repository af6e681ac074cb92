use crate::error::Result;

/// The three independently persisted documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKey {
    /// Completed generation records.
    Records,
    /// Generations whose provider call has not resolved.
    Pending,
    /// The favorite set.
    Favorites,
}

impl DocKey {
    pub const ALL: [DocKey; 3] = [DocKey::Records, DocKey::Pending, DocKey::Favorites];

    pub fn file_name(&self) -> &'static str {
        match self {
            DocKey::Records => "records.json",
            DocKey::Pending => "pending.json",
            DocKey::Favorites => "favorites.json",
        }
    }
}

/// Key to JSON persistent store.
///
/// Documents are replaced whole; there are no partial updates.
pub trait DocumentStore {
    /// Returns Ok(None) if the document was never written.
    fn read_document(&self, key: DocKey) -> Result<Option<String>>;

    /// Replace the document. MUST be atomic (e.g. write to tmp then rename).
    fn write_document(&self, key: DocKey, json: &str) -> Result<()>;
}
