//! The remote store contract and an in-memory implementation of it.
//!
//! The remote is a backup and merge target, scoped per account. Every call
//! names the user it acts for; the engine never talks to it without an
//! [`Identity`].

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use crate::model::{BlobKey, FavoriteSet, GenerationRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signed-in session, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Remote rejected request: {0}")]
    Rejected(String),

    #[error("Not authorized for remote store")]
    Unauthorized,
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_records(&self, user: &UserId) -> RemoteResult<Vec<GenerationRecord>>;

    /// Insert or replace by id. Upserting the same id twice keeps one record.
    async fn upsert_records(&self, user: &UserId, records: &[GenerationRecord]) -> RemoteResult<()>;

    /// Deleting an unknown id succeeds.
    async fn delete_record(&self, user: &UserId, id: &str) -> RemoteResult<()>;

    async fn list_favorites(&self, user: &UserId) -> RemoteResult<FavoriteSet>;

    /// Replaces the remote favorite set with `favorites`.
    async fn upsert_favorites(&self, user: &UserId, favorites: &FavoriteSet) -> RemoteResult<()>;

    /// Stores `bytes` and returns a URL the record can carry instead.
    async fn upload_blob(&self, user: &UserId, key: &BlobKey, bytes: &[u8]) -> RemoteResult<String>;

    async fn delete_blob(&self, user: &UserId, url: &str) -> RemoteResult<()>;
}

#[derive(Default)]
struct Account {
    records: BTreeMap<String, GenerationRecord>,
    favorites: FavoriteSet,
    blobs: BTreeMap<String, Vec<u8>>,
}

/// In-memory [`RemoteStore`], shared between "devices" in tests.
#[derive(Default)]
pub struct MemRemote {
    accounts: Mutex<HashMap<UserId, Account>>,
    offline: AtomicBool,
    record_upserts: AtomicUsize,
    favorite_upserts: AtomicUsize,
    blob_uploads: AtomicUsize,
}

impl MemRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`RemoteError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn record_upserts(&self) -> usize {
        self.record_upserts.load(Ordering::SeqCst)
    }

    pub fn favorite_upserts(&self) -> usize {
        self.favorite_upserts.load(Ordering::SeqCst)
    }

    pub fn blob_uploads(&self) -> usize {
        self.blob_uploads.load(Ordering::SeqCst)
    }

    pub fn records(&self, user: &UserId) -> Vec<GenerationRecord> {
        self.with_account(user, |account| account.records.values().cloned().collect())
    }

    pub fn favorites(&self, user: &UserId) -> FavoriteSet {
        self.with_account(user, |account| account.favorites.clone())
    }

    pub fn blob_count(&self, user: &UserId) -> usize {
        self.with_account(user, |account| account.blobs.len())
    }

    /// Bytes served at an uploaded blob URL, in any account.
    pub fn blob_by_url(&self, url: &str) -> Option<Vec<u8>> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts
            .values()
            .find_map(|account| account.blobs.get(url).cloned())
    }

    /// Seeds the account as if another device had pushed `record`.
    pub fn insert_record(&self, user: &UserId, record: GenerationRecord) {
        self.with_account(user, |account| {
            account.records.insert(record.id.clone(), record);
        })
    }

    fn with_account<T>(&self, user: &UserId, f: impl FnOnce(&mut Account) -> T) -> T {
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        f(accounts.entry(user.clone()).or_default())
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemRemote {
    async fn list_records(&self, user: &UserId) -> RemoteResult<Vec<GenerationRecord>> {
        self.check_online()?;
        Ok(self.records(user))
    }

    async fn upsert_records(&self, user: &UserId, records: &[GenerationRecord]) -> RemoteResult<()> {
        self.check_online()?;
        self.with_account(user, |account| {
            for record in records {
                account.records.insert(record.id.clone(), record.clone());
            }
        });
        self.record_upserts.fetch_add(records.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn delete_record(&self, user: &UserId, id: &str) -> RemoteResult<()> {
        self.check_online()?;
        self.with_account(user, |account| {
            account.records.remove(id);
        });
        Ok(())
    }

    async fn list_favorites(&self, user: &UserId) -> RemoteResult<FavoriteSet> {
        self.check_online()?;
        Ok(self.favorites(user))
    }

    async fn upsert_favorites(&self, user: &UserId, favorites: &FavoriteSet) -> RemoteResult<()> {
        self.check_online()?;
        self.with_account(user, |account| account.favorites = favorites.clone());
        self.favorite_upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_blob(&self, user: &UserId, key: &BlobKey, bytes: &[u8]) -> RemoteResult<String> {
        self.check_online()?;
        let url = format!("https://remote.invalid/{}/{}", user, key.as_str().replace(':', "/"));
        self.with_account(user, |account| {
            account.blobs.insert(url.clone(), bytes.to_vec());
        });
        self.blob_uploads.fetch_add(1, Ordering::SeqCst);
        Ok(url)
    }

    async fn delete_blob(&self, user: &UserId, url: &str) -> RemoteResult<()> {
        self.check_online()?;
        self.with_account(user, |account| {
            account.blobs.remove(url);
        });
        Ok(())
    }
}
