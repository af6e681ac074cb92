//! # Storage Layer
//!
//! Two independent leaves sit at the bottom of the engine:
//!
//! - [`blob::BlobStore`]: key → bytes, for image payloads.
//! - [`document::DocumentStore`]: key → JSON, for the record arrays and the
//!   favorite set.
//!
//! [`local::LocalStore`] layers typed access to the three documents on top of a
//! document store. [`Backend`] bundles both leaves so one object can be
//! injected into the resolver, the garbage collector and the facade.
//!
//! ## Ordering Rule
//!
//! Blobs are always written before the document that references them. A crash
//! between the two leaves an orphan blob (collected at the next startup), never
//! a dangling reference.
//!
//! ## Implementations
//!
//! - [`fs_backend::FsBackend`]: Production. Atomic temp-file-then-rename writes.
//! - [`mem_backend::MemBackend`]: For testing logic without filesystem I/O.
//!
//! ## Async Callers
//!
//! The backend traits are synchronous. Async code never calls them directly
//! on the executor; it goes through [`run_blocking`], which moves the call
//! onto tokio's blocking pool.
//!
//! ## Storage Layout
//!
//! ```text
//! <data dir>/
//! ├── records.json      # Completed generation records
//! ├── pending.json      # In-flight generations (crash recovery scans only this)
//! ├── favorites.json    # Favorite set, ["<generation id>:<index>", ...]
//! ├── pixa.toml         # Configuration
//! └── blobs/            # One file per blob key
//! ```

pub mod blob;
pub mod document;
pub mod fs_backend;
pub mod local;
pub mod mem_backend;

use std::sync::Arc;

use crate::error::{PixaError, Result};

pub use blob::BlobStore;
pub use document::{DocKey, DocumentStore};

/// Everything the engine needs from persistent storage.
pub trait Backend: BlobStore + DocumentStore + Send + Sync {}

impl<T: BlobStore + DocumentStore + Send + Sync> Backend for T {}

/// Runs a storage operation on the blocking thread pool.
pub async fn run_blocking<T, F>(backend: &Arc<dyn Backend>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<dyn Backend>) -> Result<T> + Send + 'static,
{
    let backend = backend.clone();
    tokio::task::spawn_blocking(move || op(backend))
        .await
        .map_err(|e| PixaError::Store(format!("Storage task failed: {e}")))?
}
