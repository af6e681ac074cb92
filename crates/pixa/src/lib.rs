//! # Pixa Architecture
//!
//! Pixa is the **local-first persistence and sync engine** behind an image
//! generation gallery. The provider call, sign-in and rendering live outside;
//! this crate keeps the gallery durable across restarts, recovers work that
//! was cut off mid-flight, and mirrors everything to a remote account.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  API Layer (api.rs)                                         │
//! │  - In-memory gallery, startup sequence, UI operations       │
//! │  - Schedules debounced sync after every mutation            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Engine (resolver.rs, gc.rs, recovery.rs, sync/)            │
//! │  - Reference Resolver: raw image data ⇄ blob references     │
//! │  - Garbage Collector: drops unreferenced blobs at startup   │
//! │  - Pending Recovery: interrupted work becomes retryable     │
//! │  - Sync Reconciler: additive, local-wins remote mirroring   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage Layer (store/)                                     │
//! │  - BlobStore and DocumentStore traits                       │
//! │  - FsBackend (production), MemBackend (testing)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! generation completes
//!   → resolver writes blobs, rewrites image fields to references
//!   → document store commits the rewritten record
//!   → sync pushes the record after the debounce window
//! ```
//!
//! Blobs are always written before the document that references them, so a
//! crash leaves at worst an orphan blob, which the next startup collects.
//!
//! ## Key Principle: Constructor Injection
//!
//! There is no global store. [`api::PixaApi::open`] receives the backend, the
//! generation service, the fetcher and the remote store, and everything below
//! it holds what it was handed. Tests swap in [`store::mem_backend::MemBackend`]
//! and [`sync::MemRemote`].
//!
//! ## Module Overview
//!
//! - [`api`]: The facade, entry point for all operations
//! - [`model`]: Records, image field states, blob keys, favorites
//! - [`store`]: Storage traits and backends
//! - [`resolver`]: Hydrate, dehydrate and lazy migration of legacy data
//! - [`gc`]: Orphan blob collection
//! - [`recovery`]: Pending-record recovery at startup
//! - [`sync`]: Remote reconciliation, debounce and backoff
//! - [`generation`]: The provider contract
//! - [`fetch`]: URL fetching for image data
//! - [`config`]: Configuration management
//! - [`error`]: Error types

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gc;
pub mod generation;
pub mod model;
pub mod recovery;
pub mod resolver;
pub mod store;
pub mod sync;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
