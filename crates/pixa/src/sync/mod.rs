//! # Sync Reconciliation
//!
//! Mirrors the local gallery to an account-scoped remote store. The remote is
//! a backup and a source of records from other devices, never of overwrites.
//!
//! ## Triggers
//!
//! 1. **Sign-in transition** (no session → session, or a different user):
//!    one full merge, guarded against re-entry.
//! 2. **Local mutation** after the merge: a debounced push of whatever
//!    differs from the last committed snapshot. Records wait out a 2s window,
//!    favorites a 1s window (both configurable).
//! 3. **Deletion**: immediate, not debounced, best effort.
//!
//! ## Sign-in Merge
//!
//! ```text
//! remote records, remote favorites  ← list
//! local-only records                → upload (blobs first when image sync is on)
//! local ∪ remote favorites          → upload if the remote lacks any
//! remote-only records               → returned to the caller to add locally
//! snapshot                          ← what the remote now holds
//! ```
//!
//! For an id present on both sides neither copy is overwritten during the
//! merge. The local copy stays authoritative locally; if it has more filled
//! slots than the remote copy, the next delta push sends it.
//!
//! ## Failures
//!
//! A failed push leaves the snapshot untouched, so the same delta is sent
//! next time. Automatic retries back off exponentially and stop after a
//! bounded number of attempts (see [`backoff`]); the next local change or
//! sign-in starts again. Local state is never affected by sync failures.
//!
//! A failed sign-in merge backs off the same way. Until a merge completes,
//! every push runs the merge instead, so changes made after an offline
//! sign-in still reach the remote.
//!
//! ## Cancellation
//!
//! Scheduling a push cancels the previous one only while it is still waiting
//! (see [`debounce`]). Sign-out bumps an epoch counter so that a merge or push
//! still in flight discards its result instead of reviving stale progress.

pub mod backoff;
pub mod debounce;
pub mod reconciler;
pub mod remote;
pub mod snapshot;

pub use reconciler::{MergeOutcome, SyncReconciler, SyncSettings, SyncTarget};
pub use remote::{Identity, MemRemote, RemoteError, RemoteStore, UserId};
pub use snapshot::SyncSnapshot;
