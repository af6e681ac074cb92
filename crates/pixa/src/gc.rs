//! # Garbage Collection
//!
//! Removes blobs that no record references. Runs once at startup, after
//! pending recovery, and never while generations are in flight.
//!
//! ## Liveness
//!
//! A key is live when any completed or pending record holds it, either as a
//! persisted reference or as a session handle in memory.
//!
//! ## Ordering
//!
//! The key listing is taken **before** the liveness snapshot. A blob written
//! between the two steps is absent from the listing and therefore can never
//! be deleted by this run. Taking them the other way round would let a fresh
//! blob appear in the listing but not in an older liveness set.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::model::{BlobKey, GenerationRecord};
use crate::store::BlobStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub scanned: usize,
    pub live: usize,
    pub removed: usize,
}

/// Every key held by `records`, references and handles alike.
pub fn live_keys<'a>(records: impl IntoIterator<Item = &'a GenerationRecord>) -> BTreeSet<BlobKey> {
    records
        .into_iter()
        .flat_map(|record| record.blob_keys())
        .cloned()
        .collect()
}

/// Deletes every listed blob not in the liveness set.
///
/// `live` is evaluated after the listing. Individual delete failures are
/// logged and skipped; the blob survives until the next run.
pub fn collect<B, F>(blobs: &B, live: F) -> Result<GcReport>
where
    B: BlobStore + ?Sized,
    F: FnOnce() -> BTreeSet<BlobKey>,
{
    let listed = blobs.list_keys()?;
    let live = live();

    let mut report = GcReport {
        scanned: listed.len(),
        live: live.len(),
        removed: 0,
    };

    for key in listed.iter().filter(|key| !live.contains(*key)) {
        match blobs.delete(key) {
            Ok(()) => report.removed += 1,
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to delete orphan blob"),
        }
    }

    if report.removed > 0 {
        tracing::info!(removed = report.removed, scanned = report.scanned, "Collected orphan blobs");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenerationOptions, ImageData, InlineImage};
    use crate::store::mem_backend::MemBackend;

    fn record_with(keys: &[BlobKey]) -> GenerationRecord {
        let mut record = GenerationRecord::new_pending(
            "p",
            &GenerationOptions {
                image_count: keys.len(),
                ..Default::default()
            },
            Vec::new(),
        );
        for (slot, key) in record.images.iter_mut().zip(keys) {
            *slot = ImageData::Reference(key.clone());
        }
        record
    }

    #[test]
    fn removes_only_unreferenced_blobs() {
        let backend = MemBackend::new();
        let kept = BlobKey::output("a", 0);
        let orphan = BlobKey::output("gone", 0);
        backend.put(&kept, b"1").unwrap();
        backend.put(&orphan, b"2").unwrap();
        let records = vec![record_with(std::slice::from_ref(&kept))];

        let report = collect(&backend, || live_keys(&records)).unwrap();

        assert_eq!(report, GcReport { scanned: 2, live: 1, removed: 1 });
        assert!(backend.contains(&kept).unwrap());
        assert!(!backend.contains(&orphan).unwrap());
    }

    #[test]
    fn session_handles_count_as_live() {
        let backend = MemBackend::new();
        let key = BlobKey::output("a", 0);
        backend.put(&key, b"1").unwrap();
        let mut record = record_with(&[]);
        record.images.push(ImageData::Inline(InlineImage::Handle(key.clone())));

        collect(&backend, || live_keys([&record])).unwrap();

        assert!(backend.contains(&key).unwrap());
    }

    #[test]
    fn blob_written_after_listing_survives() {
        let backend = MemBackend::new();
        let late = BlobKey::output("late", 0);

        let report = collect(&backend, || {
            // A generation finishing between listing and liveness.
            backend.put(&late, b"new").unwrap();
            BTreeSet::new()
        })
        .unwrap();

        assert_eq!(report.removed, 0);
        assert!(backend.contains(&late).unwrap());
    }

    #[test]
    fn live_keys_include_inputs() {
        let mut record = record_with(&[BlobKey::output("a", 0)]);
        record.input_images.push(crate::model::InputImage::new(
            "in.png",
            ImageData::Reference(BlobKey::input("a", "i1")),
            1,
            1,
        ));

        let keys = live_keys([&record]);

        assert!(keys.contains(&BlobKey::input("a", "i1")));
        assert_eq!(keys.len(), 2);
    }
}
