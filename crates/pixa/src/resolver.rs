//! # Reference Resolver
//!
//! Converts image fields between the raw forms the application works with and
//! the `ref:` form that persisted documents hold.
//!
//! ## Dehydrate (metadata → durable)
//!
//! For every non-empty, non-reference field of a record:
//!
//! - **Session handle**: the resolver issued it after writing the bytes, so the
//!   field is rewritten to a reference with no fetch and no write.
//! - **Anything else** (URL, data URL, fresh bytes): the bytes are fetched or
//!   decoded, written under the field's deterministic [`BlobKey`], and the field
//!   becomes a reference.
//!
//! The input record is never touched; a new persisted copy is returned.
//!
//! ## Hydrate (durable → displayable)
//!
//! Every reference becomes a session handle. A reference whose blob is missing
//! degrades to `Empty` instead of failing the record.
//!
//! Fields that are neither empty nor references are legacy data from before the
//! reference scheme. Hydrate runs [`Resolver::normalize`] on them: the bytes are
//! stored under the deterministic key and a handle is returned, so the next
//! persist of the record completes the migration. This is a lazy migration on
//! read; there is no batch pass over the whole gallery at startup. When the
//! legacy value cannot be fetched the raw value is kept so a later pass can
//! retry.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{PixaError, Result};
use crate::fetch::ImageFetcher;
use crate::model::{BlobKey, GenerationRecord, ImageData, InlineImage};
use crate::store::{self, Backend};

pub struct Resolver {
    blobs: Arc<dyn Backend>,
    fetcher: Arc<dyn ImageFetcher>,
    /// Handles issued during this session. Their bytes are known to be durable.
    issued: Mutex<HashSet<BlobKey>>,
}

impl Resolver {
    pub fn new(blobs: Arc<dyn Backend>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            blobs,
            fetcher,
            issued: Mutex::new(HashSet::new()),
        }
    }

    /// Returns a copy of `record` in which every non-empty image field is a
    /// reference. Blobs are written before this returns, so the copy is safe to
    /// commit to the document store.
    pub async fn dehydrate(&self, record: &GenerationRecord) -> Result<GenerationRecord> {
        let mut durable = record.clone();

        for (index, slot) in durable.images.iter_mut().enumerate() {
            let key = BlobKey::output(&record.id, index);
            let next = self.dehydrate_field(slot, key).await?;
            *slot = next;
        }
        for input in durable.input_images.iter_mut() {
            let key = BlobKey::input(&record.id, &input.id);
            let next = self.dehydrate_field(&input.data, key).await?;
            input.data = next;
        }

        Ok(durable)
    }

    /// Returns a displayable copy of a stored record. Never fails as a whole.
    pub async fn hydrate(&self, record: &GenerationRecord) -> GenerationRecord {
        let mut display = record.clone();

        for (index, slot) in display.images.iter_mut().enumerate() {
            let key = BlobKey::output(&record.id, index);
            let next = self.hydrate_field(&record.id, slot, key).await;
            *slot = next;
        }
        for input in display.input_images.iter_mut() {
            let key = BlobKey::input(&record.id, &input.id);
            let next = self.hydrate_field(&record.id, &input.data, key).await;
            input.data = next;
        }

        display
    }

    /// Migration on read: makes a raw field durable under `key` and returns a
    /// session handle for it. References and handles pass through unchanged,
    /// so calling this twice is harmless.
    pub async fn normalize(&self, field: &ImageData, key: BlobKey) -> Result<ImageData> {
        match field {
            ImageData::Empty | ImageData::Reference(_) => Ok(field.clone()),
            ImageData::Inline(InlineImage::Handle(_)) => Ok(field.clone()),
            ImageData::Inline(raw) => {
                let bytes = self.decode_inline(raw).await?;
                self.put(&key, bytes).await?;
                Ok(self.issue(key))
            }
        }
    }

    /// Bytes behind any field state. `Ok(None)` for empty fields and for
    /// references whose blob is gone.
    pub async fn materialize(&self, field: &ImageData) -> Result<Option<Vec<u8>>> {
        match field {
            ImageData::Empty => Ok(None),
            ImageData::Reference(key) | ImageData::Inline(InlineImage::Handle(key)) => {
                self.get(key).await
            }
            ImageData::Inline(raw) => self.decode_inline(raw).await.map(Some),
        }
    }

    /// Forgets the handles issued for blobs that are going away.
    pub fn release<'a>(&self, keys: impl IntoIterator<Item = &'a BlobKey>) {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            issued.remove(key);
        }
    }

    pub fn is_issued(&self, key: &BlobKey) -> bool {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn issue(&self, key: BlobKey) -> ImageData {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        ImageData::Inline(InlineImage::Handle(key))
    }

    async fn dehydrate_field(&self, field: &ImageData, key: BlobKey) -> Result<ImageData> {
        match field {
            ImageData::Empty => Ok(ImageData::Empty),
            ImageData::Reference(existing) => Ok(ImageData::Reference(existing.clone())),
            ImageData::Inline(InlineImage::Handle(handle)) => {
                // A handle points at the key its bytes were written under,
                // which is the deterministic key unless the record was renamed.
                if self.is_issued(handle) || self.contains(handle).await? {
                    Ok(ImageData::Reference(handle.clone()))
                } else {
                    Err(PixaError::Store(format!(
                        "handle {} has no stored payload",
                        handle
                    )))
                }
            }
            ImageData::Inline(raw) => {
                let bytes = self.decode_inline(raw).await?;
                self.put(&key, bytes).await?;
                Ok(ImageData::Reference(key))
            }
        }
    }

    async fn hydrate_field(&self, record_id: &str, field: &ImageData, key: BlobKey) -> ImageData {
        match field {
            ImageData::Empty => ImageData::Empty,
            ImageData::Reference(stored) | ImageData::Inline(InlineImage::Handle(stored)) => {
                if self.is_issued(stored) {
                    return ImageData::Inline(InlineImage::Handle(stored.clone()));
                }
                match self.contains(stored).await {
                    Ok(true) => self.issue(stored.clone()),
                    Ok(false) => {
                        tracing::warn!(record_id, key = %stored, "Referenced blob is missing");
                        ImageData::Empty
                    }
                    Err(e) => {
                        tracing::warn!(record_id, key = %stored, error = %e, "Blob lookup failed");
                        ImageData::Empty
                    }
                }
            }
            ImageData::Inline(_) => match self.normalize(field, key).await {
                Ok(handle) => {
                    tracing::debug!(record_id, "Migrated inline image to blob store");
                    handle
                }
                Err(e) => {
                    tracing::warn!(record_id, error = %e, "Could not migrate inline image, keeping raw value");
                    field.clone()
                }
            },
        }
    }

    async fn decode_inline(&self, raw: &InlineImage) -> Result<Vec<u8>> {
        match raw {
            InlineImage::Bytes { bytes, .. } => Ok(bytes.clone()),
            InlineImage::DataUrl(url) => decode_data_url(url).map(|(_, bytes)| bytes),
            InlineImage::Url(url) => self.fetcher.fetch(url).await,
            InlineImage::Handle(key) => self
                .get(key)
                .await?
                .ok_or_else(|| PixaError::Store(format!("handle {} has no stored payload", key))),
        }
    }

    async fn put(&self, key: &BlobKey, bytes: Vec<u8>) -> Result<()> {
        let key = key.clone();
        store::run_blocking(&self.blobs, move |blobs| blobs.put(&key, &bytes)).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        let key = key.clone();
        store::run_blocking(&self.blobs, move |blobs| blobs.get(&key)).await
    }

    async fn contains(&self, key: &BlobKey) -> Result<bool> {
        let key = key.clone();
        store::run_blocking(&self.blobs, move |blobs| blobs.contains(&key)).await
    }
}

/// Splits a `data:` URL into its media type and decoded payload.
///
/// Base64 payloads are decoded; anything else is taken as raw bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| PixaError::Decode("not a data URL".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| PixaError::Decode("data URL without payload".to_string()))?;

    match meta.strip_suffix(";base64") {
        Some(mime) => {
            let bytes = STANDARD
                .decode(payload.trim())
                .map_err(|e| PixaError::Decode(e.to_string()))?;
            Ok((mime.to_string(), bytes))
        }
        None => Ok((meta.to_string(), payload.as_bytes().to_vec())),
    }
}
