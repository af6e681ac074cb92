//! # API Facade
//!
//! [`PixaApi`] is the single entry point for a UI. It owns the in-memory
//! gallery and wires the engine components together:
//!
//! ```text
//! PixaApi ─┬─ LocalStore ── DocumentStore   (records.json, pending.json, favorites.json)
//!          ├─ Resolver ──── BlobStore        (image payloads)
//!          ├─ GenerationService              (provider call, opaque)
//!          └─ SyncReconciler ── RemoteStore  (backup and merge target)
//! ```
//!
//! ## Startup
//!
//! [`PixaApi::open`] runs, in order:
//!
//! 1. Load the three documents. A corrupt document fails startup rather than
//!    silently starting with an empty gallery.
//! 2. Pending recovery. Promoted records are prepended to the completed list
//!    and persisted; the pending document is cleared.
//! 3. Garbage collection over the surviving records. This also removes the
//!    blobs of pending records that recovery discarded.
//! 4. Hydrate every record for display.
//!
//! No generation can be submitted before `open` returns, so collection never
//! races a dehydration write of this session.
//!
//! ## State and Persistence
//!
//! The gallery lives in a `std::sync::Mutex` that is never held across an
//! `.await`. Mutators change the in-memory arrays, then persist the whole
//! array (replace-on-write). Persists of all three documents are serialized
//! by an async lock and snapshot the state only after acquiring it, so an
//! older snapshot can never overwrite a newer one. The writes themselves run
//! on the blocking pool.
//!
//! Storage failures are logged and skipped. The in-memory state stays
//! authoritative for the session. Only provider failures reach the caller of
//! a generation, as [`PixaError::Generation`] and as an inline message
//! available through [`PixaApi::error_for`].
//!
//! ## Sync
//!
//! Every local mutation schedules a debounced push. Pushes hold only a weak
//! reference to the gallery, so dropping the last [`PixaApi`] handle stops
//! them. A push that finds the sign-in merge still outstanding runs the merge
//! instead; a failed merge schedules its own retry with backoff.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;

use crate::config::PixaConfig;
use crate::error::{PixaError, Result};
use crate::fetch::ImageFetcher;
use crate::gc::{self, GcReport};
use crate::generation::{GenerationRequest, GenerationService, InputPayload};
use crate::model::{
    BlobKey, FavoriteKey, FavoriteSet, GenerationOptions, GenerationRecord, ImageData,
    InlineImage, InputImage,
};
use crate::recovery;
use crate::resolver::Resolver;
use crate::store::local::LocalStore;
use crate::store::{self, Backend};
use crate::sync::{Identity, RemoteStore, SyncReconciler, SyncSettings, SyncTarget};

/// An input image handed in by the UI for edit-style generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInputImage {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A started generation. The record is pending until `task` finishes.
#[derive(Debug)]
pub struct Submission {
    pub id: String,
    pub task: JoinHandle<Result<()>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Completed records found on disk.
    pub loaded: usize,
    /// Pending records promoted to interrupted records.
    pub recovered: usize,
    /// Pending records dropped because no credentials were configured.
    pub discarded: usize,
    pub gc: GcReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Local-only records pushed to the remote.
    pub uploaded: usize,
    /// Remote-only records added to the local gallery.
    pub pulled: usize,
    /// Size of the merged favorite set.
    pub favorites: usize,
}

#[derive(Default)]
struct Gallery {
    /// Completed records, newest first, in displayable form.
    records: Vec<GenerationRecord>,
    /// In-flight generations of this session.
    pending: Vec<GenerationRecord>,
    favorites: FavoriteSet,
    /// Inline provider error per record id.
    errors: HashMap<String, String>,
    /// Pending ids with a provider call in flight.
    running: HashSet<String>,
    api_key: Option<String>,
}

struct Inner {
    backend: Arc<dyn Backend>,
    resolver: Arc<Resolver>,
    generator: Arc<dyn GenerationService>,
    sync: SyncReconciler,
    gallery: Mutex<Gallery>,
    persist_lock: tokio::sync::Mutex<()>,
    startup: StartupReport,
}

/// Handle to an open gallery. Cheap to clone.
#[derive(Clone)]
pub struct PixaApi {
    inner: Arc<Inner>,
}

impl PixaApi {
    pub async fn open(
        config: PixaConfig,
        backend: Arc<dyn Backend>,
        generator: Arc<dyn GenerationService>,
        fetcher: Arc<dyn ImageFetcher>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        let resolver = Arc::new(Resolver::new(backend.clone(), fetcher));

        let (mut records, pending, favorites) = store::run_blocking(&backend, |backend| {
            let docs = LocalStore::new(backend);
            Ok((docs.load_records()?, docs.load_pending()?, docs.load_favorites()?))
        })
        .await?;
        let loaded = records.len();

        let had_pending = !pending.is_empty();
        let recovery = recovery::recover(pending, &records, config.has_credentials());
        let recovered = recovery.promoted.len();
        if had_pending {
            let mut promoted = recovery.promoted;
            promoted.append(&mut records);
            records = promoted;
            // The pending document is cleared only once the records that
            // replace it are safely on disk.
            let durable = records.clone();
            let saved = store::run_blocking(&backend, move |backend| {
                let docs = LocalStore::new(backend);
                docs.save_records(&durable)?;
                Ok(docs.save_pending(&[]))
            })
            .await;
            match saved {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to clear pending records"),
                Err(e) => tracing::warn!(error = %e, "Failed to persist recovered records"),
            }
        }

        let (collected, records) = store::run_blocking(&backend, move |backend| {
            let report = gc::collect(&*backend, || gc::live_keys(&records));
            Ok((report, records))
        })
        .await?;
        let gc = collected.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Garbage collection skipped");
            GcReport::default()
        });

        let mut display = Vec::with_capacity(records.len());
        for record in &records {
            display.push(resolver.hydrate(record).await);
        }

        let startup = StartupReport {
            loaded,
            recovered,
            discarded: recovery.discarded,
            gc,
        };
        tracing::info!(
            loaded = startup.loaded,
            recovered = startup.recovered,
            discarded = startup.discarded,
            removed_blobs = startup.gc.removed,
            "Gallery opened"
        );

        let api_key = config.api_key.clone().filter(|key| !key.trim().is_empty());
        let sync = SyncReconciler::new(remote, resolver.clone(), SyncSettings::from_config(&config));
        let inner = Inner {
            backend,
            resolver,
            generator,
            sync,
            gallery: Mutex::new(Gallery {
                records: display,
                pending: Vec::new(),
                favorites,
                errors: HashMap::new(),
                running: HashSet::new(),
                api_key,
            }),
            persist_lock: tokio::sync::Mutex::new(()),
            startup,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn startup_report(&self) -> &StartupReport {
        &self.inner.startup
    }

    pub fn records(&self) -> Vec<GenerationRecord> {
        self.inner.gallery().records.clone()
    }

    pub fn pending(&self) -> Vec<GenerationRecord> {
        self.inner.gallery().pending.clone()
    }

    pub fn record(&self, id: &str) -> Option<GenerationRecord> {
        self.inner
            .gallery()
            .records
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    pub fn favorites(&self) -> FavoriteSet {
        self.inner.gallery().favorites.clone()
    }

    pub fn is_favorite(&self, generation_id: &str, image_index: usize) -> bool {
        self.inner
            .gallery()
            .favorites
            .contains(&FavoriteKey::new(generation_id, image_index))
    }

    /// The provider error of the last failed attempt for `id`, if any.
    pub fn error_for(&self, id: &str) -> Option<String> {
        self.inner.gallery().errors.get(id).cloned()
    }

    pub fn has_credentials(&self) -> bool {
        self.inner.gallery().api_key.is_some()
    }

    pub fn set_credentials(&self, api_key: Option<String>) {
        self.inner.gallery().api_key = api_key.filter(|key| !key.trim().is_empty());
    }

    /// Bytes behind any image field, for display or export.
    pub async fn image_bytes(&self, field: &ImageData) -> Result<Option<Vec<u8>>> {
        self.inner.resolver.materialize(field).await
    }

    /// Starts a generation. The pending record is durable before this
    /// returns; the provider call runs in the background.
    pub async fn submit(
        &self,
        prompt: impl Into<String>,
        options: GenerationOptions,
        inputs: Vec<NewInputImage>,
    ) -> Result<Submission> {
        if !self.has_credentials() {
            return Err(PixaError::MissingCredentials);
        }

        let inputs = inputs
            .into_iter()
            .map(|input| {
                InputImage::new(
                    input.name,
                    ImageData::bytes(input.mime, input.bytes),
                    input.width,
                    input.height,
                )
            })
            .collect();
        let record = GenerationRecord::new_pending(prompt, &options, inputs);
        let record = self.inner.settle(record).await;
        let id = record.id.clone();

        self.inner.gallery().pending.insert(0, record);
        self.inner.persist_pending().await;
        tracing::info!(record_id = %id, images = options.image_count, "Generation submitted");

        let api = self.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move { api.run_generation(&task_id).await });
        Ok(Submission { id, task })
    }

    /// Resolves a pending record: on success it moves to the front of the
    /// completed list, on failure it is dropped and the error is kept for
    /// display. At most one call per pending id runs at a time.
    pub(crate) async fn run_generation(&self, id: &str) -> Result<()> {
        let (record, api_key) = {
            let mut gallery = self.inner.gallery();
            let record = gallery
                .pending
                .iter()
                .find(|record| record.id == id)
                .cloned()
                .ok_or_else(|| PixaError::RecordNotFound(id.to_string()))?;
            let api_key = gallery.api_key.clone().ok_or(PixaError::MissingCredentials)?;
            if !gallery.running.insert(id.to_string()) {
                return Err(PixaError::AlreadyRunning(id.to_string()));
            }
            (record, api_key)
        };

        let outcome = self.inner.generate(&record, api_key, record.images.len()).await;

        match outcome {
            Ok(output) => {
                let mut completed = record;
                completed.fill_empty_slots(output.images);
                if let Some(size) = output.size {
                    completed.size = size;
                }
                completed.text_parts = output.text_parts;
                let filled = completed.filled_slots();
                let completed = self.inner.settle(completed).await;

                {
                    let mut gallery = self.inner.gallery();
                    gallery.running.remove(id);
                    gallery.pending.retain(|record| record.id != id);
                    gallery.errors.remove(id);
                    gallery.records.insert(0, completed);
                }
                self.inner.persist_records().await;
                self.inner.persist_pending().await;
                tracing::info!(record_id = id, filled, "Generation completed");
                schedule_push(&self.inner, SyncTarget::Records);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(record_id = id, error = %e, "Generation failed");
                {
                    let mut gallery = self.inner.gallery();
                    gallery.running.remove(id);
                    gallery.pending.retain(|record| record.id != id);
                    gallery.errors.insert(id.to_string(), e.to_string());
                }
                self.inner.persist_pending().await;
                Err(e)
            }
        }
    }

    /// Asks the provider for the empty slots of an interrupted record and
    /// fills them. Returns how many slots were filled.
    pub async fn retry_interrupted(&self, id: &str) -> Result<usize> {
        let (record, api_key) = {
            let gallery = self.inner.gallery();
            let record = gallery
                .records
                .iter()
                .find(|record| record.id == id)
                .cloned()
                .ok_or_else(|| PixaError::RecordNotFound(id.to_string()))?;
            if !record.is_interrupted() {
                return Err(PixaError::NotInterrupted(id.to_string()));
            }
            let api_key = gallery.api_key.clone().ok_or(PixaError::MissingCredentials)?;
            (record, api_key)
        };

        let output = match self.inner.generate(&record, api_key, record.empty_slots()).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(record_id = id, error = %e, "Retry failed");
                self.inner.gallery().errors.insert(id.to_string(), e.to_string());
                return Err(e);
            }
        };

        // The record may have changed while the provider was working.
        let mut updated = self
            .record(id)
            .ok_or_else(|| PixaError::RecordNotFound(id.to_string()))?;
        let filled = updated.fill_empty_slots(output.images);
        if !output.text_parts.is_empty() {
            updated.text_parts.extend(output.text_parts);
        }
        let updated = self.inner.settle(updated).await;

        {
            let mut gallery = self.inner.gallery();
            gallery.errors.remove(id);
            if let Some(slot) = gallery.records.iter_mut().find(|record| record.id == id) {
                *slot = updated;
            }
        }
        self.inner.persist_records().await;
        tracing::info!(record_id = id, filled, "Interrupted record retried");
        schedule_push(&self.inner, SyncTarget::Records);
        Ok(filled)
    }

    /// Flips the favorite mark and returns the new state.
    pub async fn toggle_favorite(&self, generation_id: &str, image_index: usize) -> bool {
        let key = FavoriteKey::new(generation_id, image_index);
        let now_favorite = {
            let mut gallery = self.inner.gallery();
            if gallery.favorites.remove(&key) {
                false
            } else {
                gallery.favorites.insert(key);
                true
            }
        };
        self.inner.persist_favorites().await;
        schedule_push(&self.inner, SyncTarget::Favorites);
        now_favorite
    }

    /// Deletes a completed record, its favorites and its blobs locally, then
    /// removes it from the remote right away.
    ///
    /// Blobs still held by another record are kept. A record recovered under
    /// a fresh id shares the blobs of the record it was copied from.
    pub async fn delete_record(&self, id: &str) -> Result<()> {
        let orphaned: BTreeSet<BlobKey> = {
            let mut gallery = self.inner.gallery();
            let index = gallery
                .records
                .iter()
                .position(|record| record.id == id)
                .ok_or_else(|| PixaError::RecordNotFound(id.to_string()))?;
            let removed = gallery.records.remove(index);
            gallery.favorites.retain(|key| key.generation_id != id);
            gallery.errors.remove(id);
            let live = gc::live_keys(gallery.records.iter().chain(gallery.pending.iter()));
            removed
                .owned_keys()
                .into_iter()
                .filter(|key| !live.contains(key))
                .collect()
        };

        // Documents first, so no persisted record ever points at a deleted blob.
        self.inner.persist_favorites().await;
        self.inner.persist_records().await;
        let doomed = orphaned.clone();
        let record_id = id.to_string();
        let deleted = store::run_blocking(&self.inner.backend, move |backend| {
            for key in &doomed {
                if let Err(e) = backend.delete(key) {
                    tracing::warn!(record_id = %record_id, key = %key, error = %e, "Failed to delete blob");
                }
            }
            Ok(())
        })
        .await;
        if let Err(e) = deleted {
            tracing::warn!(record_id = id, error = %e, "Failed to delete blobs");
        }
        self.inner.resolver.release(&orphaned);

        if let Err(e) = self.inner.sync.delete_remote(id, &orphaned).await {
            tracing::warn!(record_id = id, error = %e, "Remote delete failed");
        }
        schedule_push(&self.inner, SyncTarget::Favorites);
        tracing::info!(record_id = id, "Record deleted");
        Ok(())
    }

    /// Whether future uploads carry image bytes or only metadata.
    pub fn set_image_sync_enabled(&self, enabled: bool) {
        self.inner.sync.set_image_sync(enabled);
        tracing::info!(enabled, "Image sync setting changed");
    }

    pub fn image_sync_enabled(&self) -> bool {
        self.inner.sync.image_sync()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.sync.identity()
    }

    /// Starts a session. On a sign-in transition the full merge runs and its
    /// report is returned. Signing in again as the same user returns
    /// `Ok(None)` once that merge has completed, and runs it again if it
    /// failed.
    pub async fn sign_in(&self, identity: Identity) -> Result<Option<MergeReport>> {
        let transition = self.inner.sync.sign_in(identity);
        if !transition && self.inner.sync.is_merged() {
            return Ok(None);
        }
        self.inner.merge().await
    }

    pub fn sign_out(&self) {
        self.inner.sync.sign_out();
    }

    /// Forgets sync progress and runs a full merge again.
    pub async fn resync(&self) -> Result<Option<MergeReport>> {
        if self.inner.sync.identity().is_none() {
            return Err(PixaError::NotSignedIn);
        }
        self.inner.sync.reset_progress();
        self.inner.merge().await
    }

    /// Pushes pending changes now instead of waiting for the debounce
    /// window. Runs the sign-in merge first if it has not completed yet.
    pub async fn sync_now(&self) -> Result<()> {
        if !self.inner.sync.is_merged() {
            self.inner.merge().await?;
        }
        let records = self.records();
        self.inner.sync.push_records(&records).await?;
        let favorites = self.favorites();
        self.inner.sync.push_favorites(&favorites).await?;
        Ok(())
    }
}

impl Inner {
    fn gallery(&self) -> MutexGuard<'_, Gallery> {
        self.gallery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn merge(self: &Arc<Self>) -> Result<Option<MergeReport>> {
        let (local, favorites) = {
            let gallery = self.gallery();
            (gallery.records.clone(), gallery.favorites.clone())
        };

        let outcome = match self.sync.merge(&local, &favorites).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return Ok(None),
            Err(e) => {
                // The retried push runs the merge again before pushing.
                self.sync.schedule_retry(
                    SyncTarget::Records,
                    push_task(Arc::downgrade(self), SyncTarget::Records),
                );
                return Err(e);
            }
        };

        let mut pulled = Vec::with_capacity(outcome.pulled.len());
        for record in &outcome.pulled {
            pulled.push(self.resolver.hydrate(record).await);
        }

        let added = {
            let mut gallery = self.gallery();
            let known: HashSet<String> = gallery.records.iter().map(|r| r.id.clone()).collect();
            let mut added = 0;
            for record in pulled {
                // Local wins, including records added while the merge ran.
                if !known.contains(&record.id) {
                    gallery.records.push(record);
                    added += 1;
                }
            }
            gallery
                .records
                .sort_by(|a, b| b.created_at.cmp(&a.created_at));
            gallery.favorites.extend(outcome.favorites.iter().cloned());
            added
        };
        self.persist_favorites().await;
        if added > 0 {
            self.persist_records().await;
        }

        // Catch up on anything that changed locally while the merge ran.
        schedule_push(self, SyncTarget::Records);
        schedule_push(self, SyncTarget::Favorites);

        Ok(Some(MergeReport {
            uploaded: outcome.uploaded,
            pulled: added,
            favorites: outcome.favorites.len(),
        }))
    }

    /// Makes a record durable and returns its displayable form. If the
    /// record cannot be dehydrated it is kept as is and persisted raw.
    async fn settle(&self, record: GenerationRecord) -> GenerationRecord {
        match self.resolver.dehydrate(&record).await {
            Ok(durable) => self.resolver.hydrate(&durable).await,
            Err(e) => {
                tracing::warn!(record_id = %record.id, error = %e, "Could not store images, keeping raw data");
                record
            }
        }
    }

    async fn durable_copies(&self, records: &[GenerationRecord]) -> Vec<GenerationRecord> {
        let mut durable = Vec::with_capacity(records.len());
        for record in records {
            match self.resolver.dehydrate(record).await {
                Ok(copy) => durable.push(copy),
                Err(e) => {
                    tracing::warn!(record_id = %record.id, error = %e, "Persisting record with raw image data");
                    durable.push(record.clone());
                }
            }
        }
        durable
    }

    async fn persist_records(&self) {
        let _guard = self.persist_lock.lock().await;
        let records = self.gallery().records.clone();
        let durable = self.durable_copies(&records).await;
        let saved = store::run_blocking(&self.backend, move |backend| {
            LocalStore::new(backend).save_records(&durable)
        })
        .await;
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Failed to persist records");
        }
    }

    async fn persist_pending(&self) {
        let _guard = self.persist_lock.lock().await;
        let pending = self.gallery().pending.clone();
        let durable = self.durable_copies(&pending).await;
        let saved = store::run_blocking(&self.backend, move |backend| {
            LocalStore::new(backend).save_pending(&durable)
        })
        .await;
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Failed to persist pending records");
        }
    }

    async fn persist_favorites(&self) {
        let _guard = self.persist_lock.lock().await;
        let favorites = self.gallery().favorites.clone();
        let saved = store::run_blocking(&self.backend, move |backend| {
            LocalStore::new(backend).save_favorites(&favorites)
        })
        .await;
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Failed to persist favorites");
        }
    }

    /// Calls the provider for `count` images using the record's prompt,
    /// options and input images.
    async fn generate(
        &self,
        record: &GenerationRecord,
        api_key: String,
        count: usize,
    ) -> Result<crate::generation::GenerationOutput> {
        let mut images = Vec::with_capacity(record.input_images.len());
        for input in &record.input_images {
            let bytes = self
                .resolver
                .materialize(&input.data)
                .await?
                .ok_or_else(|| PixaError::Store(format!("input image {} is missing", input.id)))?;
            let mime = match &input.data {
                ImageData::Inline(InlineImage::Bytes { mime, .. }) => mime.clone(),
                _ => sniff_mime(&bytes).to_string(),
            };
            images.push(InputPayload {
                name: input.name.clone(),
                mime,
                bytes,
                width: input.width,
                height: input.height,
            });
        }

        let request = GenerationRequest {
            api_key,
            prompt: record.prompt.clone(),
            images,
            options: record.options(count),
        };
        Ok(self.generator.generate(request).await?)
    }
}

/// Media type from the leading magic bytes of common image formats.
fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        _ => "application/octet-stream",
    }
}

type PushTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

fn schedule_push(inner: &Arc<Inner>, target: SyncTarget) {
    inner
        .sync
        .schedule(target, push_task(Arc::downgrade(inner), target));
}

/// A push of one sync target that schedules its own bounded retry on failure.
fn push_task(inner: Weak<Inner>, target: SyncTarget) -> PushTask {
    Box::pin(async move {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.sync.needs_merge() {
            // A completed merge schedules both pushes, a failed one its own retry.
            if let Err(e) = inner.merge().await {
                tracing::debug!(stream = ?target, error = %e, "Push waits on the sign-in merge");
            }
            return;
        }
        let result = match target {
            SyncTarget::Records => {
                let records = inner.gallery().records.clone();
                inner.sync.push_records(&records).await.map(|_| ())
            }
            SyncTarget::Favorites => {
                let favorites = inner.gallery().favorites.clone();
                inner.sync.push_favorites(&favorites).await.map(|_| ())
            }
        };
        match result {
            Ok(()) | Err(PixaError::NotSignedIn) => {}
            Err(_) => {
                inner
                    .sync
                    .schedule_retry(target, push_task(Arc::downgrade(&inner), target));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationError;
    use crate::model::BlobKey;
    use crate::store::mem_backend::MemBackend;
    use crate::store::{BlobStore, DocKey, DocumentStore};
    use crate::sync::MemRemote;
    use crate::test_utils::{open_test_api, FakeGenerator};

    async fn open(backend: &Arc<MemBackend>) -> (PixaApi, Arc<FakeGenerator>) {
        let generator = Arc::new(FakeGenerator::new());
        let api = open_test_api(backend.clone(), generator.clone(), Arc::new(MemRemote::new())).await;
        (api, generator)
    }

    fn options(count: usize) -> GenerationOptions {
        GenerationOptions {
            image_count: count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn submit_without_credentials_is_rejected() {
        let backend = Arc::new(MemBackend::new());
        let (api, _) = open(&backend).await;
        api.set_credentials(None);

        assert!(matches!(
            api.submit("p", options(1), vec![]).await,
            Err(PixaError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn completed_generation_is_persisted_as_references() {
        let backend = Arc::new(MemBackend::new());
        let (api, _) = open(&backend).await;

        let submission = api.submit("a fox", options(2), vec![]).await.unwrap();
        submission.task.await.unwrap().unwrap();

        assert!(api.pending().is_empty());
        let stored = LocalStore::new(backend.clone()).load_records().unwrap();
        assert_eq!(stored.len(), 1);
        for (index, slot) in stored[0].images.iter().enumerate() {
            let key = BlobKey::output(&submission.id, index);
            assert_eq!(slot, &ImageData::Reference(key.clone()));
            assert!(backend.get(&key).unwrap().is_some());
        }
        let shown = api.record(&submission.id).unwrap();
        assert!(api.image_bytes(&shown.images[0]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn provider_failure_drops_pending_and_keeps_message() {
        let backend = Arc::new(MemBackend::new());
        let (api, generator) = open(&backend).await;
        generator.push_failure(GenerationError::RateLimited("slow down".into()));

        let submission = api.submit("p", options(1), vec![]).await.unwrap();
        let result = submission.task.await.unwrap();

        assert!(matches!(result, Err(PixaError::Generation(GenerationError::RateLimited(_)))));
        assert!(api.pending().is_empty());
        assert!(api.records().is_empty());
        assert!(api.error_for(&submission.id).unwrap().contains("slow down"));
        let pending = backend.read_document(DocKey::Pending).unwrap().unwrap();
        assert_eq!(pending, "[]");
    }

    #[tokio::test]
    async fn input_images_are_stored_and_sent() {
        let backend = Arc::new(MemBackend::new());
        let (api, generator) = open(&backend).await;
        let input = NewInputImage {
            name: "sketch.png".into(),
            mime: "image/png".into(),
            bytes: b"\x89PNGsketch".to_vec(),
            width: 8,
            height: 8,
        };

        let submission = api.submit("ink it", options(1), vec![input]).await.unwrap();
        submission.task.await.unwrap().unwrap();

        let record = api.record(&submission.id).unwrap();
        let key = BlobKey::input(&record.id, &record.input_images[0].id);
        assert_eq!(backend.get(&key).unwrap(), Some(b"\x89PNGsketch".to_vec()));
        let sent = generator.requests();
        assert_eq!(sent[0].images[0].mime, "image/png");
        assert_eq!(sent[0].images[0].bytes, b"\x89PNGsketch".to_vec());
    }

    #[tokio::test]
    async fn partial_output_leaves_record_interrupted_until_retry() {
        let backend = Arc::new(MemBackend::new());
        let (api, generator) = open(&backend).await;
        generator.push_images(1);

        let submission = api.submit("p", options(3), vec![]).await.unwrap();
        submission.task.await.unwrap().unwrap();
        assert_eq!(api.record(&submission.id).unwrap().empty_slots(), 2);

        let filled = api.retry_interrupted(&submission.id).await.unwrap();

        assert_eq!(filled, 2);
        assert!(!api.record(&submission.id).unwrap().is_interrupted());
        assert_eq!(generator.requests()[1].options.image_count, 2);
        assert!(matches!(
            api.retry_interrupted(&submission.id).await,
            Err(PixaError::NotInterrupted(_))
        ));
    }

    #[tokio::test]
    async fn favorites_toggle_and_persist() {
        let backend = Arc::new(MemBackend::new());
        let (api, _) = open(&backend).await;

        assert!(api.toggle_favorite("gen-1", 2).await);
        assert!(api.is_favorite("gen-1", 2));
        assert!(!api.toggle_favorite("gen-1", 2).await);
        assert!(api.toggle_favorite("gen-1", 2).await);

        let stored = LocalStore::new(backend.clone()).load_favorites().unwrap();
        assert!(stored.contains(&FavoriteKey::new("gen-1", 2)));
    }

    #[tokio::test]
    async fn delete_removes_record_blobs_and_favorites() {
        let backend = Arc::new(MemBackend::new());
        let (api, _) = open(&backend).await;
        let submission = api.submit("p", options(1), vec![]).await.unwrap();
        submission.task.await.unwrap().unwrap();
        api.toggle_favorite(&submission.id, 0).await;

        api.delete_record(&submission.id).await.unwrap();

        assert!(api.records().is_empty());
        assert!(api.favorites().is_empty());
        assert!(backend.list_keys().unwrap().is_empty());
        assert!(matches!(
            api.delete_record(&submission.id).await,
            Err(PixaError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_keeps_blobs_shared_with_a_recovered_copy() {
        let backend = Arc::new(MemBackend::new());
        let mut original = GenerationRecord::new_pending(
            "p",
            &options(1),
            vec![InputImage::new("in.png", ImageData::Empty, 4, 4)],
        );
        let input_key = BlobKey::input(&original.id, &original.input_images[0].id);
        original.input_images[0].data = ImageData::Reference(input_key.clone());
        backend.put(&input_key, b"\x89PNGin").unwrap();
        let docs = LocalStore::new(backend.clone());
        docs.save_records(std::slice::from_ref(&original)).unwrap();
        docs.save_pending(std::slice::from_ref(&original)).unwrap();

        let (api, _) = open(&backend).await;
        let copy = api
            .records()
            .into_iter()
            .find(|record| record.id != original.id)
            .unwrap();

        api.delete_record(&original.id).await.unwrap();

        assert_eq!(backend.get(&input_key).unwrap(), Some(b"\x89PNGin".to_vec()));
        assert_eq!(api.retry_interrupted(&copy.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn generation_runs_once_per_pending_record() {
        let backend = Arc::new(MemBackend::new());
        let (api, generator) = open(&backend).await;

        let submission = api.submit("p", options(1), vec![]).await.unwrap();
        let again = api.run_generation(&submission.id).await;
        let first = submission.task.await.unwrap();

        assert!(again.is_ok() != first.is_ok());
        assert_eq!(generator.requests().len(), 1);
        assert_eq!(api.records().len(), 1);
    }

    #[tokio::test]
    async fn signing_in_again_retries_a_failed_merge() {
        let backend = Arc::new(MemBackend::new());
        let remote = Arc::new(MemRemote::new());
        let api = open_test_api(backend, Arc::new(FakeGenerator::new()), remote.clone()).await;
        remote.set_offline(true);
        assert!(api.sign_in(Identity::new("ada")).await.is_err());

        remote.set_offline(false);

        assert!(api.sign_in(Identity::new("ada")).await.unwrap().is_some());
        assert!(api.sign_in(Identity::new("ada")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn storage_failure_keeps_memory_state() {
        let backend = Arc::new(MemBackend::new());
        let (api, _) = open(&backend).await;
        backend.set_simulate_write_error(true);

        let submission = api.submit("p", options(1), vec![]).await.unwrap();
        submission.task.await.unwrap().unwrap();

        let record = api.record(&submission.id).unwrap();
        assert!(!record.images[0].is_empty());
    }

    #[test]
    fn sniff_mime_recognizes_formats() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n"), "image/png");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8"), "image/webp");
        assert_eq!(sniff_mime(b"hello"), "application/octet-stream");
    }
}
