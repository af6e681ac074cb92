use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::backoff::{Backoff, BackoffConfig};
use super::debounce::Debouncer;
use super::remote::{Identity, RemoteStore, UserId};
use super::snapshot::SyncSnapshot;
use crate::config::PixaConfig;
use crate::error::{PixaError, Result};
use crate::model::{BlobKey, FavoriteSet, GenerationRecord, ImageData, InlineImage};
use crate::resolver::Resolver;

/// Timing and policy knobs, usually taken from [`PixaConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub image_sync: bool,
    pub records_debounce: Duration,
    pub favorites_debounce: Duration,
    pub backoff: BackoffConfig,
}

impl SyncSettings {
    pub fn from_config(config: &PixaConfig) -> Self {
        Self {
            image_sync: config.image_sync,
            records_debounce: config.records_debounce(),
            favorites_debounce: config.favorites_debounce(),
            backoff: BackoffConfig {
                initial_delay: config.backoff_initial(),
                max_delay: config.backoff_max(),
                multiplier: 2.0,
                max_retries: config.backoff_max_retries,
            },
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&PixaConfig::default())
    }
}

/// The two independently debounced sync streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    Records,
    Favorites,
}

/// Result of a sign-in merge, for the caller to fold into local state.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Local-only records pushed to the remote.
    pub uploaded: usize,
    /// Remote-only records, as the remote holds them.
    pub pulled: Vec<GenerationRecord>,
    /// Union of local and remote favorites.
    pub favorites: FavoriteSet,
}

#[derive(Default)]
struct SyncState {
    identity: Option<Identity>,
    merging: bool,
    merged: bool,
    image_sync: bool,
    snapshot: SyncSnapshot,
    /// Remote URL of every blob uploaded for the current identity.
    uploaded: HashMap<BlobKey, String>,
    records_backoff: Backoff,
    favorites_backoff: Backoff,
    /// Bumped on every sign-out and account switch. Work that started under
    /// an older epoch must not touch the state when it completes.
    epoch: u64,
}

impl SyncState {
    fn clear_progress(&mut self) {
        self.merging = false;
        self.merged = false;
        self.snapshot = SyncSnapshot::new();
        self.records_backoff.reset();
        self.favorites_backoff.reset();
    }

    fn backoff(&self, target: SyncTarget) -> &Backoff {
        match target {
            SyncTarget::Records => &self.records_backoff,
            SyncTarget::Favorites => &self.favorites_backoff,
        }
    }
}

/// Mirrors local records and favorites to the remote store.
///
/// Local always wins: the remote only ever contributes records and favorites
/// this device has not seen. See [`crate::sync`] for the full flow.
pub struct SyncReconciler {
    remote: Arc<dyn RemoteStore>,
    resolver: Arc<Resolver>,
    settings: SyncSettings,
    state: Mutex<SyncState>,
    records_timer: Debouncer,
    favorites_timer: Debouncer,
}

impl SyncReconciler {
    pub fn new(remote: Arc<dyn RemoteStore>, resolver: Arc<Resolver>, settings: SyncSettings) -> Self {
        let state = SyncState {
            image_sync: settings.image_sync,
            ..Default::default()
        };
        Self {
            remote,
            resolver,
            settings,
            state: Mutex::new(state),
            records_timer: Debouncer::new(),
            favorites_timer: Debouncer::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state().identity.clone()
    }

    pub fn is_merged(&self) -> bool {
        self.state().merged
    }

    /// Signed in, but the sign-in merge has not completed yet (it failed, or
    /// it is still running). Pushes are no-ops until it does.
    pub fn needs_merge(&self) -> bool {
        let state = self.state();
        state.identity.is_some() && !state.merged
    }

    pub fn image_sync(&self) -> bool {
        self.state().image_sync
    }

    /// Takes effect for uploads prepared from now on.
    pub fn set_image_sync(&self, enabled: bool) {
        self.state().image_sync = enabled;
    }

    /// Records the session. Returns true on a transition (no session, or a
    /// different user, to this user), which is when a merge is due.
    pub fn sign_in(&self, identity: Identity) -> bool {
        let mut state = self.state();
        if state.identity.as_ref() == Some(&identity) {
            return false;
        }
        if state.identity.is_some() {
            // Account switch: nothing known about the old account carries over.
            state.epoch += 1;
            state.uploaded.clear();
            state.clear_progress();
            drop(state);
            self.cancel_timers();
            state = self.state();
        }
        tracing::info!(user = %identity.user_id, "Signed in");
        state.identity = Some(identity);
        true
    }

    /// Forgets all sync progress so the next sign-in reconciles from scratch.
    pub fn sign_out(&self) {
        {
            let mut state = self.state();
            state.epoch += 1;
            state.identity = None;
            state.uploaded.clear();
            state.clear_progress();
        }
        self.cancel_timers();
        tracing::info!("Signed out, sync progress reset");
    }

    /// Keeps the session but drops the snapshot, so the next merge is a full
    /// reconciliation again.
    pub fn reset_progress(&self) {
        self.state().clear_progress();
        self.cancel_timers();
    }

    /// One-shot sign-in reconciliation.
    ///
    /// Returns `Ok(None)` when a merge is already running or has already
    /// completed for this session, or when the session ended while the merge
    /// was in flight.
    pub async fn merge(
        &self,
        local: &[GenerationRecord],
        favorites: &FavoriteSet,
    ) -> Result<Option<MergeOutcome>> {
        let (user, epoch) = {
            let mut state = self.state();
            let user = state
                .identity
                .as_ref()
                .map(|identity| identity.user_id.clone())
                .ok_or(PixaError::NotSignedIn)?;
            if state.merging || state.merged {
                return Ok(None);
            }
            state.merging = true;
            (user, state.epoch)
        };

        let result = self.run_merge(&user, local, favorites).await;

        let mut state = self.state();
        if state.epoch != epoch {
            tracing::info!(user = %user, "Session changed during merge, discarding result");
            return Ok(None);
        }
        state.merging = false;
        match result {
            Ok((outcome, remote_state)) => {
                state.merged = true;
                state.records_backoff.reset();
                state.favorites_backoff.reset();
                state.snapshot = SyncSnapshot::new();
                state.snapshot.mark_records(remote_state.iter());
                state.snapshot.mark_favorites(outcome.favorites.clone());
                tracing::info!(
                    user = %user,
                    uploaded = outcome.uploaded,
                    pulled = outcome.pulled.len(),
                    "Sign-in merge complete"
                );
                Ok(Some(outcome))
            }
            Err(e) => {
                // Both streams wait on the merge, so both back off.
                state.records_backoff.record_failure();
                state.favorites_backoff.record_failure();
                tracing::warn!(
                    user = %user,
                    failures = state.records_backoff.failures(),
                    error = %e,
                    "Sign-in merge failed"
                );
                Err(e)
            }
        }
    }

    /// Returns the outcome plus the records the remote now holds, which
    /// becomes the snapshot.
    async fn run_merge(
        &self,
        user: &UserId,
        local: &[GenerationRecord],
        favorites: &FavoriteSet,
    ) -> Result<(MergeOutcome, Vec<GenerationRecord>)> {
        let remote_records = self.remote.list_records(user).await?;
        let remote_favorites = self.remote.list_favorites(user).await?;

        let remote_ids: HashSet<&str> = remote_records.iter().map(|r| r.id.as_str()).collect();
        let local_ids: HashSet<&str> = local.iter().map(|r| r.id.as_str()).collect();

        let mut uploads = Vec::new();
        for record in local.iter().filter(|r| !remote_ids.contains(r.id.as_str())) {
            uploads.push(self.prepare_upload(user, record).await?);
        }
        if !uploads.is_empty() {
            self.remote.upsert_records(user, &uploads).await?;
        }

        let union: FavoriteSet = favorites.union(&remote_favorites).cloned().collect();
        if union != remote_favorites {
            self.remote.upsert_favorites(user, &union).await?;
        }

        let pulled: Vec<GenerationRecord> = remote_records
            .iter()
            .filter(|r| !local_ids.contains(r.id.as_str()))
            .cloned()
            .collect();

        // Shared ids are snapshotted as the remote has them, so a local copy
        // with more filled slots is pushed by the next delta.
        let local_only: Vec<GenerationRecord> = local
            .iter()
            .filter(|r| !remote_ids.contains(r.id.as_str()))
            .cloned()
            .collect();
        drop(remote_ids);
        let mut remote_state = remote_records;
        remote_state.extend(local_only);

        let outcome = MergeOutcome {
            uploaded: uploads.len(),
            pulled,
            favorites: union,
        };
        Ok((outcome, remote_state))
    }

    /// Pushes every record that differs from the snapshot. Returns how many
    /// were pushed. Does nothing until the sign-in merge has completed.
    pub async fn push_records(&self, local: &[GenerationRecord]) -> Result<usize> {
        let (user, epoch, delta) = {
            let state = self.state();
            let user = state
                .identity
                .as_ref()
                .map(|identity| identity.user_id.clone())
                .ok_or(PixaError::NotSignedIn)?;
            if !state.merged {
                return Ok(0);
            }
            let delta: Vec<GenerationRecord> =
                state.snapshot.record_delta(local).into_iter().cloned().collect();
            (user, state.epoch, delta)
        };
        if delta.is_empty() {
            return Ok(0);
        }

        let result = async {
            let mut uploads = Vec::with_capacity(delta.len());
            for record in &delta {
                uploads.push(self.prepare_upload(&user, record).await?);
            }
            self.remote.upsert_records(&user, &uploads).await?;
            Ok::<_, PixaError>(())
        }
        .await;

        let mut state = self.state();
        if state.epoch != epoch {
            return Ok(0);
        }
        match result {
            Ok(()) => {
                state.snapshot.mark_records(&delta);
                state.records_backoff.reset();
                tracing::info!(user = %user, pushed = delta.len(), "Pushed records");
                Ok(delta.len())
            }
            Err(e) => {
                state.records_backoff.record_failure();
                tracing::warn!(
                    user = %user,
                    failures = state.records_backoff.failures(),
                    error = %e,
                    "Record push failed"
                );
                Err(e)
            }
        }
    }

    /// Pushes the favorite set if it differs from the snapshot. Returns
    /// whether a push happened.
    pub async fn push_favorites(&self, favorites: &FavoriteSet) -> Result<bool> {
        let (user, epoch) = {
            let state = self.state();
            let user = state
                .identity
                .as_ref()
                .map(|identity| identity.user_id.clone())
                .ok_or(PixaError::NotSignedIn)?;
            if !state.merged || !state.snapshot.favorites_changed(favorites) {
                return Ok(false);
            }
            (user, state.epoch)
        };

        let result = self.remote.upsert_favorites(&user, favorites).await;

        let mut state = self.state();
        if state.epoch != epoch {
            return Ok(false);
        }
        match result {
            Ok(()) => {
                state.snapshot.mark_favorites(favorites.clone());
                state.favorites_backoff.reset();
                tracing::info!(user = %user, count = favorites.len(), "Pushed favorites");
                Ok(true)
            }
            Err(e) => {
                state.favorites_backoff.record_failure();
                tracing::warn!(
                    user = %user,
                    failures = state.favorites_backoff.failures(),
                    error = %e,
                    "Favorite push failed"
                );
                Err(e.into())
            }
        }
    }

    /// Removes a record from the remote, along with the uploaded copies of
    /// `orphaned`, the blob keys no other local record still holds.
    /// A no-op when signed out.
    pub async fn delete_remote(&self, id: &str, orphaned: &BTreeSet<BlobKey>) -> Result<()> {
        let (user, blob_urls) = {
            let mut state = self.state();
            let Some(user) = state.identity.as_ref().map(|i| i.user_id.clone()) else {
                return Ok(());
            };
            state.snapshot.forget_record(id);
            let urls: Vec<String> = orphaned
                .iter()
                .filter_map(|key| state.uploaded.remove(key))
                .collect();
            (user, urls)
        };

        self.remote.delete_record(&user, id).await?;
        for url in blob_urls {
            if let Err(e) = self.remote.delete_blob(&user, &url).await {
                tracing::warn!(record_id = id, url = %url, error = %e, "Failed to delete remote blob");
            }
        }
        tracing::info!(user = %user, record_id = id, "Deleted remote record");
        Ok(())
    }

    /// Schedules `work` after the target's debounce window, stretched by any
    /// active backoff. Replaces a run that is still waiting.
    pub fn schedule<F>(&self, target: SyncTarget, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = {
            let state = self.state();
            if state.identity.is_none() {
                return false;
            }
            state
                .backoff(target)
                .schedule_delay(self.window(target), &self.settings.backoff)
        };
        self.timer(target).schedule(delay, work)
    }

    /// Schedules an automatic retry after a failed push. Returns false once
    /// the retry budget is spent; the next local change schedules again.
    pub fn schedule_retry<F>(&self, target: SyncTarget, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = {
            let state = self.state();
            if state.identity.is_none() {
                return false;
            }
            let backoff = state.backoff(target);
            match backoff.retry_delay(&self.settings.backoff) {
                Some(delay) => delay.max(self.window(target)),
                None => {
                    tracing::warn!(
                        stream = ?target,
                        failures = backoff.failures(),
                        "Giving up automatic sync retries until the next change"
                    );
                    return false;
                }
            }
        };
        tracing::debug!(stream = ?target, delay_ms = delay.as_millis() as u64, "Scheduling sync retry");
        self.timer(target).schedule(delay, work)
    }

    fn window(&self, target: SyncTarget) -> Duration {
        match target {
            SyncTarget::Records => self.settings.records_debounce,
            SyncTarget::Favorites => self.settings.favorites_debounce,
        }
    }

    fn timer(&self, target: SyncTarget) -> &Debouncer {
        match target {
            SyncTarget::Records => &self.records_timer,
            SyncTarget::Favorites => &self.favorites_timer,
        }
    }

    fn cancel_timers(&self) {
        self.records_timer.cancel();
        self.favorites_timer.cancel();
    }

    /// The copy of `record` that goes to the remote.
    ///
    /// With image sync on, every locally held image is uploaded once and the
    /// field carries the remote URL. With image sync off only fields that are
    /// already portable (URLs, data URLs) are kept.
    pub async fn prepare_upload(&self, user: &UserId, record: &GenerationRecord) -> Result<GenerationRecord> {
        let image_sync = self.image_sync();
        let mut upload = record.clone();

        for (index, slot) in upload.images.iter_mut().enumerate() {
            let key = BlobKey::output(&record.id, index);
            let next = self.prepare_field(user, slot, key, image_sync).await?;
            *slot = next;
        }
        for input in upload.input_images.iter_mut() {
            let key = BlobKey::input(&record.id, &input.id);
            let next = self.prepare_field(user, &input.data, key, image_sync).await?;
            input.data = next;
        }
        Ok(upload)
    }

    async fn prepare_field(
        &self,
        user: &UserId,
        field: &ImageData,
        key: BlobKey,
        image_sync: bool,
    ) -> Result<ImageData> {
        match field {
            ImageData::Empty => Ok(ImageData::Empty),
            ImageData::Inline(InlineImage::Url(_)) => Ok(field.clone()),
            ImageData::Inline(InlineImage::DataUrl(_)) if !image_sync => Ok(field.clone()),
            _ if !image_sync => Ok(ImageData::Empty),
            _ => {
                let key = field.blob_key().cloned().unwrap_or(key);
                let cached = self.state().uploaded.get(&key).cloned();
                if let Some(url) = cached {
                    return Ok(ImageData::url(url));
                }
                let Some(bytes) = self.resolver.materialize(field).await? else {
                    tracing::warn!(key = %key, "Blob missing, uploading record without it");
                    return Ok(ImageData::Empty);
                };
                let url = self.remote.upload_blob(user, &key, &bytes).await?;
                self.state().uploaded.insert(key, url.clone());
                Ok(ImageData::url(url))
            }
        }
    }

    /// Blob keys uploaded so far, for inspection.
    pub fn uploaded_keys(&self) -> BTreeSet<BlobKey> {
        self.state().uploaded.keys().cloned().collect()
    }
}
