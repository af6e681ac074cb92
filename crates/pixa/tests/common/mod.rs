//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pixa::api::PixaApi;
use pixa::config::PixaConfig;
use pixa::error::{PixaError, Result};
use pixa::fetch::ImageFetcher;
use pixa::generation::{GenerationError, GenerationOutput, GenerationRequest, GenerationService};
use pixa::model::ImageData;
use pixa::store::Backend;
use pixa::sync::MemRemote;

/// Provider stand-in. Answers with as many images as asked for, unless told
/// to return fewer, to fail, or to hang forever.
#[derive(Default)]
pub struct Provider {
    short: Mutex<VecDeque<usize>>,
    fail_next: Mutex<Option<GenerationError>>,
    hang: AtomicBool,
    calls: AtomicUsize,
}

impl Provider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hanging() -> Arc<Self> {
        let provider = Self::default();
        provider.hang.store(true, Ordering::SeqCst);
        Arc::new(provider)
    }

    pub fn return_only(&self, count: usize) {
        self.short.lock().unwrap().push_back(count);
    }

    pub fn fail_next(&self, error: GenerationError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for Provider {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationOutput, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }
        let count = self
            .short
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(request.options.image_count);
        Ok(GenerationOutput {
            images: (0..count)
                .map(|i| ImageData::bytes("image/png", format!("{}-{}", request.prompt, i).into_bytes()))
                .collect(),
            size: None,
            text_parts: vec!["thinking...".to_string()],
        })
    }
}

/// Serves the blobs a [`MemRemote`] has stored, the way a CDN would.
pub struct RemoteFetcher(pub Arc<MemRemote>);

#[async_trait]
impl ImageFetcher for RemoteFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.0
            .blob_by_url(url)
            .ok_or_else(|| PixaError::Fetch(format!("{}: not found", url)))
    }
}

pub fn config(api_key: Option<&str>) -> PixaConfig {
    PixaConfig {
        api_key: api_key.map(str::to_string),
        records_debounce_ms: 50,
        favorites_debounce_ms: 20,
        backoff_initial_ms: 50,
        backoff_max_ms: 400,
        ..Default::default()
    }
}

/// One "device": a local backend plus the shared remote.
pub async fn open_device(
    backend: Arc<dyn Backend>,
    provider: Arc<Provider>,
    remote: Arc<MemRemote>,
    api_key: Option<&str>,
) -> PixaApi {
    PixaApi::open(
        config(api_key),
        backend,
        provider,
        Arc::new(RemoteFetcher(remote.clone())),
        remote,
    )
    .await
    .unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
