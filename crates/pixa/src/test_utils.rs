//! Fakes for the external collaborators, shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::api::PixaApi;
use crate::config::PixaConfig;
use crate::error::{PixaError, Result};
use crate::fetch::ImageFetcher;
use crate::generation::{GenerationError, GenerationOutput, GenerationRequest, GenerationService};
use crate::model::ImageData;
use crate::store::mem_backend::MemBackend;
use crate::sync::MemRemote;

enum Scripted {
    Images(usize),
    Failure(GenerationError),
}

/// Scriptable [`GenerationService`].
///
/// Without a script every call succeeds with as many images as requested.
#[derive(Default)]
pub struct FakeGenerator {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<GenerationRequest>>,
    stalled: AtomicBool,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next call returns only `count` images.
    pub fn push_images(&self, count: usize) {
        self.script().push_back(Scripted::Images(count));
    }

    pub fn push_failure(&self, error: GenerationError) {
        self.script().push_back(Scripted::Failure(error));
    }

    /// While stalled, calls never return, like a tab closed mid-request.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, VecDeque<Scripted>> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GenerationService for FakeGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationOutput, GenerationError> {
        let requested = request.options.image_count;
        let prompt = request.prompt.clone();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let count = match self.script().pop_front() {
            Some(Scripted::Failure(error)) => return Err(error),
            Some(Scripted::Images(count)) => count,
            None => requested,
        };
        let images = (0..count)
            .map(|i| ImageData::bytes("image/png", format!("{prompt}#{i}").into_bytes()))
            .collect();
        Ok(GenerationOutput {
            images,
            size: None,
            text_parts: Vec::new(),
        })
    }
}

/// [`ImageFetcher`] over a fixed URL table.
#[derive(Default)]
pub struct FakeFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), bytes);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| PixaError::Fetch(format!("{}: 404", url)))
    }
}

/// Config with credentials and short debounce windows.
pub fn test_config() -> PixaConfig {
    PixaConfig {
        api_key: Some("test-key".to_string()),
        records_debounce_ms: 20,
        favorites_debounce_ms: 10,
        backoff_initial_ms: 20,
        backoff_max_ms: 200,
        ..Default::default()
    }
}

pub async fn open_test_api(
    backend: Arc<MemBackend>,
    generator: Arc<FakeGenerator>,
    remote: Arc<MemRemote>,
) -> PixaApi {
    PixaApi::open(
        test_config(),
        backend,
        generator,
        Arc::new(FakeFetcher::new()),
        remote,
    )
    .await
    .expect("open test api")
}
