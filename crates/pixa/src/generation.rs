//! The generation provider, seen from the engine: an opaque async call.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{GenerationOptions, ImageData, Size};

/// Provider failure classes. Only these reach the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Provider error: {0}")]
    Fatal(String),
}

impl GenerationError {
    /// Whether asking again later can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }
}

/// An input image as sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPayload {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub api_key: String,
    pub prompt: String,
    pub images: Vec<InputPayload>,
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    /// Raw or displayable image data, one per produced image.
    pub images: Vec<ImageData>,
    pub size: Option<Size>,
    /// Thinking and text parts returned next to the images.
    pub text_parts: Vec<String>,
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationOutput, GenerationError>;
}
