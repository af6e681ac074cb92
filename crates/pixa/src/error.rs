use thiserror::Error;

use crate::generation::GenerationError;
use crate::sync::remote::RemoteError;

#[derive(Error, Debug)]
pub enum PixaError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("No credentials configured")]
    MissingCredentials,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Generation already running: {0}")]
    AlreadyRunning(String),

    #[error("Record has no empty slots to retry: {0}")]
    NotInterrupted(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PixaError>;
