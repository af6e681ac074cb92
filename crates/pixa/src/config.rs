//! # Configuration
//!
//! Pixa configuration is managed by [`clapfig`], which handles layered loading
//! from TOML files and environment variables.
//!
//! ## Storage Hierarchy
//!
//! Configuration is resolved in priority order:
//! 1. **Environment variables**: `PIXA__API_KEY`, `PIXA__IMAGE_SYNC`, etc.
//! 2. **Data directory config**: `<data dir>/pixa.toml`.
//! 3. **Compiled Defaults**: Built-in fallbacks via `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `api_key` | none | Provider credentials. Their presence decides pending recovery |
//! | `image_sync` | `true` | Upload image bytes to the remote store, not just metadata |
//! | `records_debounce_ms` | `2000` | Quiet window before pushing record changes |
//! | `favorites_debounce_ms` | `1000` | Quiet window before pushing favorite changes |
//! | `backoff_initial_ms` | `2000` | First retry delay after a failed push |
//! | `backoff_max_ms` | `300000` | Upper bound for the retry delay |
//! | `backoff_max_retries` | `5` | Automatic retries before waiting for the next change |

use confique::Config;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clapfig::{Clapfig, SearchMode, SearchPath};

use crate::error::{PixaError, Result};

/// Configuration for pixa, stored in `pixa.toml`.
#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PixaConfig {
    /// Generation provider API key.
    pub api_key: Option<String>,

    #[config(default = true)]
    pub image_sync: bool,

    #[config(default = 2000)]
    pub records_debounce_ms: u64,

    #[config(default = 1000)]
    pub favorites_debounce_ms: u64,

    #[config(default = 2000)]
    pub backoff_initial_ms: u64,

    #[config(default = 300000)]
    pub backoff_max_ms: u64,

    #[config(default = 5)]
    pub backoff_max_retries: u32,
}

impl Default for PixaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            image_sync: true,
            records_debounce_ms: 2000,
            favorites_debounce_ms: 1000,
            backoff_initial_ms: 2000,
            backoff_max_ms: 300_000,
            backoff_max_retries: 5,
        }
    }
}

impl PixaConfig {
    /// Loads `pixa.toml` from `data_dir`, layered under `PIXA__*` variables.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Clapfig::builder()
            .app_name("pixa")
            .file_name("pixa.toml")
            .search_paths(vec![SearchPath::Path(data_dir.to_path_buf())])
            .search_mode(SearchMode::Merge)
            .load()
            .map_err(|e| PixaError::Config(e.to_string()))
    }

    /// OS-appropriate data directory, if the platform has one.
    pub fn default_data_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "pixa", "pixa").map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// True when a non-blank API key is configured.
    pub fn has_credentials(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    pub fn records_debounce(&self) -> Duration {
        Duration::from_millis(self.records_debounce_ms)
    }

    pub fn favorites_debounce(&self) -> Duration {
        Duration::from_millis(self.favorites_debounce_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PixaConfig::default();
        assert!(config.image_sync);
        assert_eq!(config.records_debounce(), Duration::from_secs(2));
        assert_eq!(config.favorites_debounce(), Duration::from_secs(1));
        assert_eq!(config.backoff_max(), Duration::from_secs(300));
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_blank_api_key_is_not_a_credential() {
        let config = PixaConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_api_key_is_a_credential() {
        let config = PixaConfig {
            api_key: Some("sk-123".to_string()),
            ..Default::default()
        };
        assert!(config.has_credentials());
    }

    #[test]
    fn test_load_reads_toml_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pixa.toml"),
            "image_sync = false\nrecords_debounce_ms = 50\n",
        )
        .unwrap();

        let config = PixaConfig::load(dir.path()).unwrap();

        assert!(!config.image_sync);
        assert_eq!(config.records_debounce_ms, 50);
        assert_eq!(config.favorites_debounce_ms, 1000);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = PixaConfig::load(dir.path()).unwrap();

        assert_eq!(config.backoff_max_retries, 5);
    }
}
