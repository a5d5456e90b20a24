//! Sync settings, deserialised from the `[sync]` table of the configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MANIFEST_URL: &str =
  "https://abbas-hoseiny.github.io/pflanzenschutzliste-data/latest/manifest.json";

pub const DEFAULT_API_BASE_URL: &str = "https://psm-api.bvl.bund.de/ords/psm/api-v1";

/// Which [`crate::SyncStrategy`] to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
  /// Download the published dataset announced by the manifest.
  #[default]
  Manifest,
  /// Page through the registry API directly.
  Endpoints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub mode:                  SyncMode,
  pub manifest_url:          String,
  pub api_base_url:          String,
  /// Manifest fetches and API pages.
  pub request_timeout_secs:  u64,
  /// Dataset downloads.
  pub download_timeout_secs: u64,
  pub page_size:             u32,
  pub max_retries:           u32,
  /// Base of the linear backoff between retries.
  pub retry_backoff_ms:      u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      mode:                  SyncMode::default(),
      manifest_url:          DEFAULT_MANIFEST_URL.to_owned(),
      api_base_url:          DEFAULT_API_BASE_URL.to_owned(),
      request_timeout_secs:  30,
      download_timeout_secs: 120,
      page_size:             1000,
      max_retries:           2,
      retry_backoff_ms:      1000,
    }
  }
}

impl SyncConfig {
  pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }

  pub fn download_timeout(&self) -> Duration { Duration::from_secs(self.download_timeout_secs) }

  pub fn retry_backoff(&self) -> Duration { Duration::from_millis(self.retry_backoff_ms) }
}
