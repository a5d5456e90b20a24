//! Layered configuration: an optional TOML file under `PSM_*` environment
//! variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use psm_service::ServiceConfig;
use psm_sync::SyncConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path:        PathBuf,
  pub host:              String,
  pub port:              u16,
  pub call_timeout_secs: u64,
  pub sync_timeout_secs: u64,
  pub sync:              SyncConfig,
}

impl Default for Settings {
  fn default() -> Self {
    let service = ServiceConfig::default();
    Self {
      store_path:        PathBuf::from("psm.sqlite"),
      host:              "127.0.0.1".to_owned(),
      port:              8787,
      call_timeout_secs: service.call_timeout_secs,
      sync_timeout_secs: service.sync_timeout_secs,
      sync:              SyncConfig::default(),
    }
  }
}

impl Settings {
  /// Read `path` if it exists, then apply `PSM_*` overrides. Nested keys use
  /// a double underscore, e.g. `PSM_SYNC__MODE=endpoints`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let mut settings: Settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("PSM")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise settings")?;

    settings.store_path = expand_tilde(&settings.store_path);
    Ok(settings)
  }

  pub fn service(&self) -> ServiceConfig {
    ServiceConfig {
      call_timeout_secs: self.call_timeout_secs,
      sync_timeout_secs: self.sync_timeout_secs,
      ..ServiceConfig::default()
    }
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
