//! The [`SyncStrategy`] abstraction and the configured [`Strategy`].

use std::{collections::BTreeMap, future::Future};

use psm_core::sync::{DatasetRecords, Manifest};
use serde_json::Value;

use crate::{
  EndpointSync, HttpClient, ManifestSync, Progress, Result, SyncConfig, SyncMode,
};

/// What a strategy learned while previewing, carried into [`SyncStrategy::fetch`].
#[derive(Debug, Clone)]
pub enum Staged {
  Manifest(Manifest),
  Endpoints(BTreeMap<String, Vec<Value>>),
}

/// The result of inspecting the remote side: enough to decide whether anything
/// changed since the last import.
#[derive(Debug, Clone)]
pub struct Preview {
  pub fingerprint: String,
  pub data_source: String,
  pub api_stand:   Option<String>,
  /// Row counts announced by the source, or null.
  pub counts:      Value,
  pub staged:      Staged,
}

/// A dataset ready for import.
#[derive(Debug, Clone)]
pub enum DatasetPayload {
  /// A complete SQLite image, reconciled table by table.
  Image(Vec<u8>),
  /// Structured records from the registry API.
  Records(DatasetRecords),
}

/// One way of obtaining a dataset.
pub trait SyncStrategy: Send + Sync {
  /// Short name used in logs and sync-log messages.
  fn label(&self) -> &'static str;

  /// Determine the remote fingerprint. Must not touch the store.
  fn preview(&self, progress: Progress) -> impl Future<Output = Result<Preview>> + Send + '_;

  /// Produce the dataset for a preview whose fingerprint differs from the
  /// last import.
  fn fetch(
    &self,
    staged: Staged,
    progress: Progress,
  ) -> impl Future<Output = Result<DatasetPayload>> + Send + '_;
}

// ─── Configured strategy ─────────────────────────────────────────────────────

/// The strategy selected by `sync.mode`.
pub enum Strategy {
  Manifest(ManifestSync<HttpClient>),
  Endpoints(EndpointSync<HttpClient>),
}

impl Strategy {
  pub fn from_config(config: &SyncConfig) -> Result<Self> {
    let client = HttpClient::new(config.clone())?;
    Ok(match config.mode {
      SyncMode::Manifest => Self::Manifest(ManifestSync::new(client)),
      SyncMode::Endpoints => Self::Endpoints(EndpointSync::from_config(client, config)),
    })
  }
}

impl SyncStrategy for Strategy {
  fn label(&self) -> &'static str {
    match self {
      Self::Manifest(s) => s.label(),
      Self::Endpoints(s) => s.label(),
    }
  }

  async fn preview(&self, progress: Progress) -> Result<Preview> {
    match self {
      Self::Manifest(s) => s.preview(progress).await,
      Self::Endpoints(s) => s.preview(progress).await,
    }
  }

  async fn fetch(&self, staged: Staged, progress: Progress) -> Result<DatasetPayload> {
    match self {
      Self::Manifest(s) => s.fetch(staged, progress).await,
      Self::Endpoints(s) => s.fetch(staged, progress).await,
    }
  }
}
