//! Types shared between the sync pipeline and the store: the published
//! manifest, the stamp written on a successful import, progress events and
//! the sync log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  Error, Result,
  payload::PayloadRecord,
  registry::{Application, AwgCode, DosageCondition, LookupCode, Product, WithdrawalPeriod},
};

/// Keys written to the registry meta table.
pub mod meta_keys {
  pub const LAST_SYNC_HASH: &str = "lastSyncHash";
  pub const LAST_SYNC_ISO: &str = "lastSyncIso";
  pub const DATA_SOURCE: &str = "dataSource";
  pub const API_STAND: &str = "apiStand";
  pub const LAST_SYNC_COUNTS: &str = "lastSyncCounts";
  pub const LAST_ERROR: &str = "lastError";
  pub const LAST_ERROR_TIME: &str = "lastErrorTime";
}

// ─── Manifest ────────────────────────────────────────────────────────────────

/// The document describing the latest published dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub version:     String,
  #[serde(default)]
  pub hash:        Option<String>,
  pub files:       Vec<ManifestFile>,
  #[serde(default)]
  pub counts:      Option<Value>,
  #[serde(default)]
  pub tables:      Option<Value>,
  #[serde(default)]
  pub api_version: Option<String>,
  #[serde(default)]
  pub build:       Option<BuildInfo>,
  /// Base for relative file paths; relative to the manifest URL itself.
  #[serde(default, alias = "baseUrl")]
  pub base_url:    Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
  #[serde(default)]
  pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
  #[serde(default)]
  pub path:     Option<String>,
  #[serde(default)]
  pub name:     Option<String>,
  #[serde(default)]
  pub url:      Option<String>,
  #[serde(default)]
  pub size:     Option<u64>,
  #[serde(default)]
  pub sha256:   Option<String>,
  #[serde(default)]
  pub encoding: Option<String>,
}

impl ManifestFile {
  /// Where the file lives: `url`, else `path`, else `name`.
  pub fn location(&self) -> Option<&str> {
    [&self.url, &self.path, &self.name]
      .into_iter()
      .find_map(|v| v.as_deref().filter(|s| !s.is_empty()))
  }
}

impl Manifest {
  /// Parse and validate a manifest document.
  pub fn from_json(bytes: &[u8]) -> Result<Self> {
    let manifest: Self = serde_json::from_slice(bytes)
      .map_err(|e| Error::InvalidManifest(e.to_string()))?;
    manifest.validate()?;
    Ok(manifest)
  }

  pub fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(Error::InvalidManifest("missing version".into()));
    }
    if self.files.iter().all(|f| f.location().is_none()) {
      return Err(Error::InvalidManifest("no downloadable files".into()));
    }
    Ok(())
  }

  /// Change-detection fingerprint: the content hash, else the version.
  pub fn fingerprint(&self) -> &str {
    self
      .hash
      .as_deref()
      .filter(|h| !h.trim().is_empty())
      .unwrap_or(&self.version)
  }

  /// The upstream data state the dataset was built from.
  pub fn api_stand(&self) -> Option<&str> {
    self
      .api_version
      .as_deref()
      .or_else(|| self.build.as_ref()?.finished_at.as_deref())
  }

  pub fn table_counts(&self) -> Value {
    self.counts.clone().or_else(|| self.tables.clone()).unwrap_or(Value::Null)
  }

  pub fn source_label(&self) -> String {
    format!("pflanzenschutzliste-data@{}", self.version)
  }
}

// ─── Import ──────────────────────────────────────────────────────────────────

/// What a successful import records in the meta table and sync log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStamp {
  pub fingerprint: String,
  pub data_source: String,
  pub api_stand:   Option<String>,
  /// Counts announced by the source; the importer's own counts are used when
  /// this is null.
  pub counts:      Value,
  /// Short name of the strategy, used in the log message.
  pub strategy:    String,
  pub synced_at:   DateTime<Utc>,
}

/// Rows written per table by an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
  pub counts: BTreeMap<String, u64>,
}

impl ImportReport {
  pub fn total(&self) -> u64 { self.counts.values().sum() }
}

/// A complete dataset in structured form, as assembled from the remote API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecords {
  pub products:           Vec<Product>,
  pub applications:       Vec<Application>,
  pub crops:              Vec<AwgCode>,
  pub pests:              Vec<AwgCode>,
  pub dosages:            Vec<DosageCondition>,
  pub withdrawal_periods: Vec<WithdrawalPeriod>,
  pub crop_labels:        Vec<LookupCode>,
  pub pest_labels:        Vec<LookupCode>,
  pub payloads:           Vec<PayloadRecord>,
}

// ─── Outcome & progress ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SyncOutcome {
  NoChange {
    fingerprint: String,
  },
  Success {
    fingerprint: String,
    counts:      BTreeMap<String, u64>,
    duration_ms: u64,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
  Start,
  Manifest,
  Download,
  Decompress,
  Fetch,
  Transform,
  Import,
  Verify,
  Done,
  Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
  pub step:    SyncStep,
  /// Overall completion, 0–100.
  pub percent: u8,
  pub message: String,
}

// ─── Log & diagnostics ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
  pub id:           i64,
  pub synced_at:    String,
  pub ok:           bool,
  pub message:      Option<String>,
  pub payload_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSyncLogEntry {
  pub ok:           bool,
  pub message:      String,
  pub payload_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
  pub name:        String,
  pub decl_type:   String,
  pub not_null:    bool,
  pub primary_key: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableShape {
  pub columns: Vec<ColumnInfo>,
  pub indexes: Vec<String>,
}

/// Schema version plus the shape of every registry table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiagnosis {
  pub user_version: i64,
  pub tables:       BTreeMap<String, TableShape>,
}
