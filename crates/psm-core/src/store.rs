//! The `RegistryStore` trait.
//!
//! Implemented by storage backends (e.g. `psm-store-sqlite`). The sync
//! pipeline and the RPC service depend on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use serde_json::{Map, Value};

use crate::{
  lookup::{BbchStage, EppoCode, LookupPage, LookupSearch, LookupStats},
  payload::{EntityKind, PayloadEntry, RefFilter},
  query::{ProductResult, RegistryQuery},
  registry::CodeUsage,
  snapshot::SnapshotDocument,
  sync::{
    DatasetRecords, ImportReport, NewSyncLogEntry, SchemaDiagnosis, SyncLogEntry,
    SyncStamp,
  },
};

/// Abstraction over a registry store backend.
///
/// Every method that writes runs in a single transaction: either all of its
/// effects are visible afterwards or none are.
pub trait RegistryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Schema ────────────────────────────────────────────────────────────

  /// The current `user_version` marker.
  fn schema_version(&self) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  fn diagnose_schema(
    &self,
  ) -> impl Future<Output = Result<SchemaDiagnosis, Self::Error>> + Send + '_;

  // ── Payloads ──────────────────────────────────────────────────────────

  /// Replace every payload row of `kind` with `rows`. Refs are derived from
  /// each row.
  fn put_payloads(
    &self,
    kind: EntityKind,
    rows: Vec<Map<String, Value>>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Payload rows of `kind` matching `filter`, in insertion order.
  fn get_payloads(
    &self,
    kind: EntityKind,
    filter: RefFilter,
  ) -> impl Future<Output = Result<Vec<PayloadEntry>, Self::Error>> + Send + '_;

  // ── Snapshot & binary image ───────────────────────────────────────────

  fn export_snapshot(
    &self,
  ) -> impl Future<Output = Result<SnapshotDocument, Self::Error>> + Send + '_;

  /// Replace all user-authored tables with the document's content.
  fn import_snapshot(
    &self,
    doc: SnapshotDocument,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The whole store as raw SQLite bytes.
  fn export_database(
    &self,
  ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send + '_;

  /// Replace the whole store with a SQLite image, then migrate it.
  fn import_database(
    &self,
    image: Vec<u8>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Meta & sync log ───────────────────────────────────────────────────

  fn get_meta(
    &self,
    key: String,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  /// Set a meta value; `None` removes the key.
  fn set_meta(
    &self,
    key: String,
    value: Option<String>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn append_sync_log(
    &self,
    entry: NewSyncLogEntry,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// Most recent entries first.
  fn list_sync_log(
    &self,
    limit: u32,
  ) -> impl Future<Output = Result<Vec<SyncLogEntry>, Self::Error>> + Send + '_;

  /// Record a failed sync: `lastError`/`lastErrorTime` plus a failure log
  /// entry, written together.
  fn record_sync_failure(
    &self,
    message: String,
    fingerprint: Option<String>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Dataset import ────────────────────────────────────────────────────

  /// Reconcile the registry tables from a downloaded SQLite dataset, verify
  /// integrity and stamp the result.
  fn import_dataset_image(
    &self,
    image: Vec<u8>,
    stamp: SyncStamp,
  ) -> impl Future<Output = Result<ImportReport, Self::Error>> + Send + '_;

  /// Replace the registry tables and payloads with structured records, verify
  /// integrity and stamp the result.
  fn import_records(
    &self,
    records: DatasetRecords,
    stamp: SyncStamp,
  ) -> impl Future<Output = Result<ImportReport, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn query_registry(
    &self,
    query: RegistryQuery,
  ) -> impl Future<Output = Result<Vec<ProductResult>, Self::Error>> + Send + '_;

  fn list_cultures(
    &self,
    with_count: bool,
  ) -> impl Future<Output = Result<Vec<CodeUsage>, Self::Error>> + Send + '_;

  fn list_pests(
    &self,
    with_count: bool,
  ) -> impl Future<Output = Result<Vec<CodeUsage>, Self::Error>> + Send + '_;

  // ── Lookups ───────────────────────────────────────────────────────────

  /// Replace every EPPO code with `rows`; returns the number stored. Rows
  /// without a code are skipped.
  fn import_eppo_codes(
    &self,
    rows: Vec<EppoCode>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Replace every BBCH stage with `rows`; returns the number stored.
  fn import_bbch_stages(
    &self,
    rows: Vec<BbchStage>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Codes whose code or name contains the query, exact code prefixes first.
  fn search_eppo_codes(
    &self,
    search: LookupSearch,
  ) -> impl Future<Output = Result<LookupPage<EppoCode>, Self::Error>> + Send + '_;

  fn search_bbch_stages(
    &self,
    search: LookupSearch,
  ) -> impl Future<Output = Result<LookupPage<BbchStage>, Self::Error>> + Send + '_;

  fn lookup_stats(&self) -> impl Future<Output = Result<LookupStats, Self::Error>> + Send + '_;
}
