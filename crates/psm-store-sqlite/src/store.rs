//! [`SqliteStore`], the SQLite implementation of [`RegistryStore`].

use std::path::Path;

use chrono::Utc;
use psm_core::{
  lookup::{BbchStage, EppoCode, LookupPage, LookupSearch, LookupStats},
  payload::{EntityKind, PayloadEntry, RefFilter},
  query::{ProductResult, RegistryQuery},
  registry::CodeUsage,
  snapshot::SnapshotDocument,
  store::RegistryStore,
  sync::{
    DatasetRecords, ImportReport, NewSyncLogEntry, SchemaDiagnosis, SyncLogEntry, SyncStamp,
  },
};
use serde_json::{Map, Value};
use tracing::info;

use crate::{
  Error, Result, backup, dataset, lookup, meta, payload,
  query::{self, CodeTable},
  schema, snapshot,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A registry store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection handle is shared. All clones talk
/// to the same background thread, so operations never interleave.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and migrate it.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_owned();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    let store = Self { conn };
    let version = store.init().await?;
    info!(path = %path.display(), version, "store opened");
    Ok(store)
  }

  /// Open an in-memory store; used by the tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init().await?;
    Ok(store)
  }

  /// Run the migrations again; returns the resulting schema version.
  pub async fn migrate(&self) -> Result<i64> {
    self.with_conn(schema::ensure_schema).await
  }

  /// Close the underlying connection. Pending calls on other clones fail.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    Ok(())
  }

  async fn init(&self) -> Result<i64> {
    self
      .with_conn(|conn| {
        schema::configure(conn)?;
        schema::ensure_schema(conn)
      })
      .await
  }

  /// Run a synchronous operation on the connection thread.
  async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }
}

// ─── RegistryStore impl ──────────────────────────────────────────────────────

impl RegistryStore for SqliteStore {
  type Error = Error;

  // ── Schema ────────────────────────────────────────────────────────────────

  async fn schema_version(&self) -> Result<i64> {
    self.with_conn(|conn| schema::user_version(conn)).await
  }

  async fn diagnose_schema(&self) -> Result<SchemaDiagnosis> {
    self.with_conn(|conn| meta::diagnose(conn)).await
  }

  // ── Payloads ──────────────────────────────────────────────────────────────

  async fn put_payloads(&self, kind: EntityKind, rows: Vec<Map<String, Value>>) -> Result<u64> {
    self.with_conn(move |conn| payload::put(conn, kind, rows)).await
  }

  async fn get_payloads(&self, kind: EntityKind, filter: RefFilter) -> Result<Vec<PayloadEntry>> {
    self.with_conn(move |conn| payload::get(conn, kind, &filter)).await
  }

  // ── Snapshot & binary image ───────────────────────────────────────────────

  async fn export_snapshot(&self) -> Result<SnapshotDocument> {
    self.with_conn(|conn| snapshot::export(conn)).await
  }

  async fn import_snapshot(&self, doc: SnapshotDocument) -> Result<()> {
    self.with_conn(move |conn| snapshot::import(conn, &doc)).await
  }

  async fn export_database(&self) -> Result<Vec<u8>> {
    self.with_conn(|conn| backup::export(conn)).await
  }

  async fn import_database(&self, image: Vec<u8>) -> Result<()> {
    self.with_conn(move |conn| backup::import(conn, &image)).await
  }

  // ── Meta & sync log ───────────────────────────────────────────────────────

  async fn get_meta(&self, key: String) -> Result<Option<String>> {
    self.with_conn(move |conn| meta::get(conn, &key)).await
  }

  async fn set_meta(&self, key: String, value: Option<String>) -> Result<()> {
    self
      .with_conn(move |conn| meta::set(conn, &key, value.as_deref()))
      .await
  }

  async fn append_sync_log(&self, entry: NewSyncLogEntry) -> Result<i64> {
    self.with_conn(move |conn| meta::append_log(conn, &entry)).await
  }

  async fn list_sync_log(&self, limit: u32) -> Result<Vec<SyncLogEntry>> {
    self.with_conn(move |conn| meta::list_log(conn, limit)).await
  }

  async fn record_sync_failure(&self, message: String, fingerprint: Option<String>) -> Result<()> {
    self
      .with_conn(move |conn| meta::record_failure(conn, &message, fingerprint.as_deref()))
      .await
  }

  // ── Dataset import ────────────────────────────────────────────────────────

  async fn import_dataset_image(&self, image: Vec<u8>, stamp: SyncStamp) -> Result<ImportReport> {
    self
      .with_conn(move |conn| dataset::import_image(conn, &image, &stamp))
      .await
  }

  async fn import_records(&self, records: DatasetRecords, stamp: SyncStamp) -> Result<ImportReport> {
    self
      .with_conn(move |conn| dataset::import_records(conn, &records, &stamp))
      .await
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn query_registry(&self, request: RegistryQuery) -> Result<Vec<ProductResult>> {
    let today = Utc::now().date_naive();
    self.with_conn(move |conn| query::run(conn, &request, today)).await
  }

  async fn list_cultures(&self, with_count: bool) -> Result<Vec<CodeUsage>> {
    self
      .with_conn(move |conn| query::list_codes(conn, CodeTable::Cultures, with_count))
      .await
  }

  async fn list_pests(&self, with_count: bool) -> Result<Vec<CodeUsage>> {
    self
      .with_conn(move |conn| query::list_codes(conn, CodeTable::Pests, with_count))
      .await
  }

  // ── Lookups ───────────────────────────────────────────────────────────────

  async fn import_eppo_codes(&self, rows: Vec<EppoCode>) -> Result<u64> {
    self.with_conn(move |conn| lookup::import_eppo(conn, rows)).await
  }

  async fn import_bbch_stages(&self, rows: Vec<BbchStage>) -> Result<u64> {
    self.with_conn(move |conn| lookup::import_bbch(conn, rows)).await
  }

  async fn search_eppo_codes(&self, search: LookupSearch) -> Result<LookupPage<EppoCode>> {
    self.with_conn(move |conn| lookup::search_eppo(conn, &search)).await
  }

  async fn search_bbch_stages(&self, search: LookupSearch) -> Result<LookupPage<BbchStage>> {
    self.with_conn(move |conn| lookup::search_bbch(conn, &search)).await
  }

  async fn lookup_stats(&self) -> Result<LookupStats> {
    self.with_conn(|conn| lookup::stats(conn)).await
  }
}
