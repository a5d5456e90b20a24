//! Registry meta values, the sync log and schema diagnostics.

use chrono::Utc;
use psm_core::sync::{
  ColumnInfo, ImportReport, NewSyncLogEntry, SchemaDiagnosis, SyncLogEntry, SyncStamp,
  TableShape, meta_keys,
};
use rusqlite::{Connection, OptionalExtension as _};
use serde_json::Value as Json;

use crate::{
  Result,
  encode::{RawSyncLog, encode_dt, encode_flag, encode_json},
  schema::{self, REGISTRY_TABLES, quote_ident},
};

// ─── Meta ────────────────────────────────────────────────────────────────────

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
  Ok(
    conn
      .query_row("SELECT value FROM bvl_meta WHERE key = ?1", [key], |r| r.get(0))
      .optional()?
      .flatten(),
  )
}

pub fn set(conn: &Connection, key: &str, value: Option<&str>) -> Result<()> {
  match value {
    Some(value) => conn.execute(
      "INSERT INTO bvl_meta (key, value) VALUES (?1, ?2)
       ON CONFLICT(key) DO UPDATE SET value = excluded.value",
      rusqlite::params![key, value],
    )?,
    None => conn.execute("DELETE FROM bvl_meta WHERE key = ?1", [key])?,
  };
  Ok(())
}

// ─── Sync log ────────────────────────────────────────────────────────────────

pub fn append_log(conn: &Connection, entry: &NewSyncLogEntry) -> Result<i64> {
  conn.execute(
    "INSERT INTO bvl_sync_log (synced_at, ok, message, payload_hash)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![
      encode_dt(Utc::now()),
      encode_flag(entry.ok),
      entry.message,
      entry.payload_hash,
    ],
  )?;
  Ok(conn.last_insert_rowid())
}

pub fn list_log(conn: &Connection, limit: u32) -> Result<Vec<SyncLogEntry>> {
  let mut stmt = conn.prepare(
    "SELECT id, synced_at, ok, message, payload_hash
     FROM bvl_sync_log ORDER BY id DESC LIMIT ?1",
  )?;
  let rows = stmt
    .query_map([limit], |row| {
      Ok(RawSyncLog {
        id:           row.get(0)?,
        synced_at:    row.get(1)?,
        ok:           row.get(2)?,
        message:      row.get(3)?,
        payload_hash: row.get(4)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows.into_iter().map(RawSyncLog::into_entry).collect())
}

/// Meta and log writes for a committed import. Runs inside the import
/// transaction.
pub fn stamp_success(conn: &Connection, stamp: &SyncStamp, report: &ImportReport) -> Result<()> {
  let counts = match &stamp.counts {
    Json::Null => encode_json(&report.counts)?,
    announced => encode_json(announced)?,
  };

  set(conn, meta_keys::LAST_SYNC_HASH, Some(&stamp.fingerprint))?;
  set(conn, meta_keys::LAST_SYNC_ISO, Some(&encode_dt(stamp.synced_at)))?;
  set(conn, meta_keys::DATA_SOURCE, Some(&stamp.data_source))?;
  set(conn, meta_keys::API_STAND, stamp.api_stand.as_deref())?;
  set(conn, meta_keys::LAST_SYNC_COUNTS, Some(&counts))?;
  set(conn, meta_keys::LAST_ERROR, None)?;
  set(conn, meta_keys::LAST_ERROR_TIME, None)?;

  append_log(conn, &NewSyncLogEntry {
    ok:           true,
    message:      format!("success ({})", stamp.strategy),
    payload_hash: Some(stamp.fingerprint.clone()),
  })?;
  Ok(())
}

pub fn record_failure(
  conn: &mut Connection,
  message: &str,
  fingerprint: Option<&str>,
) -> Result<()> {
  let tx = conn.transaction()?;
  set(&tx, meta_keys::LAST_ERROR, Some(message))?;
  set(&tx, meta_keys::LAST_ERROR_TIME, Some(&encode_dt(Utc::now())))?;
  append_log(&tx, &NewSyncLogEntry {
    ok:           false,
    message:      message.to_owned(),
    payload_hash: fingerprint.map(str::to_owned),
  })?;
  tx.commit()?;
  Ok(())
}

// ─── Diagnostics ─────────────────────────────────────────────────────────────

pub fn diagnose(conn: &Connection) -> Result<SchemaDiagnosis> {
  let mut diagnosis = SchemaDiagnosis {
    user_version: schema::user_version(conn)?,
    ..Default::default()
  };

  let tables = REGISTRY_TABLES.iter().chain(&["bvl_sync_log", "bvl_api_payloads"]);
  for table in tables {
    if !schema::table_exists(conn, "main", table)? {
      continue;
    }

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
      .query_map([], |row| {
        Ok(ColumnInfo {
          name:        row.get(1)?,
          decl_type:   row.get(2)?,
          not_null:    row.get::<_, i64>(3)? != 0,
          primary_key: row.get::<_, i64>(5)? != 0,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
    let indexes = stmt
      .query_map([], |row| row.get::<_, String>(1))?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    diagnosis
      .tables
      .insert((*table).to_owned(), TableShape { columns, indexes });
  }

  Ok(diagnosis)
}
