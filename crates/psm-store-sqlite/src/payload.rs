//! The generic payload table and its per-pass lookup cache.

use std::collections::HashMap;

use psm_core::payload::{EntityKind, PayloadEntry, PayloadRecord, RefFilter};
use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{Result, encode::{RawPayload, encode_json}};

/// Atomically replace every row of `kind`.
pub fn put(conn: &mut Connection, kind: EntityKind, rows: Vec<Map<String, Value>>) -> Result<u64> {
  let tx = conn.transaction()?;
  tx.execute("DELETE FROM bvl_api_payloads WHERE key = ?1", [kind.key()])?;
  let mut written = 0;
  for row in rows {
    insert(&tx, &PayloadRecord::new(kind, row))?;
    written += 1;
  }
  tx.commit()?;
  debug!(kind = %kind, rows = written, "payloads replaced");
  Ok(written)
}

pub fn insert(conn: &Connection, record: &PayloadRecord) -> Result<()> {
  let mut stmt = conn.prepare_cached(
    "INSERT INTO bvl_api_payloads
       (endpoint, key, primary_ref, secondary_ref, tertiary_ref, payload_json)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
  )?;
  stmt.execute(rusqlite::params![
    record.endpoint,
    record.kind.key(),
    record.refs.primary,
    record.refs.secondary,
    record.refs.tertiary,
    encode_json(&record.payload)?,
  ])?;
  Ok(())
}

/// Rows of `kind` matching `filter`, in insertion order.
pub fn get(conn: &Connection, kind: EntityKind, filter: &RefFilter) -> Result<Vec<PayloadEntry>> {
  let filter = filter.normalized();
  let mut stmt = conn.prepare_cached(
    "SELECT id, primary_ref, secondary_ref, tertiary_ref, payload_json
     FROM bvl_api_payloads
     WHERE key = ?1
       AND (?2 IS NULL OR primary_ref = ?2)
       AND (?3 IS NULL OR secondary_ref = ?3)
     ORDER BY id",
  )?;
  let raws = stmt
    .query_map(
      rusqlite::params![kind.key(), filter.primary, filter.secondary],
      |row| {
        Ok(RawPayload {
          id:            row.get(0)?,
          primary_ref:   row.get(1)?,
          secondary_ref: row.get(2)?,
          tertiary_ref:  row.get(3)?,
          payload_json:  row.get(4)?,
        })
      },
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raws.into_iter().map(RawPayload::into_entry).collect()
}

// ─── Cache ───────────────────────────────────────────────────────────────────

/// Memoizes payload lookups for the duration of one enrichment pass.
#[derive(Default)]
pub struct PayloadCache {
  entries: HashMap<(EntityKind, RefFilter), Vec<PayloadEntry>>,
  hits:    usize,
}

impl PayloadCache {
  pub fn lookup(
    &mut self,
    conn: &Connection,
    kind: EntityKind,
    filter: RefFilter,
  ) -> Result<Vec<PayloadEntry>> {
    let key = (kind, filter.normalized());
    if let Some(rows) = self.entries.get(&key) {
      self.hits += 1;
      return Ok(rows.clone());
    }
    let rows = get(conn, kind, &key.1)?;
    self.entries.insert(key, rows.clone());
    Ok(rows)
  }

  /// `(hits, distinct lookups)`.
  pub fn stats(&self) -> (usize, usize) { (self.hits, self.entries.len()) }
}
