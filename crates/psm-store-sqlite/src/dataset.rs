//! Dataset import: table reconciliation from a downloaded SQLite image, and
//! the structured equivalent fed by the remote API.
//!
//! Both paths write every registry table, verify the result and stamp the
//! meta table inside a single transaction.

use std::{cmp::Ordering, io::Write as _, path::Path};

use psm_core::sync::{DatasetRecords, ImportReport, SyncStamp};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  encode::{encode_flag, encode_json},
  meta,
  payload,
  schema::{self, REGISTRY_TABLES, is_plain_ident, quote_ident},
};

/// Schema alias of the attached dataset.
const SOURCE: &str = "dataset";

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// Tables owned by this store and never taken from a dataset.
const LOCAL_ONLY: &[&str] = &["bvl_sync_log"];

pub fn check_sqlite_image(image: &[u8]) -> Result<()> {
  if image.starts_with(SQLITE_MAGIC) {
    Ok(())
  } else {
    Err(Error::Validation("not a SQLite database image".into()))
  }
}

/// Import order: parents before children, unknown tables last.
pub fn table_priority(name: &str) -> u32 {
  match name {
    "bvl_meta" => 10,
    "bvl_lookup_kultur" | "bvl_lookup_schadorg" => 20,
    "bvl_mittel" => 30,
    "bvl_awg" => 40,
    "bvl_awg_kultur" | "bvl_awg_schadorg" => 50,
    "bvl_awg_aufwand" | "bvl_awg_wartezeit" => 60,
    _ => 1000,
  }
}

fn import_order(a: &str, b: &str) -> Ordering {
  table_priority(a).cmp(&table_priority(b)).then_with(|| a.cmp(b))
}

// ─── Image reconciliation ────────────────────────────────────────────────────

pub fn import_image(conn: &mut Connection, image: &[u8], stamp: &SyncStamp) -> Result<ImportReport> {
  check_sqlite_image(image)?;

  let mut file = tempfile::NamedTempFile::new()?;
  file.write_all(image)?;
  file.flush()?;

  attach(conn, file.path())?;
  let outcome = reconcile(conn, stamp);
  settle(outcome, detach(conn))
}

/// The import has committed or rolled back before the detach, so a detach
/// failure is only logged.
fn settle(outcome: Result<ImportReport>, detached: rusqlite::Result<()>) -> Result<ImportReport> {
  if let Err(err) = detached {
    warn!(error = %err, "failed to detach dataset");
  }
  outcome
}

fn attach(conn: &Connection, path: &Path) -> Result<()> {
  conn.execute(
    &format!("ATTACH DATABASE ?1 AS {SOURCE}"),
    [path.to_string_lossy().into_owned()],
  )?;
  Ok(())
}

fn detach(conn: &Connection) -> rusqlite::Result<()> {
  conn.execute_batch(&format!("DETACH DATABASE {SOURCE}"))
}

fn reconcile(conn: &mut Connection, stamp: &SyncStamp) -> Result<ImportReport> {
  let tx = conn.transaction()?;

  let mut tables = source_tables(&tx)?;
  tables.sort_by(|(a, _), (b, _)| import_order(a, b));

  let mut report = ImportReport::default();
  for (table, create_sql) in &tables {
    if let Some(rows) = copy_table(&tx, table, create_sql.as_deref())? {
      info!(table = %table, rows, "table reconciled");
      report.counts.insert(table.clone(), rows);
    }
  }

  let imported: Vec<&str> = report.counts.keys().map(String::as_str).collect();
  verify(&tx, &imported)?;
  meta::stamp_success(&tx, stamp, &report)?;
  tx.commit()?;
  Ok(report)
}

fn source_tables(conn: &Connection) -> Result<Vec<(String, Option<String>)>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT name, sql FROM {SOURCE}.sqlite_master
     WHERE type = 'table' AND name LIKE 'bvl\\_%' ESCAPE '\\'"
  ))?;
  let tables = stmt
    .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(
    tables
      .into_iter()
      .filter(|(name, _)| {
        if LOCAL_ONLY.contains(&name.as_str()) {
          return false;
        }
        if !is_plain_ident(name) {
          warn!(table = %name, "skipping dataset table with unusual name");
          return false;
        }
        true
      })
      .collect(),
  )
}

/// Replace the rows of one table with the dataset's. Returns `None` when the
/// two tables share no columns.
fn copy_table(conn: &Connection, table: &str, create_sql: Option<&str>) -> Result<Option<u64>> {
  if !schema::table_exists(conn, "main", table)? {
    let Some(create_sql) = create_sql else {
      warn!(table, "dataset table has no definition; skipped");
      return Ok(None);
    };
    debug!(table, "creating table from dataset definition");
    conn.execute_batch(create_sql)?;
  }

  let target = schema::columns(conn, "main", table)?;
  let shared: Vec<String> = schema::columns(conn, SOURCE, table)?
    .into_iter()
    .filter(|c| target.contains(c))
    .collect();
  if shared.is_empty() {
    warn!(table, "no shared columns with dataset; skipped");
    return Ok(None);
  }

  if has_foreign_keys(conn, table)? {
    conn.pragma_update(None, "defer_foreign_keys", true)?;
  }

  let ident = quote_ident(table);
  let cols = shared.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
  conn.execute(&format!("DELETE FROM main.{ident}"), [])?;
  conn.execute(
    &format!("INSERT OR REPLACE INTO main.{ident} ({cols}) SELECT {cols} FROM {SOURCE}.{ident}"),
    [],
  )?;
  let rows: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM main.{ident}"), [], |r| r.get(0))?;
  Ok(Some(rows as u64))
}

fn has_foreign_keys(conn: &Connection, table: &str) -> Result<bool> {
  let mut stmt = conn.prepare(&format!("PRAGMA main.foreign_key_list({})", quote_ident(table)))?;
  Ok(stmt.query([])?.next()?.is_some())
}

// ─── Verification ────────────────────────────────────────────────────────────

/// Integrity and referential checks over the tables just written. Runs
/// before commit; an error rolls the whole import back.
fn verify(conn: &Connection, tables: &[&str]) -> Result<()> {
  let integrity: String = conn.query_row("PRAGMA main.integrity_check", [], |r| r.get(0))?;
  if integrity != "ok" {
    return Err(Error::Integrity(integrity));
  }

  for table in tables {
    let mut stmt = conn.prepare(&format!("PRAGMA main.foreign_key_check({})", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
      let parent: String = row.get(2)?;
      return Err(Error::Integrity(format!(
        "{table} has rows without a matching {parent} row"
      )));
    }
  }

  let orphans: i64 = conn.query_row(
    "SELECT COUNT(*) FROM bvl_awg a
     LEFT JOIN bvl_mittel m ON m.kennr = a.kennr
     WHERE m.kennr IS NULL",
    [],
    |r| r.get(0),
  )?;
  if orphans > 0 {
    return Err(Error::Integrity(format!("{orphans} applications without a product")));
  }
  Ok(())
}

// ─── Structured import ───────────────────────────────────────────────────────

pub fn import_records(
  conn: &mut Connection,
  records: &DatasetRecords,
  stamp: &SyncStamp,
) -> Result<ImportReport> {
  let tx = conn.transaction()?;
  for table in REGISTRY_TABLES.iter().filter(|t| **t != "bvl_meta") {
    tx.execute(&format!("DELETE FROM {table}"), [])?;
  }
  tx.execute("DELETE FROM bvl_api_payloads", [])?;

  let mut report = ImportReport::default();
  let mut count = |table: &str, n: usize| {
    report.counts.insert(table.to_owned(), n as u64);
  };

  for p in &records.products {
    tx.execute(
      "INSERT OR REPLACE INTO bvl_mittel
         (kennr, name, formulierung, zul_erstmalig, zul_ende, geringes_risiko, payload_json)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      rusqlite::params![
        p.kennr,
        p.name,
        p.formulation,
        p.first_approval,
        p.expires_on,
        encode_flag(p.low_risk),
        p.raw.as_ref().map(encode_json).transpose()?,
      ],
    )?;
  }
  count("bvl_mittel", records.products.len());

  for a in &records.applications {
    tx.execute(
      "INSERT OR REPLACE INTO bvl_awg (awg_id, kennr, status_json, zulassungsende)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![
        a.awg_id,
        a.kennr,
        a.status.as_ref().map(encode_json).transpose()?,
        a.expires_on,
      ],
    )?;
  }
  count("bvl_awg", records.applications.len());

  for (table, column, links) in [
    ("bvl_awg_kultur", "kultur", &records.crops),
    ("bvl_awg_schadorg", "schadorg", &records.pests),
  ] {
    let sql = format!(
      "INSERT OR REPLACE INTO {table} (awg_id, {column}, ausgenommen, sortier_nr)
       VALUES (?1, ?2, ?3, ?4)"
    );
    for link in links {
      tx.execute(
        &sql,
        rusqlite::params![link.awg_id, link.code, encode_flag(link.excluded), link.sort_order],
      )?;
    }
    count(table, links.len());
  }

  for d in &records.dosages {
    tx.execute(
      "INSERT OR REPLACE INTO bvl_awg_aufwand
         (awg_id, aufwand_bedingung, sortier_nr, mittel_menge, mittel_einheit,
          wasser_menge, wasser_einheit, payload_json)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
      rusqlite::params![
        d.awg_id,
        d.condition,
        d.sort_order,
        d.product_amount,
        d.product_unit,
        d.water_amount,
        d.water_unit,
        d.raw.as_ref().map(encode_json).transpose()?,
      ],
    )?;
  }
  count("bvl_awg_aufwand", records.dosages.len());

  for w in &records.withdrawal_periods {
    tx.execute(
      "INSERT OR REPLACE INTO bvl_awg_wartezeit
         (awg_wartezeit_nr, awg_id, kultur, sortier_nr, tage, bemerkung_kode,
          anwendungsbereich, erlaeuterung, payload_json)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
      rusqlite::params![
        w.number,
        w.awg_id,
        w.crop,
        w.sort_order,
        w.days.to_column(),
        w.remark_code,
        w.scope,
        w.explanation,
        w.raw.as_ref().map(encode_json).transpose()?,
      ],
    )?;
  }
  count("bvl_awg_wartezeit", records.withdrawal_periods.len());

  for (table, codes) in [
    ("bvl_lookup_kultur", &records.crop_labels),
    ("bvl_lookup_schadorg", &records.pest_labels),
  ] {
    let sql = format!("INSERT OR REPLACE INTO {table} (code, label) VALUES (?1, ?2)");
    for code in codes {
      tx.execute(&sql, rusqlite::params![code.code, code.label])?;
    }
    count(table, codes.len());
  }

  for record in &records.payloads {
    payload::insert(&tx, record)?;
  }
  count("bvl_api_payloads", records.payloads.len());

  verify(&tx, REGISTRY_TABLES)?;
  meta::stamp_success(&tx, stamp, &report)?;
  tx.commit()?;
  info!(tables = report.counts.len(), rows = report.total(), "structured dataset imported");
  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parents_sort_before_children() {
    let mut tables = vec![
      "bvl_zusatz",
      "bvl_awg_wartezeit",
      "bvl_awg",
      "bvl_api_payloads",
      "bvl_awg_kultur",
      "bvl_mittel",
      "bvl_meta",
      "bvl_lookup_schadorg",
    ];
    tables.sort_by(|a, b| import_order(a, b));
    assert_eq!(tables, [
      "bvl_meta",
      "bvl_lookup_schadorg",
      "bvl_mittel",
      "bvl_awg",
      "bvl_awg_kultur",
      "bvl_awg_wartezeit",
      "bvl_api_payloads",
      "bvl_zusatz",
    ]);
  }

  #[test]
  fn detach_failure_keeps_the_committed_report() {
    let mut report = ImportReport::default();
    report.counts.insert("bvl_mittel".into(), 2);

    let settled = settle(Ok(report.clone()), Err(rusqlite::Error::InvalidQuery)).unwrap();
    assert_eq!(settled, report);

    let failed = settle(Err(Error::Integrity("broken".into())), Ok(()));
    assert!(matches!(failed, Err(Error::Integrity(_))));
  }

  #[test]
  fn rejects_non_sqlite_bytes() {
    assert!(check_sqlite_image(b"PK\x03\x04").is_err());
    assert!(check_sqlite_image(b"SQLite format 3\0rest").is_ok());
  }
}
