//! EPPO and BBCH lookup tables: wholesale import, search and stats.
//!
//! Import stamps live in the user `meta` table so a dataset sync, which
//! rewrites `bvl_meta`, leaves them alone.

use chrono::Utc;
use psm_core::lookup::{
  BbchStage, EppoCode, LookupPage, LookupSearch, LookupStats, LookupTableStats, meta_keys,
};
use rusqlite::{Connection, OptionalExtension as _, Row};
use serde_json::Value as Json;
use tracing::info;

use crate::{
  Result,
  encode::{encode_dt, encode_json},
  query::{escape_like, like_pattern},
};

// ─── Import ──────────────────────────────────────────────────────────────────

pub fn import_eppo(conn: &mut Connection, rows: Vec<EppoCode>) -> Result<u64> {
  let tx = conn.transaction()?;
  tx.execute("DELETE FROM lookup_eppo_codes", [])?;
  {
    let mut stmt = tx.prepare(
      "INSERT OR REPLACE INTO lookup_eppo_codes
         (code, name, language, dtcode, preferred, dt_label, language_label,
          authority, name_de, name_en, name_la)
       VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for row in rows.into_iter().filter_map(EppoCode::normalized) {
      stmt.execute(rusqlite::params![
        row.code,
        row.name,
        row.language,
        row.dtcode,
        row.dt_label,
        row.language_label,
        row.authority,
        row.name_de,
        row.name_en,
        row.name_la,
      ])?;
    }
  }
  let count = count_rows(&tx, "lookup_eppo_codes")?;
  stamp(&tx, meta_keys::EPPO_LAST_IMPORT, meta_keys::EPPO_COUNT, count)?;
  tx.commit()?;
  info!(count, "eppo codes imported");
  Ok(count)
}

pub fn import_bbch(conn: &mut Connection, rows: Vec<BbchStage>) -> Result<u64> {
  let tx = conn.transaction()?;
  tx.execute("DELETE FROM lookup_bbch_stages", [])?;
  {
    let mut stmt = tx.prepare(
      "INSERT OR REPLACE INTO lookup_bbch_stages
         (code, label, principal_stage, secondary_stage, definition, kind)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for row in rows.into_iter().filter_map(BbchStage::normalized) {
      stmt.execute(rusqlite::params![
        row.code,
        row.label,
        row.principal_stage,
        row.secondary_stage,
        row.definition,
        row.kind,
      ])?;
    }
  }
  let count = count_rows(&tx, "lookup_bbch_stages")?;
  stamp(&tx, meta_keys::BBCH_LAST_IMPORT, meta_keys::BBCH_COUNT, count)?;
  tx.commit()?;
  info!(count, "bbch stages imported");
  Ok(count)
}

fn stamp(conn: &Connection, time_key: &str, count_key: &str, count: u64) -> Result<()> {
  set_user_meta(conn, time_key, &Json::String(encode_dt(Utc::now())))?;
  set_user_meta(conn, count_key, &Json::from(count))
}

fn set_user_meta(conn: &Connection, key: &str, value: &Json) -> Result<()> {
  conn.execute(
    "INSERT INTO meta (key, value) VALUES (?1, ?2)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    rusqlite::params![key, encode_json(value)?],
  )?;
  Ok(())
}

fn user_meta_text(conn: &Connection, key: &str) -> Result<Option<String>> {
  let raw: Option<String> = conn
    .query_row("SELECT value FROM meta WHERE key = ?1", [key], |r| r.get(0))
    .optional()?;
  Ok(match raw.map(|text| serde_json::from_str::<Json>(&text)).transpose()? {
    Some(Json::String(text)) => Some(text),
    Some(Json::Null) | None => None,
    Some(other) => Some(other.to_string()),
  })
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
  let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
  Ok(count as u64)
}

// ─── Search ──────────────────────────────────────────────────────────────────

/// `%query%` for the match and `query%` for the prefix ranking; a missing
/// query matches everything.
fn patterns(search: &LookupSearch) -> (String, String) {
  match &search.query {
    Some(query) => (like_pattern(query), format!("{}%", escape_like(query))),
    None => ("%".to_owned(), "%".to_owned()),
  }
}

const EPPO_WHERE: &str = r"WHERE (fold_case(code) LIKE ?1 ESCAPE '\' OR fold_case(name) LIKE ?1 ESCAPE '\')
  AND (?2 IS NULL OR UPPER(IFNULL(language, '')) = ?2)";

pub fn search_eppo(conn: &Connection, search: &LookupSearch) -> Result<LookupPage<EppoCode>> {
  let search = search.normalized();
  let (matching, prefix) = patterns(&search);

  let total: i64 = conn.query_row(
    &format!("SELECT COUNT(*) FROM lookup_eppo_codes {EPPO_WHERE}"),
    rusqlite::params![matching, search.language],
    |r| r.get(0),
  )?;

  let mut stmt = conn.prepare(&format!(
    r"SELECT code, name, language, dtcode, dt_label, language_label, authority,
             name_de, name_en, name_la
      FROM lookup_eppo_codes
      {EPPO_WHERE}
      ORDER BY CASE WHEN fold_case(code) LIKE ?3 ESCAPE '\' THEN 0 ELSE 1 END, name, code
      LIMIT ?4 OFFSET ?5"
  ))?;
  let rows = stmt
    .query_map(
      rusqlite::params![matching, search.language, prefix, search.limit, search.offset],
      eppo_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(LookupPage { rows, total: total as u64 })
}

fn eppo_row(r: &Row<'_>) -> rusqlite::Result<EppoCode> {
  Ok(EppoCode {
    code:           r.get(0)?,
    name:           r.get::<_, Option<String>>(1)?.unwrap_or_default(),
    language:       r.get(2)?,
    dtcode:         r.get(3)?,
    dt_label:       r.get(4)?,
    language_label: r.get(5)?,
    authority:      r.get(6)?,
    name_de:        r.get(7)?,
    name_en:        r.get(8)?,
    name_la:        r.get(9)?,
  })
}

const BBCH_WHERE: &str =
  r"WHERE fold_case(code) LIKE ?1 ESCAPE '\' OR fold_case(label) LIKE ?1 ESCAPE '\'";

pub fn search_bbch(conn: &Connection, search: &LookupSearch) -> Result<LookupPage<BbchStage>> {
  let search = search.normalized();
  let (matching, _) = patterns(&search);

  let total: i64 = conn.query_row(
    &format!("SELECT COUNT(*) FROM lookup_bbch_stages {BBCH_WHERE}"),
    [&matching],
    |r| r.get(0),
  )?;

  let mut stmt = conn.prepare(&format!(
    "SELECT code, label, principal_stage, secondary_stage, definition, kind
     FROM lookup_bbch_stages
     {BBCH_WHERE}
     ORDER BY label, code
     LIMIT ?2 OFFSET ?3"
  ))?;
  let rows = stmt
    .query_map(rusqlite::params![matching, search.limit, search.offset], |r| {
      Ok(BbchStage {
        code:            r.get(0)?,
        label:           r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        principal_stage: r.get(2)?,
        secondary_stage: r.get(3)?,
        definition:      r.get(4)?,
        kind:            r.get(5)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(LookupPage { rows, total: total as u64 })
}

// ─── Stats ───────────────────────────────────────────────────────────────────

pub fn stats(conn: &Connection) -> Result<LookupStats> {
  Ok(LookupStats {
    eppo: LookupTableStats {
      count:       count_rows(conn, "lookup_eppo_codes")?,
      last_import: user_meta_text(conn, meta_keys::EPPO_LAST_IMPORT)?,
    },
    bbch: LookupTableStats {
      count:       count_rows(conn, "lookup_bbch_stages")?,
      last_import: user_meta_text(conn, meta_keys::BBCH_LAST_IMPORT)?,
    },
  })
}
