//! Connection setup and versioned schema migrations.
//!
//! `PRAGMA user_version` records the last applied step. A step runs again
//! when its structure is missing even if the marker says otherwise; the marker
//! itself never goes down.

use rusqlite::{Connection, functions::FunctionFlags, types::ValueRef};
use tracing::{debug, info};

use crate::{Error, Result};

/// Per-connection settings plus the `fold_case` SQL function used for
/// case-insensitive matching beyond ASCII.
pub fn configure(conn: &Connection) -> Result<()> {
  conn.execute_batch(
    "PRAGMA journal_mode = WAL;
     PRAGMA foreign_keys = ON;
     PRAGMA synchronous = NORMAL;",
  )?;
  conn.create_scalar_function(
    "fold_case",
    1,
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| {
      Ok(match ctx.get_raw(0) {
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).to_lowercase()),
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
      })
    },
  )?;
  Ok(())
}

// ─── Migrations ──────────────────────────────────────────────────────────────

struct Migration {
  version: i64,
  name:    &'static str,
  /// Structural postcondition; a step whose structure is present and whose
  /// version is covered by the marker is skipped.
  applied: fn(&Connection) -> Result<bool>,
  apply:   fn(&Connection) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[
  Migration { version: 1, name: "core tables", applied: core_applied, apply: create_core },
  Migration {
    version: 2,
    name:    "registry tables",
    applied: registry_applied,
    apply:   reset_registry,
  },
  Migration {
    version: 3,
    name:    "payload store",
    applied: payloads_applied,
    apply:   create_payloads,
  },
  Migration {
    version: 4,
    name:    "medium approval number",
    applied: approval_number_applied,
    apply:   add_approval_number,
  },
  Migration {
    version: 5,
    name:    "enriched eppo lookup",
    applied: eppo_applied,
    apply:   add_eppo_columns,
  },
  Migration {
    version: 6,
    name:    "medium profiles",
    applied: profiles_applied,
    apply:   create_profiles,
  },
];

fn core_applied(conn: &Connection) -> Result<bool> { tables_exist(conn, CORE_TABLES) }

fn create_core(conn: &Connection) -> Result<()> { Ok(conn.execute_batch(CORE_SCHEMA)?) }

fn registry_applied(conn: &Connection) -> Result<bool> {
  Ok(tables_exist(conn, REGISTRY_TABLES)? && tables_exist(conn, &["bvl_sync_log"])?)
}

fn payloads_applied(conn: &Connection) -> Result<bool> {
  tables_exist(conn, &["bvl_api_payloads"])
}

fn create_payloads(conn: &Connection) -> Result<()> {
  Ok(conn.execute_batch(PAYLOAD_SCHEMA)?)
}

fn approval_number_applied(conn: &Connection) -> Result<bool> {
  has_column(conn, "mediums", "zulassungsnummer")
}

fn add_approval_number(conn: &Connection) -> Result<()> {
  add_column(conn, "mediums", "zulassungsnummer", "TEXT")
}

fn eppo_applied(conn: &Connection) -> Result<bool> {
  for column in EPPO_COLUMNS {
    if !has_column(conn, "lookup_eppo_codes", column)? {
      return Ok(false);
    }
  }
  Ok(true)
}

fn add_eppo_columns(conn: &Connection) -> Result<()> {
  for column in EPPO_COLUMNS {
    add_column(conn, "lookup_eppo_codes", column, "TEXT")?;
  }
  Ok(())
}

fn profiles_applied(conn: &Connection) -> Result<bool> {
  tables_exist(conn, &["medium_profiles"])
}

fn create_profiles(conn: &Connection) -> Result<()> {
  Ok(conn.execute_batch(PROFILE_SCHEMA)?)
}

/// The version a fully migrated store reports.
pub const TARGET_VERSION: i64 = 6;

/// Bring the store up to [`TARGET_VERSION`]. Safe to call on every startup.
pub fn ensure_schema(conn: &mut Connection) -> Result<i64> {
  for step in MIGRATIONS {
    let current = user_version(conn)?;
    if current >= step.version && (step.applied)(conn)? {
      debug!(version = step.version, name = step.name, "migration already applied");
      continue;
    }

    info!(version = step.version, name = step.name, current, "applying migration");
    run_step(conn, step, current).map_err(|e| Error::Migration {
      version: step.version,
      name:    step.name,
      source:  Box::new(e),
    })?;
  }
  user_version(conn)
}

fn run_step(conn: &mut Connection, step: &Migration, current: i64) -> Result<()> {
  let tx = conn.transaction()?;
  (step.apply)(&tx)?;
  if current < step.version {
    tx.pragma_update(None, "user_version", step.version)?;
  }
  tx.commit()?;
  Ok(())
}

pub fn user_version(conn: &Connection) -> Result<i64> {
  Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

// ─── Introspection ───────────────────────────────────────────────────────────

pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
  let sql = format!(
    "SELECT COUNT(*) FROM {schema}.sqlite_master WHERE type = 'table' AND name = ?1"
  );
  let count: i64 = conn.query_row(&sql, [table], |r| r.get(0))?;
  Ok(count > 0)
}

fn tables_exist(conn: &Connection, tables: &[&str]) -> Result<bool> {
  for table in tables {
    if !table_exists(conn, "main", table)? {
      return Ok(false);
    }
  }
  Ok(true)
}

/// Column names of `schema.table`, in declaration order.
pub fn columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
  let mut stmt = conn.prepare(&format!("PRAGMA {schema}.table_info({})", quote_ident(table)))?;
  let names = stmt
    .query_map([], |row| row.get::<_, String>(1))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(names)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
  Ok(columns(conn, "main", table)?.iter().any(|c| c == column))
}

fn add_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
  if has_column(conn, table, column)? {
    return Ok(());
  }
  conn.execute_batch(&format!(
    "ALTER TABLE {} ADD COLUMN {} {decl}",
    quote_ident(table),
    quote_ident(column)
  ))?;
  Ok(())
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

/// Plain identifiers only: ASCII letters, digits and underscores.
pub fn is_plain_ident(name: &str) -> bool {
  !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─── DDL ─────────────────────────────────────────────────────────────────────

const CORE_TABLES: &[&str] = &[
  "meta",
  "measurement_methods",
  "mediums",
  "history",
  "history_items",
  "lookup_eppo_codes",
  "lookup_bbch_stages",
];

const CORE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL          -- JSON
);

CREATE TABLE IF NOT EXISTS measurement_methods (
    id       TEXT PRIMARY KEY,
    label    TEXT,
    type     TEXT,
    unit     TEXT,
    requires TEXT,               -- JSON
    config   TEXT                -- JSON
);

CREATE TABLE IF NOT EXISTS mediums (
    id        TEXT PRIMARY KEY,
    name      TEXT,
    unit      TEXT,
    method_id TEXT,
    value     REAL
);

CREATE TABLE IF NOT EXISTS history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at  TEXT NOT NULL,
    header_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS history_items (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    history_id   INTEGER NOT NULL REFERENCES history(id) ON DELETE CASCADE,
    medium_id    TEXT NOT NULL DEFAULT '',
    payload_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lookup_eppo_codes (
    code      TEXT PRIMARY KEY,
    name      TEXT,
    language  TEXT,
    dtcode    TEXT,
    preferred INTEGER
);

CREATE TABLE IF NOT EXISTS lookup_bbch_stages (
    code            TEXT PRIMARY KEY,
    label           TEXT,
    principal_stage INTEGER,
    secondary_stage INTEGER,
    definition      TEXT,
    kind            TEXT
);

CREATE INDEX IF NOT EXISTS mediums_method_idx      ON mediums(method_id);
CREATE INDEX IF NOT EXISTS history_created_idx     ON history(created_at);
CREATE INDEX IF NOT EXISTS history_items_hist_idx  ON history_items(history_id);
CREATE INDEX IF NOT EXISTS lookup_eppo_name_idx    ON lookup_eppo_codes(name);
";

/// Dataset cache tables, children first.
pub const REGISTRY_TABLES: &[&str] = &[
  "bvl_awg_wartezeit",
  "bvl_awg_aufwand",
  "bvl_awg_schadorg",
  "bvl_awg_kultur",
  "bvl_awg",
  "bvl_mittel",
  "bvl_lookup_kultur",
  "bvl_lookup_schadorg",
  "bvl_meta",
];

/// Drop and rebuild the dataset cache tables. User tables and an existing
/// sync log are left alone.
fn reset_registry(conn: &Connection) -> Result<()> {
  for table in REGISTRY_TABLES {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
  }
  conn.execute_batch(REGISTRY_SCHEMA)?;
  Ok(())
}

const REGISTRY_SCHEMA: &str = "
CREATE TABLE bvl_meta (
    key   TEXT PRIMARY KEY,
    value TEXT
);

CREATE TABLE bvl_mittel (
    kennr          TEXT PRIMARY KEY,
    name           TEXT,
    formulierung   TEXT,
    zul_erstmalig  TEXT,
    zul_ende       TEXT,
    geringes_risiko INTEGER NOT NULL DEFAULT 0,
    payload_json   TEXT
);

CREATE TABLE bvl_awg (
    awg_id         TEXT PRIMARY KEY,
    kennr          TEXT NOT NULL REFERENCES bvl_mittel(kennr) ON DELETE CASCADE,
    status_json    TEXT,
    zulassungsende TEXT
);

CREATE TABLE bvl_awg_kultur (
    awg_id      TEXT NOT NULL REFERENCES bvl_awg(awg_id) ON DELETE CASCADE,
    kultur      TEXT NOT NULL,
    ausgenommen INTEGER NOT NULL DEFAULT 0,
    sortier_nr  INTEGER,
    PRIMARY KEY (awg_id, kultur, ausgenommen)
);

CREATE TABLE bvl_awg_schadorg (
    awg_id      TEXT NOT NULL REFERENCES bvl_awg(awg_id) ON DELETE CASCADE,
    schadorg    TEXT NOT NULL,
    ausgenommen INTEGER NOT NULL DEFAULT 0,
    sortier_nr  INTEGER,
    PRIMARY KEY (awg_id, schadorg, ausgenommen)
);

CREATE TABLE bvl_awg_aufwand (
    awg_id            TEXT NOT NULL REFERENCES bvl_awg(awg_id) ON DELETE CASCADE,
    aufwand_bedingung TEXT NOT NULL,
    sortier_nr        INTEGER NOT NULL DEFAULT 0,
    mittel_menge      REAL,
    mittel_einheit    TEXT,
    wasser_menge      REAL,
    wasser_einheit    TEXT,
    payload_json      TEXT,
    PRIMARY KEY (awg_id, aufwand_bedingung, sortier_nr)
);

-- tage holds a day count or one of the codes F / N.
CREATE TABLE bvl_awg_wartezeit (
    awg_wartezeit_nr  INTEGER NOT NULL,
    awg_id            TEXT NOT NULL REFERENCES bvl_awg(awg_id) ON DELETE CASCADE,
    kultur            TEXT,
    sortier_nr        INTEGER,
    tage              INTEGER,
    bemerkung_kode    TEXT,
    anwendungsbereich TEXT,
    erlaeuterung      TEXT,
    payload_json      TEXT,
    PRIMARY KEY (awg_wartezeit_nr, awg_id)
);

CREATE TABLE bvl_lookup_kultur (
    code  TEXT PRIMARY KEY,
    label TEXT
);

CREATE TABLE bvl_lookup_schadorg (
    code  TEXT PRIMARY KEY,
    label TEXT
);

CREATE TABLE IF NOT EXISTS bvl_sync_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    synced_at    TEXT NOT NULL,
    ok           INTEGER NOT NULL,
    message      TEXT,
    payload_hash TEXT
);

CREATE INDEX bvl_awg_kennr_idx        ON bvl_awg(kennr);
CREATE INDEX bvl_awg_kultur_code_idx  ON bvl_awg_kultur(kultur);
CREATE INDEX bvl_awg_schadorg_code_idx ON bvl_awg_schadorg(schadorg);
CREATE INDEX bvl_awg_aufwand_awg_idx  ON bvl_awg_aufwand(awg_id);
CREATE INDEX bvl_awg_wartezeit_awg_idx ON bvl_awg_wartezeit(awg_id);
CREATE INDEX bvl_mittel_name_idx      ON bvl_mittel(name);
";

const PAYLOAD_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bvl_api_payloads (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    endpoint      TEXT NOT NULL,
    key           TEXT NOT NULL,
    primary_ref   TEXT,
    secondary_ref TEXT,
    tertiary_ref  TEXT,
    payload_json  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS bvl_api_payloads_endpoint_idx  ON bvl_api_payloads(endpoint);
CREATE INDEX IF NOT EXISTS bvl_api_payloads_primary_idx   ON bvl_api_payloads(key, primary_ref);
CREATE INDEX IF NOT EXISTS bvl_api_payloads_secondary_idx ON bvl_api_payloads(key, secondary_ref);
CREATE INDEX IF NOT EXISTS bvl_api_payloads_ref_idx       ON bvl_api_payloads(primary_ref);
";

const EPPO_COLUMNS: &[&str] =
  &["dt_label", "language_label", "authority", "name_de", "name_en", "name_la"];

const PROFILE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS medium_profiles (
    id              TEXT PRIMARY KEY,
    name            TEXT,
    medium_ids_json TEXT NOT NULL DEFAULT '[]'
);
";

#[cfg(test)]
mod tests {
  use super::*;

  fn fresh() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    configure(&conn).unwrap();
    conn
  }

  #[test]
  fn fresh_store_reaches_target_version() {
    let mut conn = fresh();
    assert_eq!(ensure_schema(&mut conn).unwrap(), TARGET_VERSION);
    assert!(has_column(&conn, "mediums", "zulassungsnummer").unwrap());
    assert!(has_column(&conn, "lookup_eppo_codes", "name_la").unwrap());
    assert!(table_exists(&conn, "main", "medium_profiles").unwrap());
  }

  #[test]
  fn stale_marker_reruns_missing_step() {
    let mut conn = fresh();
    ensure_schema(&mut conn).unwrap();
    conn.execute_batch("DROP TABLE medium_profiles").unwrap();

    assert_eq!(ensure_schema(&mut conn).unwrap(), TARGET_VERSION);
    assert!(table_exists(&conn, "main", "medium_profiles").unwrap());
  }

  #[test]
  fn marker_is_never_lowered() {
    let mut conn = fresh();
    ensure_schema(&mut conn).unwrap();
    conn.pragma_update(None, "user_version", 9).unwrap();

    assert_eq!(ensure_schema(&mut conn).unwrap(), 9);
  }

  #[test]
  fn legacy_store_keeps_user_data_and_sync_log() {
    let mut conn = fresh();
    conn
      .execute_batch(
        "CREATE TABLE mediums (id TEXT PRIMARY KEY, name TEXT, unit TEXT,
                               method_id TEXT, value REAL);
         INSERT INTO mediums (id, name) VALUES ('m1', 'Wasser');
         CREATE TABLE bvl_sync_log (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                    synced_at TEXT NOT NULL, ok INTEGER NOT NULL,
                                    message TEXT, payload_hash TEXT);
         INSERT INTO bvl_sync_log (synced_at, ok, message) VALUES ('2023-01-01', 1, 'old');
         CREATE TABLE bvl_mittel (kennr TEXT PRIMARY KEY);
         INSERT INTO bvl_mittel VALUES ('stale');
         PRAGMA user_version = 1;",
      )
      .unwrap();

    ensure_schema(&mut conn).unwrap();

    let name: String = conn
      .query_row("SELECT name FROM mediums WHERE id = 'm1'", [], |r| r.get(0))
      .unwrap();
    assert_eq!(name, "Wasser");
    let logs: i64 = conn
      .query_row("SELECT COUNT(*) FROM bvl_sync_log", [], |r| r.get(0))
      .unwrap();
    assert_eq!(logs, 1);
    let products: i64 = conn
      .query_row("SELECT COUNT(*) FROM bvl_mittel", [], |r| r.get(0))
      .unwrap();
    assert_eq!(products, 0);
    assert!(has_column(&conn, "bvl_mittel", "payload_json").unwrap());
  }
}
