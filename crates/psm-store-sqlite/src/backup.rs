//! Whole-store binary export and import through the SQLite backup API.

use rusqlite::{
  Connection, DatabaseName,
  backup::Progress,
};
use tracing::info;

use crate::{Error, Result, dataset::check_sqlite_image, schema};

pub fn export(conn: &Connection) -> Result<Vec<u8>> {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("export.sqlite");
  conn.backup(DatabaseName::Main, &path, None)?;
  let image = std::fs::read(&path)?;
  info!(bytes = image.len(), "store exported");
  Ok(image)
}

/// Replace the live store with `image` after checking it, then bring the
/// result up to the current schema.
pub fn import(conn: &mut Connection, image: &[u8]) -> Result<()> {
  check_sqlite_image(image)?;

  let dir = tempfile::tempdir()?;
  let path = dir.path().join("import.sqlite");
  std::fs::write(&path, image)?;

  {
    let candidate = Connection::open(&path)?;
    let verdict: String = candidate.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    if verdict != "ok" {
      return Err(Error::Integrity(verdict));
    }
  }

  conn.restore(DatabaseName::Main, &path, None::<fn(Progress)>)?;
  let version = schema::ensure_schema(conn)?;
  info!(bytes = image.len(), version, "store imported");
  Ok(())
}
