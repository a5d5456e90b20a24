//! Error type for `psm-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] psm_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A schema step failed and was rolled back; the store is not usable.
  #[error("migration {version} ({name}) failed: {source}")]
  Migration {
    version: i64,
    name:    &'static str,
    #[source]
    source:  Box<Error>,
  },

  /// Input rejected before anything was written.
  #[error("validation error: {0}")]
  Validation(String),

  /// Post-import verification failed; nothing was committed.
  #[error("integrity check failed: {0}")]
  Integrity(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
