//! Error types for `psm-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed caller input, rejected before anything is written.
  #[error("validation error: {0}")]
  Validation(String),

  #[error("unknown entity kind: {0:?}")]
  UnknownEntityKind(String),

  #[error("manifest is invalid: {0}")]
  InvalidManifest(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
