use thiserror::Error;

/// Errors raised while fetching, unpacking or importing a dataset.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] psm_core::Error),

  #[error("network error for {url}: {message}")]
  Network { url: String, message: String },

  #[error("HTTP {status} from {url}")]
  Http { status: u16, url: String },

  #[error("invalid manifest: {0}")]
  Manifest(String),

  #[error("download failed: {0}")]
  Download(String),

  #[error("could not unpack {format} dataset: {message}")]
  Decompress { format: &'static str, message: String },

  #[error("checksum mismatch: expected {expected}, got {actual}")]
  Checksum { expected: String, actual: String },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl Error {
  /// Wrap a store backend error.
  pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(err))
  }

  pub(crate) fn network(url: &str, err: impl std::fmt::Display) -> Self {
    Self::Network { url: url.to_owned(), message: err.to_string() }
  }

  /// Transport failures and server-side (5xx) responses are worth another
  /// attempt; everything else is final.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Network { .. } => true,
      Self::Http { status, .. } => *status >= 500,
      _ => false,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
