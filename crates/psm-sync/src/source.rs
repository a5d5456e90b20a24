//! The remote collaborators a sync talks to.
//!
//! [`crate::HttpClient`] implements both traits; tests substitute in-memory
//! fakes.

use std::future::Future;

use psm_core::sync::Manifest;
use serde_json::Value;

use crate::{Result, progress::ByteProgress};

/// Publishes a manifest and the dataset files it lists.
pub trait DatasetSource: Send + Sync {
  /// The URL the manifest is served from; relative file locations resolve
  /// against it.
  fn manifest_url(&self) -> &str;

  /// Fetch and validate the current manifest.
  fn fetch_manifest(&self) -> impl Future<Output = Result<Manifest>> + Send + '_;

  /// Download the file at `url`, reporting received bytes to `progress`.
  fn download(
    &self,
    url: String,
    progress: ByteProgress,
  ) -> impl Future<Output = Result<Vec<u8>>> + Send + '_;
}

/// The paginated upstream registry API.
pub trait RegistryApi: Send + Sync {
  /// One page of `endpoint`: the `items` array of the response.
  fn fetch_page(
    &self,
    endpoint: String,
    params: Vec<(String, String)>,
    limit: u32,
    offset: u32,
  ) -> impl Future<Output = Result<Vec<Value>>> + Send + '_;
}
