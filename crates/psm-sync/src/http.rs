//! HTTP implementation of [`DatasetSource`] and [`RegistryApi`].

use futures::StreamExt as _;
use psm_core::sync::Manifest;
use reqwest::{Client, Response, header::ACCEPT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
  Error, Result, SyncConfig,
  progress::ByteProgress,
  source::{DatasetSource, RegistryApi},
};

/// Async HTTP client for the dataset host and the registry API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpClient {
  client: Client,
  config: SyncConfig,
}

impl HttpClient {
  pub fn new(config: SyncConfig) -> Result<Self> {
    let client = Client::builder()
      .user_agent(concat!("psm/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| Error::network(&config.manifest_url, e))?;
    Ok(Self { client, config })
  }

  pub fn config(&self) -> &SyncConfig { &self.config }
}

fn check_status(url: &str, resp: Response) -> Result<Response> {
  let status = resp.status();
  if status.is_success() {
    Ok(resp)
  } else {
    Err(Error::Http { status: status.as_u16(), url: url.to_owned() })
  }
}

// ─── Dataset host ────────────────────────────────────────────────────────────

impl DatasetSource for HttpClient {
  fn manifest_url(&self) -> &str { &self.config.manifest_url }

  async fn fetch_manifest(&self) -> Result<Manifest> {
    let url = self.config.manifest_url.as_str();
    let resp = self
      .client
      .get(url)
      .header(ACCEPT, "application/json")
      .timeout(self.config.request_timeout())
      .send()
      .await
      .map_err(|e| Error::network(url, e))?;
    let body = check_status(url, resp)?
      .bytes()
      .await
      .map_err(|e| Error::network(url, e))?;

    let manifest = Manifest::from_json(&body)?;
    info!(version = %manifest.version, files = manifest.files.len(), "manifest loaded");
    Ok(manifest)
  }

  async fn download(&self, url: String, progress: ByteProgress) -> Result<Vec<u8>> {
    let resp = self
      .client
      .get(&url)
      .timeout(self.config.download_timeout())
      .send()
      .await
      .map_err(|e| Error::Download(format!("{url}: {e}")))?;
    let resp = check_status(&url, resp)?;

    let total = resp.content_length();
    let mut data = Vec::with_capacity(total.unwrap_or(0) as usize);
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
      let chunk = chunk.map_err(|e| Error::Download(format!("{url}: {e}")))?;
      data.extend_from_slice(&chunk);
      progress(data.len() as u64, total);
    }

    info!(url = %url, bytes = data.len(), "dataset downloaded");
    Ok(data)
  }
}

// ─── Registry API ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Page {
  #[serde(default)]
  items: Vec<Value>,
}

impl RegistryApi for HttpClient {
  async fn fetch_page(
    &self,
    endpoint: String,
    params: Vec<(String, String)>,
    limit: u32,
    offset: u32,
  ) -> Result<Vec<Value>> {
    let url = format!("{}/{endpoint}", self.config.api_base_url.trim_end_matches('/'));
    let resp = self
      .client
      .get(&url)
      .header(ACCEPT, "application/json")
      .query(&params)
      .query(&[("limit", limit), ("offset", offset)])
      .timeout(self.config.request_timeout())
      .send()
      .await
      .map_err(|e| Error::network(&url, e))?;

    let page: Page = check_status(&url, resp)?
      .json()
      .await
      .map_err(|e| Error::Download(format!("{url}: unreadable page: {e}")))?;
    debug!(endpoint = %endpoint, offset, items = page.items.len(), "page fetched");
    Ok(page.items)
  }
}
