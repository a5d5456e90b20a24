//! Sync straight from the paginated registry API.
//!
//! Every relational endpoint, both code lists and one endpoint per
//! [`EntityKind`] are fetched in full. The fingerprint is derived from the
//! fetched items, so an unchanged registry short-circuits before anything is
//! written.

use std::{collections::BTreeMap, time::Duration, time::Instant};

use psm_core::{payload::EntityKind, sync::SyncStep};
use serde_json::{Value, json};
use strum::IntoEnumIterator as _;
use tracing::{info, warn};

use crate::{
  Error, Result, SyncConfig,
  archive::sha256_hex,
  progress::{Progress, scale},
  source::RegistryApi,
  strategy::{DatasetPayload, Preview, Staged, SyncStrategy},
  transform::{self, CROP_LOOKUP, PEST_LOOKUP},
};

const RELATIONAL: &[&str] =
  &["mittel", "awg", "awg_kultur", "awg_schadorg", "awg_aufwand", "awg_wartezeit"];

/// Code list numbers of the `kode` endpoint.
const CROP_CODE_LIST: u32 = 948;
const PEST_CODE_LIST: u32 = 947;

/// One collection to fetch: the key it is stored under, the API endpoint and
/// any fixed query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
  pub key:      String,
  pub endpoint: String,
  pub params:   Vec<(String, String)>,
}

impl EndpointSpec {
  fn plain(name: &str) -> Self {
    Self { key: name.to_owned(), endpoint: name.to_owned(), params: Vec::new() }
  }

  fn code_list(key: &str, list: u32) -> Self {
    Self {
      key:      key.to_owned(),
      endpoint: "kode".to_owned(),
      params:   vec![
        ("kodeliste".to_owned(), list.to_string()),
        ("sprache".to_owned(), "DE".to_owned()),
      ],
    }
  }
}

/// Everything a full endpoint sync fetches, in fetch order.
pub fn endpoint_specs() -> Vec<EndpointSpec> {
  RELATIONAL
    .iter()
    .map(|name| EndpointSpec::plain(name))
    .chain([
      EndpointSpec::code_list(CROP_LOOKUP, CROP_CODE_LIST),
      EndpointSpec::code_list(PEST_LOOKUP, PEST_CODE_LIST),
    ])
    .chain(EntityKind::iter().map(|kind| EndpointSpec::plain(kind.key())))
    .collect()
}

/// SHA-256 per collection over its canonical JSON, then SHA-256 over the
/// `"{key}:{hash}\n"` lines in key order.
pub fn dataset_fingerprint(datasets: &BTreeMap<String, Vec<Value>>) -> Result<String> {
  let mut lines = String::new();
  for (key, items) in datasets {
    let hash = sha256_hex(&serde_json::to_vec(items)?);
    lines.push_str(&format!("{key}:{hash}\n"));
  }
  Ok(sha256_hex(lines.as_bytes()))
}

// ─── Strategy ────────────────────────────────────────────────────────────────

pub struct EndpointSync<A> {
  api:         A,
  specs:       Vec<EndpointSpec>,
  source:      String,
  page_size:   u32,
  max_retries: u32,
  backoff:     Duration,
}

impl<A: RegistryApi> EndpointSync<A> {
  pub fn new(api: A) -> Self { Self::from_config(api, &SyncConfig::default()) }

  pub fn from_config(api: A, config: &SyncConfig) -> Self {
    Self {
      api,
      specs: endpoint_specs(),
      source: format!("bvl-api@{}", config.api_base_url),
      page_size: config.page_size.max(1),
      max_retries: config.max_retries,
      backoff: config.retry_backoff(),
    }
  }

  /// Restrict the fetch to `specs`.
  pub fn with_specs(mut self, specs: Vec<EndpointSpec>) -> Self {
    self.specs = specs;
    self
  }

  /// All pages of one collection.
  pub async fn fetch_collection(&self, spec: &EndpointSpec) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    let mut offset = 0;
    loop {
      let page = self.fetch_page(spec, offset).await?;
      let count = page.len();
      items.extend(page);
      if count < self.page_size as usize {
        return Ok(items);
      }
      offset += self.page_size;
    }
  }

  /// One page, retried with linear backoff on transport errors and 5xx.
  async fn fetch_page(&self, spec: &EndpointSpec, offset: u32) -> Result<Vec<Value>> {
    let mut attempt = 0;
    loop {
      let result = self
        .api
        .fetch_page(spec.endpoint.clone(), spec.params.clone(), self.page_size, offset)
        .await;
      match result {
        Err(err) if err.is_retryable() && attempt < self.max_retries => {
          attempt += 1;
          warn!(endpoint = %spec.key, offset, attempt, error = %err, "page fetch failed, retrying");
          tokio::time::sleep(self.backoff * attempt).await;
        }
        other => return other,
      }
    }
  }
}

impl<A: RegistryApi> SyncStrategy for EndpointSync<A> {
  fn label(&self) -> &'static str { "endpoints" }

  async fn preview(&self, progress: Progress) -> Result<Preview> {
    let total = self.specs.len() as u64;
    let mut datasets = BTreeMap::new();

    for (index, spec) in self.specs.iter().enumerate() {
      progress.report(
        SyncStep::Fetch,
        scale(10, 80, index as u64, total),
        format!("fetching {}", spec.key),
      );
      let started = Instant::now();
      let items = self
        .fetch_collection(spec)
        .await
        .map_err(|e| annotate(&spec.key, e))?;
      info!(
        endpoint = %spec.key,
        items = items.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "endpoint fetched"
      );
      datasets.insert(spec.key.clone(), items);
    }

    let counts: serde_json::Map<String, Value> = datasets
      .iter()
      .map(|(key, items)| (key.clone(), json!(items.len())))
      .collect();

    Ok(Preview {
      fingerprint: dataset_fingerprint(&datasets)?,
      data_source: self.source.clone(),
      api_stand:   None,
      counts:      Value::Object(counts),
      staged:      Staged::Endpoints(datasets),
    })
  }

  async fn fetch(&self, staged: Staged, progress: Progress) -> Result<DatasetPayload> {
    let Staged::Endpoints(datasets) = staged else {
      return Err(Error::Manifest("preview was not produced by the endpoint strategy".into()));
    };
    progress.report(SyncStep::Transform, 80, "normalizing records");
    let records = transform::build_records(&datasets);
    info!(
      products = records.products.len(),
      applications = records.applications.len(),
      payloads = records.payloads.len(),
      "records normalized"
    );
    Ok(DatasetPayload::Records(records))
  }
}

/// Prefix the endpoint to errors that do not already name a URL.
fn annotate(key: &str, err: Error) -> Error {
  match err {
    Error::Download(message) => Error::Download(format!("{key}: {message}")),
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn specs_cover_relations_lookups_and_payload_kinds() {
    let specs = endpoint_specs();
    assert_eq!(specs.len(), RELATIONAL.len() + 2 + EntityKind::iter().count());
    assert_eq!(specs[0].endpoint, "mittel");

    let crops = specs.iter().find(|s| s.key == CROP_LOOKUP).unwrap();
    assert_eq!(crops.endpoint, "kode");
    assert!(crops.params.contains(&("kodeliste".to_owned(), "948".to_owned())));
    assert!(specs.iter().any(|s| s.endpoint == "awg_wartezeit_ausg_kultur"));
  }

  #[test]
  fn fingerprint_tracks_content_not_insertion_order() {
    let mut a = BTreeMap::new();
    a.insert("mittel".to_owned(), vec![json!({ "kennr": "1", "mittelname": "A" })]);
    a.insert("awg".to_owned(), vec![]);

    let mut b = BTreeMap::new();
    b.insert("awg".to_owned(), vec![]);
    b.insert("mittel".to_owned(), vec![json!({ "mittelname": "A", "kennr": "1" })]);
    assert_eq!(dataset_fingerprint(&a).unwrap(), dataset_fingerprint(&b).unwrap());

    b.insert("mittel".to_owned(), vec![json!({ "kennr": "1", "mittelname": "B" })]);
    assert_ne!(dataset_fingerprint(&a).unwrap(), dataset_fingerprint(&b).unwrap());
  }
}
