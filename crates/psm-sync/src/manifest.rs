//! Sync from the published, pre-built SQLite dataset.

use psm_core::sync::SyncStep;
use tracing::info;

use crate::{
  Error, Result,
  archive::{decompress, resolve_file_url, select_file, verify_sha256},
  progress::Progress,
  source::DatasetSource,
  strategy::{DatasetPayload, Preview, Staged, SyncStrategy},
};

/// Fetches the manifest, downloads the preferred dataset file and unpacks it.
pub struct ManifestSync<S> {
  source: S,
}

impl<S: DatasetSource> ManifestSync<S> {
  pub fn new(source: S) -> Self { Self { source } }
}

impl<S: DatasetSource> SyncStrategy for ManifestSync<S> {
  fn label(&self) -> &'static str { "manifest" }

  async fn preview(&self, progress: Progress) -> Result<Preview> {
    progress.report(SyncStep::Manifest, 5, "fetching manifest");
    let manifest = self.source.fetch_manifest().await?;
    progress.report(SyncStep::Manifest, 10, format!("manifest {}", manifest.version));

    Ok(Preview {
      fingerprint: manifest.fingerprint().to_owned(),
      data_source: manifest.source_label(),
      api_stand:   manifest.api_stand().map(str::to_owned),
      counts:      manifest.table_counts(),
      staged:      Staged::Manifest(manifest),
    })
  }

  async fn fetch(&self, staged: Staged, progress: Progress) -> Result<DatasetPayload> {
    let Staged::Manifest(manifest) = staged else {
      return Err(Error::Manifest("preview was not produced by the manifest strategy".into()));
    };

    let (file, format) = select_file(&manifest)?;
    let location = file
      .location()
      .ok_or_else(|| Error::Manifest("dataset file without a location".into()))?;
    let url = resolve_file_url(self.source.manifest_url(), manifest.base_url.as_deref(), location)?;

    progress.report(SyncStep::Download, 10, format!("downloading {} dataset", format.label()));
    let data = self
      .source
      .download(url.clone(), progress.bytes(SyncStep::Download, 10, 60))
      .await?;
    if let Some(expected) = file.sha256.as_deref().filter(|s| !s.trim().is_empty()) {
      verify_sha256(&data, expected)?;
    }
    info!(url = %url, format = format.label(), bytes = data.len(), "dataset fetched");

    progress.report(SyncStep::Decompress, 60, "unpacking dataset");
    let image = tokio::task::spawn_blocking(move || decompress(format, data)).await??;
    progress.report(SyncStep::Decompress, 70, format!("{} bytes unpacked", image.len()));

    Ok(DatasetPayload::Image(image))
  }
}
