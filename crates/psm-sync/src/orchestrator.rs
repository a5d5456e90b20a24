//! Drives a [`SyncStrategy`] against a [`RegistryStore`].

use std::time::Instant;

use chrono::Utc;
use psm_core::{
  store::RegistryStore,
  sync::{NewSyncLogEntry, SyncOutcome, SyncStamp, SyncStep, meta_keys},
};
use tracing::{info, instrument, warn};

use crate::{
  Error, Result,
  progress::Progress,
  strategy::{DatasetPayload, SyncStrategy},
};

/// Run one sync.
///
/// The strategy previews the remote side first. A fingerprint equal to the
/// stored `lastSyncHash` ends the run with [`SyncOutcome::NoChange`] and a
/// log entry; nothing else is written. Otherwise the dataset is fetched and
/// imported in a single store transaction.
///
/// On failure the store keeps its previous content, the error is recorded in
/// the meta table and the sync log, and the error is returned.
#[instrument(skip_all, fields(strategy = strategy.label()))]
pub async fn run_sync<S, T>(store: &S, strategy: &T, progress: Progress) -> Result<SyncOutcome>
where
  S: RegistryStore,
  T: SyncStrategy,
{
  let started = Instant::now();
  progress.report(SyncStep::Start, 0, format!("starting {} sync", strategy.label()));

  let mut fingerprint = None;
  match attempt(store, strategy, &progress, &mut fingerprint, started).await {
    Ok(outcome) => Ok(outcome),
    Err(err) => {
      let message = err.to_string();
      warn!(error = %message, "sync failed");
      if let Err(log_err) = store.record_sync_failure(message.clone(), fingerprint).await {
        warn!(error = %log_err, "could not record sync failure");
      }
      progress.report(SyncStep::Error, 0, message);
      Err(err)
    }
  }
}

async fn attempt<S, T>(
  store: &S,
  strategy: &T,
  progress: &Progress,
  fingerprint: &mut Option<String>,
  started: Instant,
) -> Result<SyncOutcome>
where
  S: RegistryStore,
  T: SyncStrategy,
{
  let preview = strategy.preview(progress.clone()).await?;
  *fingerprint = Some(preview.fingerprint.clone());

  let previous = store
    .get_meta(meta_keys::LAST_SYNC_HASH.to_owned())
    .await
    .map_err(Error::store)?;
  if previous.as_deref() == Some(preview.fingerprint.as_str()) {
    store
      .append_sync_log(NewSyncLogEntry {
        ok:           true,
        message:      format!("no-change ({})", strategy.label()),
        payload_hash: Some(preview.fingerprint.clone()),
      })
      .await
      .map_err(Error::store)?;
    info!(fingerprint = %preview.fingerprint, "dataset unchanged");
    progress.report(SyncStep::Done, 100, "already up to date");
    return Ok(SyncOutcome::NoChange { fingerprint: preview.fingerprint });
  }

  let stamp = SyncStamp {
    fingerprint: preview.fingerprint.clone(),
    data_source: preview.data_source,
    api_stand:   preview.api_stand,
    counts:      preview.counts,
    strategy:    strategy.label().to_owned(),
    synced_at:   Utc::now(),
  };

  let payload = strategy.fetch(preview.staged, progress.clone()).await?;

  progress.report(SyncStep::Import, 70, "importing dataset");
  let report = match payload {
    DatasetPayload::Image(image) => store.import_dataset_image(image, stamp).await,
    DatasetPayload::Records(records) => store.import_records(records, stamp).await,
  }
  .map_err(Error::store)?;

  progress.report(SyncStep::Verify, 95, format!("{} rows imported", report.total()));
  let duration_ms = started.elapsed().as_millis() as u64;
  info!(fingerprint = %preview.fingerprint, rows = report.total(), duration_ms, "sync complete");
  progress.report(SyncStep::Done, 100, "sync complete");

  Ok(SyncOutcome::Success { fingerprint: preview.fingerprint, counts: report.counts, duration_ms })
}
