//! Subcommand implementations.

use std::{io::Write as _, path::Path};

use anyhow::Context as _;
use psm_core::{
  query::RegistryQuery, snapshot::SnapshotDocument, store::RegistryStore, sync::SyncOutcome,
};
use psm_service::{Service, rpc_router};
use psm_store_sqlite::SqliteStore;
use psm_sync::{Progress, Strategy, run_sync};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::settings::Settings;

async fn open(settings: &Settings) -> anyhow::Result<SqliteStore> {
  SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  let mut out = std::io::stdout().lock();
  serde_json::to_writer_pretty(&mut out, value)?;
  writeln!(out)?;
  Ok(())
}

// ─── Service ─────────────────────────────────────────────────────────────────

pub async fn serve(settings: &Settings) -> anyhow::Result<()> {
  let store = open(settings).await?;
  let strategy = Strategy::from_config(&settings.sync).context("failed to build sync client")?;
  let service = Service::init(store, strategy, settings.service());

  let app = rpc_router(service.handle());
  let address = settings.address();
  info!("Listening on http://{address}/rpc");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("shutting down");
    })
    .await
    .context("server error")?;

  service.close().await.context("failed to stop the service")?;
  Ok(())
}

pub async fn sync(settings: &Settings) -> anyhow::Result<()> {
  let store = open(settings).await?;
  let strategy = Strategy::from_config(&settings.sync).context("failed to build sync client")?;
  let progress = Progress::new(|event| {
    eprintln!("[{:>3}%] {:?}: {}", event.percent, event.step, event.message);
  });

  let outcome = run_sync(&store, &strategy, progress).await.context("sync failed")?;
  match &outcome {
    SyncOutcome::NoChange { fingerprint } => info!(%fingerprint, "already up to date"),
    SyncOutcome::Success { fingerprint, duration_ms, .. } => {
      info!(%fingerprint, duration_ms, "registry updated");
    }
  }
  print_json(&outcome)?;
  store.close().await?;
  Ok(())
}

// ─── Reads ───────────────────────────────────────────────────────────────────

pub async fn query(settings: &Settings, query: RegistryQuery) -> anyhow::Result<()> {
  let store = open(settings).await?;
  let products = store.query_registry(query).await?;
  info!(products = products.len(), "query finished");
  print_json(&products)
}

pub async fn migrate(settings: &Settings, diagnose: bool) -> anyhow::Result<()> {
  let store = open(settings).await?;
  let version = store.migrate().await?;
  info!(version, "store migrated");
  if diagnose {
    print_json(&store.diagnose_schema().await?)?;
  } else {
    println!("{version}");
  }
  Ok(())
}

pub async fn log(settings: &Settings, limit: u32) -> anyhow::Result<()> {
  let store = open(settings).await?;
  for entry in store.list_sync_log(limit).await? {
    println!(
      "{}  {}  {}  {}",
      entry.synced_at,
      if entry.ok { "ok  " } else { "FAIL" },
      entry.message.unwrap_or_default(),
      entry.payload_hash.unwrap_or_default(),
    );
  }
  Ok(())
}

// ─── Snapshot & backup ───────────────────────────────────────────────────────

pub async fn export(settings: &Settings, file: &Path) -> anyhow::Result<()> {
  let store = open(settings).await?;
  let doc = store.export_snapshot().await?;
  if file == Path::new("-") {
    return print_json(&doc);
  }
  let json = serde_json::to_vec_pretty(&doc)?;
  tokio::fs::write(file, json)
    .await
    .with_context(|| format!("failed to write {}", file.display()))?;
  info!(mediums = doc.mediums.len(), history = doc.history.len(), "snapshot exported");
  Ok(())
}

pub async fn import(settings: &Settings, file: &Path) -> anyhow::Result<()> {
  let raw = tokio::fs::read(file)
    .await
    .with_context(|| format!("failed to read {}", file.display()))?;
  let doc: SnapshotDocument = serde_json::from_slice(&raw).context("not a snapshot document")?;

  let store = open(settings).await?;
  store.import_snapshot(doc).await?;
  info!(file = %file.display(), "snapshot imported");
  store.close().await?;
  Ok(())
}

pub async fn backup(settings: &Settings, file: &Path) -> anyhow::Result<()> {
  let store = open(settings).await?;
  let image = store.export_database().await?;
  tokio::fs::write(file, &image)
    .await
    .with_context(|| format!("failed to write {}", file.display()))?;
  info!(bytes = image.len(), file = %file.display(), "store backed up");
  Ok(())
}

pub async fn restore(settings: &Settings, file: &Path) -> anyhow::Result<()> {
  let image = tokio::fs::read(file)
    .await
    .with_context(|| format!("failed to read {}", file.display()))?;
  let store = open(settings).await?;
  store.import_database(image).await?;
  info!(version = store.schema_version().await?, "store restored");
  store.close().await?;
  Ok(())
}
