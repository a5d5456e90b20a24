//! The background task that owns the store.
//!
//! Requests are executed strictly one at a time in arrival order. Each reply
//! carries the request's id and is handed to the reply router, which matches
//! it to the waiting caller.

use std::time::Instant;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use psm_core::{store::RegistryStore, sync::ProgressEvent};
use psm_sync::{Progress, SyncStrategy, run_sync};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
  Result, ServiceError,
  rpc::{Envelope, Reply, Request},
};

pub(crate) struct Worker<S, T> {
  pub store:    S,
  pub strategy: T,
  pub events:   broadcast::Sender<ProgressEvent>,
}

impl<S, T> Worker<S, T>
where
  S: RegistryStore,
  T: SyncStrategy,
{
  pub async fn run(
    self,
    mut jobs: mpsc::Receiver<Envelope>,
    replies: mpsc::UnboundedSender<Reply>,
    mut shutdown: oneshot::Receiver<()>,
  ) {
    info!(strategy = self.strategy.label(), "worker started");
    loop {
      let envelope = tokio::select! {
        biased;
        _ = &mut shutdown => break,
        job = jobs.recv() => match job {
          Some(envelope) => envelope,
          None => break,
        },
      };

      let Envelope { id, request } = envelope;
      let action = request.action();
      let started = Instant::now();
      let reply = match self.execute(request).await {
        Ok(result) => Reply::success(id, result),
        Err(err) => {
          warn!(%id, action, error = %err, "request failed");
          Reply::failure(id, err)
        }
      };
      debug!(%id, action, ok = reply.ok, elapsed_ms = started.elapsed().as_millis() as u64, "request handled");

      if replies.send(reply).is_err() {
        break;
      }
    }
    info!("worker stopped");
  }

  async fn execute(&self, request: Request) -> Result<Value> {
    let store = &self.store;
    match request {
      Request::SchemaVersion => to_json(store.schema_version().await.map_err(ServiceError::store)?),
      Request::DiagnoseSchema => to_json(store.diagnose_schema().await.map_err(ServiceError::store)?),
      Request::ExportSnapshot => to_json(store.export_snapshot().await.map_err(ServiceError::store)?),
      Request::ImportSnapshot(doc) => {
        store.import_snapshot(doc).await.map_err(ServiceError::store)?;
        Ok(Value::Null)
      }
      Request::ExportDatabase => {
        let image = store.export_database().await.map_err(ServiceError::store)?;
        Ok(json!({ "data": STANDARD.encode(image) }))
      }
      Request::ImportDatabase { data } => {
        let image = STANDARD
          .decode(data.trim())
          .map_err(|e| ServiceError::BadRequest(format!("database image is not base64: {e}")))?;
        store.import_database(image).await.map_err(ServiceError::store)?;
        Ok(Value::Null)
      }
      Request::GetMeta { key } => to_json(store.get_meta(key).await.map_err(ServiceError::store)?),
      Request::SetMeta { key, value } => {
        store.set_meta(key, value).await.map_err(ServiceError::store)?;
        Ok(Value::Null)
      }
      Request::ListSyncLog { limit } => {
        to_json(store.list_sync_log(limit).await.map_err(ServiceError::store)?)
      }
      Request::QueryRegistry(query) => {
        to_json(store.query_registry(query).await.map_err(ServiceError::store)?)
      }
      Request::ListCultures { with_count } => {
        to_json(store.list_cultures(with_count).await.map_err(ServiceError::store)?)
      }
      Request::ListPests { with_count } => {
        to_json(store.list_pests(with_count).await.map_err(ServiceError::store)?)
      }
      Request::PutPayloads { kind, rows } => {
        let written = store.put_payloads(kind, rows).await.map_err(ServiceError::store)?;
        Ok(json!({ "written": written }))
      }
      Request::GetPayloads { kind, filter } => {
        to_json(store.get_payloads(kind, filter).await.map_err(ServiceError::store)?)
      }
      Request::ImportEppoCodes { rows } => {
        let count = store.import_eppo_codes(rows).await.map_err(ServiceError::store)?;
        Ok(json!({ "count": count }))
      }
      Request::ImportBbchStages { rows } => {
        let count = store.import_bbch_stages(rows).await.map_err(ServiceError::store)?;
        Ok(json!({ "count": count }))
      }
      Request::SearchEppoCodes(search) => {
        to_json(store.search_eppo_codes(search).await.map_err(ServiceError::store)?)
      }
      Request::SearchBbchStages(search) => {
        to_json(store.search_bbch_stages(search).await.map_err(ServiceError::store)?)
      }
      Request::LookupStats => to_json(store.lookup_stats().await.map_err(ServiceError::store)?),
      Request::Sync => {
        let events = self.events.clone();
        // No subscribers is fine.
        let progress = Progress::new(move |event| {
          let _ = events.send(event);
        });
        to_json(run_sync(store, &self.strategy, progress).await?)
      }
    }
  }
}

fn to_json(value: impl Serialize) -> Result<Value> { Ok(serde_json::to_value(value)?) }
