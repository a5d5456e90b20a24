//! [`Service`] lifecycle and the cloneable [`ServiceHandle`].

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use psm_core::{store::RegistryStore, sync::ProgressEvent};
use psm_sync::SyncStrategy;
use serde_json::Value;
use tokio::{
  sync::{broadcast, mpsc, oneshot},
  task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Result, ServiceConfig, ServiceError,
  rpc::{Envelope, Reply, Request},
  worker::Worker,
};

const PROGRESS_CAPACITY: usize = 256;

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Reply>>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<Reply>>> {
  pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The running service: a worker task owning the store and a router task
/// delivering replies to waiting callers.
pub struct Service {
  handle:   ServiceHandle,
  shutdown: oneshot::Sender<()>,
  worker:   JoinHandle<()>,
  router:   JoinHandle<()>,
}

impl Service {
  /// Start the service around an opened, migrated store. Must be called
  /// inside a Tokio runtime.
  pub fn init<S, T>(store: S, strategy: T, config: ServiceConfig) -> Self
  where
    S: RegistryStore + 'static,
    T: SyncStrategy + 'static,
  {
    let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity.max(1));
    let (replies_tx, replies_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (events, _) = broadcast::channel(PROGRESS_CAPACITY);
    let pending = Pending::default();

    let worker = Worker { store, strategy, events: events.clone() };
    let worker = tokio::spawn(worker.run(jobs_rx, replies_tx, shutdown_rx));
    let router = tokio::spawn(route_replies(replies_rx, pending.clone()));
    info!(
      call_timeout_secs = config.call_timeout_secs,
      sync_timeout_secs = config.sync_timeout_secs,
      "service started"
    );

    Self {
      handle: ServiceHandle { jobs: jobs_tx, pending, events, config },
      shutdown: shutdown_tx,
      worker,
      router,
    }
  }

  pub fn handle(&self) -> ServiceHandle { self.handle.clone() }

  /// Stop accepting work, let an in-flight request finish and release the
  /// store. Outstanding callers receive [`ServiceError::Closed`].
  pub async fn close(self) -> Result<()> {
    let _ = self.shutdown.send(());
    drop(self.handle);
    self.worker.await.map_err(|e| ServiceError::Failed(e.to_string()))?;
    self.router.await.map_err(|e| ServiceError::Failed(e.to_string()))?;
    info!("service closed");
    Ok(())
  }
}

async fn route_replies(mut replies: mpsc::UnboundedReceiver<Reply>, pending: Pending) {
  while let Some(reply) = replies.recv().await {
    let waiter = lock(&pending).remove(&reply.id);
    match waiter {
      Some(waiter) => {
        let _ = waiter.send(reply);
      }
      None => debug!(id = %reply.id, "discarding reply without a waiting caller"),
    }
  }
  // Dropping the senders wakes every remaining caller.
  lock(&pending).clear();
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Cheap to clone; every clone talks to the same worker.
#[derive(Clone)]
pub struct ServiceHandle {
  jobs:    mpsc::Sender<Envelope>,
  pending: Pending,
  events:  broadcast::Sender<ProgressEvent>,
  config:  ServiceConfig,
}

impl ServiceHandle {
  /// Run `request` and return its result, or the error the worker replied
  /// with.
  pub async fn call(&self, request: Request) -> Result<Value> {
    self.dispatch(Envelope::new(request)).await?.into_result()
  }

  /// Send an envelope and wait for the reply carrying its id.
  ///
  /// The time limit covers queueing as well as execution. On timeout the
  /// caller stops waiting; a request already queued still runs and its late
  /// reply is discarded.
  pub async fn dispatch(&self, envelope: Envelope) -> Result<Reply> {
    let id = envelope.id;
    let action = envelope.request.action();
    let timeout = if envelope.request.is_sync() {
      self.config.sync_timeout()
    } else {
      self.config.call_timeout()
    };

    let (tx, rx) = oneshot::channel();
    {
      let mut pending = lock(&self.pending);
      if pending.contains_key(&id) {
        return Err(ServiceError::BadRequest(format!("request id {id} is already in flight")));
      }
      pending.insert(id, tx);
    }

    let round_trip = async {
      self.jobs.send(envelope).await.map_err(|_| ServiceError::Closed)?;
      rx.await.map_err(|_| ServiceError::Closed)
    };

    match tokio::time::timeout(timeout, round_trip).await {
      Ok(Ok(reply)) => Ok(reply),
      Ok(Err(err)) => {
        lock(&self.pending).remove(&id);
        Err(err)
      }
      Err(_) => {
        lock(&self.pending).remove(&id);
        warn!(%id, action, timeout_secs = timeout.as_secs_f32(), "request timed out");
        Err(ServiceError::Timeout { action, after: timeout })
      }
    }
  }

  /// Progress events of running syncs. Slow receivers may miss events.
  pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> { self.events.subscribe() }
}
