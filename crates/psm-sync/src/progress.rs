//! Progress reporting for a running sync.

use std::sync::{
  Arc,
  atomic::{AtomicU8, Ordering},
};

use psm_core::sync::{ProgressEvent, SyncStep};
use tracing::debug;

type Sink = dyn Fn(ProgressEvent) + Send + Sync;

/// Callback invoked with byte counts while a download runs: `(received,
/// total)`, where `total` comes from `Content-Length` when the server sends
/// one.
pub type ByteProgress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// A cloneable handle that forwards [`ProgressEvent`]s to an optional sink.
#[derive(Clone, Default)]
pub struct Progress {
  sink: Option<Arc<Sink>>,
}

impl Progress {
  pub fn new(sink: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
    Self { sink: Some(Arc::new(sink)) }
  }

  /// A handle that only logs.
  pub fn none() -> Self { Self::default() }

  pub fn report(&self, step: SyncStep, percent: u8, message: impl Into<String>) {
    let event = ProgressEvent { step, percent: percent.min(100), message: message.into() };
    debug!(step = ?event.step, percent = event.percent, message = %event.message, "sync progress");
    if let Some(sink) = &self.sink {
      sink(event);
    }
  }

  /// Adapt download byte counts to `step` events spread over `from..=to`.
  /// Only whole-percent changes are forwarded.
  pub fn bytes(&self, step: SyncStep, from: u8, to: u8) -> ByteProgress {
    let progress = self.clone();
    let last = AtomicU8::new(from);
    Arc::new(move |received, total| {
      let Some(total) = total.filter(|t| *t > 0) else {
        return;
      };
      let percent = scale(from, to, received, total);
      if last.swap(percent, Ordering::Relaxed) != percent {
        progress.report(step, percent, format!("{received} of {total} bytes"));
      }
    })
  }
}

/// Position of `done / total` inside the range `from..=to`.
pub fn scale(from: u8, to: u8, done: u64, total: u64) -> u8 {
  if total == 0 || to <= from {
    return from;
  }
  let span = u64::from(to - from);
  let offset = done.min(total) * span / total;
  from + offset as u8
}
