use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts and queue sizing for the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// Round-trip limit for every action except `sync`.
  pub call_timeout_secs: u64,
  pub sync_timeout_secs: u64,
  /// Requests buffered ahead of the worker.
  pub queue_capacity:    usize,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self { call_timeout_secs: 30, sync_timeout_secs: 900, queue_capacity: 64 }
  }
}

impl ServiceConfig {
  pub fn call_timeout(&self) -> Duration { Duration::from_secs(self.call_timeout_secs) }

  pub fn sync_timeout(&self) -> Duration { Duration::from_secs(self.sync_timeout_secs) }
}
