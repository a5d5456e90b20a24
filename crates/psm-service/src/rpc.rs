//! The RPC envelope.
//!
//! A request is `{id, action, payload}`; the reply echoes the id as
//! `{id, ok: true, result}` or `{id, ok: false, error}`. Actions without
//! arguments omit `payload`.

use psm_core::{
  lookup::{BbchStage, EppoCode, LookupSearch},
  payload::{EntityKind, RefFilter},
  query::RegistryQuery,
  snapshot::SnapshotDocument,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::{Result, ServiceError};

fn default_log_limit() -> u32 { 10 }

/// Every operation the worker executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Request {
  SchemaVersion,
  DiagnoseSchema,
  ExportSnapshot,
  ImportSnapshot(SnapshotDocument),
  /// Reply: `{data}` with the store image in standard base64.
  ExportDatabase,
  ImportDatabase {
    data: String,
  },
  GetMeta {
    key: String,
  },
  /// A null `value` removes the key.
  SetMeta {
    key:   String,
    #[serde(default)]
    value: Option<String>,
  },
  ListSyncLog {
    #[serde(default = "default_log_limit")]
    limit: u32,
  },
  QueryRegistry(RegistryQuery),
  #[serde(rename_all = "camelCase")]
  ListCultures {
    #[serde(default)]
    with_count: bool,
  },
  #[serde(rename_all = "camelCase")]
  ListPests {
    #[serde(default)]
    with_count: bool,
  },
  PutPayloads {
    kind: EntityKind,
    rows: Vec<Map<String, Value>>,
  },
  GetPayloads {
    kind:   EntityKind,
    #[serde(default)]
    filter: RefFilter,
  },
  /// Replace the EPPO code table. Reply: `{count}`.
  ImportEppoCodes {
    rows: Vec<EppoCode>,
  },
  /// Replace the BBCH stage table. Reply: `{count}`.
  ImportBbchStages {
    rows: Vec<BbchStage>,
  },
  SearchEppoCodes(LookupSearch),
  SearchBbchStages(LookupSearch),
  LookupStats,
  Sync,
}

impl Request {
  pub fn action(&self) -> &'static str { self.into() }

  pub fn is_sync(&self) -> bool { matches!(self, Request::Sync) }
}

/// A request tagged with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
  pub id:      Uuid,
  #[serde(flatten)]
  pub request: Request,
}

impl Envelope {
  pub fn new(request: Request) -> Self { Self { id: Uuid::new_v4(), request } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
  pub id:     Uuid,
  pub ok:     bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error:  Option<String>,
}

impl Reply {
  pub fn success(id: Uuid, result: Value) -> Self {
    Self { id, ok: true, result: Some(result), error: None }
  }

  pub fn failure(id: Uuid, error: impl std::fmt::Display) -> Self {
    Self { id, ok: false, result: None, error: Some(error.to_string()) }
  }

  pub fn into_result(self) -> Result<Value> {
    if self.ok {
      Ok(self.result.unwrap_or(Value::Null))
    } else {
      Err(ServiceError::Failed(self.error.unwrap_or_default()))
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn actions_without_payload() {
    let env: Envelope = serde_json::from_value(json!({
      "id": "0b6e1c1e-5a4a-4a43-9b1e-3f2f7e0c9d11",
      "action": "schemaVersion"
    }))
    .unwrap();
    assert_eq!(env.request, Request::SchemaVersion);
    assert_eq!(env.request.action(), "schemaVersion");
  }

  #[test]
  fn payload_fields_and_defaults() {
    let env: Envelope = serde_json::from_value(json!({
      "id": "0b6e1c1e-5a4a-4a43-9b1e-3f2f7e0c9d11",
      "action": "listCultures",
      "payload": { "withCount": true }
    }))
    .unwrap();
    assert_eq!(env.request, Request::ListCultures { with_count: true });

    let env: Envelope = serde_json::from_value(json!({
      "id": "0b6e1c1e-5a4a-4a43-9b1e-3f2f7e0c9d11",
      "action": "listSyncLog",
      "payload": {}
    }))
    .unwrap();
    assert_eq!(env.request, Request::ListSyncLog { limit: 10 });

    let env: Envelope = serde_json::from_value(json!({
      "id": "0b6e1c1e-5a4a-4a43-9b1e-3f2f7e0c9d11",
      "action": "getPayloads",
      "payload": { "kind": "auflagen", "filter": { "primary": "024567-00" } }
    }))
    .unwrap();
    assert_eq!(env.request, Request::GetPayloads {
      kind:   EntityKind::Condition,
      filter: RefFilter::primary("024567-00"),
    });
  }

  #[test]
  fn lookup_search_defaults() {
    let env: Envelope = serde_json::from_value(json!({
      "id": "0b6e1c1e-5a4a-4a43-9b1e-3f2f7e0c9d11",
      "action": "searchEppoCodes",
      "payload": { "query": "weizen", "language": "de" }
    }))
    .unwrap();
    assert_eq!(env.request, Request::SearchEppoCodes(LookupSearch {
      query:    Some("weizen".into()),
      language: Some("de".into()),
      limit:    10,
      offset:   0,
    }));
    assert_eq!(env.request.action(), "searchEppoCodes");
  }

  #[test]
  fn unknown_action_is_rejected() {
    let err = serde_json::from_value::<Envelope>(json!({
      "id": "0b6e1c1e-5a4a-4a43-9b1e-3f2f7e0c9d11",
      "action": "dropTables"
    }))
    .unwrap_err();
    assert!(err.to_string().contains("dropTables"));
  }

  #[test]
  fn replies_omit_the_unused_side() {
    let id = Uuid::nil();
    assert_eq!(
      serde_json::to_value(Reply::success(id, json!(6))).unwrap(),
      json!({ "id": id, "ok": true, "result": 6 })
    );
    assert_eq!(
      serde_json::to_value(Reply::failure(id, "boom")).unwrap(),
      json!({ "id": id, "ok": false, "error": "boom" })
    );
  }
}
