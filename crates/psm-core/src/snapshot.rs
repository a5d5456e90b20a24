//! The snapshot document: the user-authored part of a store, exported and
//! imported as a single JSON object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Full user-authored state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotDocument {
  pub meta:            SnapshotMeta,
  pub mediums:         Vec<Medium>,
  pub medium_profiles: Vec<MediumProfile>,
  pub history:         Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotMeta {
  pub version:             i64,
  pub company:             Value,
  pub defaults:            Value,
  pub field_labels:        Value,
  pub measurement_methods: Vec<MeasurementMethod>,
}

impl Default for SnapshotMeta {
  fn default() -> Self {
    Self {
      version:             1,
      company:             Value::Object(Map::new()),
      defaults:            Value::Object(Map::new()),
      field_labels:        Value::Object(Map::new()),
      measurement_methods: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementMethod {
  pub id:       String,
  pub label:    Option<String>,
  #[serde(rename = "type")]
  pub kind:     Option<String>,
  pub unit:     Option<String>,
  #[serde(default)]
  pub requires: Value,
  #[serde(default)]
  pub config:   Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medium {
  pub id:               String,
  pub name:             Option<String>,
  pub unit:             Option<String>,
  #[serde(alias = "method_id")]
  pub method_id:        Option<String>,
  #[serde(default)]
  pub value:            Option<f64>,
  /// Approval number of the product this medium stands for.
  #[serde(default, alias = "approvalNumber", alias = "zulassung")]
  pub zulassungsnummer: Option<String>,
}

/// A named, ordered selection of mediums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumProfile {
  pub id:         String,
  pub name:       Option<String>,
  #[serde(default)]
  pub medium_ids: Vec<String>,
}

/// A saved calculation: free-form header fields plus its line items.
///
/// Accepts both `{...header, items}` and `{header: {...}, items}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  #[serde(flatten)]
  pub header: Map<String, Value>,
  #[serde(default)]
  pub items:  Vec<Value>,
}

impl HistoryEntry {
  /// The header object, unwrapping a nested `header` field if present.
  pub fn header_fields(&self) -> Map<String, Value> {
    match self.header.get("header") {
      Some(Value::Object(nested)) => nested.clone(),
      _ => self.header.clone(),
    }
  }

  /// Creation timestamp: entry `savedAt`, then header `savedAt` or
  /// `createdAt`.
  pub fn created_at(&self) -> Option<String> {
    let header = self.header_fields();
    [
      self.header.get("savedAt"),
      header.get("savedAt"),
      header.get("createdAt"),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_owned))
  }
}

impl SnapshotDocument {
  /// Reject documents that cannot be imported without inventing data.
  pub fn validate(&self) -> Result<()> {
    for method in &self.meta.measurement_methods {
      if method.id.trim().is_empty() {
        return Err(Error::Validation("measurement method without id".into()));
      }
    }
    for medium in &self.mediums {
      if medium.id.trim().is_empty() {
        return Err(Error::Validation("medium without id".into()));
      }
    }
    for profile in &self.medium_profiles {
      if profile.id.trim().is_empty() {
        return Err(Error::Validation("medium profile without id".into()));
      }
    }
    for (index, entry) in self.history.iter().enumerate() {
      if let Some(bad) = entry.items.iter().find(|item| !item.is_object()) {
        return Err(Error::Validation(format!(
          "history entry {index} has a non-object item: {bad}"
        )));
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn medium_accepts_legacy_field_names() {
    let medium: Medium = serde_json::from_value(json!({
      "id": "m1",
      "name": "Wasser",
      "unit": "l",
      "method_id": "perHa",
      "value": 200.0,
      "approvalNumber": "024567-00",
    }))
    .unwrap();
    assert_eq!(medium.method_id.as_deref(), Some("perHa"));
    assert_eq!(medium.zulassungsnummer.as_deref(), Some("024567-00"));
  }

  #[test]
  fn nested_header_is_unwrapped() {
    let entry: HistoryEntry = serde_json::from_value(json!({
      "header": { "createdAt": "2024-03-01T10:00:00Z", "crop": "Weizen" },
      "items": [],
    }))
    .unwrap();
    assert_eq!(entry.header_fields().get("crop"), Some(&json!("Weizen")));
    assert_eq!(entry.created_at().as_deref(), Some("2024-03-01T10:00:00Z"));
  }

  #[test]
  fn saved_at_wins_over_created_at() {
    let entry: HistoryEntry = serde_json::from_value(json!({
      "savedAt": "2024-05-01T00:00:00Z",
      "createdAt": "2024-01-01T00:00:00Z",
      "items": [],
    }))
    .unwrap();
    assert_eq!(entry.created_at().as_deref(), Some("2024-05-01T00:00:00Z"));
  }

  #[test]
  fn blank_medium_id_is_rejected() {
    let doc = SnapshotDocument {
      mediums: vec![Medium {
        id:               " ".into(),
        name:             None,
        unit:             None,
        method_id:        None,
        value:            None,
        zulassungsnummer: None,
      }],
      ..Default::default()
    };
    assert!(matches!(doc.validate(), Err(Error::Validation(_))));
  }
}
