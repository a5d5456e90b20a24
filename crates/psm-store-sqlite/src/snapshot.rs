//! Whole-state export and import of the user-authored tables.

use chrono::Utc;
use psm_core::{
  payload::field_ref,
  snapshot::{HistoryEntry, MeasurementMethod, Medium, MediumProfile, SnapshotDocument, SnapshotMeta},
};
use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::info;

use crate::{
  Result,
  encode::{decode_object, encode_dt, encode_json},
};

const META_KEYS: &[&str] = &["version", "company", "defaults", "fieldLabels", "measurementMethods"];

// ─── Export ──────────────────────────────────────────────────────────────────

pub fn export(conn: &Connection) -> Result<SnapshotDocument> {
  let mut meta = SnapshotMeta::default();
  {
    let mut stmt = conn.prepare("SELECT key, value FROM meta")?;
    let rows = stmt
      .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    for (key, text) in rows {
      let value: Value = serde_json::from_str(&text)?;
      match key.as_str() {
        "version" => meta.version = value.as_i64().unwrap_or(1),
        "company" => meta.company = value,
        "defaults" => meta.defaults = value,
        "fieldLabels" => meta.field_labels = value,
        _ => {}
      }
    }
  }

  let mut stmt = conn.prepare(
    "SELECT id, label, type, unit, requires, config FROM measurement_methods ORDER BY rowid",
  )?;
  meta.measurement_methods = stmt
    .query_map([], |r| {
      Ok((
        MeasurementMethod {
          id:       r.get(0)?,
          label:    r.get(1)?,
          kind:     r.get(2)?,
          unit:     r.get(3)?,
          requires: Value::Null,
          config:   Value::Null,
        },
        r.get::<_, Option<String>>(4)?,
        r.get::<_, Option<String>>(5)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?
    .into_iter()
    .map(|(mut method, requires, config)| {
      method.requires = decode_value(requires, empty_requires())?;
      method.config = decode_value(config, empty_config())?;
      Ok(method)
    })
    .collect::<Result<Vec<_>>>()?;

  let mut stmt = conn.prepare(
    "SELECT id, name, unit, method_id, value, zulassungsnummer FROM mediums ORDER BY rowid",
  )?;
  let mediums = stmt
    .query_map([], |r| {
      Ok(Medium {
        id:               r.get(0)?,
        name:             r.get(1)?,
        unit:             r.get(2)?,
        method_id:        r.get(3)?,
        value:            r.get(4)?,
        zulassungsnummer: r.get(5)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut stmt =
    conn.prepare("SELECT id, name, medium_ids_json FROM medium_profiles ORDER BY rowid")?;
  let medium_profiles = stmt
    .query_map([], |r| {
      Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?, r.get::<_, String>(2)?))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?
    .into_iter()
    .map(|(id, name, ids)| {
      Ok(MediumProfile { id, name, medium_ids: serde_json::from_str(&ids)? })
    })
    .collect::<Result<Vec<_>>>()?;

  let mut stmt =
    conn.prepare("SELECT id, header_json FROM history ORDER BY created_at DESC, id ASC")?;
  let headers = stmt
    .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut items_stmt =
    conn.prepare("SELECT payload_json FROM history_items WHERE history_id = ?1 ORDER BY id")?;
  let mut history = Vec::with_capacity(headers.len());
  for (id, header_json) in headers {
    let items = items_stmt
      .query_map([id], |r| r.get::<_, String>(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?
      .iter()
      .map(|text| serde_json::from_str(text))
      .collect::<serde_json::Result<Vec<Value>>>()?;
    history.push(HistoryEntry { header: decode_object(&header_json)?, items });
  }

  Ok(SnapshotDocument { meta, mediums, medium_profiles, history })
}

fn decode_value(text: Option<String>, fallback: Value) -> Result<Value> {
  Ok(match text.filter(|t| !t.trim().is_empty()) {
    Some(text) => serde_json::from_str(&text)?,
    None => fallback,
  })
}

fn empty_requires() -> Value { Value::Array(Vec::new()) }

fn empty_config() -> Value { Value::Object(Map::new()) }

/// A missing or null method field is stored as its empty form.
fn or_empty(value: &Value, empty: fn() -> Value) -> Value {
  match value {
    Value::Null => empty(),
    other => other.clone(),
  }
}

// ─── Import ──────────────────────────────────────────────────────────────────

/// Replace all user-authored tables with `doc` in one transaction.
pub fn import(conn: &mut Connection, doc: &SnapshotDocument) -> Result<()> {
  doc.validate()?;

  let tx = conn.transaction()?;
  tx.execute_batch(
    "DELETE FROM history_items;
     DELETE FROM history;
     DELETE FROM medium_profiles;
     DELETE FROM mediums;
     DELETE FROM measurement_methods;",
  )?;
  for key in META_KEYS {
    tx.execute("DELETE FROM meta WHERE key = ?1", [key])?;
  }

  let meta = &doc.meta;
  for (key, value) in [
    ("version", Value::from(meta.version)),
    ("company", meta.company.clone()),
    ("defaults", meta.defaults.clone()),
    ("fieldLabels", meta.field_labels.clone()),
  ] {
    tx.execute(
      "INSERT INTO meta (key, value) VALUES (?1, ?2)",
      rusqlite::params![key, encode_json(&value)?],
    )?;
  }

  for method in &meta.measurement_methods {
    tx.execute(
      "INSERT INTO measurement_methods (id, label, type, unit, requires, config)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      rusqlite::params![
        method.id,
        method.label,
        method.kind,
        method.unit,
        encode_json(&or_empty(&method.requires, empty_requires))?,
        encode_json(&or_empty(&method.config, empty_config))?,
      ],
    )?;
  }

  for medium in &doc.mediums {
    tx.execute(
      "INSERT INTO mediums (id, name, unit, method_id, value, zulassungsnummer)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      rusqlite::params![
        medium.id,
        medium.name,
        medium.unit,
        medium.method_id,
        medium.value,
        medium.zulassungsnummer,
      ],
    )?;
  }

  for profile in &doc.medium_profiles {
    tx.execute(
      "INSERT INTO medium_profiles (id, name, medium_ids_json) VALUES (?1, ?2, ?3)",
      rusqlite::params![profile.id, profile.name, encode_json(&profile.medium_ids)?],
    )?;
  }

  let now = encode_dt(Utc::now());
  for entry in &doc.history {
    let mut header = entry.header_fields();
    let created_at = entry.created_at().unwrap_or_else(|| now.clone());
    header
      .entry("createdAt")
      .or_insert_with(|| Value::String(created_at.clone()));

    tx.execute(
      "INSERT INTO history (created_at, header_json) VALUES (?1, ?2)",
      rusqlite::params![created_at, encode_json(&header)?],
    )?;
    let history_id = tx.last_insert_rowid();

    for item in &entry.items {
      tx.execute(
        "INSERT INTO history_items (history_id, medium_id, payload_json) VALUES (?1, ?2, ?3)",
        rusqlite::params![history_id, item_medium_id(item), encode_json(item)?],
      )?;
    }
  }

  tx.commit()?;
  info!(
    mediums = doc.mediums.len(),
    profiles = doc.medium_profiles.len(),
    history = doc.history.len(),
    "snapshot imported"
  );
  Ok(())
}

fn item_medium_id(item: &Value) -> String {
  let empty = Map::new();
  let fields = item.as_object().unwrap_or(&empty);
  field_ref(fields, "mediumId")
    .or_else(|| field_ref(fields, "medium_id"))
    .unwrap_or_default()
}
