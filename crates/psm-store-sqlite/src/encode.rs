//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Structured fields are compact JSON. Dataset
//! columns are read as loosely typed [`Value`]s because the published tables
//! do not always honour their declared affinity.

use chrono::{DateTime, Utc};
use psm_core::{
  payload::{PayloadEntry, RefSet, normalize_payload},
  registry::{DosageCondition, WithdrawalDays, WithdrawalPeriod},
  sync::SyncLogEntry,
};
use rusqlite::types::Value;
use serde_json::{Map, Value as Json};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn encode_flag(flag: bool) -> i64 { i64::from(flag) }

/// Integers, `J`/`Y`/`true` and non-zero numbers all count as set.
pub fn decode_flag(value: &Value) -> bool {
  match value {
    Value::Integer(i) => *i != 0,
    Value::Real(f) => *f != 0.0,
    Value::Text(s) => matches!(
      s.trim().to_ascii_lowercase().as_str(),
      "j" | "y" | "1" | "true"
    ),
    Value::Null | Value::Blob(_) => false,
  }
}

pub fn decode_text(value: Value) -> Option<String> {
  match value {
    Value::Text(s) if !s.trim().is_empty() => Some(s),
    Value::Integer(i) => Some(i.to_string()),
    Value::Real(f) => Some(f.to_string()),
    _ => None,
  }
}

pub fn decode_i64(value: &Value) -> Option<i64> {
  match value {
    Value::Integer(i) => Some(*i),
    Value::Real(f) => Some(*f as i64),
    Value::Text(s) => s.trim().parse().ok(),
    Value::Null | Value::Blob(_) => None,
  }
}

pub fn decode_f64(value: &Value) -> Option<f64> {
  match value {
    Value::Integer(i) => Some(*i as f64),
    Value::Real(f) => Some(*f),
    Value::Text(s) => s.trim().replace(',', ".").parse().ok(),
    Value::Null | Value::Blob(_) => None,
  }
}

// ─── JSON ────────────────────────────────────────────────────────────────────

pub fn encode_json(value: &impl serde::Serialize) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

/// Decode an optional JSON column; unparsable text is kept as a string.
pub fn decode_json_lenient(text: Option<String>) -> Option<Json> {
  let text = text.filter(|t| !t.trim().is_empty())?;
  Some(serde_json::from_str(&text).unwrap_or(Json::String(text)))
}

pub fn decode_object(text: &str) -> Result<Map<String, Json>> {
  match serde_json::from_str(text)? {
    Json::Object(map) => Ok(map),
    other => Err(Error::Validation(format!("expected a JSON object, got {other}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// A `bvl_api_payloads` row.
pub struct RawPayload {
  pub id:            i64,
  pub primary_ref:   Option<String>,
  pub secondary_ref: Option<String>,
  pub tertiary_ref:  Option<String>,
  pub payload_json:  String,
}

impl RawPayload {
  pub fn into_entry(self) -> Result<PayloadEntry> {
    Ok(PayloadEntry {
      row_id: self.id,
      fields: normalize_payload(decode_object(&self.payload_json)?),
      refs:   RefSet {
        primary:   self.primary_ref,
        secondary: self.secondary_ref,
        tertiary:  self.tertiary_ref,
      },
    })
  }
}

/// A `bvl_awg_aufwand` row.
pub struct RawDosage {
  pub awg_id:         String,
  pub condition:      Value,
  pub sort_order:     Value,
  pub product_amount: Value,
  pub product_unit:   Option<String>,
  pub water_amount:   Value,
  pub water_unit:     Option<String>,
  pub payload_json:   Option<String>,
}

impl RawDosage {
  pub fn into_dosage(self) -> DosageCondition {
    DosageCondition {
      awg_id:         self.awg_id,
      condition:      decode_text(self.condition).unwrap_or_default(),
      sort_order:     decode_i64(&self.sort_order).unwrap_or(0),
      product_amount: decode_f64(&self.product_amount),
      product_unit:   self.product_unit,
      water_amount:   decode_f64(&self.water_amount),
      water_unit:     self.water_unit,
      raw:            decode_json_lenient(self.payload_json),
    }
  }
}

/// A `bvl_awg_wartezeit` row joined with its crop label.
pub struct RawWithdrawal {
  pub number:       Value,
  pub awg_id:       String,
  pub crop:         Option<String>,
  pub crop_label:   Option<String>,
  pub sort_order:   Value,
  pub days:         Value,
  pub remark_code:  Option<String>,
  pub scope:        Option<String>,
  pub explanation:  Option<String>,
  pub payload_json: Option<String>,
}

impl RawWithdrawal {
  pub fn into_period(self) -> WithdrawalPeriod {
    let days = decode_text(self.days);
    WithdrawalPeriod {
      number:      decode_i64(&self.number).unwrap_or(0),
      awg_id:      self.awg_id,
      crop_label:  self.crop_label.or_else(|| self.crop.clone()),
      crop:        self.crop,
      sort_order:  decode_i64(&self.sort_order),
      days:        WithdrawalDays::from_parts(days.as_deref(), self.remark_code.as_deref()),
      remark_code: self.remark_code,
      scope:       self.scope,
      explanation: self.explanation,
      raw:         decode_json_lenient(self.payload_json),
    }
  }
}

/// A `bvl_sync_log` row.
pub struct RawSyncLog {
  pub id:           i64,
  pub synced_at:    String,
  pub ok:           Value,
  pub message:      Option<String>,
  pub payload_hash: Option<String>,
}

impl RawSyncLog {
  pub fn into_entry(self) -> SyncLogEntry {
    SyncLogEntry {
      id:           self.id,
      synced_at:    self.synced_at,
      ok:           decode_flag(&self.ok),
      message:      self.message,
      payload_hash: self.payload_hash,
    }
  }
}
