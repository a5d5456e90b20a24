//! Normalization of raw registry API records into [`DatasetRecords`].
//!
//! Upstream records are loosely typed: flags are `"J"`/`"N"`, numbers may use
//! a decimal comma, and dose and water amounts are spread over several
//! alternative fields.

use std::collections::BTreeMap;

use psm_core::{
  payload::{EntityKind, PayloadRecord},
  registry::{Application, AwgCode, DosageCondition, LookupCode, Product, WithdrawalDays, WithdrawalPeriod},
  sync::DatasetRecords,
};
use serde_json::{Map, Value, json};
use strum::IntoEnumIterator as _;
use tracing::warn;

/// Keys of the two code-list lookups in the fetched dataset map.
pub const CROP_LOOKUP: &str = "lookup_kultur";
pub const PEST_LOOKUP: &str = "lookup_schadorg";

const PRODUCT_AMOUNT: &[&str] =
  &["max_aufwandmenge", "m_aufwand", "m_aufwand_bis", "m_aufwand_von", "aufwandmenge"];
const PRODUCT_UNIT: &[&str] = &[
  "aufwandmenge_einheit",
  "m_aufwand_einheit",
  "m_aufwand_bis_einheit",
  "m_aufwand_von_einheit",
];
const WATER_AMOUNT: &[&str] = &["wassermenge", "w_aufwand_bis", "w_aufwand_von", "wasseraufwand"];
const WATER_UNIT: &[&str] = &[
  "wassermenge_einheit",
  "w_aufwand_einheit",
  "wasseraufwand_einheit",
  "w_aufwand_von_einheit",
  "w_aufwand_bis_einheit",
];

// ─── Field helpers ───────────────────────────────────────────────────────────

fn is_blank(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::String(s) => s.trim().is_empty(),
    _ => false,
  }
}

/// The first of `keys` holding a non-blank value.
pub fn coalesce<'a>(item: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
  keys.iter().filter_map(|k| item.get(*k)).find(|v| !is_blank(v))
}

/// Parse a number that may be written with a decimal comma. With a comma
/// present, dots are thousands separators.
pub fn parse_number(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => {
      let mut normalized: String = s.chars().filter(|c| !c.is_whitespace()).collect();
      if normalized.contains(',') {
        normalized = normalized.replace('.', "").replace(',', ".");
      }
      normalized.parse::<f64>().ok().filter(|n| n.is_finite())
    }
    _ => None,
  }
}

fn text(item: &Map<String, Value>, key: &str) -> Option<String> {
  match item.get(key)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn text_of(value: Option<&Value>) -> Option<String> {
  match value? {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn flag(item: &Map<String, Value>, key: &str) -> bool {
  match item.get(key) {
    Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("J"),
    Some(Value::Bool(b)) => *b,
    _ => false,
  }
}

/// Leading-integer parse: `"12"`, `12`, `12.7` and `"12 Tage"` give 12.
fn integer(item: &Map<String, Value>, key: &str) -> Option<i64> {
  match item.get(key)? {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
    Value::String(s) => {
      let s = s.trim();
      let end = s
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && *c == '-')))
        .map_or(s.len(), |(i, _)| i);
      s[..end].parse().ok()
    }
    _ => None,
  }
}

fn objects(items: Option<&Vec<Value>>) -> impl Iterator<Item = &Map<String, Value>> {
  items.into_iter().flatten().filter_map(Value::as_object)
}

// ─── Records ─────────────────────────────────────────────────────────────────

pub fn product(item: &Map<String, Value>) -> Option<Product> {
  Some(Product {
    kennr:          text(item, "kennr")?,
    name:           text(item, "mittelname"),
    formulation:    text(item, "formulierung"),
    first_approval: text(item, "zul_erstmalig"),
    expires_on:     text(item, "zul_ende"),
    low_risk:       flag(item, "geringes_risiko"),
    raw:            Some(Value::Object(item.clone())),
  })
}

pub fn application(item: &Map<String, Value>) -> Option<Application> {
  Some(Application {
    awg_id:     text(item, "awg_id")?,
    kennr:      text(item, "kennr")?,
    status:     Some(json!({
      "status": text(item, "status").unwrap_or_default(),
      "wachstumsstadium": text(item, "wachstumsstadium").unwrap_or_default(),
    })),
    expires_on: text(item, "zulassungsende"),
  })
}

pub fn code_link(item: &Map<String, Value>, column: &str) -> Option<AwgCode> {
  Some(AwgCode {
    awg_id:     text(item, "awg_id")?,
    code:       text(item, column)?,
    excluded:   flag(item, "ausgenommen"),
    sort_order: Some(integer(item, "sortier_nr").unwrap_or(0)),
  })
}

pub fn dosage(item: &Map<String, Value>) -> Option<DosageCondition> {
  Some(DosageCondition {
    awg_id:         text(item, "awg_id")?,
    condition:      text(item, "aufwandbedingung").unwrap_or_default(),
    sort_order:     integer(item, "sortier_nr").unwrap_or(0),
    product_amount: coalesce(item, PRODUCT_AMOUNT).and_then(parse_number),
    product_unit:   text_of(coalesce(item, PRODUCT_UNIT)),
    water_amount:   coalesce(item, WATER_AMOUNT).and_then(parse_number),
    water_unit:     text_of(coalesce(item, WATER_UNIT)),
    raw:            Some(Value::Object(item.clone())),
  })
}

/// Rows without a period number are dropped: the number is half of the
/// table's key.
pub fn withdrawal(item: &Map<String, Value>) -> Option<WithdrawalPeriod> {
  let remark_code = text(item, "bemerkung_kode");
  let days = text(item, "wartezeit_tage");
  Some(WithdrawalPeriod {
    number: integer(item, "awg_wartezeit_nr")?,
    awg_id: text(item, "awg_id")?,
    crop: text(item, "kultur"),
    crop_label: None,
    sort_order: Some(integer(item, "sortier_nr").unwrap_or(0)),
    days: WithdrawalDays::from_parts(days.as_deref(), remark_code.as_deref()),
    remark_code,
    scope: text(item, "anwendungsbereich"),
    explanation: text(item, "erlaeuterung"),
    raw: Some(Value::Object(item.clone())),
  })
}

/// German entries of a code list; the label falls back to the code.
pub fn lookup(item: &Map<String, Value>) -> Option<LookupCode> {
  if let Some(language) = text(item, "sprache")
    && !language.eq_ignore_ascii_case("DE")
  {
    return None;
  }
  let code = text(item, "kode")?;
  let label = text(item, "kodetext").unwrap_or_else(|| code.clone());
  Some(LookupCode { code, label: Some(label) })
}

/// Build the structured dataset from the items fetched per endpoint key.
pub fn build_records(datasets: &BTreeMap<String, Vec<Value>>) -> DatasetRecords {
  let rows = |key: &str| objects(datasets.get(key));

  let mut records = DatasetRecords {
    products: rows("mittel").filter_map(product).collect(),
    applications: rows("awg").filter_map(application).collect(),
    crops: rows("awg_kultur").filter_map(|i| code_link(i, "kultur")).collect(),
    pests: rows("awg_schadorg").filter_map(|i| code_link(i, "schadorg")).collect(),
    dosages: rows("awg_aufwand").filter_map(dosage).collect(),
    withdrawal_periods: rows("awg_wartezeit").filter_map(withdrawal).collect(),
    crop_labels: rows(CROP_LOOKUP).filter_map(lookup).collect(),
    pest_labels: rows(PEST_LOOKUP).filter_map(lookup).collect(),
    payloads: Vec::new(),
  };

  for kind in EntityKind::iter() {
    records.payloads.extend(
      rows(kind.key()).map(|item| PayloadRecord::new(kind, item.clone())),
    );
  }

  let fetched = datasets.get("mittel").map_or(0, Vec::len);
  if records.products.len() < fetched {
    warn!(
      skipped = fetched - records.products.len(),
      "products without a registration number skipped"
    );
  }
  let fetched = rows("awg_wartezeit").count();
  if records.withdrawal_periods.len() < fetched {
    warn!(
      skipped = fetched - records.withdrawal_periods.len(),
      "withdrawal periods without a number or application skipped"
    );
  }
  records
}
