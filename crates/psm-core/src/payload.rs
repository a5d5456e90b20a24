//! The generic payload envelope.
//!
//! Dataset entities without dedicated columns are stored as JSON objects keyed
//! by an [`EntityKind`] plus up to three soft references. References are plain
//! text and are resolved leniently against a record's field names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{EnumIter, EnumString, IntoStaticStr};

use crate::Error;

// ─── EntityKind ──────────────────────────────────────────────────────────────

/// Every dataset key the payload store knows about.
///
/// The string form is the dataset's own key (and endpoint) name.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  EnumIter,
  EnumString,
  IntoStaticStr,
  Serialize,
  Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub enum EntityKind {
  #[strum(serialize = "wirkstoff")]
  ActiveIngredient,
  #[strum(serialize = "wirkstoff_gehalt")]
  IngredientContent,
  #[strum(serialize = "zusatzstoff")]
  Additive,
  #[strum(serialize = "zusatzstoff_vertrieb")]
  AdditiveDistribution,
  #[strum(serialize = "staerkung")]
  Strengthener,
  #[strum(serialize = "staerkung_vertrieb")]
  StrengthenerDistribution,
  #[strum(serialize = "parallelimport_gueltig")]
  ParallelImportValid,
  #[strum(serialize = "parallelimport_abgelaufen")]
  ParallelImportExpired,
  #[strum(serialize = "mittel_vertrieb")]
  Distribution,
  #[strum(serialize = "adresse")]
  Address,
  #[strum(serialize = "ghs_gefahrenhinweise")]
  HazardStatement,
  #[strum(serialize = "ghs_gefahrensymbole")]
  HazardSymbol,
  #[strum(serialize = "ghs_sicherheitshinweise")]
  SafetyPhrase,
  #[strum(serialize = "ghs_signalwoerter")]
  SignalWord,
  #[strum(serialize = "hinweis")]
  Note,
  #[strum(serialize = "antrag")]
  PermitApplication,
  #[strum(serialize = "auflagen")]
  Condition,
  #[strum(serialize = "auflage_redu")]
  ConditionReduction,
  #[strum(serialize = "awg_bem")]
  ApplicationRemark,
  #[strum(serialize = "awg_partner")]
  ApplicationPartner,
  #[strum(serialize = "awg_partner_aufwand")]
  ApplicationPartnerDosage,
  #[strum(serialize = "awg_verwendungszweck")]
  IntendedUse,
  #[strum(serialize = "awg_wartezeit_ausg_kultur")]
  WithdrawalException,
  #[strum(serialize = "awg_zeitpunkt")]
  ApplicationTiming,
  #[strum(serialize = "awg_zulassung")]
  ApplicationApproval,
}

/// The record field names a kind's references are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefFields {
  pub primary:   &'static str,
  pub secondary: Option<&'static str>,
  pub tertiary:  Option<&'static str>,
}

impl RefFields {
  const fn one(primary: &'static str) -> Self {
    Self { primary, secondary: None, tertiary: None }
  }

  const fn two(primary: &'static str, secondary: &'static str) -> Self {
    Self { primary, secondary: Some(secondary), tertiary: None }
  }
}

impl EntityKind {
  /// The dataset key, also used as the remote endpoint name.
  pub fn key(self) -> &'static str { self.into() }

  /// Which record fields populate the primary/secondary/tertiary refs.
  pub fn ref_fields(self) -> RefFields {
    match self {
      Self::ActiveIngredient | Self::IngredientContent => {
        RefFields::two("kennr", "wirknr")
      }
      Self::Distribution => RefFields::two("kennr", "adresse_nr"),
      Self::Address => RefFields::one("adresse_nr"),
      Self::Condition => RefFields {
        primary:   "kennr",
        secondary: Some("awg_id"),
        tertiary:  Some("auflagenr"),
      },
      Self::ConditionReduction => RefFields::one("auflagenr"),
      Self::ApplicationPartner => RefFields::two("awg_id", "kennr_partner"),
      Self::WithdrawalException => {
        RefFields::two("awg_id", "awg_wartezeit_nr")
      }
      Self::ApplicationRemark
      | Self::ApplicationPartnerDosage
      | Self::IntendedUse
      | Self::ApplicationTiming
      | Self::ApplicationApproval => RefFields::one("awg_id"),
      Self::Additive
      | Self::AdditiveDistribution
      | Self::Strengthener
      | Self::StrengthenerDistribution
      | Self::ParallelImportValid
      | Self::ParallelImportExpired
      | Self::HazardStatement
      | Self::HazardSymbol
      | Self::SafetyPhrase
      | Self::SignalWord
      | Self::Note
      | Self::PermitApplication => RefFields::one("kennr"),
    }
  }

  /// Kinds whose records hang off a product rather than an application.
  pub fn is_product_scoped(self) -> bool {
    self.ref_fields().primary == "kennr"
  }
}

impl From<EntityKind> for String {
  fn from(kind: EntityKind) -> Self { kind.key().to_owned() }
}

impl TryFrom<String> for EntityKind {
  type Error = Error;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse().map_err(|_| Error::UnknownEntityKind(value))
  }
}

impl std::fmt::Display for EntityKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.key())
  }
}

// ─── Refs ────────────────────────────────────────────────────────────────────

/// Soft references stored alongside a payload row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSet {
  pub primary:   Option<String>,
  pub secondary: Option<String>,
  pub tertiary:  Option<String>,
}

impl RefSet {
  /// Read the refs for `kind` out of a source record.
  pub fn from_record(kind: EntityKind, record: &Map<String, Value>) -> Self {
    let fields = kind.ref_fields();
    Self {
      primary:   field_ref(record, fields.primary),
      secondary: fields.secondary.and_then(|f| field_ref(record, f)),
      tertiary:  fields.tertiary.and_then(|f| field_ref(record, f)),
    }
  }
}

/// Lookup filter for [`crate::store::RegistryStore::get_payloads`]. A `None`
/// side does not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefFilter {
  pub primary:   Option<String>,
  pub secondary: Option<String>,
}

impl RefFilter {
  pub fn primary(value: impl Into<String>) -> Self {
    Self { primary: Some(value.into()), secondary: None }
  }

  pub fn secondary(value: impl Into<String>) -> Self {
    Self { primary: None, secondary: Some(value.into()) }
  }

  /// Trim both sides; blank becomes `None`.
  pub fn normalized(&self) -> Self {
    Self {
      primary:   normalize_ref(self.primary.as_deref()),
      secondary: normalize_ref(self.secondary.as_deref()),
    }
  }
}

/// Trim a reference value; empty or missing yields `None`.
pub fn normalize_ref(value: Option<&str>) -> Option<String> {
  value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

/// Resolve `field` on a record as a reference string.
///
/// The field is looked up by its exact name, then lower-case, then
/// upper-case, then any ASCII-case-insensitive match. Null, empty and missing
/// values yield `None`; scalars are rendered as text.
pub fn field_ref(record: &Map<String, Value>, field: &str) -> Option<String> {
  let value = [field.to_owned(), field.to_lowercase(), field.to_uppercase()]
    .iter()
    .find_map(|name| record.get(name))
    .or_else(|| {
      record
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(field))
        .map(|(_, v)| v)
    })?;

  match value {
    Value::Null => None,
    Value::String(s) => normalize_ref(Some(s)),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    other => Some(other.to_string()),
  }
}

/// Add a lower-case alias for every field so consumers can address fields
/// without knowing the source casing. Existing keys are never overwritten.
pub fn normalize_payload(mut record: Map<String, Value>) -> Map<String, Value> {
  let aliases: Vec<(String, Value)> = record
    .iter()
    .filter(|(k, _)| k.chars().any(char::is_uppercase))
    .map(|(k, v)| (k.to_lowercase(), v.clone()))
    .collect();
  for (key, value) in aliases {
    record.entry(key).or_insert(value);
  }
  record
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// A payload row ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRecord {
  pub kind:     EntityKind,
  pub endpoint: String,
  pub refs:     RefSet,
  pub payload:  Map<String, Value>,
}

impl PayloadRecord {
  /// Wrap a source record, deriving its refs from the kind's field names.
  pub fn new(kind: EntityKind, payload: Map<String, Value>) -> Self {
    Self {
      kind,
      endpoint: kind.key().to_owned(),
      refs: RefSet::from_record(kind, &payload),
      payload,
    }
  }
}

/// A payload row as returned by a lookup: the key-normalized object plus its
/// refs under `__meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
  #[serde(skip)]
  pub row_id: i64,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
  #[serde(rename = "__meta")]
  pub refs:   RefSet,
}

impl PayloadEntry {
  pub fn field(&self, name: &str) -> Option<String> {
    field_ref(&self.fields, name)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use strum::IntoEnumIterator as _;

  use super::*;

  fn object(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(map) => map,
      _ => panic!("not an object"),
    }
  }

  #[test]
  fn kind_round_trips_through_its_key() {
    for kind in EntityKind::iter() {
      let key: String = kind.into();
      assert_eq!(key, kind.key());
      assert_eq!(EntityKind::try_from(key).unwrap(), kind);
    }
    assert_eq!(EntityKind::iter().count(), 25);
  }

  #[test]
  fn unknown_kind_is_rejected() {
    let err = serde_json::from_value::<EntityKind>(json!("nope")).unwrap_err();
    assert!(err.to_string().contains("nope"));
  }

  #[test]
  fn field_ref_ignores_source_casing() {
    for record in [
      json!({ "KENNR": "024567-00" }),
      json!({ "kennr": "024567-00" }),
      json!({ "Kennr": "024567-00" }),
    ] {
      let record = object(record);
      assert_eq!(field_ref(&record, "kennr").as_deref(), Some("024567-00"));
      assert_eq!(field_ref(&record, "KENNR").as_deref(), Some("024567-00"));
    }
  }

  #[test]
  fn field_ref_drops_blank_values() {
    let record = object(json!({ "a": null, "b": "  ", "c": 42, "d": " x " }));
    assert_eq!(field_ref(&record, "a"), None);
    assert_eq!(field_ref(&record, "b"), None);
    assert_eq!(field_ref(&record, "c").as_deref(), Some("42"));
    assert_eq!(field_ref(&record, "d").as_deref(), Some("x"));
    assert_eq!(field_ref(&record, "missing"), None);
  }

  #[test]
  fn refs_follow_kind_fields() {
    let record = object(json!({
      "KENNR": "024567-00",
      "AWG_ID": "024567-00/01-001",
      "AUFLAGENR": "NW262",
    }));
    let refs = RefSet::from_record(EntityKind::Condition, &record);
    assert_eq!(refs.primary.as_deref(), Some("024567-00"));
    assert_eq!(refs.secondary.as_deref(), Some("024567-00/01-001"));
    assert_eq!(refs.tertiary.as_deref(), Some("NW262"));
  }

  #[test]
  fn normalize_payload_adds_lowercase_aliases() {
    let record = normalize_payload(object(json!({ "Wirkstoff": "X", "kennr": "k" })));
    assert_eq!(record.get("wirkstoff"), Some(&json!("X")));
    assert_eq!(record.get("Wirkstoff"), Some(&json!("X")));
    assert_eq!(record.len(), 3);
  }
}
