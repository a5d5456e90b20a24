//! Relational registry entities: products, their applications, and the link
//! tables hanging off an application.
//!
//! The same structs are used for writing (structured dataset import) and for
//! reading (query results), so every field maps onto one column of the
//! published dataset.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Product / Application ───────────────────────────────────────────────────

/// A registered plant-protection product (`bvl_mittel`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  /// Registration number, e.g. `"024567-00"`.
  pub kennr:          String,
  pub name:           Option<String>,
  pub formulation:    Option<String>,
  pub first_approval: Option<String>,
  /// ISO date after which the approval lapses; `None` means open-ended.
  pub expires_on:     Option<String>,
  pub low_risk:       bool,
  /// The full source record, kept verbatim.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub raw:            Option<Value>,
}

/// One approved use of a product (`bvl_awg`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
  pub awg_id:     String,
  pub kennr:      String,
  /// `{status, wachstumsstadium}` as published.
  pub status:     Option<Value>,
  pub expires_on: Option<String>,
}

// ─── Links ───────────────────────────────────────────────────────────────────

/// A crop or pest code attached to an application (`bvl_awg_kultur`,
/// `bvl_awg_schadorg`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwgCode {
  pub awg_id:     String,
  pub code:       String,
  /// The code is explicitly excluded from the application.
  pub excluded:   bool,
  pub sort_order: Option<i64>,
}

/// A dosage condition (`bvl_awg_aufwand`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosageCondition {
  pub awg_id:         String,
  pub condition:      String,
  pub sort_order:     i64,
  pub product_amount: Option<f64>,
  pub product_unit:   Option<String>,
  pub water_amount:   Option<f64>,
  pub water_unit:     Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub raw:            Option<Value>,
}

/// A withdrawal period (`bvl_awg_wartezeit`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalPeriod {
  pub number:      i64,
  pub awg_id:      String,
  pub crop:        Option<String>,
  /// Resolved crop label; only populated on query results.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub crop_label:  Option<String>,
  pub sort_order:  Option<i64>,
  pub days:        WithdrawalDays,
  pub remark_code: Option<String>,
  pub scope:       Option<String>,
  pub explanation: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub raw:         Option<Value>,
}

// ─── WithdrawalDays ──────────────────────────────────────────────────────────

/// The `tage` column of a withdrawal period.
///
/// Besides a day count the dataset uses two letter codes which must never be
/// read as numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "days", rename_all = "snake_case")]
pub enum WithdrawalDays {
  Days(u32),
  /// `F`: determined by the period between application and harvest.
  LaterDetermination,
  /// `N`: no withdrawal period required.
  NotApplicable,
  Unspecified,
}

impl WithdrawalDays {
  /// Parse a textual `tage` value.
  pub fn parse(value: &str) -> Self {
    match value.trim() {
      "" => Self::Unspecified,
      s if s.eq_ignore_ascii_case("f") => Self::LaterDetermination,
      s if s.eq_ignore_ascii_case("n") => Self::NotApplicable,
      s => s.parse().map(Self::Days).unwrap_or(Self::Unspecified),
    }
  }

  /// Combine the day column with the remark code; a sentinel carried in the
  /// remark code wins over an empty day column.
  pub fn from_parts(days: Option<&str>, remark_code: Option<&str>) -> Self {
    match days.map(Self::parse) {
      Some(Self::Unspecified) | None => remark_code
        .map(Self::parse)
        .filter(|d| !matches!(d, Self::Days(_)))
        .unwrap_or(Self::Unspecified),
      Some(d) => d,
    }
  }

  /// The value as written into the `tage` column.
  pub fn to_column(self) -> Option<String> {
    match self {
      Self::Unspecified => None,
      other => Some(other.to_string()),
    }
  }
}

impl fmt::Display for WithdrawalDays {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Days(n) => write!(f, "{n}"),
      Self::LaterDetermination => f.write_str("F"),
      Self::NotApplicable => f.write_str("N"),
      Self::Unspecified => Ok(()),
    }
  }
}

// ─── Lookups ─────────────────────────────────────────────────────────────────

/// A `code → label` pair from one of the lookup dictionaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupCode {
  pub code:  String,
  pub label: Option<String>,
}

/// A distinct crop or pest code in use, with its label and an optional usage
/// count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUsage {
  pub code:  String,
  /// Falls back to the code when the lookup table has no label.
  pub label: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub count: Option<u64>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sentinel_codes_are_not_numbers() {
    assert_eq!(WithdrawalDays::parse("F"), WithdrawalDays::LaterDetermination);
    assert_eq!(WithdrawalDays::parse(" n "), WithdrawalDays::NotApplicable);
    assert_eq!(WithdrawalDays::parse("14"), WithdrawalDays::Days(14));
    assert_eq!(WithdrawalDays::parse("abc"), WithdrawalDays::Unspecified);
    assert_eq!(WithdrawalDays::LaterDetermination.to_string(), "F");
    assert_ne!(WithdrawalDays::LaterDetermination.to_string(), "0");
  }

  #[test]
  fn remark_code_supplies_missing_sentinel() {
    assert_eq!(
      WithdrawalDays::from_parts(None, Some("F")),
      WithdrawalDays::LaterDetermination
    );
    assert_eq!(
      WithdrawalDays::from_parts(Some("7"), Some("N")),
      WithdrawalDays::Days(7)
    );
    assert_eq!(
      WithdrawalDays::from_parts(None, Some("W123")),
      WithdrawalDays::Unspecified
    );
  }
}
