//! Registry query parameters and the nested result tree.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  payload::PayloadEntry,
  registry::{DosageCondition, WithdrawalPeriod},
};

// ─── Query ───────────────────────────────────────────────────────────────────

/// Parameters for [`crate::store::RegistryStore::query_registry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryQuery {
  /// Crop code the application must list (non-excluded).
  pub culture:         Option<String>,
  /// Pest code the application must list (non-excluded).
  pub pest:            Option<String>,
  /// Case-insensitive substring over name, kennr and linked crop/pest codes
  /// or labels.
  pub text:            Option<String>,
  pub include_expired: bool,
}

impl RegistryQuery {
  /// Blank filters are treated as absent.
  pub fn normalized(&self) -> Self {
    let clean = |v: &Option<String>| {
      v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
    };
    Self {
      culture:         clean(&self.culture),
      pest:            clean(&self.pest),
      text:            clean(&self.text),
      include_expired: self.include_expired,
    }
  }
}

// ─── Result tree ─────────────────────────────────────────────────────────────

/// A crop or pest attached to an application, with its resolved label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLabel {
  pub code:       String,
  /// Lookup label, or the code itself when none is known.
  pub label:      String,
  pub excluded:   bool,
  pub sort_order: Option<i64>,
}

/// A distributor with its address record resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributorEntry {
  #[serde(flatten)]
  pub entry:   PayloadEntry,
  pub address: Option<PayloadEntry>,
}

/// A condition (`auflagen`) together with its reductions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionEntry {
  #[serde(flatten)]
  pub entry:      PayloadEntry,
  pub reductions: Vec<PayloadEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationResult {
  pub awg_id:                String,
  pub status:                Option<Value>,
  pub expires_on:            Option<String>,
  pub crops:                 Vec<CodeLabel>,
  pub pests:                 Vec<CodeLabel>,
  pub dosages:               Vec<DosageCondition>,
  pub withdrawal_periods:    Vec<WithdrawalPeriod>,
  pub conditions:            Vec<ConditionEntry>,
  pub remarks:               Vec<PayloadEntry>,
  pub partners:              Vec<PayloadEntry>,
  pub partner_dosages:       Vec<PayloadEntry>,
  pub intended_uses:         Vec<PayloadEntry>,
  pub withdrawal_exceptions: Vec<PayloadEntry>,
  pub timings:               Vec<PayloadEntry>,
  pub approvals:             Vec<PayloadEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductResult {
  pub kennr:                      String,
  pub name:                       Option<String>,
  pub formulation:                Option<String>,
  pub first_approval:             Option<String>,
  pub expires_on:                 Option<String>,
  pub low_risk:                   bool,
  pub applications:               Vec<ApplicationResult>,
  pub active_ingredients:         Vec<PayloadEntry>,
  pub ingredient_contents:        Vec<PayloadEntry>,
  pub additives:                  Vec<PayloadEntry>,
  pub additive_distributors:      Vec<PayloadEntry>,
  pub strengtheners:              Vec<PayloadEntry>,
  pub strengthener_distributors:  Vec<PayloadEntry>,
  pub distributors:               Vec<DistributorEntry>,
  pub parallel_imports_valid:     Vec<PayloadEntry>,
  pub parallel_imports_expired:   Vec<PayloadEntry>,
  pub hazard_statements:          Vec<PayloadEntry>,
  pub hazard_symbols:             Vec<PayloadEntry>,
  pub safety_phrases:             Vec<PayloadEntry>,
  pub signal_words:               Vec<PayloadEntry>,
  pub notes:                      Vec<PayloadEntry>,
  pub permit_applications:        Vec<PayloadEntry>,
}
