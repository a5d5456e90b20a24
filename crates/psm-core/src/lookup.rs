//! EPPO code and BBCH stage lookup tables.
//!
//! Both are reference datasets imported wholesale and searched by code or
//! name. They live beside the registry but are not touched by a sync.

use serde::{Deserialize, Serialize};

/// Meta keys stamped by a lookup import.
pub mod meta_keys {
  pub const EPPO_LAST_IMPORT: &str = "lookup:eppo:lastImport";
  pub const EPPO_COUNT: &str = "lookup:eppo:count";
  pub const BBCH_LAST_IMPORT: &str = "lookup:bbch:lastImport";
  pub const BBCH_COUNT: &str = "lookup:bbch:count";
}

pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
pub const MAX_SEARCH_LIMIT: u32 = 50;

fn clean(value: Option<String>) -> Option<String> {
  value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

// ─── EPPO ────────────────────────────────────────────────────────────────────

/// One EPPO code with its preferred name and localized variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EppoCode {
  pub code:           String,
  pub name:           String,
  pub language:       Option<String>,
  pub dtcode:         Option<String>,
  pub dt_label:       Option<String>,
  pub language_label: Option<String>,
  pub authority:      Option<String>,
  pub name_de:        Option<String>,
  pub name_en:        Option<String>,
  pub name_la:        Option<String>,
}

impl EppoCode {
  /// Upper-cased, trimmed code with the name falling back to the code.
  /// Rows without a code yield `None`.
  pub fn normalized(self) -> Option<Self> {
    let code = self.code.trim().to_uppercase();
    if code.is_empty() {
      return None;
    }
    let name = match self.name.trim() {
      "" => code.clone(),
      name => name.to_owned(),
    };
    Some(Self {
      name,
      language: clean(self.language).map(|l| l.to_uppercase()),
      dtcode: clean(self.dtcode).map(|d| d.to_uppercase()),
      dt_label: clean(self.dt_label),
      language_label: clean(self.language_label),
      authority: clean(self.authority),
      name_de: clean(self.name_de),
      name_en: clean(self.name_en),
      name_la: clean(self.name_la),
      code,
    })
  }
}

// ─── BBCH ────────────────────────────────────────────────────────────────────

/// A BBCH growth stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BbchStage {
  pub code:            String,
  pub label:           String,
  pub principal_stage: Option<i64>,
  pub secondary_stage: Option<i64>,
  pub definition:      Option<String>,
  pub kind:            Option<String>,
}

impl BbchStage {
  /// A missing code is derived from the stages as four digits (`principal`
  /// then `secondary`, zero-padded); the label falls back to the code. Rows
  /// with neither yield `None`.
  pub fn normalized(self) -> Option<Self> {
    let code = match self.code.trim() {
      "" => {
        let principal = self.principal_stage?;
        format!("{principal:02}{:02}", self.secondary_stage.unwrap_or(0))
      }
      code => code.to_owned(),
    };
    let label = match self.label.trim() {
      "" => code.clone(),
      label => label.to_owned(),
    };
    Some(Self {
      label,
      definition: clean(self.definition),
      kind: clean(self.kind),
      code,
      ..self
    })
  }
}

// ─── Search ──────────────────────────────────────────────────────────────────

/// Parameters for a lookup search. An empty `query` lists everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupSearch {
  pub query:    Option<String>,
  /// EPPO only: restrict to one name language (`DE`, `EN`, `LA`, ...).
  pub language: Option<String>,
  pub limit:    u32,
  pub offset:   u32,
}

impl Default for LookupSearch {
  fn default() -> Self {
    Self { query: None, language: None, limit: DEFAULT_SEARCH_LIMIT, offset: 0 }
  }
}

impl LookupSearch {
  /// Blank strings dropped, language upper-cased, limit clamped to
  /// `1..=MAX_SEARCH_LIMIT`.
  pub fn normalized(&self) -> Self {
    Self {
      query:    clean(self.query.clone()),
      language: clean(self.language.clone()).map(|l| l.to_uppercase()),
      limit:    self.limit.clamp(1, MAX_SEARCH_LIMIT),
      offset:   self.offset,
    }
  }
}

/// One page of search results and the number of matches overall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupPage<T> {
  pub rows:  Vec<T>,
  pub total: u64,
}

// ─── Stats ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupTableStats {
  pub count:       u64,
  pub last_import: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupStats {
  pub eppo: LookupTableStats,
  pub bbch: LookupTableStats,
}
