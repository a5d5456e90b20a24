//! Registry queries: a small SQL builder for the filtered product/application
//! select, and the enrichment pass that turns each row into a nested result.

use chrono::NaiveDate;
use psm_core::{
  payload::{EntityKind, PayloadEntry, RefFilter},
  query::{ApplicationResult, CodeLabel, ConditionEntry, DistributorEntry, ProductResult, RegistryQuery},
  registry::{CodeUsage, DosageCondition, WithdrawalPeriod},
};
use rusqlite::{Connection, types::Value};
use tracing::debug;

use crate::{
  Result,
  encode::{RawDosage, RawWithdrawal, decode_flag, decode_i64, decode_json_lenient},
  payload::PayloadCache,
};

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Composes a SELECT from fragments. Each predicate carries its own
/// positional (`?`) parameters, so fragments and values stay aligned however
/// many filters are active.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
  select:     String,
  joins:      Vec<String>,
  predicates: Vec<String>,
  params:     Vec<Value>,
  order_by:   Option<String>,
}

impl QueryBuilder {
  pub fn new(select: impl Into<String>) -> Self {
    Self {
      select:     select.into(),
      joins:      Vec::new(),
      predicates: Vec::new(),
      params:     Vec::new(),
      order_by:   None,
    }
  }

  pub fn join(&mut self, clause: impl Into<String>) -> &mut Self {
    self.joins.push(clause.into());
    self
  }

  pub fn filter(
    &mut self,
    predicate: impl Into<String>,
    params: impl IntoIterator<Item = Value>,
  ) -> &mut Self {
    self.predicates.push(predicate.into());
    self.params.extend(params);
    self
  }

  pub fn order_by(&mut self, clause: impl Into<String>) -> &mut Self {
    self.order_by = Some(clause.into());
    self
  }

  pub fn build(&self) -> (String, Vec<Value>) {
    let mut sql = self.select.clone();
    for join in &self.joins {
      sql.push('\n');
      sql.push_str(join);
    }
    if !self.predicates.is_empty() {
      sql.push_str("\nWHERE ");
      sql.push_str(&self.predicates.join("\n  AND "));
    }
    if let Some(order) = &self.order_by {
      sql.push_str("\nORDER BY ");
      sql.push_str(order);
    }
    (sql, self.params.clone())
  }
}

const BASE_SELECT: &str = "SELECT DISTINCT
  m.kennr, m.name, m.formulierung, m.zul_erstmalig, m.zul_ende, m.geringes_risiko,
  a.awg_id, a.status_json, a.zulassungsende
FROM bvl_mittel m
JOIN bvl_awg a ON a.kennr = m.kennr";

const TEXT_PREDICATE: &str = "(
  fold_case(m.name) LIKE ? ESCAPE '\\'
  OR fold_case(m.kennr) LIKE ? ESCAPE '\\'
  OR EXISTS (
    SELECT 1 FROM bvl_awg_kultur tk
    LEFT JOIN bvl_lookup_kultur lk ON lk.code = tk.kultur
    WHERE tk.awg_id = a.awg_id
      AND (fold_case(tk.kultur) LIKE ? ESCAPE '\\'
           OR fold_case(IFNULL(lk.label, '')) LIKE ? ESCAPE '\\'))
  OR EXISTS (
    SELECT 1 FROM bvl_awg_schadorg ts
    LEFT JOIN bvl_lookup_schadorg ls ON ls.code = ts.schadorg
    WHERE ts.awg_id = a.awg_id
      AND (fold_case(ts.schadorg) LIKE ? ESCAPE '\\'
           OR fold_case(IFNULL(ls.label, '')) LIKE ? ESCAPE '\\'))
)";

/// Build the filtered product/application select for `query`. Expiry is
/// compared against `today`.
pub fn registry_select(query: &RegistryQuery, today: NaiveDate) -> QueryBuilder {
  let query = query.normalized();
  let mut builder = QueryBuilder::new(BASE_SELECT);

  if let Some(culture) = query.culture {
    builder
      .join("JOIN bvl_awg_kultur k ON k.awg_id = a.awg_id AND k.ausgenommen = 0")
      .filter("k.kultur = ?", [Value::Text(culture)]);
  }
  if let Some(pest) = query.pest {
    builder
      .join("JOIN bvl_awg_schadorg s ON s.awg_id = a.awg_id AND s.ausgenommen = 0")
      .filter("s.schadorg = ?", [Value::Text(pest)]);
  }
  if let Some(text) = query.text {
    let pattern = like_pattern(&text);
    builder.filter(TEXT_PREDICATE, std::iter::repeat_n(Value::Text(pattern), 6));
  }
  if !query.include_expired {
    builder.filter(
      "(m.zul_ende IS NULL OR m.zul_ende >= ?)",
      [Value::Text(today.format("%Y-%m-%d").to_string())],
    );
  }

  builder.order_by("m.name, m.kennr, a.awg_id");
  builder
}

/// `%text%`, lower-cased, with LIKE wildcards in the input escaped.
pub(crate) fn like_pattern(text: &str) -> String { format!("%{}%", escape_like(text)) }

/// Lower-case `text` and escape the LIKE wildcards and the escape character.
pub(crate) fn escape_like(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.to_lowercase().chars() {
    if matches!(c, '%' | '_' | '\\') {
      escaped.push('\\');
    }
    escaped.push(c);
  }
  escaped
}

// ─── Execution ───────────────────────────────────────────────────────────────

pub fn run(conn: &Connection, query: &RegistryQuery, today: NaiveDate) -> Result<Vec<ProductResult>> {
  let (sql, params) = registry_select(query, today).build();
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map(rusqlite::params_from_iter(params), |r| {
      Ok(MatchRow {
        kennr:          r.get(0)?,
        name:           r.get(1)?,
        formulation:    r.get(2)?,
        first_approval: r.get(3)?,
        expires_on:     r.get(4)?,
        low_risk:       r.get(5)?,
        awg_id:         r.get(6)?,
        status_json:    r.get(7)?,
        awg_expires_on: r.get(8)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut cache = PayloadCache::default();
  let mut products: Vec<ProductResult> = Vec::new();
  for row in rows {
    if products.last().is_none_or(|p| p.kennr != row.kennr) {
      products.push(product_node(conn, &mut cache, &row)?);
    }
    let application = application_node(conn, &mut cache, &row)?;
    if let Some(product) = products.last_mut() {
      product.applications.push(application);
    }
  }

  let (hits, lookups) = cache.stats();
  debug!(products = products.len(), lookups, hits, "registry query enriched");
  Ok(products)
}

struct MatchRow {
  kennr:          String,
  name:           Option<String>,
  formulation:    Option<String>,
  first_approval: Option<String>,
  expires_on:     Option<String>,
  low_risk:       Value,
  awg_id:         String,
  status_json:    Option<String>,
  awg_expires_on: Option<String>,
}

// ─── Enrichment ──────────────────────────────────────────────────────────────

/// Fields on a distributor record that may point at its address, in order of
/// preference.
const ADDRESS_FIELDS: &[&str] = &[
  "adresse_nr",
  "vertriebsfirma_nr",
  "vertriebsfirma_adresse_nr",
  "hersteller_nr",
  "hersteller_adresse_nr",
  "zulassungsinhaber_adresse_nr",
  "zulassungsinhaber_nr",
];

fn product_node(conn: &Connection, cache: &mut PayloadCache, row: &MatchRow) -> Result<ProductResult> {
  let mut by_product = |kind| cache.lookup(conn, kind, RefFilter::primary(&row.kennr));

  let active_ingredients = by_product(EntityKind::ActiveIngredient)?;
  let ingredient_contents = by_product(EntityKind::IngredientContent)?;
  let additives = by_product(EntityKind::Additive)?;
  let additive_distributors = by_product(EntityKind::AdditiveDistribution)?;
  let strengtheners = by_product(EntityKind::Strengthener)?;
  let strengthener_distributors = by_product(EntityKind::StrengthenerDistribution)?;
  let parallel_imports_valid = by_product(EntityKind::ParallelImportValid)?;
  let parallel_imports_expired = by_product(EntityKind::ParallelImportExpired)?;
  let hazard_statements = by_product(EntityKind::HazardStatement)?;
  let hazard_symbols = by_product(EntityKind::HazardSymbol)?;
  let safety_phrases = by_product(EntityKind::SafetyPhrase)?;
  let signal_words = by_product(EntityKind::SignalWord)?;
  let notes = by_product(EntityKind::Note)?;
  let permit_applications = by_product(EntityKind::PermitApplication)?;
  let distributions = by_product(EntityKind::Distribution)?;

  let distributors = distributions
    .into_iter()
    .map(|entry| {
      let address = resolve_address(conn, cache, &entry)?;
      Ok(DistributorEntry { entry, address })
    })
    .collect::<Result<Vec<_>>>()?;

  Ok(ProductResult {
    kennr: row.kennr.clone(),
    name: row.name.clone(),
    formulation: row.formulation.clone(),
    first_approval: row.first_approval.clone(),
    expires_on: row.expires_on.clone(),
    low_risk: decode_flag(&row.low_risk),
    applications: Vec::new(),
    active_ingredients,
    ingredient_contents,
    additives,
    additive_distributors,
    strengtheners,
    strengthener_distributors,
    distributors,
    parallel_imports_valid,
    parallel_imports_expired,
    hazard_statements,
    hazard_symbols,
    safety_phrases,
    signal_words,
    notes,
    permit_applications,
  })
}

fn resolve_address(
  conn: &Connection,
  cache: &mut PayloadCache,
  distributor: &PayloadEntry,
) -> Result<Option<PayloadEntry>> {
  let Some(number) = ADDRESS_FIELDS.iter().find_map(|f| distributor.field(f)) else {
    return Ok(None);
  };
  Ok(cache
    .lookup(conn, EntityKind::Address, RefFilter::primary(number))?
    .into_iter()
    .next())
}

fn application_node(
  conn: &Connection,
  cache: &mut PayloadCache,
  row: &MatchRow,
) -> Result<ApplicationResult> {
  let awg_id = row.awg_id.as_str();
  let mut by_application = |kind| cache.lookup(conn, kind, RefFilter::primary(awg_id));

  let remarks = by_application(EntityKind::ApplicationRemark)?;
  let partners = by_application(EntityKind::ApplicationPartner)?;
  let partner_dosages = by_application(EntityKind::ApplicationPartnerDosage)?;
  let intended_uses = by_application(EntityKind::IntendedUse)?;
  let withdrawal_exceptions = by_application(EntityKind::WithdrawalException)?;
  let timings = by_application(EntityKind::ApplicationTiming)?;
  let approvals = by_application(EntityKind::ApplicationApproval)?;

  let conditions = conditions(conn, cache, &row.kennr, awg_id)?;

  Ok(ApplicationResult {
    awg_id: row.awg_id.clone(),
    status: decode_json_lenient(row.status_json.clone()),
    expires_on: row.awg_expires_on.clone(),
    crops: code_links(conn, CodeTable::Cultures, awg_id)?,
    pests: code_links(conn, CodeTable::Pests, awg_id)?,
    dosages: dosages(conn, awg_id)?,
    withdrawal_periods: withdrawal_periods(conn, awg_id)?,
    conditions,
    remarks,
    partners,
    partner_dosages,
    intended_uses,
    withdrawal_exceptions,
    timings,
    approvals,
  })
}

/// Every condition filed against the product, then those filed against the
/// application directly. A row matching both ways is listed once.
fn conditions(
  conn: &Connection,
  cache: &mut PayloadCache,
  kennr: &str,
  awg_id: &str,
) -> Result<Vec<ConditionEntry>> {
  let mut entries = cache.lookup(conn, EntityKind::Condition, RefFilter::primary(kennr))?;
  for entry in cache.lookup(conn, EntityKind::Condition, RefFilter::secondary(awg_id))? {
    if !entries.iter().any(|e| e.row_id == entry.row_id) {
      entries.push(entry);
    }
  }

  entries
    .into_iter()
    .map(|entry| {
      let reductions = match entry.field("auflagenr").or_else(|| entry.refs.tertiary.clone()) {
        Some(number) => {
          cache.lookup(conn, EntityKind::ConditionReduction, RefFilter::primary(number))?
        }
        None => Vec::new(),
      };
      Ok(ConditionEntry { entry, reductions })
    })
    .collect()
}

// ─── Relational children ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum CodeTable {
  Cultures,
  Pests,
}

impl CodeTable {
  fn tables(self) -> (&'static str, &'static str, &'static str) {
    match self {
      Self::Cultures => ("bvl_awg_kultur", "kultur", "bvl_lookup_kultur"),
      Self::Pests => ("bvl_awg_schadorg", "schadorg", "bvl_lookup_schadorg"),
    }
  }
}

fn code_links(conn: &Connection, table: CodeTable, awg_id: &str) -> Result<Vec<CodeLabel>> {
  let (link, column, lookup) = table.tables();
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT k.{column}, IFNULL(l.label, k.{column}), k.ausgenommen, k.sortier_nr
     FROM {link} k
     LEFT JOIN {lookup} l ON l.code = k.{column}
     WHERE k.awg_id = ?1
     ORDER BY k.sortier_nr, k.{column}"
  ))?;
  let links = stmt
    .query_map([awg_id], |r| {
      Ok(CodeLabel {
        code:       r.get(0)?,
        label:      r.get(1)?,
        excluded:   decode_flag(&r.get::<_, Value>(2)?),
        sort_order: decode_i64(&r.get::<_, Value>(3)?),
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(links)
}

fn dosages(conn: &Connection, awg_id: &str) -> Result<Vec<DosageCondition>> {
  let mut stmt = conn.prepare_cached(
    "SELECT awg_id, aufwand_bedingung, sortier_nr, mittel_menge, mittel_einheit,
            wasser_menge, wasser_einheit, payload_json
     FROM bvl_awg_aufwand WHERE awg_id = ?1
     ORDER BY sortier_nr, aufwand_bedingung",
  )?;
  let rows = stmt
    .query_map([awg_id], |r| {
      Ok(RawDosage {
        awg_id:         r.get(0)?,
        condition:      r.get(1)?,
        sort_order:     r.get(2)?,
        product_amount: r.get(3)?,
        product_unit:   r.get(4)?,
        water_amount:   r.get(5)?,
        water_unit:     r.get(6)?,
        payload_json:   r.get(7)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows.into_iter().map(RawDosage::into_dosage).collect())
}

fn withdrawal_periods(conn: &Connection, awg_id: &str) -> Result<Vec<WithdrawalPeriod>> {
  let mut stmt = conn.prepare_cached(
    "SELECT w.awg_wartezeit_nr, w.awg_id, w.kultur, l.label, w.sortier_nr, w.tage,
            w.bemerkung_kode, w.anwendungsbereich, w.erlaeuterung, w.payload_json
     FROM bvl_awg_wartezeit w
     LEFT JOIN bvl_lookup_kultur l ON l.code = w.kultur
     WHERE w.awg_id = ?1
     ORDER BY w.sortier_nr, w.awg_wartezeit_nr",
  )?;
  let rows = stmt
    .query_map([awg_id], |r| {
      Ok(RawWithdrawal {
        number:       r.get(0)?,
        awg_id:       r.get(1)?,
        crop:         r.get(2)?,
        crop_label:   r.get(3)?,
        sort_order:   r.get(4)?,
        days:         r.get(5)?,
        remark_code:  r.get(6)?,
        scope:        r.get(7)?,
        explanation:  r.get(8)?,
        payload_json: r.get(9)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows.into_iter().map(RawWithdrawal::into_period).collect())
}

/// Distinct non-excluded codes in use, ordered by label.
pub fn list_codes(conn: &Connection, table: CodeTable, with_count: bool) -> Result<Vec<CodeUsage>> {
  let (link, column, lookup) = table.tables();
  let sql = if with_count {
    format!(
      "SELECT k.{column}, IFNULL(l.label, k.{column}) AS label, COUNT(*)
       FROM {link} k LEFT JOIN {lookup} l ON l.code = k.{column}
       WHERE k.ausgenommen = 0
       GROUP BY k.{column}
       ORDER BY label COLLATE NOCASE"
    )
  } else {
    format!(
      "SELECT DISTINCT k.{column}, IFNULL(l.label, k.{column}) AS label, NULL
       FROM {link} k LEFT JOIN {lookup} l ON l.code = k.{column}
       WHERE k.ausgenommen = 0
       ORDER BY label COLLATE NOCASE"
    )
  };
  let mut stmt = conn.prepare(&sql)?;
  let codes = stmt
    .query_map([], |r| {
      Ok(CodeUsage {
        code:  r.get(0)?,
        label: r.get(1)?,
        count: r.get::<_, Option<i64>>(2)?.map(|n| n as u64),
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(codes)
}
