//! Integration tests for `SqliteStore` against in-memory databases.

use chrono::Utc;
use psm_core::{
  lookup::{BbchStage, EppoCode, LookupSearch},
  payload::{EntityKind, PayloadRecord, RefFilter},
  query::RegistryQuery,
  registry::{Application, AwgCode, LookupCode, Product, WithdrawalDays, WithdrawalPeriod},
  snapshot::SnapshotDocument,
  store::RegistryStore,
  sync::{DatasetRecords, NewSyncLogEntry, SyncStamp, meta_keys},
};
use serde_json::{Map, Value, json};

use crate::{Error, SqliteStore, TARGET_VERSION};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn object(value: Value) -> Map<String, Value> {
  match value {
    Value::Object(map) => map,
    other => panic!("not an object: {other}"),
  }
}

fn stamp(fingerprint: &str) -> SyncStamp {
  SyncStamp {
    fingerprint: fingerprint.into(),
    data_source: "pflanzenschutzliste-data@test".into(),
    api_stand:   Some("2024-10-01".into()),
    counts:      Value::Null,
    strategy:    "manifest".into(),
    synced_at:   Utc::now(),
  }
}

// ─── Migrations ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn migration_is_idempotent() {
  let s = store().await;
  assert_eq!(s.schema_version().await.unwrap(), TARGET_VERSION);

  let before = s.diagnose_schema().await.unwrap();
  assert_eq!(s.migrate().await.unwrap(), TARGET_VERSION);
  assert_eq!(s.migrate().await.unwrap(), TARGET_VERSION);
  let after = s.diagnose_schema().await.unwrap();

  assert_eq!(before, after);
  assert!(after.tables.contains_key("bvl_api_payloads"));
  assert!(
    after.tables["bvl_awg_wartezeit"]
      .columns
      .iter()
      .any(|c| c.name == "tage")
  );
}

#[tokio::test]
async fn reopening_a_file_store_keeps_data() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("psm.sqlite");

  let s = SqliteStore::open(&path).await.unwrap();
  s.set_meta("custom".into(), Some("1".into())).await.unwrap();
  s.close().await.unwrap();

  let s = SqliteStore::open(&path).await.unwrap();
  assert_eq!(s.schema_version().await.unwrap(), TARGET_VERSION);
  assert_eq!(s.get_meta("custom".into()).await.unwrap().as_deref(), Some("1"));
}

// ─── Payloads ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn payload_refs_resolve_any_field_casing() {
  let s = store().await;
  let rows = vec![
    object(json!({ "KENNR": "024567-00", "WIRKNR": "W1", "Wirkstoff": "Azoxystrobin" })),
    object(json!({ "kennr": "024567-00", "wirknr": "W2" })),
    object(json!({ "Kennr": "031234-00", "Wirknr": "W1" })),
  ];
  assert_eq!(s.put_payloads(EntityKind::ActiveIngredient, rows).await.unwrap(), 3);

  let found = s
    .get_payloads(EntityKind::ActiveIngredient, RefFilter::primary(" 024567-00 "))
    .await
    .unwrap();
  assert_eq!(found.len(), 2);
  assert_eq!(found[0].refs.secondary.as_deref(), Some("W1"));
  assert_eq!(found[0].fields.get("wirkstoff"), Some(&json!("Azoxystrobin")));
  assert!(found[0].row_id < found[1].row_id);

  let by_secondary = s
    .get_payloads(EntityKind::ActiveIngredient, RefFilter::secondary("W1"))
    .await
    .unwrap();
  assert_eq!(by_secondary.len(), 2);

  let all = s
    .get_payloads(EntityKind::ActiveIngredient, RefFilter { primary: Some("  ".into()), secondary: None })
    .await
    .unwrap();
  assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn put_payloads_replaces_only_its_kind() {
  let s = store().await;
  s.put_payloads(EntityKind::Note, vec![object(json!({ "kennr": "a" }))])
    .await
    .unwrap();
  s.put_payloads(EntityKind::HazardSymbol, vec![object(json!({ "kennr": "a" }))])
    .await
    .unwrap();
  s.put_payloads(EntityKind::Note, vec![
    object(json!({ "kennr": "b" })),
    object(json!({ "kennr": "c" })),
  ])
  .await
  .unwrap();

  let notes = s.get_payloads(EntityKind::Note, RefFilter::default()).await.unwrap();
  let refs: Vec<_> = notes.iter().filter_map(|n| n.refs.primary.as_deref()).collect();
  assert_eq!(refs, ["b", "c"]);
  let symbols = s.get_payloads(EntityKind::HazardSymbol, RefFilter::default()).await.unwrap();
  assert_eq!(symbols.len(), 1);
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

fn sample_snapshot() -> SnapshotDocument {
  serde_json::from_value(json!({
    "meta": {
      "version": 1,
      "company": { "name": "Hof Sonnenschein" },
      "defaults": { "waterVolume": 300 },
      "fieldLabels": {},
      "measurementMethods": [{
        "id": "perHa", "label": "pro ha", "type": "factor", "unit": "ha",
        "requires": ["areaHa"], "config": { "sourceField": "areaHa" }
      }]
    },
    "mediums": [
      { "id": "m1", "name": "Wasser", "unit": "l", "methodId": "perHa", "value": 200.0 },
      { "id": "m2", "name": "Fungizid Alpha", "unit": "l", "methodId": "perHa",
        "value": 1.5, "zulassungsnummer": "024567-00" }
    ],
    "mediumProfiles": [{ "id": "p1", "name": "Getreide", "mediumIds": ["m1", "m2"] }],
    "history": [
      { "savedAt": "2024-04-01T08:00:00Z", "crop": "Weizen",
        "items": [{ "mediumId": "m1", "total": 600 }] },
      { "header": { "createdAt": "2024-05-01T08:00:00Z", "crop": "Gerste" },
        "items": [{ "medium_id": "m2", "total": 4.5 }] },
      { "crop": "Mais", "items": [] }
    ]
  }))
  .unwrap()
}

#[tokio::test]
async fn snapshot_round_trip_is_a_no_op() {
  let s = store().await;
  let doc = sample_snapshot();
  s.import_snapshot(doc.clone()).await.unwrap();

  let first = s.export_snapshot().await.unwrap();
  assert_eq!(first.mediums, doc.mediums);
  assert_eq!(first.medium_profiles, doc.medium_profiles);
  assert_eq!(first.meta.measurement_methods, doc.meta.measurement_methods);
  assert_eq!(first.meta.company, doc.meta.company);
  assert_eq!(first.history.len(), 3);

  // Newest first; the undated entry was stamped at import time.
  assert_eq!(first.history[0].header.get("crop"), Some(&json!("Mais")));
  assert!(first.history[0].header.contains_key("createdAt"));
  assert_eq!(first.history[1].header.get("crop"), Some(&json!("Gerste")));
  assert_eq!(
    first.history[2].header.get("createdAt"),
    Some(&json!("2024-04-01T08:00:00Z"))
  );
  assert_eq!(first.history[2].items, vec![json!({ "mediumId": "m1", "total": 600 })]);

  s.import_snapshot(first.clone()).await.unwrap();
  let second = s.export_snapshot().await.unwrap();
  assert_eq!(first, second);
}

#[tokio::test]
async fn invalid_snapshot_leaves_store_untouched() {
  let s = store().await;
  s.import_snapshot(sample_snapshot()).await.unwrap();
  let before = s.export_snapshot().await.unwrap();

  let mut bad = sample_snapshot();
  bad.mediums[1].id = String::new();
  let err = s.import_snapshot(bad).await.unwrap_err();
  assert!(matches!(err, Error::Core(psm_core::Error::Validation(_))));

  assert_eq!(s.export_snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn duplicate_medium_rolls_back_whole_snapshot() {
  let s = store().await;
  s.import_snapshot(sample_snapshot()).await.unwrap();
  let before = s.export_snapshot().await.unwrap();

  let mut bad = sample_snapshot();
  let copy = bad.mediums[0].clone();
  bad.mediums.push(copy);
  assert!(s.import_snapshot(bad).await.is_err());

  assert_eq!(s.export_snapshot().await.unwrap(), before);
}

#[tokio::test]
async fn missing_method_requirements_are_stored_empty() {
  let s = store().await;
  let mut doc = sample_snapshot();
  doc.meta.measurement_methods = serde_json::from_value(json!([
    { "id": "fixed", "label": "fest", "type": "fixed", "unit": "l" },
    { "id": "perHa", "type": "factor", "requires": null, "config": null }
  ]))
  .unwrap();
  s.import_snapshot(doc).await.unwrap();

  let methods = s.export_snapshot().await.unwrap().meta.measurement_methods;
  assert_eq!(methods.len(), 2);
  for method in &methods {
    assert_eq!(method.requires, json!([]));
    assert_eq!(method.config, json!({}));
  }
}

// ─── Binary image ────────────────────────────────────────────────────────────

#[tokio::test]
async fn database_image_round_trip() {
  let source = store().await;
  source.import_snapshot(sample_snapshot()).await.unwrap();
  source.set_meta(meta_keys::LAST_SYNC_HASH.into(), Some("abc".into())).await.unwrap();
  let image = source.export_database().await.unwrap();
  assert!(image.starts_with(b"SQLite format 3\0"));

  let target = store().await;
  target.import_database(image).await.unwrap();
  assert_eq!(target.schema_version().await.unwrap(), TARGET_VERSION);
  assert_eq!(
    target.export_snapshot().await.unwrap(),
    source.export_snapshot().await.unwrap()
  );
  assert_eq!(
    target.get_meta(meta_keys::LAST_SYNC_HASH.into()).await.unwrap().as_deref(),
    Some("abc")
  );
}

#[tokio::test]
async fn garbage_image_is_rejected() {
  let s = store().await;
  s.import_snapshot(sample_snapshot()).await.unwrap();
  let before = s.export_snapshot().await.unwrap();

  let err = s.import_database(b"definitely not sqlite".to_vec()).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
  assert_eq!(s.export_snapshot().await.unwrap(), before);
}

// ─── Meta & log ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn meta_set_and_clear() {
  let s = store().await;
  assert_eq!(s.get_meta("apiStand".into()).await.unwrap(), None);
  s.set_meta("apiStand".into(), Some("2024-10-01".into())).await.unwrap();
  s.set_meta("apiStand".into(), Some("2024-10-02".into())).await.unwrap();
  assert_eq!(
    s.get_meta("apiStand".into()).await.unwrap().as_deref(),
    Some("2024-10-02")
  );
  s.set_meta("apiStand".into(), None).await.unwrap();
  assert_eq!(s.get_meta("apiStand".into()).await.unwrap(), None);
}

#[tokio::test]
async fn sync_log_lists_newest_first() {
  let s = store().await;
  for i in 0..5 {
    s.append_sync_log(NewSyncLogEntry {
      ok:           i % 2 == 0,
      message:      format!("run {i}"),
      payload_hash: None,
    })
    .await
    .unwrap();
  }
  let log = s.list_sync_log(3).await.unwrap();
  assert_eq!(log.len(), 3);
  assert_eq!(log[0].message.as_deref(), Some("run 4"));
  assert!(log[0].ok);
  assert!(!log[1].ok);
}

#[tokio::test]
async fn sync_failure_is_recorded() {
  let s = store().await;
  s.record_sync_failure("manifest fetch failed: 503".into(), Some("v9".into()))
    .await
    .unwrap();

  assert_eq!(
    s.get_meta(meta_keys::LAST_ERROR.into()).await.unwrap().as_deref(),
    Some("manifest fetch failed: 503")
  );
  assert!(s.get_meta(meta_keys::LAST_ERROR_TIME.into()).await.unwrap().is_some());
  let log = s.list_sync_log(10).await.unwrap();
  assert_eq!(log.len(), 1);
  assert!(!log[0].ok);
  assert_eq!(log[0].payload_hash.as_deref(), Some("v9"));
}

// ─── Dataset image import ────────────────────────────────────────────────────

const DATASET_SCHEMA: &str = "
CREATE TABLE bvl_meta (key TEXT PRIMARY KEY, value TEXT);
CREATE TABLE bvl_mittel (kennr TEXT PRIMARY KEY, name TEXT, formulierung TEXT,
  zul_erstmalig TEXT, zul_ende TEXT, geringes_risiko INTEGER, payload_json TEXT);
CREATE TABLE bvl_awg (awg_id TEXT PRIMARY KEY, kennr TEXT, status_json TEXT,
  zulassungsende TEXT);
CREATE TABLE bvl_awg_kultur (awg_id TEXT, kultur TEXT, ausgenommen INTEGER, sortier_nr INTEGER);
CREATE TABLE bvl_awg_schadorg (awg_id TEXT, schadorg TEXT, ausgenommen INTEGER, sortier_nr INTEGER);
CREATE TABLE bvl_awg_aufwand (awg_id TEXT, aufwand_bedingung TEXT, sortier_nr INTEGER,
  mittel_menge REAL, mittel_einheit TEXT, wasser_menge REAL, wasser_einheit TEXT,
  payload_json TEXT);
CREATE TABLE bvl_awg_wartezeit (awg_wartezeit_nr INTEGER, awg_id TEXT, kultur TEXT,
  sortier_nr INTEGER, tage TEXT, bemerkung_kode TEXT, anwendungsbereich TEXT,
  erlaeuterung TEXT, payload_json TEXT);
CREATE TABLE bvl_lookup_kultur (code TEXT PRIMARY KEY, label TEXT);
CREATE TABLE bvl_lookup_schadorg (code TEXT PRIMARY KEY, label TEXT);
CREATE TABLE bvl_api_payloads (id INTEGER PRIMARY KEY AUTOINCREMENT, endpoint TEXT NOT NULL,
  key TEXT NOT NULL, primary_ref TEXT, secondary_ref TEXT, tertiary_ref TEXT,
  payload_json TEXT NOT NULL);
CREATE TABLE bvl_sync_log (id INTEGER PRIMARY KEY, synced_at TEXT, ok INTEGER,
  message TEXT, payload_hash TEXT);
CREATE TABLE bvl_extra_notes (id INTEGER PRIMARY KEY, note TEXT);
";

const DATASET_ROWS: &str = r#"
INSERT INTO bvl_meta VALUES ('publisher', 'test');
INSERT INTO bvl_mittel VALUES
  ('024567-00', 'Fungizid Alpha', 'EC', '2019-01-01', NULL, 0, '{"kennr":"024567-00"}'),
  ('031234-00', 'Beta Herbizid', 'SC', '2020-01-01', '2099-12-31', 1, NULL);
INSERT INTO bvl_awg VALUES
  ('024567-00/01-001', '024567-00', '{"status":"zugelassen"}', NULL),
  ('031234-00/00-002', '031234-00', NULL, NULL);
INSERT INTO bvl_awg_kultur VALUES
  ('024567-00/01-001', 'TRZAW', 0, 1),
  ('024567-00/01-001', 'HORVW', 1, 2),
  ('031234-00/00-002', 'ZEAMX', 0, 1);
INSERT INTO bvl_awg_schadorg VALUES ('024567-00/01-001', 'ERYSGR', 0, 1);
INSERT INTO bvl_awg_aufwand VALUES
  ('024567-00/01-001', 'Standard', 1, '1,5', 'l/ha', 200, 'l/ha', NULL);
INSERT INTO bvl_awg_wartezeit VALUES
  (1, '024567-00/01-001', 'TRZAW', 1, 'F', NULL, NULL, NULL, NULL),
  (2, '024567-00/01-001', 'HORVW', 2, '35', NULL, NULL, NULL, NULL);
INSERT INTO bvl_lookup_kultur VALUES ('TRZAW', 'Winterweizen'), ('ZEAMX', 'Mais');
INSERT INTO bvl_lookup_schadorg VALUES ('ERYSGR', 'Echter Mehltau');
INSERT INTO bvl_api_payloads (endpoint, key, primary_ref, secondary_ref, tertiary_ref, payload_json) VALUES
  ('wirkstoff', 'wirkstoff', '024567-00', 'W1', NULL,
   '{"KENNR":"024567-00","WIRKNR":"W1","Wirkstoff":"Azoxystrobin"}'),
  ('mittel_vertrieb', 'mittel_vertrieb', '024567-00', NULL, NULL,
   '{"kennr":"024567-00","vertriebsfirma_nr":"A7"}'),
  ('adresse', 'adresse', 'A7', NULL, NULL, '{"adresse_nr":"A7","firma":"Agrar GmbH"}'),
  ('auflagen', 'auflagen', '024567-00', NULL, 'NW262', '{"kennr":"024567-00","auflagenr":"NW262"}'),
  ('auflagen', 'auflagen', NULL, '024567-00/01-001', 'NT101',
   '{"awg_id":"024567-00/01-001","auflagenr":"NT101"}'),
  ('auflage_redu', 'auflage_redu', 'NT101', NULL, NULL, '{"auflagenr":"NT101","redu_abstand":5}'),
  ('awg_bem', 'awg_bem', '024567-00/01-001', NULL, NULL,
   '{"awg_id":"024567-00/01-001","bemerkung":"nur Frühjahr"}');
INSERT INTO bvl_sync_log VALUES (1, '2024-01-01', 1, 'publisher log', NULL);
INSERT INTO bvl_extra_notes VALUES (1, 'kept');
"#;

/// Build a dataset file and return its bytes.
fn dataset_image(extra_sql: &str) -> Vec<u8> {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("dataset.sqlite");
  {
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(DATASET_SCHEMA).unwrap();
    conn.execute_batch(DATASET_ROWS).unwrap();
    conn.execute_batch(extra_sql).unwrap();
  }
  std::fs::read(&path).unwrap()
}

async fn synced_store() -> SqliteStore {
  let s = store().await;
  s.import_dataset_image(dataset_image(""), stamp("hash-1"))
    .await
    .unwrap();
  s
}

#[tokio::test]
async fn dataset_import_reconciles_tables_and_stamps_meta() {
  let s = store().await;
  let report = s
    .import_dataset_image(dataset_image(""), stamp("hash-1"))
    .await
    .unwrap();

  assert_eq!(report.counts["bvl_mittel"], 2);
  assert_eq!(report.counts["bvl_awg_kultur"], 3);
  assert_eq!(report.counts["bvl_api_payloads"], 7);
  assert_eq!(report.counts["bvl_extra_notes"], 1);
  assert!(!report.counts.contains_key("bvl_sync_log"));

  let meta = |key: &'static str| {
    let s = s.clone();
    async move { s.get_meta(key.into()).await.unwrap() }
  };
  assert_eq!(meta(meta_keys::LAST_SYNC_HASH).await.as_deref(), Some("hash-1"));
  assert_eq!(
    meta(meta_keys::DATA_SOURCE).await.as_deref(),
    Some("pflanzenschutzliste-data@test")
  );
  assert_eq!(meta(meta_keys::API_STAND).await.as_deref(), Some("2024-10-01"));
  assert_eq!(meta("publisher").await.as_deref(), Some("test"));
  let counts: Value = serde_json::from_str(&meta(meta_keys::LAST_SYNC_COUNTS).await.unwrap()).unwrap();
  assert_eq!(counts["bvl_awg"], json!(2));

  let log = s.list_sync_log(10).await.unwrap();
  assert_eq!(log.len(), 1);
  assert!(log[0].ok);
  assert_eq!(log[0].message.as_deref(), Some("success (manifest)"));
}

#[tokio::test]
async fn failing_table_rolls_back_entire_import() {
  let s = synced_store().await;
  let before = s.query_registry(RegistryQuery { include_expired: true, ..Default::default() })
    .await
    .unwrap();

  // A crop link without a crop code violates the store's NOT NULL constraint
  // after products and applications have already been replaced.
  let broken = dataset_image(
    "DELETE FROM bvl_mittel WHERE kennr = '031234-00';
     DELETE FROM bvl_awg WHERE kennr = '031234-00';
     DELETE FROM bvl_awg_kultur WHERE awg_id LIKE '031234-00%';
     INSERT INTO bvl_awg_kultur VALUES ('024567-00/01-001', NULL, 0, 9);",
  );
  assert!(s.import_dataset_image(broken, stamp("hash-2")).await.is_err());

  let after = s.query_registry(RegistryQuery { include_expired: true, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(before, after);
  assert_eq!(
    s.get_meta(meta_keys::LAST_SYNC_HASH.into()).await.unwrap().as_deref(),
    Some("hash-1")
  );
}

#[tokio::test]
async fn orphan_application_fails_verification() {
  let s = synced_store().await;
  let broken = dataset_image(
    "INSERT INTO bvl_awg VALUES ('999999-00/00-001', '999999-00', NULL, NULL);",
  );
  let err = s.import_dataset_image(broken, stamp("hash-2")).await.unwrap_err();
  assert!(matches!(err, Error::Integrity(_)), "unexpected error: {err}");
  assert_eq!(
    s.get_meta(meta_keys::LAST_SYNC_HASH.into()).await.unwrap().as_deref(),
    Some("hash-1")
  );
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn query_builds_enriched_tree() {
  let s = synced_store().await;
  let results = s.query_registry(RegistryQuery::default()).await.unwrap();

  let names: Vec<_> = results.iter().map(|p| p.name.as_deref().unwrap()).collect();
  assert_eq!(names, ["Beta Herbizid", "Fungizid Alpha"]);
  assert!(results[0].low_risk);

  let alpha = &results[1];
  assert_eq!(alpha.active_ingredients.len(), 1);
  assert_eq!(alpha.active_ingredients[0].field("wirkstoff").as_deref(), Some("Azoxystrobin"));
  assert_eq!(alpha.distributors.len(), 1);
  let address = alpha.distributors[0].address.as_ref().expect("resolved address");
  assert_eq!(address.field("firma").as_deref(), Some("Agrar GmbH"));

  let awg = &alpha.applications[0];
  let crops: Vec<_> = awg.crops.iter().map(|c| (c.code.as_str(), c.label.as_str(), c.excluded)).collect();
  assert_eq!(crops, [("TRZAW", "Winterweizen", false), ("HORVW", "HORVW", true)]);
  assert_eq!(awg.pests[0].label, "Echter Mehltau");
  assert_eq!(awg.dosages[0].product_amount, Some(1.5));
  assert_eq!(awg.remarks.len(), 1);

  let conditions: Vec<_> = awg.conditions.iter().filter_map(|c| c.entry.field("auflagenr")).collect();
  assert_eq!(conditions, ["NW262", "NT101"]);
  assert_eq!(awg.conditions[1].reductions.len(), 1);
  assert!(awg.conditions[0].reductions.is_empty());
}

#[tokio::test]
async fn withdrawal_sentinel_is_reported_as_code() {
  let s = synced_store().await;
  let results = s
    .query_registry(RegistryQuery { culture: Some("TRZAW".into()), ..Default::default() })
    .await
    .unwrap();

  let periods = &results[0].applications[0].withdrawal_periods;
  assert_eq!(periods[0].days, WithdrawalDays::LaterDetermination);
  assert_eq!(periods[0].days.to_string(), "F");
  assert_eq!(periods[0].crop_label.as_deref(), Some("Winterweizen"));
  assert_eq!(periods[1].days, WithdrawalDays::Days(35));
  assert_eq!(periods[1].crop_label.as_deref(), Some("HORVW"));

  let encoded = serde_json::to_value(&periods[0]).unwrap();
  assert_eq!(encoded["days"], json!({ "kind": "later_determination" }));
}

#[tokio::test]
async fn culture_pest_and_text_filters() {
  let s = synced_store().await;
  let kennrs = |results: Vec<psm_core::query::ProductResult>| {
    results.into_iter().map(|p| p.kennr).collect::<Vec<_>>()
  };

  let by_culture = s
    .query_registry(RegistryQuery { culture: Some("ZEAMX".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(kennrs(by_culture), ["031234-00"]);

  let by_pest = s
    .query_registry(RegistryQuery { pest: Some("ERYSGR".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(kennrs(by_pest), ["024567-00"]);

  let by_label = s
    .query_registry(RegistryQuery { text: Some("WEIZEN".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(kennrs(by_label), ["024567-00"]);

  let by_kennr = s
    .query_registry(RegistryQuery { text: Some("031234".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(kennrs(by_kennr), ["031234-00"]);
}

#[tokio::test]
async fn excluded_links_do_not_satisfy_culture_or_pest_filters() {
  let s = store().await;
  let image = dataset_image(
    "INSERT INTO bvl_awg_schadorg VALUES ('031234-00/00-002', 'ERYSGR', 1, 1);",
  );
  s.import_dataset_image(image, stamp("hash-1")).await.unwrap();

  // HORVW is listed on Fungizid Alpha's application, but as excluded.
  let excluded = s
    .query_registry(RegistryQuery { culture: Some("HORVW".into()), ..Default::default() })
    .await
    .unwrap();
  assert!(excluded.is_empty());

  // ERYSGR is included on Alpha and excluded on Beta.
  let by_pest = s
    .query_registry(RegistryQuery { pest: Some("ERYSGR".into()), ..Default::default() })
    .await
    .unwrap();
  let kennrs: Vec<_> = by_pest.iter().map(|p| p.kennr.as_str()).collect();
  assert_eq!(kennrs, ["024567-00"]);

  // The excluded link is still reported on the application itself.
  let all = s.query_registry(RegistryQuery::default()).await.unwrap();
  let beta = all.iter().find(|p| p.kennr == "031234-00").unwrap();
  assert_eq!(beta.applications[0].pests.len(), 1);
  assert!(beta.applications[0].pests[0].excluded);
}

#[tokio::test]
async fn product_conditions_attach_to_every_application() {
  let s = store().await;
  let image = dataset_image(
    r#"INSERT INTO bvl_awg VALUES ('024567-00/02-003', '024567-00', NULL, NULL);
       INSERT INTO bvl_api_payloads (endpoint, key, primary_ref, secondary_ref, tertiary_ref, payload_json)
       VALUES ('auflagen', 'auflagen', '024567-00', '024567-00/02-003', 'NW800',
               '{"kennr":"024567-00","awg_id":"024567-00/02-003","auflagenr":"NW800"}');"#,
  );
  s.import_dataset_image(image, stamp("hash-1")).await.unwrap();

  let results = s
    .query_registry(RegistryQuery { text: Some("Fungizid".into()), ..Default::default() })
    .await
    .unwrap();
  let alpha = &results[0];
  assert_eq!(alpha.applications.len(), 2);

  let numbers = |awg_id: &str| {
    alpha
      .applications
      .iter()
      .find(|a| a.awg_id == awg_id)
      .unwrap()
      .conditions
      .iter()
      .filter_map(|c| c.entry.field("auflagenr"))
      .collect::<Vec<_>>()
  };
  assert_eq!(numbers("024567-00/01-001"), ["NW262", "NW800", "NT101"]);
  // Keyed by product and by this application, but listed once.
  assert_eq!(numbers("024567-00/02-003"), ["NW262", "NW800"]);
}

#[tokio::test]
async fn cultures_and_pests_are_listed_with_counts() {
  let s = synced_store().await;
  let cultures = s.list_cultures(true).await.unwrap();
  let labels: Vec<_> = cultures.iter().map(|c| c.label.as_str()).collect();
  assert_eq!(labels, ["Mais", "Winterweizen"]);
  assert!(cultures.iter().all(|c| c.count == Some(1)));

  let pests = s.list_pests(false).await.unwrap();
  assert_eq!(pests.len(), 1);
  assert_eq!(pests[0].count, None);
}

// ─── Structured import ───────────────────────────────────────────────────────

fn product(kennr: &str, name: &str, expires_on: Option<String>) -> Product {
  Product {
    kennr: kennr.into(),
    name: Some(name.into()),
    formulation: None,
    first_approval: None,
    expires_on,
    low_risk: false,
    raw: None,
  }
}

fn application(kennr: &str) -> Application {
  Application {
    awg_id:     format!("{kennr}/00-001"),
    kennr:      kennr.into(),
    status:     None,
    expires_on: None,
  }
}

#[tokio::test]
async fn expiry_filter_boundaries() {
  let s = store().await;
  let today = Utc::now().date_naive();
  let fmt = |d: chrono::NaiveDate| d.format("%Y-%m-%d").to_string();

  let products = vec![
    product("000001-00", "A open", None),
    product("000002-00", "B yesterday", Some(fmt(today.pred_opt().unwrap()))),
    product("000003-00", "C today", Some(fmt(today))),
    product("000004-00", "D tomorrow", Some(fmt(today.succ_opt().unwrap()))),
  ];
  let applications = products.iter().map(|p| application(&p.kennr)).collect();
  let records = DatasetRecords { products, applications, ..Default::default() };
  s.import_records(records, stamp("api-1")).await.unwrap();

  let current = s.query_registry(RegistryQuery::default()).await.unwrap();
  let names: Vec<_> = current.iter().filter_map(|p| p.name.as_deref()).collect();
  assert_eq!(names, ["A open", "C today", "D tomorrow"]);

  let all = s
    .query_registry(RegistryQuery { include_expired: true, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn structured_import_replaces_registry_and_payloads() {
  let s = synced_store().await;

  let records = DatasetRecords {
    products: vec![product("555555-00", "Gamma", None)],
    applications: vec![application("555555-00")],
    crops: vec![AwgCode {
      awg_id:     "555555-00/00-001".into(),
      code:       "BRSNN".into(),
      excluded:   false,
      sort_order: Some(1),
    }],
    withdrawal_periods: vec![WithdrawalPeriod {
      number:      1,
      awg_id:      "555555-00/00-001".into(),
      crop:        Some("BRSNN".into()),
      crop_label:  None,
      sort_order:  Some(1),
      days:        WithdrawalDays::NotApplicable,
      remark_code: None,
      scope:       None,
      explanation: None,
      raw:         None,
    }],
    crop_labels: vec![LookupCode { code: "BRSNN".into(), label: Some("Raps".into()) }],
    payloads: vec![PayloadRecord::new(
      EntityKind::Note,
      object(json!({ "kennr": "555555-00", "hinweis": "Bienengefährlich" })),
    )],
    ..Default::default()
  };
  let report = s.import_records(records, stamp("api-1")).await.unwrap();
  assert_eq!(report.counts["bvl_mittel"], 1);
  assert_eq!(report.counts["bvl_api_payloads"], 1);

  let results = s.query_registry(RegistryQuery::default()).await.unwrap();
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].notes.len(), 1);
  let awg = &results[0].applications[0];
  assert_eq!(awg.crops[0].label, "Raps");
  assert_eq!(awg.withdrawal_periods[0].days, WithdrawalDays::NotApplicable);

  let stale = s
    .get_payloads(EntityKind::ActiveIngredient, RefFilter::default())
    .await
    .unwrap();
  assert!(stale.is_empty());
}

#[tokio::test]
async fn structured_import_with_orphan_application_is_rejected() {
  let s = synced_store().await;
  let records = DatasetRecords {
    products: vec![product("555555-00", "Gamma", None)],
    applications: vec![application("777777-00")],
    ..Default::default()
  };
  assert!(s.import_records(records, stamp("api-2")).await.is_err());

  let results = s.query_registry(RegistryQuery::default()).await.unwrap();
  assert_eq!(results.len(), 2);
  assert_eq!(
    s.get_meta(meta_keys::LAST_SYNC_HASH.into()).await.unwrap().as_deref(),
    Some("hash-1")
  );
}

// ─── Lookups ─────────────────────────────────────────────────────────────────

fn eppo(code: &str, name: &str, language: &str) -> EppoCode {
  EppoCode {
    code: code.into(),
    name: name.into(),
    language: Some(language.into()),
    ..Default::default()
  }
}

#[tokio::test]
async fn eppo_import_replaces_and_stamps() {
  let s = store().await;
  assert_eq!(s.lookup_stats().await.unwrap().eppo.count, 0);

  let count = s
    .import_eppo_codes(vec![
      eppo("trzaw", "Weichweizen", "de"),
      eppo("HORVW", "Wintergerste", "DE"),
      eppo("", "ohne Code", "DE"),
    ])
    .await
    .unwrap();
  assert_eq!(count, 2);

  let stats = s.lookup_stats().await.unwrap();
  assert_eq!(stats.eppo.count, 2);
  assert!(stats.eppo.last_import.is_some());
  assert_eq!(stats.bbch.count, 0);
  assert_eq!(stats.bbch.last_import, None);

  // A second import replaces the first.
  s.import_eppo_codes(vec![eppo("ZEAMX", "Mais", "DE")]).await.unwrap();
  let page = s.search_eppo_codes(LookupSearch::default()).await.unwrap();
  assert_eq!(page.total, 1);
  assert_eq!(page.rows[0].code, "ZEAMX");

  // Stamps survive a dataset sync, which rewrites bvl_meta.
  s.import_dataset_image(dataset_image(""), stamp("hash-1")).await.unwrap();
  assert_eq!(s.lookup_stats().await.unwrap().eppo.count, 1);
  assert!(s.lookup_stats().await.unwrap().eppo.last_import.is_some());
}

#[tokio::test]
async fn eppo_search_folds_case_and_ranks_code_prefixes() {
  let s = store().await;
  s.import_eppo_codes(vec![
    eppo("TRZAW", "Weichweizen", "DE"),
    eppo("TRZDU", "Hartweizen", "DE"),
    eppo("ZEAMX", "Mais", "DE"),
    eppo("AAAWE", "Wheat", "EN"),
    eppo("ÄPFEL", "Äpfel", "DE"),
    eppo("WEIZW", "Zwiebel", "DE"),
  ])
  .await
  .unwrap();

  let search = |query: &str| LookupSearch { query: Some(query.into()), ..Default::default() };

  let page = s.search_eppo_codes(search("WEIZEN")).await.unwrap();
  assert_eq!(page.total, 2);
  let names: Vec<_> = page.rows.iter().map(|r| r.name.as_str()).collect();
  assert_eq!(names, ["Hartweizen", "Weichweizen"]);

  // A code prefix ranks ahead of name matches.
  let page = s.search_eppo_codes(search("wei")).await.unwrap();
  let codes: Vec<_> = page.rows.iter().map(|r| r.code.as_str()).collect();
  assert_eq!(codes, ["WEIZW", "TRZDU", "TRZAW"]);

  let page = s.search_eppo_codes(search("äpfel")).await.unwrap();
  assert_eq!(page.total, 1);

  let page = s
    .search_eppo_codes(LookupSearch { language: Some("en".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(page.total, 1);
  assert_eq!(page.rows[0].name, "Wheat");

  let page = s
    .search_eppo_codes(LookupSearch { limit: 2, offset: 2, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(page.total, 6);
  assert_eq!(page.rows.len(), 2);

  // Wildcards in the query are literal.
  assert_eq!(s.search_eppo_codes(search("%")).await.unwrap().total, 0);
}

#[tokio::test]
async fn bbch_import_and_search() {
  let s = store().await;
  let count = s
    .import_bbch_stages(vec![
      BbchStage {
        principal_stage: Some(1),
        secondary_stage: Some(3),
        label: "3 Laubblätter entfaltet".into(),
        ..Default::default()
      },
      BbchStage {
        code: "65".into(),
        label: "Vollblüte".into(),
        definition: Some("50 % der Blüten offen".into()),
        ..Default::default()
      },
      BbchStage::default(),
    ])
    .await
    .unwrap();
  assert_eq!(count, 2);

  let page = s
    .search_bbch_stages(LookupSearch { query: Some("BLÜTE".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(page.total, 1);
  assert_eq!(page.rows[0].code, "65");
  assert_eq!(page.rows[0].definition.as_deref(), Some("50 % der Blüten offen"));

  let page = s
    .search_bbch_stages(LookupSearch { query: Some("0103".into()), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(page.rows[0].principal_stage, Some(1));
  assert_eq!(page.rows[0].secondary_stage, Some(3));

  let stats = s.lookup_stats().await.unwrap();
  assert_eq!(stats.bbch.count, 2);
  assert!(stats.bbch.last_import.is_some());
}
