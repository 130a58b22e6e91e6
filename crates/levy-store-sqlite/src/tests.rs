//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::NaiveDate;
use geo::{Rect, coord};
use levy_core::{
  aggregate::RateContext,
  geography::{GeoUnitType, JurisdictionKey, JurisdictionType},
  methodology::{DataClass, MethodologyRef},
  provenance::{NewSourceDoc, SourceMetadata, content_hash},
  store::TaxStore,
  tax::{RateValue, TaxInstrument, TaxRateSnapshot, TaxType},
};
use levy_geo::MultiPolygon;
use uuid::Uuid;

use crate::{Error, GeoUnitInput, HierarchyBuilder, JurisdictionInput, SqliteStore};

async fn store() -> SqliteStore { SqliteStore::open_in_memory().await.expect("in-memory store") }

fn date(s: &str) -> NaiveDate { s.parse().unwrap() }

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
  MultiPolygon(vec![Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon()])
}

async fn source(s: &SqliteStore, name: &str) -> Uuid {
  s.upsert_source_doc(NewSourceDoc::new(format!("file:///{name}"), content_hash(name.as_bytes())))
    .await
    .unwrap()
    .id
}

fn node(
  jurisdiction_type: JurisdictionType,
  external_id: &str,
  geometry: Option<MultiPolygon<f64>>,
  source_doc_id: Uuid,
) -> JurisdictionInput {
  JurisdictionInput {
    key: JurisdictionKey::new(jurisdiction_type, Some("06"), external_id),
    name: format!("{jurisdiction_type} {external_id}"),
    geometry,
    source_doc_id,
  }
}

/// One tract split 70/30 between two cities, inside one state.
struct World {
  src:    Uuid,
  tract:  Uuid,
  state:  Uuid,
  city_a: Uuid,
  city_b: Uuid,
}

async fn split_world(s: &SqliteStore) -> World {
  let src = source(s, "fixture").await;
  let world = s
    .write("fixture", move |w| {
      let tract = w.upsert_geo_unit(&GeoUnitInput {
        unit_type:     GeoUnitType::Tract,
        geoid:         "06001000100".into(),
        name:          "Census Tract 1".into(),
        state_code:    Some("06".into()),
        geometry:      rect(0.0, 0.0, 0.1, 0.1),
        source_doc_id: src,
      })?;
      let state =
        w.upsert_jurisdiction(&node(JurisdictionType::State, "06", Some(rect(-1.0, -1.0, 1.0, 1.0)), src))?;
      let city_a =
        w.upsert_jurisdiction(&node(JurisdictionType::City, "A", Some(rect(0.0, 0.0, 0.07, 0.1)), src))?;
      let city_b =
        w.upsert_jurisdiction(&node(JurisdictionType::City, "B", Some(rect(0.07, 0.0, 0.2, 0.1)), src))?;
      Ok(World { src, tract, state, city_a, city_b })
    })
    .await
    .unwrap();
  s.run_overlay("06", &MethodologyRef::overlay_default(), world.src).await.unwrap();
  world
}

async fn add_rate(
  s: &SqliteStore,
  jurisdiction_id: Uuid,
  tax_type: TaxType,
  name: &str,
  effective: &str,
  rate: f64,
  methodology: MethodologyRef,
  src: Uuid,
) -> Uuid {
  let name = name.to_owned();
  let effective = date(effective);
  s.write("rate", move |w| {
    let version = w.ensure_methodology_version(&methodology)?;
    let instrument = TaxInstrument::new(jurisdiction_id, tax_type, name, src);
    w.upsert_tax_instrument(&instrument)?;
    w.upsert_rate_snapshot(&TaxRateSnapshot::new(
      instrument.id,
      version.id,
      effective,
      RateValue::flat(rate),
      src,
    ))?;
    Ok(instrument.id)
  })
  .await
  .unwrap()
}

fn overlay_id() -> Uuid { MethodologyRef::overlay_default().id() }

// ─── Provenance & lineage ────────────────────────────────────────────────────

#[tokio::test]
async fn source_doc_is_content_addressed() {
  let s = store().await;
  let hash = content_hash(b"rates-2024");
  let first = s.upsert_source_doc(NewSourceDoc::new("https://cdtfa.example/rates.csv", &hash)).await.unwrap();
  let again = s.upsert_source_doc(NewSourceDoc::new("https://cdtfa.example/rates.csv", &hash)).await.unwrap();
  assert_eq!(first.id, again.id);
  assert_eq!(first.retrieved_at, again.retrieved_at);

  let changed = s
    .upsert_source_doc(NewSourceDoc::new("https://cdtfa.example/rates.csv", content_hash(b"rates-2025")))
    .await
    .unwrap();
  assert_ne!(first.id, changed.id);
  assert_eq!(s.counts().await.unwrap().source_docs, 2);
}

#[tokio::test]
async fn source_doc_metadata_is_filled_never_overwritten() {
  let s = store().await;
  let hash = content_hash(b"bytes");
  let bare = s.upsert_source_doc(NewSourceDoc::new("file:///a.csv", &hash)).await.unwrap();
  assert_eq!(bare.title, None);

  let titled = s
    .upsert_source_doc(NewSourceDoc::new("file:///a.csv", &hash).with_metadata(SourceMetadata {
      title: Some("Rate table".into()),
      published_at: Some(date("2024-03-01")),
      ..Default::default()
    }))
    .await
    .unwrap();
  assert_eq!(titled.title.as_deref(), Some("Rate table"));
  assert_eq!(titled.published_at, Some(date("2024-03-01")));

  let retitled = s
    .upsert_source_doc(NewSourceDoc::new("file:///a.csv", &hash).with_metadata(SourceMetadata {
      title: Some("Other title".into()),
      ..Default::default()
    }))
    .await
    .unwrap();
  assert_eq!(retitled.title.as_deref(), Some("Rate table"));

  let fetched = s.get_source_doc(bare.id).await.unwrap().unwrap();
  assert_eq!(fetched, retitled);
}

#[tokio::test]
async fn methodology_versions_are_stable() {
  let s = store().await;
  let a = s.ensure_methodology_version(MethodologyRef::overlay_default()).await.unwrap();
  let b = s.ensure_methodology_version(MethodologyRef::overlay_default()).await.unwrap();
  assert_eq!(a, b);
  assert_eq!(a.kind, DataClass::Estimate);

  let v2 = MethodologyRef::new("geo_overlay_area_ratio", "v2", DataClass::Estimate);
  let c = s.ensure_methodology_version(v2.clone()).await.unwrap();
  assert_ne!(a.id, c.id);
  assert_eq!(s.find_methodology_version(&v2).await.unwrap(), Some(c));
  assert_eq!(s.counts().await.unwrap().methodology_versions, 2);
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn geo_unit_stores_area_and_representative_point() {
  let s = store().await;
  let world = split_world(&s).await;
  let unit = s.get_geo_unit(world.tract).await.unwrap().unwrap();
  assert_eq!(unit.unit_type, GeoUnitType::Tract);
  assert_eq!(unit.geoid, "06001000100");
  assert!(unit.area_m2 > 1.0e8 && unit.area_m2 < 1.3e8, "area = {}", unit.area_m2);
  let p = unit.representative_point.unwrap();
  assert!((0.0..=0.1).contains(&p.lon) && (0.0..=0.1).contains(&p.lat));
}

#[tokio::test]
async fn missing_entities_are_none() {
  let s = store().await;
  assert!(s.get_geo_unit(Uuid::new_v4()).await.unwrap().is_none());
  assert!(s.get_jurisdiction(Uuid::new_v4()).await.unwrap().is_none());
  assert!(s.get_source_doc(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_write_rolls_back_everything() {
  let s = store().await;
  let src = source(&s, "rollback").await;
  let err = s
    .write("doomed", move |w| {
      w.upsert_jurisdiction(&node(JurisdictionType::City, "X", None, src))?;
      w.resolve_jurisdiction(&JurisdictionKey::new(JurisdictionType::County, Some("06"), "nope"))?;
      Ok(())
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(levy_core::Error::MissingReference { kind: "jurisdiction", .. })));
  assert_eq!(s.counts().await.unwrap().jurisdictions, 0);
}

// ─── Hierarchy ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn child_may_precede_parent() {
  let s = store().await;
  let src = source(&s, "tree").await;
  let ids = s
    .write("tree", move |w| {
      let mut builder = HierarchyBuilder::new(w);
      let county = JurisdictionKey::new(JurisdictionType::County, Some("06"), "001");
      builder.insert(&node(JurisdictionType::City, "oakland", None, src), Some(county.clone()))?;
      builder.insert(&node(JurisdictionType::County, "001", None, src), None)?;
      builder.link()
    })
    .await
    .unwrap();
  let city_id = ids[&JurisdictionKey::new(JurisdictionType::City, Some("06"), "oakland")];
  let county_id = ids[&JurisdictionKey::new(JurisdictionType::County, Some("06"), "001")];
  let city = s.get_jurisdiction(city_id).await.unwrap().unwrap();
  assert_eq!(city.parent_jurisdiction_id, Some(county_id));
  assert!(!city.has_geometry);
}

#[tokio::test]
async fn self_parent_is_rejected() {
  let s = store().await;
  let src = source(&s, "loop").await;
  let err = s
    .write("loop", move |w| {
      let mut builder = HierarchyBuilder::new(w);
      let me = node(JurisdictionType::City, "loop", None, src);
      let key = me.key.clone();
      builder.insert(&me, Some(key))?;
      builder.link()
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(levy_core::Error::SelfParent(_))));
}

#[tokio::test]
async fn unknown_parent_is_a_missing_reference() {
  let s = store().await;
  let src = source(&s, "orphan").await;
  let err = s
    .write("orphan", move |w| {
      let mut builder = HierarchyBuilder::new(w);
      let ghost = JurisdictionKey::new(JurisdictionType::County, Some("06"), "999");
      builder.insert(&node(JurisdictionType::City, "orphan", None, src), Some(ghost))?;
      builder.link()
    })
    .await
    .unwrap_err();
  match err {
    Error::Core(levy_core::Error::MissingReference { key, .. }) => assert!(key.contains("999")),
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(s.counts().await.unwrap().jurisdictions, 0);
}

// ─── Overlay ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn contained_geo_unit_has_full_coverage() {
  let s = store().await;
  let world = split_world(&s).await;
  let coverage = s.coverage_for(world.tract, overlay_id()).await.unwrap();
  let state = coverage.jurisdictions.iter().find(|j| j.jurisdiction_id == world.state).unwrap();
  assert!((state.coverage_ratio.value - 1.0).abs() < 1e-6);
  assert_eq!(state.coverage_ratio.classification, DataClass::Estimate);
  assert_eq!(state.coverage_ratio.sources[0].source_id, world.src);
}

#[tokio::test]
async fn split_tract_has_two_city_rows() {
  let s = store().await;
  let world = split_world(&s).await;
  let coverage = s.coverage_for(world.tract, overlay_id()).await.unwrap();
  let ratio = |id: Uuid| {
    coverage.jurisdictions.iter().find(|j| j.jurisdiction_id == id).unwrap().coverage_ratio.value
  };
  let (a, b) = (ratio(world.city_a), ratio(world.city_b));
  assert!((a - 0.7).abs() < 1e-4, "a = {a}");
  assert!((b - 0.3).abs() < 1e-4, "b = {b}");
  assert!((a + b - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn unchanged_rerun_converges() {
  let s = store().await;
  let world = split_world(&s).await;
  let before = s.counts().await.unwrap();
  let summary = s.run_overlay("06", &MethodologyRef::overlay_default(), world.src).await.unwrap();
  assert_eq!(summary.rows_written, 3);
  assert_eq!(summary.stale_removed, 0);
  assert_eq!(s.counts().await.unwrap(), before);
}

#[tokio::test]
async fn rerun_removes_pairs_that_no_longer_intersect() {
  let s = store().await;
  let world = split_world(&s).await;
  let src = world.src;
  s.write("move city b", move |w| {
    w.upsert_jurisdiction(&node(JurisdictionType::City, "B", Some(rect(0.5, 0.5, 0.6, 0.6)), src))?;
    Ok(())
  })
  .await
  .unwrap();
  let summary = s.run_overlay("06", &MethodologyRef::overlay_default(), src).await.unwrap();
  assert_eq!(summary.stale_removed, 1);
  let coverage = s.coverage_for(world.tract, overlay_id()).await.unwrap();
  assert!(coverage.jurisdictions.iter().all(|j| j.jurisdiction_id != world.city_b));
}

#[tokio::test]
async fn methodology_versions_are_isolated() {
  let s = store().await;
  let world = split_world(&s).await;
  let v1 = s.coverage_for(world.tract, overlay_id()).await.unwrap();

  let v2 = MethodologyRef::new("geo_overlay_area_ratio", "v2", DataClass::Estimate);
  s.run_overlay("06", &v2, world.src).await.unwrap();
  let v2_cov = s.coverage_for(world.tract, v2.id()).await.unwrap();
  assert_eq!(v2_cov.jurisdictions.len(), 3);

  // A v2 re-run after a shape change leaves v1 untouched.
  let src = world.src;
  s.write("shrink a", move |w| {
    w.upsert_jurisdiction(&node(JurisdictionType::City, "A", Some(rect(0.0, 0.0, 0.02, 0.1)), src))?;
    Ok(())
  })
  .await
  .unwrap();
  s.run_overlay("06", &v2, world.src).await.unwrap();
  assert_eq!(s.coverage_for(world.tract, overlay_id()).await.unwrap(), v1);
  assert_eq!(s.counts().await.unwrap().geo_unit_jurisdictions, 6);
}

#[tokio::test]
async fn unit_without_overlay_rows_has_empty_coverage() {
  let s = store().await;
  let coverage = s.coverage_for(Uuid::new_v4(), overlay_id()).await.unwrap();
  assert!(coverage.jurisdictions.is_empty());
  assert_eq!(coverage.total_ratio(), 0.0);
}

#[tokio::test]
async fn collinear_unit_is_degenerate_and_skipped() {
  let s = store().await;
  let world = split_world(&s).await;
  let flat = s
    .write("flat", move |w| {
      w.upsert_geo_unit(&GeoUnitInput {
        unit_type:     GeoUnitType::Tract,
        geoid:         "06001000200".into(),
        name:          "Census Tract 2".into(),
        state_code:    Some("06".into()),
        geometry:      MultiPolygon(vec![geo::Polygon::new(
          vec![(0.01, 0.05), (0.02, 0.05), (0.03, 0.05), (0.01, 0.05)].into(),
          vec![],
        )]),
        source_doc_id: world.src,
      })
    })
    .await
    .unwrap();
  assert_eq!(s.get_geo_unit(flat).await.unwrap().unwrap().area_m2, 0.0);

  let summary = s.run_overlay("06", &MethodologyRef::overlay_default(), world.src).await.unwrap();
  assert!(summary.degenerate_skipped > 0, "{summary:?}");
  assert!(s.coverage_for(flat, overlay_id()).await.unwrap().jurisdictions.is_empty());
  assert_eq!(s.coverage_for(world.tract, overlay_id()).await.unwrap().jurisdictions.len(), 3);
}

#[tokio::test]
async fn overlay_is_scoped_to_state() {
  let s = store().await;
  let world = split_world(&s).await;
  let summary = s.run_overlay("41", &MethodologyRef::overlay_default(), world.src).await.unwrap();
  assert_eq!(summary.geo_units, 0);
  assert_eq!(summary.rows_written, 0);
  assert_eq!(s.geo_unit_states().await.unwrap(), vec!["06".to_owned()]);
}

// ─── Rates ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn weighted_rate_is_proportional_to_coverage() {
  let s = store().await;
  let w = split_world(&s).await;
  let facts = MethodologyRef::published_rates_default();
  add_rate(&s, w.state, TaxType::Sales, "state sales", "2024-01-01", 0.06, facts.clone(), w.src).await;
  add_rate(&s, w.city_a, TaxType::Sales, "city a sales", "2024-01-01", 0.02, facts.clone(), w.src).await;
  add_rate(&s, w.city_b, TaxType::Sales, "city b sales", "2024-01-01", 0.01, facts, w.src).await;

  let ctx = RateContext::current(overlay_id(), date("2024-06-01")).for_tax_type(TaxType::Sales);
  let rates = s.weighted_rates(w.tract, &ctx).await.unwrap();
  assert_eq!(rates.len(), 1);
  let sales = &rates[0];
  assert_eq!(sales.contributions.len(), 3);
  assert!((sales.total_rate.value - (0.06 + 0.02 * 0.7 + 0.01 * 0.3)).abs() < 1e-5);
  assert_eq!(sales.total_rate.classification, DataClass::Estimate);

  let a = sales.contributions.iter().find(|c| c.jurisdiction_id == w.city_a).unwrap();
  assert_eq!(a.rate.classification, DataClass::Fact);
  assert!((a.weighted_rate.value - 0.014).abs() < 1e-5);
}

#[tokio::test]
async fn tax_year_selects_snapshot_in_force() {
  let s = store().await;
  let w = split_world(&s).await;
  let facts = MethodologyRef::published_rates_default();
  add_rate(&s, w.state, TaxType::Income, "state income", "2023-01-01", 0.05, facts.clone(), w.src).await;
  add_rate(&s, w.state, TaxType::Income, "state income", "2024-01-01", 0.06, facts, w.src).await;

  let base = RateContext::current(overlay_id(), date("2024-06-01")).for_tax_type(TaxType::Income);
  let y2023 = s.weighted_rates(w.tract, &base.clone().for_tax_year(2023)).await.unwrap();
  assert!((y2023[0].total_rate.value - 0.05).abs() < 1e-9);

  let now = s.weighted_rates(w.tract, &base).await.unwrap();
  assert!((now[0].total_rate.value - 0.06).abs() < 1e-9);
}

#[tokio::test]
async fn rates_follow_the_requested_coverage_methodology() {
  let s = store().await;
  let w = split_world(&s).await;
  add_rate(
    &s,
    w.state,
    TaxType::Sales,
    "state sales",
    "2024-01-01",
    0.06,
    MethodologyRef::published_rates_default(),
    w.src,
  )
  .await;
  let unknown = MethodologyRef::new("geo_overlay_area_ratio", "v9", DataClass::Estimate).id();
  let ctx = RateContext::current(unknown, date("2024-06-01")).for_tax_type(TaxType::Sales);
  let rates = s.weighted_rates(w.tract, &ctx).await.unwrap();
  assert_eq!(rates.len(), 1);
  assert!(rates[0].contributions.is_empty());
  assert_eq!(rates[0].total_rate.value, 0.0);
}

#[tokio::test]
async fn signals_stay_out_of_current_rates_but_appear_in_history() {
  let s = store().await;
  let w = split_world(&s).await;
  add_rate(
    &s,
    w.state,
    TaxType::Sales,
    "state sales",
    "2024-01-01",
    0.06,
    MethodologyRef::published_rates_default(),
    w.src,
  )
  .await;
  add_rate(
    &s,
    w.state,
    TaxType::Sales,
    "state sales",
    "2025-01-01",
    0.08,
    MethodologyRef::policy_signal_default(),
    w.src,
  )
  .await;

  let ctx = RateContext::current(overlay_id(), date("2025-06-01")).for_tax_type(TaxType::Sales);
  let rates = s.weighted_rates(w.tract, &ctx).await.unwrap();
  assert!((rates[0].total_rate.value - 0.06).abs() < 1e-9);

  let history = s.rate_history(w.state, Some(TaxType::Sales)).await.unwrap();
  assert_eq!(history.len(), 2);
  assert_eq!(history[0].effective_date, date("2024-01-01"));
  assert_eq!(history[0].classification, DataClass::Fact);
  assert_eq!(history[1].classification, DataClass::Signal);
  assert_eq!(history[1].rate, Some(0.08));
}

#[tokio::test]
async fn duplicate_instruments_are_reported() {
  let s = store().await;
  let w = split_world(&s).await;
  let facts = MethodologyRef::published_rates_default();
  let older = add_rate(&s, w.city_a, TaxType::Sales, "a general", "2023-01-01", 0.02, facts.clone(), w.src).await;
  let newer = add_rate(&s, w.city_a, TaxType::Sales, "a transit", "2024-01-01", 0.005, facts, w.src).await;

  let ctx = RateContext::current(overlay_id(), date("2024-06-01")).for_tax_type(TaxType::Sales);
  let rates = s.weighted_rates(w.tract, &ctx).await.unwrap();
  let ambiguity = &rates[0].ambiguities[0];
  assert_eq!(ambiguity.jurisdiction_id, w.city_a);
  assert_eq!(ambiguity.kept_instrument_id, newer);
  assert_eq!(ambiguity.dropped_instrument_ids, vec![older]);
}

#[tokio::test]
async fn snapshot_upsert_replaces_value() {
  let s = store().await;
  let w = split_world(&s).await;
  let facts = MethodologyRef::published_rates_default();
  add_rate(&s, w.state, TaxType::Sales, "state sales", "2024-01-01", 0.06, facts.clone(), w.src).await;
  let before = s.counts().await.unwrap();
  add_rate(&s, w.state, TaxType::Sales, "state sales", "2024-01-01", 0.0625, facts, w.src).await;
  assert_eq!(s.counts().await.unwrap(), before);

  let history = s.rate_history(w.state, None).await.unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].rate, Some(0.0625));
}

#[tokio::test]
async fn end_date_before_effective_date_is_malformed() {
  let s = store().await;
  let w = split_world(&s).await;
  let (state, src) = (w.state, w.src);
  let err = s
    .write("bad range", move |wr| {
      let m = wr.ensure_methodology_version(&MethodologyRef::published_rates_default())?;
      let instrument = TaxInstrument::new(state, TaxType::Sales, "state sales", src);
      wr.upsert_tax_instrument(&instrument)?;
      let snap = TaxRateSnapshot::new(instrument.id, m.id, date("2024-01-01"), RateValue::flat(0.06), src)
        .with_end_date(Some(date("2023-12-31")));
      wr.upsert_rate_snapshot(&snap)
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(levy_core::Error::MalformedInput(_))));
  assert_eq!(s.counts().await.unwrap().tax_instruments, 0);
}
