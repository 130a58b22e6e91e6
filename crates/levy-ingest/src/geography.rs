//! Geo-unit pipelines: census boundary shapefiles and custom GeoJSON units.

use std::path::{Path, PathBuf};

use levy_core::geography::GeoUnitType;
use levy_geo::{
  MultiPolygon,
  aliases::{COUNTY_FIPS, GEOID, NAME, STATE_FIPS},
  source::{Feature, FeatureSource as _, GeoJsonCollection, ShapefileSource},
};
use levy_store_sqlite::{GeoUnitInput, SqliteStore};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{
  Error, PipelineReport, Result, SourceOptions, fields,
  origin::{InputFile, hash_files},
};

/// A geo unit parsed from a feature, before its source document is known.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUnit {
  pub unit_type:  GeoUnitType,
  pub geoid:      String,
  pub name:       String,
  pub state_code: Option<String>,
  pub geometry:   MultiPolygon<f64>,
}

impl ParsedUnit {
  fn into_input(self, source_doc_id: Uuid) -> GeoUnitInput {
    GeoUnitInput {
      unit_type: self.unit_type,
      geoid: self.geoid,
      name: self.name,
      state_code: self.state_code,
      geometry: self.geometry,
      source_doc_id,
    }
  }
}

fn require_geometry(feature: &Feature) -> Result<MultiPolygon<f64>> {
  feature.geometry.clone().ok_or_else(|| {
    Error::Core(levy_core::Error::MalformedInput(format!(
      "feature {} has no geometry",
      feature.index
    )))
  })
}

async fn write_units(
  store: &SqliteStore,
  mut report: PipelineReport,
  doc: levy_core::provenance::NewSourceDoc,
  units: Vec<ParsedUnit>,
) -> Result<PipelineReport> {
  let report = store
    .write(report.pipeline, move |w| {
      let source = w.upsert_source_doc(&doc)?;
      report.source_doc_id = Some(source.id);
      for unit in units {
        w.upsert_geo_unit(&unit.into_input(source.id))?;
        report.upserted += 1;
      }
      Ok(report)
    })
    .await?;
  tracing::info!(
    records = report.records,
    upserted = report.upserted,
    skipped = report.skipped,
    "geo units ingested"
  );
  Ok(report)
}

// ─── Census shapefile ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ShapefileOptions {
  pub unit_type:    GeoUnitType,
  /// Keep only features of this state FIPS code.
  pub state_filter: Option<String>,
  pub source:       SourceOptions,
}

/// Map a census feature onto a geo unit using the versioned field aliases.
///
/// State FIPS and GEOID are always required; county FIPS only for
/// county-nested unit types. A missing field fails naming the feature.
pub fn census_unit(feature: &Feature, unit_type: GeoUnitType) -> Result<ParsedUnit> {
  let props = &feature.properties;
  let state = STATE_FIPS.resolve(props);
  let county = COUNTY_FIPS.resolve(props);
  let geoid = GEOID.resolve(props);

  let mut missing = Vec::new();
  if state.is_none() {
    missing.push(STATE_FIPS.logical.to_owned());
  }
  if unit_type.is_county_nested() && county.is_none() {
    missing.push(COUNTY_FIPS.logical.to_owned());
  }
  if geoid.is_none() {
    missing.push(GEOID.logical.to_owned());
  }
  let (Some(state), Some(geoid), true) = (state, geoid, missing.is_empty()) else {
    return Err(levy_geo::Error::MissingProperties { index: feature.index, missing }.into());
  };

  Ok(ParsedUnit {
    unit_type,
    name: NAME.resolve(props).unwrap_or_else(|| geoid.clone()),
    geoid,
    state_code: Some(state),
    geometry: require_geometry(feature)?,
  })
}

/// Ingest a census boundary shapefile (`.shp` plus sibling `.dbf`).
///
/// Features are decoded and upserted one at a time inside the pipeline's
/// transaction, so memory stays proportional to one feature. A bad feature
/// anywhere in the file rolls back every unit written before it.
pub async fn ingest_shapefile(
  store: &SqliteStore,
  shp_path: impl AsRef<Path>,
  opts: ShapefileOptions,
) -> Result<PipelineReport> {
  let shp_path: PathBuf = shp_path.as_ref().to_path_buf();
  async move {
    let source = ShapefileSource::new(&shp_path);
    let content_hash = tokio::task::spawn_blocking({
      let files = [source.shp_path().to_path_buf(), source.dbf_path()];
      move || hash_files(&files)
    })
    .await??;

    let doc = opts.source.document(&shp_path, content_hash, "application/x-shapefile", None);
    let filter = opts.state_filter.as_deref().map(str::trim).map(str::to_owned);
    let unit_type = opts.unit_type;
    let mut report = PipelineReport::new("geography");

    let report = store
      .write(report.pipeline, move |w| {
        let source_doc = w.upsert_source_doc(&doc)?;
        report.source_doc_id = Some(source_doc.id);
        let records = source
          .try_for_each(|feature| -> Result<()> {
            let unit = census_unit(&feature, unit_type)?;
            if filter.as_deref().is_some_and(|f| unit.state_code.as_deref() != Some(f)) {
              report.skipped += 1;
              return Ok(());
            }
            w.upsert_geo_unit(&unit.into_input(source_doc.id))?;
            report.upserted += 1;
            Ok(())
          })
          .map_err(Error::into_store)?;
        report.records = records;
        Ok(report)
      })
      .await
      .map_err(Error::from_store)?;

    tracing::info!(
      records = report.records,
      upserted = report.upserted,
      skipped = report.skipped,
      "geo units ingested"
    );
    Ok(report)
  }
  .instrument(tracing::info_span!("pipeline", name = "geography"))
  .await
}

// ─── Custom GeoJSON units ────────────────────────────────────────────────────

pub const GEO_UNIT_PROPERTIES: [&str; 3] = ["geo_unit_type", "geoid", "name"];

/// Parse a custom geo-unit `FeatureCollection`. Every feature needs the
/// properties in [`GEO_UNIT_PROPERTIES`] and a polygonal geometry.
pub fn parse_geo_units(text: &str) -> Result<Vec<ParsedUnit>> {
  let collection = GeoJsonCollection::parse(text)?;
  collection.require(&GEO_UNIT_PROPERTIES)?;
  collection
    .features()
    .iter()
    .map(|feature| -> Result<ParsedUnit> {
      let context = format!("feature {}", feature.index);
      let unit_type_raw = feature.prop("geo_unit_type");
      let unit_type = fields::variant(
        "geo unit type",
        fields::required(&context, "geo_unit_type", unit_type_raw.as_deref())?,
      )?;
      Ok(ParsedUnit {
        unit_type,
        geoid: feature.prop("geoid").unwrap_or_default(),
        name: feature.prop("name").unwrap_or_default(),
        state_code: feature.prop("state_code"),
        geometry: require_geometry(feature)?,
      })
    })
    .collect()
}

/// Ingest custom geo units (neighborhoods, ZIPs, ...) from GeoJSON.
pub async fn ingest_geo_units(
  store: &SqliteStore,
  path: impl AsRef<Path>,
  source: SourceOptions,
) -> Result<PipelineReport> {
  let path = path.as_ref().to_path_buf();
  async move {
    let input = InputFile::read(&path).await?;
    let units = parse_geo_units(input.text()?)?;
    let doc = source.document(&path, input.content_hash(), "application/geo+json", None);
    let mut report = PipelineReport::new("geo_units");
    report.records = units.len();
    write_units(store, report, doc, units).await
  }
  .instrument(tracing::info_span!("pipeline", name = "geo_units"))
  .await
}

#[cfg(test)]
mod tests {
  use geo::polygon;
  use serde_json::{Map, Value, json};

  use super::*;

  fn square() -> MultiPolygon<f64> {
    MultiPolygon(vec![polygon![
      (x: 0.0, y: 0.0), (x: 0.1, y: 0.0), (x: 0.1, y: 0.1), (x: 0.0, y: 0.1), (x: 0.0, y: 0.0),
    ]])
  }

  fn feature(props: Value) -> Feature {
    let properties: Map<String, Value> = props.as_object().cloned().unwrap();
    Feature { index: 7, geometry: Some(square()), properties }
  }

  #[test]
  fn census_fields_resolve_across_vintages() {
    let f = feature(json!({ "STATEFP20": "06", "COUNTYFP20": "001", "GEOID20": "06001400100",
                            "NAMELSAD20": "Census Tract 4001" }));
    let unit = census_unit(&f, GeoUnitType::Tract).unwrap();
    assert_eq!(unit.geoid, "06001400100");
    assert_eq!(unit.state_code.as_deref(), Some("06"));
    assert_eq!(unit.name, "Census Tract 4001");
  }

  #[test]
  fn missing_county_fails_for_nested_types_only() {
    let f = feature(json!({ "STATEFP": "06", "GEOID": "94501" }));
    let err = census_unit(&f, GeoUnitType::Tract).unwrap_err();
    match err {
      Error::Geo(levy_geo::Error::MissingProperties { index, missing }) => {
        assert_eq!(index, 7);
        assert_eq!(missing, vec!["county_fips".to_owned()]);
      }
      other => panic!("unexpected: {other}"),
    }
    let zip = census_unit(&f, GeoUnitType::Zip).unwrap();
    assert_eq!(zip.name, "94501");
  }

  #[test]
  fn missing_geoid_is_reported() {
    let f = feature(json!({ "STATEFP": "06", "COUNTYFP": "001" }));
    assert!(matches!(
      census_unit(&f, GeoUnitType::Tract),
      Err(Error::Geo(levy_geo::Error::MissingProperties { .. }))
    ));
  }

  #[test]
  fn custom_units_need_their_properties() {
    let text = r#"{"type":"FeatureCollection","features":[
      {"type":"Feature","properties":{"geo_unit_type":"neighborhood","geoid":"n-1"},
       "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}]}"#;
    assert!(matches!(
      parse_geo_units(text),
      Err(Error::Geo(levy_geo::Error::MissingProperties { index: 0, .. }))
    ));
  }

  #[test]
  fn custom_units_need_geometry() {
    let text = r#"{"type":"FeatureCollection","features":[
      {"type":"Feature","properties":{"geo_unit_type":"zip","geoid":"94501","name":"Alameda"},
       "geometry":null}]}"#;
    assert!(matches!(parse_geo_units(text), Err(Error::Core(levy_core::Error::MalformedInput(_)))));
  }

  /// Write a polygon shapefile with one clockwise box per `(statefp, geoid, x)`.
  fn write_tracts(path: &Path, tracts: &[(&str, &str, f64)]) {
    use shapefile::{
      Point, Polygon, PolygonRing,
      dbase::{FieldName, FieldValue, Record, TableWriterBuilder},
    };

    let field = |name: &str| FieldName::try_from(name).unwrap();
    let table = TableWriterBuilder::new()
      .add_character_field(field("STATEFP"), 2)
      .add_character_field(field("COUNTYFP"), 3)
      .add_character_field(field("GEOID"), 11)
      .add_character_field(field("NAMELSAD"), 40);
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    for (state, geoid, x) in tracts {
      let ring = vec![
        Point::new(*x, 0.0),
        Point::new(*x, 0.1),
        Point::new(x + 0.1, 0.1),
        Point::new(x + 0.1, 0.0),
        Point::new(*x, 0.0),
      ];
      let mut record = Record::default();
      record.insert("STATEFP".into(), FieldValue::Character(Some((*state).into())));
      record.insert("COUNTYFP".into(), FieldValue::Character(Some("001".into())));
      record.insert("GEOID".into(), FieldValue::Character(Some((*geoid).into())));
      record.insert("NAMELSAD".into(), FieldValue::Character(Some(format!("Tract {geoid}"))));
      writer.write_shape_and_record(&Polygon::new(PolygonRing::Outer(ring)), &record).unwrap();
    }
  }

  fn tract_options(state_filter: Option<&str>) -> ShapefileOptions {
    ShapefileOptions {
      unit_type:    GeoUnitType::Tract,
      state_filter: state_filter.map(str::to_owned),
      source:       SourceOptions::demo(),
    }
  }

  #[tokio::test]
  async fn shapefile_streams_filters_and_converges() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("tl_2020_tract.shp");
    write_tracts(&shp, &[("06", "06001400100", 0.0), ("41", "41001950100", 1.0)]);

    let store = SqliteStore::open_in_memory().await.unwrap();
    let first = ingest_shapefile(&store, &shp, tract_options(Some("06"))).await.unwrap();
    assert_eq!(first.records, 2);
    assert_eq!(first.upserted, 1);
    assert_eq!(first.skipped, 1);
    assert_eq!(store.geo_unit_states().await.unwrap(), vec!["06".to_owned()]);

    let counts = store.counts().await.unwrap();
    let again = ingest_shapefile(&store, &shp, tract_options(Some("06"))).await.unwrap();
    assert_eq!(again.source_doc_id, first.source_doc_id);
    assert_eq!(store.counts().await.unwrap(), counts);

    let all = ingest_shapefile(&store, &shp, tract_options(None)).await.unwrap();
    assert_eq!(all.upserted, 2);
    assert_eq!(store.counts().await.unwrap().geo_units, 2);
    assert_eq!(store.counts().await.unwrap().source_docs, 1);
  }

  #[tokio::test]
  async fn bad_shapefile_feature_rolls_back_earlier_units() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("tl_2020_tract.shp");
    write_tracts(&shp, &[("06", "06001400100", 0.0), ("06", "", 1.0)]);

    let store = SqliteStore::open_in_memory().await.unwrap();
    let err = ingest_shapefile(&store, &shp, tract_options(None)).await.unwrap_err();
    assert!(matches!(err, Error::Geo(levy_geo::Error::MissingProperties { index: 1, .. })));
    let counts = store.counts().await.unwrap();
    assert_eq!(counts.geo_units, 0);
    assert_eq!(counts.source_docs, 0);
  }

  #[tokio::test]
  async fn geo_units_file_ingests_and_converges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("neighborhoods.geojson");
    std::fs::write(
      &path,
      r#"{"type":"FeatureCollection","features":[
        {"type":"Feature",
         "properties":{"geo_unit_type":"neighborhood","geoid":"fruitvale","name":"Fruitvale","state_code":"06"},
         "geometry":{"type":"Polygon","coordinates":[[[0,0],[0.1,0],[0.1,0.1],[0,0.1],[0,0]]]}}]}"#,
    )
    .unwrap();

    let store = SqliteStore::open_in_memory().await.unwrap();
    let first = ingest_geo_units(&store, &path, SourceOptions::demo()).await.unwrap();
    assert_eq!(first.upserted, 1);
    let counts = store.counts().await.unwrap();
    let again = ingest_geo_units(&store, &path, SourceOptions::demo()).await.unwrap();
    assert_eq!(first.source_doc_id, again.source_doc_id);
    assert_eq!(store.counts().await.unwrap(), counts);
  }
}
