//! Feature sources.
//!
//! A [`FeatureSource`] is a finite, restartable, single-pass sequence: each
//! call to [`FeatureSource::try_for_each`] opens the underlying file, visits
//! every feature in order, and closes it before returning. Memory use is one
//! feature at a time for shapefiles.

use std::path::{Path, PathBuf};

use geo::MultiPolygon;
use geojson::GeoJson;
use serde_json::{Map, Value};
use shapefile::dbase::{FieldValue, Record};

use crate::{
  Error, Result,
  aliases::{CENSUS_FIELDS, PropertyLookup},
  shape,
};

/// One decoded feature: a canonical shape (if any) and its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
  /// Zero-based position in the source.
  pub index:      usize,
  pub geometry:   Option<MultiPolygon<f64>>,
  pub properties: Map<String, Value>,
}

impl Feature {
  /// The trimmed string value of a property.
  pub fn prop(&self, name: &str) -> Option<String> { self.properties.lookup(name) }
}

pub trait FeatureSource {
  /// Open the source and feed every feature to `f`, stopping at the first
  /// error. Returns the number of features visited. Calling again starts a
  /// fresh pass.
  fn try_for_each<E, F>(&self, f: F) -> Result<usize, E>
  where
    E: From<Error>,
    F: FnMut(Feature) -> Result<(), E>;
}

// ─── GeoJSON ─────────────────────────────────────────────────────────────────

/// A parsed GeoJSON `FeatureCollection`.
///
/// Parsing validates the whole document up front so a pipeline can fail
/// before its first write.
#[derive(Debug, Clone)]
pub struct GeoJsonCollection {
  features: Vec<Feature>,
}

impl GeoJsonCollection {
  pub fn parse(text: &str) -> Result<Self> {
    let collection = match text.parse::<GeoJson>()? {
      GeoJson::FeatureCollection(fc) => fc,
      GeoJson::Feature(_) => return Err(Error::WrongTopLevelType("Feature")),
      GeoJson::Geometry(_) => return Err(Error::WrongTopLevelType("Geometry")),
    };

    let features = collection
      .features
      .into_iter()
      .enumerate()
      .map(|(index, feature)| -> Result<Feature> {
        let geometry = feature.geometry.map(shape::from_geojson_geometry).transpose()?;
        Ok(Feature { index, geometry, properties: feature.properties.unwrap_or_default() })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { features })
  }

  /// Fail unless every feature carries a non-empty value for every key.
  pub fn require(&self, keys: &[&str]) -> Result<()> {
    for feature in &self.features {
      let missing: Vec<String> = keys
        .iter()
        .filter(|k| feature.prop(k).is_none())
        .map(|k| (*k).to_owned())
        .collect();
      if !missing.is_empty() {
        return Err(Error::MissingProperties { index: feature.index, missing });
      }
    }
    Ok(())
  }

  pub fn features(&self) -> &[Feature] { &self.features }

  pub fn len(&self) -> usize { self.features.len() }

  pub fn is_empty(&self) -> bool { self.features.is_empty() }
}

impl FeatureSource for GeoJsonCollection {
  fn try_for_each<E, F>(&self, mut f: F) -> Result<usize, E>
  where
    E: From<Error>,
    F: FnMut(Feature) -> Result<(), E>,
  {
    for feature in &self.features {
      f(feature.clone())?;
    }
    Ok(self.features.len())
  }
}

// ─── Shapefile ───────────────────────────────────────────────────────────────

/// A polygon shapefile (`.shp` with its sibling `.dbf`).
///
/// Only the census schema columns named in [`CENSUS_FIELDS`] are extracted
/// into [`Feature::properties`].
#[derive(Debug, Clone)]
pub struct ShapefileSource {
  shp_path: PathBuf,
}

impl ShapefileSource {
  pub fn new(shp_path: impl Into<PathBuf>) -> Self { Self { shp_path: shp_path.into() } }

  pub fn shp_path(&self) -> &Path { &self.shp_path }

  pub fn dbf_path(&self) -> PathBuf { self.shp_path.with_extension("dbf") }
}

impl FeatureSource for ShapefileSource {
  fn try_for_each<E, F>(&self, mut f: F) -> Result<usize, E>
  where
    E: From<Error>,
    F: FnMut(Feature) -> Result<(), E>,
  {
    let mut reader = shapefile::Reader::from_path(&self.shp_path).map_err(Error::from)?;
    let mut count = 0;
    for (index, item) in reader
      .iter_shapes_and_records_as::<shapefile::Polygon, Record>()
      .enumerate()
    {
      let (polygon, record) = item.map_err(Error::from)?;
      let geometry = shape::normalize_multi_polygon(MultiPolygon::<f64>::from(polygon))?;
      f(Feature { index, geometry: Some(geometry), properties: census_properties(&record) })?;
      count += 1;
    }
    tracing::debug!(path = %self.shp_path.display(), features = count, "shapefile pass complete");
    Ok(count)
  }
}

fn census_properties(record: &Record) -> Map<String, Value> {
  let mut props = Map::new();
  for aliases in CENSUS_FIELDS {
    for &column in aliases.candidates {
      if let Some(value) = record.get(column).and_then(field_string) {
        props.insert(column.to_owned(), Value::String(value));
      }
    }
  }
  props
}

fn field_string(value: &FieldValue) -> Option<String> {
  match value {
    FieldValue::Character(Some(s)) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
    FieldValue::Numeric(Some(n)) => Some(n.to_string()),
    FieldValue::Integer(n) => Some(n.to_string()),
    _ => None,
  }
}
