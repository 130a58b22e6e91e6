//! Error types for the levy-geo codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("GeoJSON error: {0}")]
  GeoJson(#[from] geojson::Error),

  #[error("shapefile error: {0}")]
  Shapefile(#[from] shapefile::Error),

  #[error("expected a GeoJSON FeatureCollection, found {0}")]
  WrongTopLevelType(&'static str),

  #[error("feature {index}: missing required properties {missing:?}")]
  MissingProperties { index: usize, missing: Vec<String> },

  #[error("unsupported geometry type {0}; expected Polygon or MultiPolygon")]
  UnsupportedGeometry(String),

  #[error("coordinate ({lon}, {lat}) is outside the reference projection (EPSG:4326)")]
  OutOfReferenceBounds { lon: f64, lat: f64 },

  #[error("stored geometry is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
