//! Canonical shapes.
//!
//! Every stored geometry is a multi-polygon in longitude/latitude degrees
//! (EPSG:4326) with exterior rings counter-clockwise. Areas are geodesic
//! (square metres on the WGS84 ellipsoid), never planar.

use geo::{
  Area as _, BoundingRect as _, CoordsIter as _, GeodesicArea as _, Geometry, InteriorPoint as _,
  MultiPolygon, Orient as _, Polygon, orient::Direction,
};
use levy_core::geography::LonLat;

use crate::{Error, Result};

/// The reference projection every stored geometry is expressed in.
pub const REFERENCE_SRID: u32 = 4326;

/// Normalise any polygonal geometry into a canonical multi-polygon.
///
/// Rejects non-polygonal input and coordinates outside lon/lat bounds (a
/// projected file fed in unconverted).
pub fn normalize(geometry: Geometry<f64>) -> Result<MultiPolygon<f64>> {
  let polygons: Vec<Polygon<f64>> = match geometry {
    Geometry::Polygon(p) => vec![p],
    Geometry::MultiPolygon(mp) => mp.0,
    Geometry::GeometryCollection(gc) => {
      let mut out = Vec::new();
      for g in gc.0 {
        out.extend(normalize(g)?.0);
      }
      out
    }
    Geometry::Rect(r) => vec![r.to_polygon()],
    other => return Err(Error::UnsupportedGeometry(geometry_name(&other).into())),
  };
  normalize_multi_polygon(MultiPolygon(polygons))
}

/// Normalise a multi-polygon: bounds check, drop empty rings, orient.
pub fn normalize_multi_polygon(mp: MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
  for c in mp.coords_iter() {
    if !(-180.0..=180.0).contains(&c.x) || !(-90.0..=90.0).contains(&c.y) {
      return Err(Error::OutOfReferenceBounds { lon: c.x, lat: c.y });
    }
  }
  let kept: Vec<Polygon<f64>> = mp
    .0
    .into_iter()
    // A closed ring needs at least four coordinates.
    .filter(|p| p.exterior().0.len() >= 4)
    .collect();
  Ok(MultiPolygon(kept).orient(Direction::Default))
}

/// Planar area below this fraction of the squared bounding-box extent counts
/// as zero.
const DEGENERATE_RELATIVE_AREA: f64 = 1e-12;

/// Geodesic area in square metres. Polygons with no planar extent (collinear
/// rings) contribute zero; the geodesic formula would otherwise report the
/// sliver between the edges and the great circle.
pub fn area_m2(mp: &MultiPolygon<f64>) -> f64 {
  mp.0
    .iter()
    .filter(|p| !is_degenerate(p))
    .fold(0.0, |acc, p| acc + p.geodesic_area_unsigned())
}

/// Whether the polygon encloses no area in lon/lat.
pub fn is_degenerate(polygon: &Polygon<f64>) -> bool {
  let Some(rect) = polygon.bounding_rect() else {
    return true;
  };
  let extent = rect.width().max(rect.height());
  polygon.unsigned_area() <= DEGENERATE_RELATIVE_AREA * extent * extent
}

/// A point guaranteed to lie inside the shape, for centroid display.
pub fn representative_point(mp: &MultiPolygon<f64>) -> Option<LonLat> {
  mp.interior_point().map(|p| LonLat { lon: p.x(), lat: p.y() })
}

// ─── Storage encoding ────────────────────────────────────────────────────────

/// Encode as a GeoJSON geometry string for storage.
pub fn to_geojson(mp: &MultiPolygon<f64>) -> Result<String> {
  let geometry = geojson::Geometry::new(geojson::Value::from(mp));
  Ok(serde_json::to_string(&geometry)?)
}

/// Decode a stored GeoJSON geometry string.
pub fn from_geojson(s: &str) -> Result<MultiPolygon<f64>> {
  let geometry: geojson::Geometry = serde_json::from_str(s)?;
  from_geojson_geometry(geometry)
}

pub(crate) fn from_geojson_geometry(geometry: geojson::Geometry) -> Result<MultiPolygon<f64>> {
  let geometry = Geometry::<f64>::try_from(geometry.value)?;
  normalize(geometry)
}

fn geometry_name(g: &Geometry<f64>) -> &'static str {
  match g {
    Geometry::Point(_) => "Point",
    Geometry::Line(_) => "Line",
    Geometry::LineString(_) => "LineString",
    Geometry::Polygon(_) => "Polygon",
    Geometry::MultiPoint(_) => "MultiPoint",
    Geometry::MultiLineString(_) => "MultiLineString",
    Geometry::MultiPolygon(_) => "MultiPolygon",
    Geometry::GeometryCollection(_) => "GeometryCollection",
    Geometry::Rect(_) => "Rect",
    Geometry::Triangle(_) => "Triangle",
  }
}
