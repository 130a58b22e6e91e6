//! Geometry codec and spatial overlay for levy.
//!
//! Reads features from GeoJSON and shapefiles, normalises shapes into the
//! single reference projection, and computes geo-unit/jurisdiction coverage
//! with an R-tree join over geodesic areas. Pure synchronous; no database
//! dependencies.

pub mod aliases;
pub mod error;
pub mod overlay;
pub mod shape;
pub mod source;

pub use error::{Error, Result};
pub use geo::MultiPolygon;
