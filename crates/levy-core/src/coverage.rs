//! Overlay edges between geo units and jurisdictions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  geography::JurisdictionType,
  provenance::Sourced,
};

/// One overlay edge. Identity is `(geo_unit_id, jurisdiction_id,
/// methodology_version_id)`.
///
/// `coverage_ratio` is the fraction of the geo unit's area that lies inside
/// the jurisdiction, never the reverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
  pub geo_unit_id:            Uuid,
  pub jurisdiction_id:        Uuid,
  pub methodology_version_id: Uuid,
  pub coverage_ratio:         f64,
  /// Geodesic area of the intersection in square metres.
  pub coverage_area:          f64,
  pub source_doc_id:          Uuid,
}

/// A jurisdiction overlapping a geo unit, as returned by the query surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEntry {
  pub jurisdiction_id:        Uuid,
  pub jurisdiction_type:      JurisdictionType,
  pub jurisdiction_name:      String,
  pub parent_jurisdiction_id: Option<Uuid>,
  pub methodology_version_id: Uuid,
  pub coverage_ratio:         Sourced<f64>,
  pub coverage_area:          Sourced<f64>,
}

/// All overlapping jurisdictions for a geo unit under one methodology.
/// An empty list is a valid answer: coverage has not been computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoUnitCoverage {
  pub geo_unit_id:            Uuid,
  pub methodology_version_id: Uuid,
  pub jurisdictions:          Vec<CoverageEntry>,
}

impl GeoUnitCoverage {
  /// Sum of ratios; close to 1 when non-overlapping jurisdictions tile the
  /// unit.
  pub fn total_ratio(&self) -> f64 {
    self.jurisdictions.iter().map(|j| j.coverage_ratio.value).sum()
  }
}

/// Counters from one overlay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySummary {
  pub state_code:         String,
  pub geo_units:          usize,
  pub jurisdictions:      usize,
  /// Pairs whose bounding boxes intersect.
  pub candidate_pairs:    usize,
  pub rows_written:       usize,
  /// Pairs skipped because the geo unit has zero area.
  pub degenerate_skipped: usize,
  /// Rows of the same methodology whose pair no longer intersects.
  pub stale_removed:      usize,
}
