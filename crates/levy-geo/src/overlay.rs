//! Spatial overlay: what fraction of each geo unit lies in each jurisdiction.
//!
//! Set-based rather than pair-by-pair: jurisdiction bounding boxes are bulk
//! loaded into an R-tree, each geo unit queries it once, and only the
//! candidates whose boxes intersect get a true polygon intersection. Areas
//! are geodesic.
//!
//! ```text
//! units ─┐
//!        ├─ envelope query (R-tree) → candidate pairs → intersection → ratio
//! juris ─┘
//! ```

use geo::{BooleanOps as _, BoundingRect as _, MultiPolygon};
use rstar::{
  AABB, RTree,
  primitives::{GeomWithData, Rectangle},
};
use uuid::Uuid;

use crate::shape::area_m2;

/// Ratios within this distance of 1 are snapped to exactly 1: the geo unit
/// is fully contained and the gap is floating-point noise.
pub const CONTAINMENT_EPSILON: f64 = 1e-9;

/// A geo unit's shape, keyed by id.
#[derive(Debug, Clone)]
pub struct OverlayUnit {
  pub id:       Uuid,
  pub geometry: MultiPolygon<f64>,
}

/// A jurisdiction's shape, keyed by id.
#[derive(Debug, Clone)]
pub struct OverlayJurisdiction {
  pub id:       Uuid,
  pub geometry: MultiPolygon<f64>,
}

/// One computed coverage edge.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEdge {
  pub geo_unit_id:     Uuid,
  pub jurisdiction_id: Uuid,
  /// Fraction of the geo unit inside the jurisdiction, in `[0, 1]`.
  pub coverage_ratio:  f64,
  /// Geodesic area of the intersection in square metres.
  pub coverage_area:   f64,
}

/// Edges plus the counters the caller reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayOutcome {
  pub edges:              Vec<OverlayEdge>,
  pub candidate_pairs:    usize,
  pub degenerate_skipped: usize,
}

type IndexedBox = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn envelope(mp: &MultiPolygon<f64>) -> Option<([f64; 2], [f64; 2])> {
  mp.bounding_rect().map(|r| ([r.min().x, r.min().y], [r.max().x, r.max().y]))
}

/// Compute coverage for every intersecting pair.
///
/// A geo unit with zero area has an undefined ratio; its pairs are counted in
/// [`OverlayOutcome::degenerate_skipped`] and produce no edge. Pairs whose
/// shapes only touch along a boundary produce no edge either.
pub fn compute_overlay(
  units: &[OverlayUnit],
  jurisdictions: &[OverlayJurisdiction],
) -> OverlayOutcome {
  let boxes: Vec<IndexedBox> = jurisdictions
    .iter()
    .enumerate()
    .filter_map(|(i, j)| {
      envelope(&j.geometry).map(|(lo, hi)| GeomWithData::new(Rectangle::from_corners(lo, hi), i))
    })
    .collect();
  let index = RTree::bulk_load(boxes);

  let mut outcome = OverlayOutcome::default();
  for unit in units {
    let Some((lo, hi)) = envelope(&unit.geometry) else {
      continue;
    };
    let hits: Vec<usize> = index
      .locate_in_envelope_intersecting(&AABB::from_corners(lo, hi))
      .map(|hit| hit.data)
      .collect();
    if hits.is_empty() {
      continue;
    }
    outcome.candidate_pairs += hits.len();

    let unit_area = area_m2(&unit.geometry);
    if unit_area <= 0.0 || !unit_area.is_finite() {
      outcome.degenerate_skipped += hits.len();
      continue;
    }

    for i in hits {
      let jurisdiction = &jurisdictions[i];
      let intersection = unit.geometry.intersection(&jurisdiction.geometry);
      let coverage_area = area_m2(&intersection);
      if coverage_area <= 0.0 {
        continue;
      }
      outcome.edges.push(OverlayEdge {
        geo_unit_id: unit.id,
        jurisdiction_id: jurisdiction.id,
        coverage_ratio: coverage_ratio(coverage_area, unit_area),
        coverage_area: coverage_area.min(unit_area),
      });
    }
  }

  outcome
    .edges
    .sort_by_key(|e| (e.geo_unit_id, e.jurisdiction_id));
  outcome
}

/// Clamp into `[0, 1]`, snapping near-total coverage to exactly 1.
fn coverage_ratio(coverage_area: f64, unit_area: f64) -> f64 {
  let ratio = coverage_area / unit_area;
  if ratio >= 1.0 - CONTAINMENT_EPSILON {
    1.0
  } else {
    ratio.clamp(0.0, 1.0)
  }
}

#[cfg(test)]
mod tests {
  use geo::polygon;
  use super::*;
  use crate::shape::{normalize_multi_polygon, tests::square};

  fn unit(n: u128, mp: MultiPolygon<f64>) -> OverlayUnit {
    OverlayUnit { id: Uuid::from_u128(n), geometry: normalize_multi_polygon(mp).unwrap() }
  }

  fn juris(n: u128, mp: MultiPolygon<f64>) -> OverlayJurisdiction {
    OverlayJurisdiction { id: Uuid::from_u128(n), geometry: normalize_multi_polygon(mp).unwrap() }
  }

  #[test]
  fn contained_unit_has_ratio_exactly_one() {
    let out = compute_overlay(
      &[unit(1, square(0.2, 0.2, 0.4, 0.4))],
      &[juris(10, square(0.0, 0.0, 1.0, 1.0))],
    );
    assert_eq!(out.edges.len(), 1);
    assert_eq!(out.edges[0].coverage_ratio, 1.0);
  }

  #[test]
  fn identical_shapes_have_ratio_one() {
    let out = compute_overlay(
      &[unit(1, square(0.0, 0.0, 0.01, 0.01))],
      &[juris(10, square(0.0, 0.0, 0.01, 0.01))],
    );
    assert_eq!(out.edges[0].coverage_ratio, 1.0);
  }

  #[test]
  fn seventy_thirty_split() {
    let out = compute_overlay(
      &[unit(1, square(0.0, 0.0, 0.1, 0.1))],
      &[juris(10, square(0.0, 0.0, 0.07, 0.1)), juris(11, square(0.07, 0.0, 0.1, 0.1))],
    );
    assert_eq!(out.edges.len(), 2);
    let a = out.edges.iter().find(|e| e.jurisdiction_id == Uuid::from_u128(10)).unwrap();
    let b = out.edges.iter().find(|e| e.jurisdiction_id == Uuid::from_u128(11)).unwrap();
    assert!((a.coverage_ratio - 0.7).abs() < 1e-4, "a = {}", a.coverage_ratio);
    assert!((b.coverage_ratio - 0.3).abs() < 1e-4, "b = {}", b.coverage_ratio);
    assert!(a.coverage_ratio + b.coverage_ratio <= 1.0 + 1e-6);
  }

  #[test]
  fn disjoint_boxes_are_never_candidates() {
    let out = compute_overlay(
      &[unit(1, square(0.0, 0.0, 1.0, 1.0))],
      &[juris(10, square(5.0, 5.0, 6.0, 6.0))],
    );
    assert_eq!(out.candidate_pairs, 0);
    assert!(out.edges.is_empty());
  }

  #[test]
  fn touching_boundaries_produce_no_edge() {
    let out = compute_overlay(
      &[unit(1, square(0.0, 0.0, 1.0, 1.0))],
      &[juris(10, square(1.0, 0.0, 2.0, 1.0))],
    );
    assert_eq!(out.candidate_pairs, 1);
    assert!(out.edges.is_empty());
  }

  #[test]
  fn overlapping_bboxes_without_overlap_produce_no_edge() {
    // L-shaped jurisdiction whose box covers the unit but whose shape does not.
    let l_shape = MultiPolygon(vec![polygon![
      (x: 0.0, y: 0.0), (x: 3.0, y: 0.0), (x: 3.0, y: 1.0),
      (x: 1.0, y: 1.0), (x: 1.0, y: 3.0), (x: 0.0, y: 3.0), (x: 0.0, y: 0.0),
    ]]);
    let out = compute_overlay(&[unit(1, square(2.0, 2.0, 2.5, 2.5))], &[juris(10, l_shape)]);
    assert_eq!(out.candidate_pairs, 1);
    assert!(out.edges.is_empty());
  }

  #[test]
  fn zero_area_unit_is_skipped_not_nan() {
    let flat = MultiPolygon(vec![polygon![
      (x: 0.1, y: 0.1), (x: 0.2, y: 0.1), (x: 0.3, y: 0.1), (x: 0.1, y: 0.1),
    ]]);
    let out = compute_overlay(&[unit(1, flat)], &[juris(10, square(0.0, 0.0, 1.0, 1.0))]);
    assert_eq!(out.degenerate_skipped, 1);
    assert!(out.edges.is_empty());
  }

  #[test]
  fn ratios_are_bounded() {
    let units: Vec<_> = (0..5)
      .map(|i| {
        let x = i as f64 * 0.3;
        unit(i as u128, square(x, 0.0, x + 0.5, 0.5))
      })
      .collect();
    let js = [juris(10, square(0.25, 0.1, 1.1, 0.9)), juris(11, square(-1.0, -1.0, 0.6, 0.3))];
    let out = compute_overlay(&units, &js);
    assert!(!out.edges.is_empty());
    for e in &out.edges {
      assert!((0.0..=1.0).contains(&e.coverage_ratio), "{e:?}");
      assert!(e.coverage_area > 0.0);
    }
  }

  #[test]
  fn output_is_ordered_deterministically() {
    let units = [unit(2, square(0.0, 0.0, 0.1, 0.1)), unit(1, square(0.0, 0.0, 0.1, 0.1))];
    let js = [juris(10, square(0.0, 0.0, 1.0, 1.0))];
    let out = compute_overlay(&units, &js);
    let ids: Vec<u128> = out.edges.iter().map(|e| e.geo_unit_id.as_u128()).collect();
    assert_eq!(ids, vec![1, 2]);
  }
}
