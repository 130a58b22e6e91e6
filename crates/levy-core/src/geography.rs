//! Geographic units and taxing jurisdictions.
//!
//! Geometry lives in `levy-geo`; these are the canonical attribute records.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

// ─── Geo units ───────────────────────────────────────────────────────────────

/// The kind of atomic queryable geography.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GeoUnitType {
  Tract,
  BlockGroup,
  Zip,
  Neighborhood,
  City,
  County,
  State,
  Custom,
}

impl GeoUnitType {
  /// Census types whose GEOID is nested inside a county.
  pub fn is_county_nested(self) -> bool { matches!(self, Self::Tract | Self::BlockGroup) }
}

/// A longitude/latitude pair in the reference projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
  pub lon: f64,
  pub lat: f64,
}

/// A canonical geo unit. Identity is `(unit_type, geoid)`; re-ingestion
/// updates name and shape in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoUnit {
  pub id:                   Uuid,
  pub unit_type:            GeoUnitType,
  pub geoid:                String,
  pub name:                 String,
  pub state_code:           Option<String>,
  /// Interior point for centroid display.
  pub representative_point: Option<LonLat>,
  /// Geodesic area in square metres.
  pub area_m2:              f64,
  pub source_doc_id:        Uuid,
}

// ─── Jurisdictions ───────────────────────────────────────────────────────────

/// The kind of taxing authority.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JurisdictionType {
  Federal,
  State,
  County,
  City,
  SchoolDistrict,
  SpecialDistrict,
  Other,
}

/// The natural key of a jurisdiction: `(type, state_code, external_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JurisdictionKey {
  pub jurisdiction_type: JurisdictionType,
  pub state_code:        Option<String>,
  pub external_id:       String,
}

impl JurisdictionKey {
  pub fn new(
    jurisdiction_type: JurisdictionType,
    state_code: Option<&str>,
    external_id: &str,
  ) -> Self {
    Self {
      jurisdiction_type,
      state_code: state_code.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned),
      external_id: external_id.trim().to_owned(),
    }
  }

  pub fn id(&self) -> Uuid {
    crate::identity::jurisdiction_id(
      self.jurisdiction_type.as_ref(),
      self.state_code.as_deref(),
      &self.external_id,
    )
  }
}

impl std::fmt::Display for JurisdictionKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}/{}/{}",
      self.jurisdiction_type,
      self.state_code.as_deref().unwrap_or("-"),
      self.external_id
    )
  }
}

/// A canonical jurisdiction. Geometry may be absent (e.g. federal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jurisdiction {
  pub id:                     Uuid,
  pub jurisdiction_type:      JurisdictionType,
  pub name:                   String,
  pub state_code:             Option<String>,
  pub external_id:            String,
  pub parent_jurisdiction_id: Option<Uuid>,
  pub has_geometry:           bool,
  pub representative_point:   Option<LonLat>,
  pub source_doc_id:          Uuid,
}

impl Jurisdiction {
  pub fn key(&self) -> JurisdictionKey {
    JurisdictionKey::new(self.jurisdiction_type, self.state_code.as_deref(), &self.external_id)
  }
}
