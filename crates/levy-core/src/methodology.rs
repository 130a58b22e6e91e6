//! Methodology lineage.
//!
//! Every derived number carries the id of the [`MethodologyVersion`] that
//! produced it. A changed computation is published under a new version string;
//! rows under different versions are never compared implicitly.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Data-trust classification: verified, computed, or proposed-not-enacted.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataClass {
  Fact,
  Estimate,
  Signal,
}

/// A named, versioned computation lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodologyVersion {
  pub id:          Uuid,
  pub kind:        DataClass,
  pub name:        String,
  pub version:     String,
  pub description: Option<String>,
}

/// The natural key and descriptive fields used to ensure a methodology
/// version exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodologyRef {
  pub name:        String,
  pub version:     String,
  pub kind:        DataClass,
  #[serde(default)]
  pub description: Option<String>,
}

impl MethodologyRef {
  pub fn new(name: impl Into<String>, version: impl Into<String>, kind: DataClass) -> Self {
    Self { name: name.into(), version: version.into(), kind, description: None }
  }

  pub fn id(&self) -> Uuid { crate::identity::methodology_version_id(&self.name, &self.version) }

  /// Default lineage for area-ratio spatial overlay.
  pub fn overlay_default() -> Self {
    Self {
      description: Some(
        "geodesic area of intersection divided by geodesic area of the geo unit".into(),
      ),
      ..Self::new("geo_overlay_area_ratio", "v1", DataClass::Estimate)
    }
  }

  /// Default lineage for rates taken verbatim from published tables.
  pub fn published_rates_default() -> Self {
    Self {
      description: Some("rate as published by the taxing authority".into()),
      ..Self::new("published_rate_table", "v1", DataClass::Fact)
    }
  }

  /// Default lineage for proposed, not-yet-enacted rate changes.
  pub fn policy_signal_default() -> Self {
    Self {
      description: Some("proposal or ballot measure; not enacted".into()),
      ..Self::new("policy_signal", "v1", DataClass::Signal)
    }
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr as _;

  use super::*;

  #[test]
  fn data_class_strings() {
    assert_eq!(DataClass::Estimate.as_ref(), "estimate");
    assert_eq!(DataClass::from_str("signal").unwrap(), DataClass::Signal);
    assert!(DataClass::from_str("rumour").is_err());
  }

  #[test]
  fn versions_of_one_name_have_distinct_ids() {
    let v1 = MethodologyRef::new("m", "v1", DataClass::Estimate);
    let v2 = MethodologyRef::new("m", "v2", DataClass::Estimate);
    assert_ne!(v1.id(), v2.id());
  }
}
