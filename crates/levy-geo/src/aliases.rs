//! Versioned attribute-name aliases.
//!
//! Census boundary files have renamed their attribute columns across
//! vintages (`GEOID` → `GEOID10` → `GEOID20` …). Each logical attribute has an
//! ordered list of candidate column names; the first candidate with a
//! non-empty value wins.

use serde_json::{Map, Value};

/// Something that can answer "what is the value of column `name`?".
pub trait PropertyLookup {
  /// The trimmed, non-empty string value of `name`, if present.
  fn lookup(&self, name: &str) -> Option<String>;
}

impl PropertyLookup for Map<String, Value> {
  fn lookup(&self, name: &str) -> Option<String> {
    match self.get(name)? {
      Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    }
  }
}

/// One logical attribute and its candidate column names, newest schema
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAliases {
  pub logical:    &'static str,
  pub candidates: &'static [&'static str],
}

impl FieldAliases {
  pub fn resolve(&self, props: &impl PropertyLookup) -> Option<String> {
    self.candidates.iter().find_map(|c| props.lookup(c))
  }
}

pub const STATE_FIPS: FieldAliases = FieldAliases {
  logical:    "state_fips",
  candidates: &["STATEFP", "STATEFP20", "STATEFP10", "STATEFP00", "STATE"],
};

pub const COUNTY_FIPS: FieldAliases = FieldAliases {
  logical:    "county_fips",
  candidates: &["COUNTYFP", "COUNTYFP20", "COUNTYFP10", "COUNTYFP00", "COUNTY"],
};

pub const GEOID: FieldAliases = FieldAliases {
  logical:    "geoid",
  candidates: &["GEOID", "GEOID20", "GEOID10", "GEOIDFQ", "GEO_ID"],
};

pub const NAME: FieldAliases = FieldAliases {
  logical:    "name",
  candidates: &["NAMELSAD", "NAMELSAD20", "NAMELSAD10", "NAME", "NAME20", "NAME10"],
};

/// Every alias set a boundary-file reader needs to extract.
pub const CENSUS_FIELDS: [FieldAliases; 4] = [STATE_FIPS, COUNTY_FIPS, GEOID, NAME];
