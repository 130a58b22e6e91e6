//! Tax instruments and their rate time series.
//!
//! An instrument is a named tax a jurisdiction levies. Its rate over time is a
//! series of [`TaxRateSnapshot`]s, each tagged with the methodology that
//! produced it.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  geography::JurisdictionType,
  methodology::DataClass,
  provenance::SourceRef,
};

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
pub enum TaxType {
  Sales,
  Use,
  Property,
  Income,
  Payroll,
  Excise,
}

/// A tax levied by one jurisdiction. Identity is
/// `(jurisdiction_id, tax_type, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxInstrument {
  pub id:              Uuid,
  pub jurisdiction_id: Uuid,
  pub tax_type:        TaxType,
  pub name:            String,
  pub is_active:       bool,
  pub source_doc_id:   Uuid,
}

impl TaxInstrument {
  pub fn new(
    jurisdiction_id: Uuid,
    tax_type: TaxType,
    name: impl Into<String>,
    source_doc_id: Uuid,
  ) -> Self {
    let name = name.into();
    Self {
      id: crate::identity::tax_instrument_id(jurisdiction_id, tax_type.as_ref(), &name),
      jurisdiction_id,
      tax_type,
      name,
      is_active: true,
      source_doc_id,
    }
  }
}

// ─── Rate values ─────────────────────────────────────────────────────────────

/// One band of a progressive schedule. `upper = None` is unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
  pub lower: f64,
  pub upper: Option<f64>,
  pub rate:  f64,
}

/// A point-in-time rate: either a single rate or a bracket schedule.
/// Rates are fractions (`0.0725` is 7.25 %).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateValue {
  /// `None` when the published value could not be parsed.
  Flat { rate: Option<f64> },
  Brackets { brackets: Vec<Bracket> },
}

impl RateValue {
  pub fn flat(rate: f64) -> Self { Self::Flat { rate: Some(rate) } }

  /// The single number used when blending jurisdictions: the flat rate, or
  /// the top marginal rate of a schedule.
  pub fn headline_rate(&self) -> Option<f64> {
    match self {
      Self::Flat { rate } => *rate,
      Self::Brackets { brackets } => brackets
        .iter()
        .map(|b| b.rate)
        .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.max(r)))),
    }
  }
}

/// A rate observation. Identity is
/// `(instrument_id, methodology_version_id, effective_date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRateSnapshot {
  pub id:                     Uuid,
  pub instrument_id:          Uuid,
  pub methodology_version_id: Uuid,
  pub effective_date:         NaiveDate,
  pub end_date:               Option<NaiveDate>,
  pub value:                  RateValue,
  /// Supporting numbers published alongside the rate (e.g. median bill).
  /// Unparseable entries are kept as `None`.
  #[serde(default)]
  pub metadata:               BTreeMap<String, Option<f64>>,
  pub source_doc_id:          Uuid,
}

impl TaxRateSnapshot {
  pub fn new(
    instrument_id: Uuid,
    methodology_version_id: Uuid,
    effective_date: NaiveDate,
    value: RateValue,
    source_doc_id: Uuid,
  ) -> Self {
    Self {
      id: crate::identity::rate_snapshot_id(instrument_id, methodology_version_id, effective_date),
      instrument_id,
      methodology_version_id,
      effective_date,
      end_date: None,
      value,
      metadata: BTreeMap::new(),
      source_doc_id,
    }
  }

  pub fn with_end_date(mut self, end_date: Option<NaiveDate>) -> Self {
    self.end_date = end_date;
    self
  }

  /// Whether this snapshot is in force on `on`: effective on or before it and
  /// not yet ended.
  pub fn applies_on(&self, on: NaiveDate) -> bool { self.applies_during(on, on) }

  /// Whether this snapshot was in force at some point in `from..=to`:
  /// effective by `to` and not ended on or before `from`.
  pub fn applies_during(&self, from: NaiveDate, to: NaiveDate) -> bool {
    self.effective_date <= to && self.end_date.is_none_or(|end| end > from)
  }
}

// ─── History ─────────────────────────────────────────────────────────────────

/// One point of a jurisdiction's rate time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateHistoryEntry {
  pub jurisdiction_id:   Uuid,
  pub jurisdiction_type: JurisdictionType,
  pub jurisdiction_name: String,
  pub instrument_id:     Uuid,
  pub instrument_name:   String,
  pub tax_type:          TaxType,
  pub snapshot_id:       Uuid,
  pub effective_date:    NaiveDate,
  pub end_date:          Option<NaiveDate>,
  pub rate:              Option<f64>,
  pub value:             RateValue,
  pub classification:    DataClass,
  pub source:            SourceRef,
}
