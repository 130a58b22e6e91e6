//! Coverage-weighted rate aggregation.
//!
//! A stateless read-time computation: given the jurisdictions overlapping a
//! geo unit (with coverage ratios) and those jurisdictions' instruments and
//! rate snapshots, produce one blended rate per tax type. The store gathers
//! the [`Candidate`]s; everything here is pure.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  geography::JurisdictionType,
  methodology::DataClass,
  provenance::{SourceRef, Sourced},
  tax::{TaxInstrument, TaxRateSnapshot, TaxType},
};

// ─── Query context ───────────────────────────────────────────────────────────

/// Explicit parameters of a rate query. The coverage methodology is resolved
/// once per request by the caller and passed in; there is no ambient
/// "active version".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateContext {
  pub coverage_methodology_version_id: Uuid,
  /// "Now" for current-rate queries.
  pub as_of:                           NaiveDate,
  /// When set, select the latest rate in force at any point during this tax
  /// year instead of at `as_of`.
  pub tax_year:                        Option<i32>,
  /// Restrict to one tax type; `None` blends every type present.
  pub tax_type:                        Option<TaxType>,
}

impl RateContext {
  pub fn current(coverage_methodology_version_id: Uuid, as_of: NaiveDate) -> Self {
    Self { coverage_methodology_version_id, as_of, tax_year: None, tax_type: None }
  }

  pub fn for_tax_type(mut self, tax_type: TaxType) -> Self {
    self.tax_type = Some(tax_type);
    self
  }

  pub fn for_tax_year(mut self, tax_year: i32) -> Self {
    self.tax_year = Some(tax_year);
    self
  }

  /// The last day of the query window: Dec 31 of the tax year, or `as_of`.
  pub fn reference_date(&self) -> NaiveDate { self.window().1 }

  /// Inclusive date range a snapshot must overlap to be selected. A current
  /// query is the single day `as_of`; a tax-year query spans Jan 1 to Dec 31.
  pub fn window(&self) -> (NaiveDate, NaiveDate) {
    self
      .tax_year
      .and_then(|y| Some((NaiveDate::from_ymd_opt(y, 1, 1)?, NaiveDate::from_ymd_opt(y, 12, 31)?)))
      .unwrap_or((self.as_of, self.as_of))
  }
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// A snapshot with the trust class of its methodology and its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedSnapshot {
  pub snapshot:       TaxRateSnapshot,
  pub classification: DataClass,
  pub source:         SourceRef,
}

/// One instrument of one overlapping jurisdiction, with its full time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
  pub jurisdiction_id:   Uuid,
  pub jurisdiction_type: JurisdictionType,
  pub jurisdiction_name: String,
  pub coverage_ratio:    f64,
  pub coverage_source:   SourceRef,
  pub instrument:        TaxInstrument,
  pub snapshots:         Vec<ClassifiedSnapshot>,
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

/// One jurisdiction's share of a blended rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
  pub jurisdiction_id:   Uuid,
  pub jurisdiction_type: JurisdictionType,
  pub jurisdiction_name: String,
  pub instrument_id:     Uuid,
  pub instrument_name:   String,
  pub tax_type:          TaxType,
  pub snapshot_id:       Uuid,
  pub effective_date:    NaiveDate,
  pub end_date:          Option<NaiveDate>,
  /// The selected rate, classified by its own methodology.
  pub rate:              Sourced<f64>,
  pub coverage_ratio:    Sourced<f64>,
  /// `rate × coverage_ratio`; always an estimate.
  pub weighted_rate:     Sourced<f64>,
}

/// A jurisdiction had several applicable instruments of one tax type. One was
/// kept; the others are listed rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiguity {
  pub jurisdiction_id:        Uuid,
  pub tax_type:               TaxType,
  pub kept_instrument_id:     Uuid,
  pub dropped_instrument_ids: Vec<Uuid>,
}

/// The blended rate of one tax type for one geo unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedRate {
  pub geo_unit_id:                     Uuid,
  pub tax_type:                        TaxType,
  pub reference_date:                  NaiveDate,
  pub coverage_methodology_version_id: Uuid,
  /// Sum of contributions; labelled an estimate because it is a composite.
  pub total_rate:                      Sourced<f64>,
  pub contributions:                   Vec<Contribution>,
  pub ambiguities:                     Vec<Ambiguity>,
}

// ─── Snapshot selection ──────────────────────────────────────────────────────

/// Select the latest applicable snapshot: the most recent effective date
/// among those in force during `from..=to`, with a usable rate. Proposals
/// (`signal`) never count as the rate in force.
pub fn select_snapshot(
  snapshots: &[ClassifiedSnapshot],
  from: NaiveDate,
  to: NaiveDate,
) -> Option<&ClassifiedSnapshot> {
  snapshots
    .iter()
    .filter(|s| s.classification != DataClass::Signal)
    .filter(|s| s.snapshot.applies_during(from, to))
    .filter(|s| s.snapshot.value.headline_rate().is_some())
    // Same effective date under two methodologies: prefer the verified fact.
    .max_by(|a, b| {
      a.snapshot
        .effective_date
        .cmp(&b.snapshot.effective_date)
        .then_with(|| class_rank(a.classification).cmp(&class_rank(b.classification)))
    })
}

fn class_rank(c: DataClass) -> u8 {
  match c {
    DataClass::Fact => 2,
    DataClass::Estimate => 1,
    DataClass::Signal => 0,
  }
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

struct Selected<'a> {
  candidate: &'a Candidate,
  snapshot:  &'a ClassifiedSnapshot,
  rate:      f64,
}

/// Blend candidates into one [`WeightedRate`] per tax type.
///
/// Jurisdictions with a zero coverage ratio are excluded entirely rather
/// than contributing a zero. Output is ordered by tax type.
pub fn aggregate(
  geo_unit_id: Uuid,
  candidates: &[Candidate],
  ctx: &RateContext,
) -> Vec<WeightedRate> {
  let (from, on) = ctx.window();

  // (tax_type, jurisdiction) → applicable instruments
  let mut grouped: BTreeMap<TaxType, HashMap<Uuid, Vec<Selected<'_>>>> = BTreeMap::new();
  for candidate in candidates {
    if candidate.coverage_ratio <= 0.0 || !candidate.instrument.is_active {
      continue;
    }
    if ctx.tax_type.is_some_and(|t| t != candidate.instrument.tax_type) {
      continue;
    }
    let Some(snapshot) = select_snapshot(&candidate.snapshots, from, on) else {
      continue;
    };
    let Some(rate) = snapshot.snapshot.value.headline_rate() else {
      continue;
    };
    grouped
      .entry(candidate.instrument.tax_type)
      .or_default()
      .entry(candidate.jurisdiction_id)
      .or_default()
      .push(Selected { candidate, snapshot, rate });
  }

  if let Some(tax_type) = ctx.tax_type {
    grouped.entry(tax_type).or_default();
  }

  grouped
    .into_iter()
    .map(|(tax_type, by_jurisdiction)| {
      blend(geo_unit_id, tax_type, on, ctx.coverage_methodology_version_id, by_jurisdiction)
    })
    .collect()
}

fn blend(
  geo_unit_id: Uuid,
  tax_type: TaxType,
  reference_date: NaiveDate,
  coverage_methodology_version_id: Uuid,
  by_jurisdiction: HashMap<Uuid, Vec<Selected<'_>>>,
) -> WeightedRate {
  let mut contributions = Vec::with_capacity(by_jurisdiction.len());
  let mut ambiguities = Vec::new();

  for (jurisdiction_id, mut selected) in by_jurisdiction {
    // Highest coverage wins; then the most recent snapshot; then name, so
    // the choice is deterministic.
    selected.sort_by(|a, b| {
      b.candidate
        .coverage_ratio
        .total_cmp(&a.candidate.coverage_ratio)
        .then_with(|| b.snapshot.snapshot.effective_date.cmp(&a.snapshot.snapshot.effective_date))
        .then_with(|| a.candidate.instrument.name.cmp(&b.candidate.instrument.name))
    });
    let mut iter = selected.into_iter();
    let Some(kept) = iter.next() else { continue };
    let dropped: Vec<Uuid> = iter.map(|s| s.candidate.instrument.id).collect();
    if !dropped.is_empty() {
      ambiguities.push(Ambiguity {
        jurisdiction_id,
        tax_type,
        kept_instrument_id: kept.candidate.instrument.id,
        dropped_instrument_ids: dropped,
      });
    }
    contributions.push(contribution(tax_type, kept));
  }

  contributions.sort_by(|a, b| {
    a.tax_type
      .cmp(&b.tax_type)
      .then_with(|| a.jurisdiction_type.cmp(&b.jurisdiction_type))
      .then_with(|| a.jurisdiction_name.cmp(&b.jurisdiction_name))
      .then_with(|| b.effective_date.cmp(&a.effective_date))
  });
  ambiguities.sort_by_key(|a| a.jurisdiction_id);

  let total = contributions.iter().fold(0.0, |acc, c| acc + c.weighted_rate.value);
  let mut sources: Vec<SourceRef> = Vec::new();
  for source in contributions.iter().flat_map(|c| c.weighted_rate.sources.iter()) {
    if !sources.iter().any(|s| s.source_id == source.source_id) {
      sources.push(source.clone());
    }
  }

  WeightedRate {
    geo_unit_id,
    tax_type,
    reference_date,
    coverage_methodology_version_id,
    total_rate: Sourced::derived(total, sources),
    contributions,
    ambiguities,
  }
}

fn contribution(tax_type: TaxType, selected: Selected<'_>) -> Contribution {
  let Selected { candidate, snapshot, rate } = selected;
  let coverage = candidate.coverage_ratio;
  let mut weighted_sources = vec![snapshot.source.clone()];
  if candidate.coverage_source.source_id != snapshot.source.source_id {
    weighted_sources.push(candidate.coverage_source.clone());
  }

  Contribution {
    jurisdiction_id: candidate.jurisdiction_id,
    jurisdiction_type: candidate.jurisdiction_type,
    jurisdiction_name: candidate.jurisdiction_name.clone(),
    instrument_id: candidate.instrument.id,
    instrument_name: candidate.instrument.name.clone(),
    tax_type,
    snapshot_id: snapshot.snapshot.id,
    effective_date: snapshot.snapshot.effective_date,
    end_date: snapshot.snapshot.end_date,
    rate: Sourced::new(rate, snapshot.classification, snapshot.source.clone()),
    coverage_ratio: Sourced::new(coverage, DataClass::Estimate, candidate.coverage_source.clone()),
    weighted_rate: Sourced::derived(rate * coverage, weighted_sources),
  }
}
