//! Field-level parsing for tabular and JSON records.
//!
//! Two kinds of field exist. Key fields (jurisdiction identity, effective
//! date) are fatal when absent. Value fields (rates, amounts, end dates) are
//! parse-tolerant: anything unparseable becomes `None`, is counted in a
//! [`NullTally`], and ingestion continues.

use std::{fmt::Display, str::FromStr};

use chrono::NaiveDate;
use levy_core::{Error, geography::JurisdictionKey, geography::JurisdictionType};
use serde_json::Value;

type Result<T> = std::result::Result<T, Error>;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

/// Trimmed, non-empty text.
pub fn clean(raw: Option<&str>) -> Option<&str> { raw.map(str::trim).filter(|s| !s.is_empty()) }

/// Render a JSON scalar as text. Objects, arrays and nulls are absent.
pub fn json_text(value: Option<&Value>) -> Option<String> {
  match value? {
    Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

// ─── Key fields ──────────────────────────────────────────────────────────────

pub fn required<'a>(context: &dyn Display, field: &str, raw: Option<&'a str>) -> Result<&'a str> {
  clean(raw).ok_or_else(|| Error::MissingField { context: context.to_string(), field: field.into() })
}

/// A required date; absent or unparseable is fatal.
pub fn required_date(context: &dyn Display, field: &str, raw: Option<&str>) -> Result<NaiveDate> {
  let text = required(context, field, raw)?;
  date(Some(text))
    .ok_or_else(|| Error::MalformedInput(format!("{context}: {field} {text:?} is not a date")))
}

/// Parse an enum discriminant, accepting `School District`, `school-district`
/// and `school_district` alike.
pub fn variant<T: FromStr>(kind: &'static str, raw: &str) -> Result<T> {
  let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
  T::from_str(&normalized).map_err(|_| Error::UnknownVariant { kind, value: raw.to_owned() })
}

/// Build a jurisdiction natural key from its three raw key columns.
pub fn jurisdiction_key(
  context: &dyn Display,
  state_code: Option<&str>,
  jurisdiction_type: Option<&str>,
  external_id: Option<&str>,
) -> Result<JurisdictionKey> {
  let jurisdiction_type: JurisdictionType =
    variant("jurisdiction type", required(context, "jurisdiction_type", jurisdiction_type)?)?;
  let external_id = required(context, "jurisdiction_external_id", external_id)?;
  // Federal rows legitimately have no state.
  let state_code = match jurisdiction_type {
    JurisdictionType::Federal => clean(state_code),
    _ => Some(required(context, "state_code", state_code)?),
  };
  Ok(JurisdictionKey::new(jurisdiction_type, state_code, external_id))
}

// ─── Value fields ────────────────────────────────────────────────────────────

/// A plain number; tolerates currency symbols, thousands separators and
/// surrounding whitespace.
pub fn number(raw: Option<&str>) -> Option<f64> {
  let cleaned: String = clean(raw)?.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
  cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// A rate as a fraction. `7.25%` and `0.0725` both read as `0.0725`.
/// Values outside `[0, 1]` after conversion are rejected.
pub fn rate(raw: Option<&str>) -> Option<f64> {
  let text = clean(raw)?;
  let value = match text.strip_suffix('%') {
    Some(pct) => number(Some(pct))? / 100.0,
    None => number(Some(text))?,
  };
  (0.0..=1.0).contains(&value).then_some(value)
}

pub fn date(raw: Option<&str>) -> Option<NaiveDate> {
  let text = clean(raw)?;
  DATE_FORMATS.iter().find_map(|f| NaiveDate::parse_from_str(text, f).ok())
}

/// Counts value fields that were present but could not be parsed.
#[derive(Debug, Default)]
pub struct NullTally {
  count: usize,
}

impl NullTally {
  /// Pass `parsed` through, noting it when `raw` had content but parsing
  /// failed.
  pub fn note<T>(
    &mut self,
    context: &dyn Display,
    field: &str,
    raw: Option<&str>,
    parsed: Option<T>,
  ) -> Option<T> {
    if parsed.is_none()
      && let Some(raw) = clean(raw)
    {
      self.count += 1;
      tracing::warn!(%context, field, raw, "unparseable value stored as null");
    }
    parsed
  }

  pub fn count(&self) -> usize { self.count }
}
