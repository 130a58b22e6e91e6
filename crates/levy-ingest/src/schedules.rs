//! Progressive income-tax schedules from JSON.
//!
//! ```json
//! { "schedules": [ { "state_code": "06", "jurisdiction_type": "state",
//!     "jurisdiction_external_id": "06", "instrument_name": "personal income tax",
//!     "effective_date": "2024-01-01",
//!     "brackets": [ { "lower": 0, "upper": 10412, "rate": 0.01 }, ... ] } ] }
//! ```

use std::{collections::BTreeMap, path::Path};

use levy_core::tax::{Bracket, RateValue, TaxType};
use levy_store_sqlite::SqliteStore;
use serde::Deserialize;
use serde_json::Value;
use tracing::Instrument as _;

use crate::{
  PipelineReport, Result,
  fields::{self, NullTally},
  origin::InputFile,
  rates::{ParsedTable, RateRecord, RateTableOptions, write_record},
};

#[derive(Debug, Deserialize)]
struct ScheduleFile {
  schedules: Vec<ScheduleEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScheduleEntry {
  state_code:               Option<Value>,
  jurisdiction_type:        Option<Value>,
  jurisdiction_external_id: Option<Value>,
  instrument_name:          Option<Value>,
  effective_date:           Option<Value>,
  end_date:                 Option<Value>,
  brackets:                 Vec<BracketEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BracketEntry {
  lower: Option<Value>,
  upper: Option<Value>,
  rate:  Option<Value>,
}

/// Parse an income-tax schedule document.
///
/// Brackets whose bounds or rate cannot be read are dropped (and counted);
/// the rest are sorted by lower bound. A schedule left with no brackets is
/// stored with a null rate.
pub fn parse_income_tax(text: &str) -> Result<ParsedTable> {
  let file: ScheduleFile = serde_json::from_str(text)?;
  let mut table = ParsedTable::default();
  let mut tally = NullTally::default();

  for (i, entry) in file.schedules.into_iter().enumerate() {
    let ctx = format!("schedule {i}");
    let scalar = |v: &Option<Value>| fields::json_text(v.as_ref());
    let jurisdiction = fields::jurisdiction_key(
      &ctx,
      scalar(&entry.state_code).as_deref(),
      scalar(&entry.jurisdiction_type).as_deref(),
      scalar(&entry.jurisdiction_external_id).as_deref(),
    )?;
    let instrument_name =
      fields::required(&ctx, "instrument_name", scalar(&entry.instrument_name).as_deref())?.to_owned();
    let effective_date =
      fields::required_date(&ctx, "effective_date", scalar(&entry.effective_date).as_deref())?;
    let end_raw = scalar(&entry.end_date);
    let end_date = tally.note(&ctx, "end_date", end_raw.as_deref(), fields::date(end_raw.as_deref()));

    let mut brackets = Vec::with_capacity(entry.brackets.len());
    for (b, bracket) in entry.brackets.iter().enumerate() {
      let bctx = format!("{ctx} bracket {b}");
      let lower_raw = scalar(&bracket.lower);
      let rate_raw = scalar(&bracket.rate);
      let upper_raw = scalar(&bracket.upper);
      let lower = tally.note(&bctx, "lower", lower_raw.as_deref(), fields::number(lower_raw.as_deref()));
      let rate = tally.note(&bctx, "rate", rate_raw.as_deref(), fields::rate(rate_raw.as_deref()));
      let upper = tally.note(&bctx, "upper", upper_raw.as_deref(), fields::number(upper_raw.as_deref()));
      // An unparseable bound must not widen the bracket to unbounded.
      let upper_lost = upper_raw.is_some() && upper.is_none();
      match (lower, rate, upper_lost) {
        (Some(lower), Some(rate), false) => brackets.push(Bracket { lower, upper, rate }),
        _ => tracing::warn!(context = %bctx, "bracket dropped"),
      }
    }
    brackets.sort_by(|a, b| a.lower.total_cmp(&b.lower));

    let value = if brackets.is_empty() {
      RateValue::Flat { rate: None }
    } else {
      RateValue::Brackets { brackets }
    };
    table.records.push(RateRecord {
      jurisdiction,
      tax_type: TaxType::Income,
      instrument_name,
      value,
      effective_date,
      end_date: end_date.filter(|end| *end > effective_date),
      metadata: BTreeMap::new(),
    });
  }
  table.nulled_fields = tally.count();
  Ok(table)
}

pub async fn ingest_income_tax(
  store: &SqliteStore,
  path: impl AsRef<Path>,
  opts: RateTableOptions,
) -> Result<PipelineReport> {
  let path = path.as_ref().to_path_buf();
  async move {
    let input = InputFile::read(&path).await?;
    let table = parse_income_tax(input.text()?)?;
    let doc = opts.source.document(&path, input.content_hash(), "application/json", None);

    let mut report = PipelineReport::new("income_tax");
    report.records = table.records.len();
    report.nulled_fields = table.nulled_fields;
    let methodology = opts.methodology;
    let report = store
      .write("income_tax", move |w| {
        let source = w.upsert_source_doc(&doc)?;
        let version = w.ensure_methodology_version(&methodology)?;
        report.source_doc_id = Some(source.id);
        for record in table.records {
          write_record(w, record, version.id, source.id)?;
          report.upserted += 1;
        }
        Ok(report)
      })
      .await?;
    tracing::info!(records = report.records, upserted = report.upserted, "income tax ingested");
    Ok(report)
  }
  .instrument(tracing::info_span!("pipeline", name = "income_tax"))
  .await
}

#[cfg(test)]
mod tests {
  use super::*;

  const FILE: &str = r#"{ "schedules": [ {
    "state_code": "06", "jurisdiction_type": "state", "jurisdiction_external_id": "06",
    "instrument_name": "personal income tax", "effective_date": "2024-01-01",
    "brackets": [
      { "lower": 10412, "upper": 24684, "rate": "2%" },
      { "lower": 0, "upper": 10412, "rate": 0.01 },
      { "lower": 721314, "rate": 0.123 },
      { "lower": "lots", "rate": 0.5 }
    ] } ] }"#;

  #[test]
  fn brackets_are_sorted_and_headline_is_top_marginal() {
    let table = parse_income_tax(FILE).unwrap();
    let record = &table.records[0];
    let RateValue::Brackets { brackets } = &record.value else { panic!("expected brackets") };
    assert_eq!(brackets.len(), 3);
    assert_eq!(brackets[0].lower, 0.0);
    assert_eq!(brackets[1].rate, 0.02);
    assert_eq!(brackets[2].upper, None);
    assert_eq!(record.value.headline_rate(), Some(0.123));
    assert_eq!(table.nulled_fields, 1);
  }

  #[test]
  fn unparseable_upper_bound_drops_the_bracket() {
    let text = r#"{ "schedules": [ { "state_code": "06", "jurisdiction_type": "state",
      "jurisdiction_external_id": "06", "instrument_name": "pit", "effective_date": "2024-01-01",
      "brackets": [
        { "lower": 0, "upper": "ten thousand", "rate": 0.01 },
        { "lower": 10000, "upper": null, "rate": 0.05 }
      ] } ] }"#;
    let table = parse_income_tax(text).unwrap();
    let RateValue::Brackets { brackets } = &table.records[0].value else { panic!("expected brackets") };
    assert_eq!(brackets.len(), 1);
    assert_eq!(brackets[0].lower, 10_000.0);
    assert_eq!(brackets[0].upper, None);
    assert_eq!(table.nulled_fields, 1);
  }

  #[test]
  fn schedule_without_instrument_name_is_fatal() {
    let text = r#"{ "schedules": [ { "state_code": "06", "jurisdiction_type": "state",
      "jurisdiction_external_id": "06", "effective_date": "2024-01-01", "brackets": [] } ] }"#;
    assert!(matches!(
      parse_income_tax(text),
      Err(crate::Error::Core(levy_core::Error::MissingField { .. }))
    ));
  }

  #[test]
  fn empty_schedule_has_no_rate() {
    let text = r#"{ "schedules": [ { "state_code": "06", "jurisdiction_type": "state",
      "jurisdiction_external_id": "06", "instrument_name": "pit", "effective_date": "2024-01-01" } ] }"#;
    let table = parse_income_tax(text).unwrap();
    assert_eq!(table.records[0].value.headline_rate(), None);
  }
}
