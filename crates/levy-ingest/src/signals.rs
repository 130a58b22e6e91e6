//! Policy signals: proposed, not-yet-enacted rate changes.
//!
//! Signals are stored as snapshots under a `signal`-kind methodology, so
//! they show up in rate history but never in a current blended rate. A
//! signal that names its own `url` gets its own source document, addressed
//! by the signal's JSON content.

use std::path::Path;

use chrono::NaiveDate;
use levy_core::{
  geography::JurisdictionKey,
  methodology::MethodologyRef,
  provenance::{NewSourceDoc, SourceMetadata, content_hash},
  tax::{RateValue, TaxInstrument, TaxRateSnapshot, TaxType},
};
use levy_store_sqlite::SqliteStore;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::Instrument as _;

use crate::{
  PipelineReport, Result, SourceOptions,
  fields::{self, NullTally},
  origin::InputFile,
};

#[derive(Debug, Clone)]
pub struct SignalOptions {
  pub source:      SourceOptions,
  pub methodology: MethodologyRef,
}

impl Default for SignalOptions {
  fn default() -> Self {
    Self { source: SourceOptions::default(), methodology: MethodologyRef::policy_signal_default() }
  }
}

#[derive(Debug, Deserialize)]
struct SignalFile {
  signals: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
  pub jurisdiction:   JurisdictionKey,
  pub tax_type:       TaxType,
  pub name:           String,
  pub proposed_rate:  Option<f64>,
  pub effective_date: NaiveDate,
  /// Per-signal provenance when the record cites its own origin.
  pub own_source:     Option<NewSourceDoc>,
}

#[derive(Debug, Default)]
pub struct ParsedSignals {
  pub records:       Vec<SignalRecord>,
  pub nulled_fields: usize,
}

pub fn parse_signals(text: &str, is_demo: bool) -> Result<ParsedSignals> {
  let file: SignalFile = serde_json::from_str(text)?;
  let mut parsed = ParsedSignals::default();
  let mut tally = NullTally::default();

  for (i, entry) in file.signals.into_iter().enumerate() {
    let ctx = format!("signal {i}");
    let field = |name: &str| fields::json_text(entry.get(name));
    let jurisdiction = fields::jurisdiction_key(
      &ctx,
      field("state_code").as_deref(),
      field("jurisdiction_type").as_deref(),
      field("jurisdiction_external_id").as_deref(),
    )?;
    let tax_type: TaxType =
      fields::variant("tax type", fields::required(&ctx, "tax_type", field("tax_type").as_deref())?)?;
    let name = fields::required(&ctx, "name", field("name").as_deref())?.to_owned();
    let effective_date = fields::required_date(&ctx, "effective_date", field("effective_date").as_deref())?;
    let rate_raw = field("proposed_rate");
    let proposed_rate =
      tally.note(&ctx, "proposed_rate", rate_raw.as_deref(), fields::rate(rate_raw.as_deref()));

    let own_source = match field("url") {
      None => None,
      Some(url) => {
        let bytes = serde_json::to_vec(&entry)?;
        Some(NewSourceDoc::new(url, content_hash(&bytes)).with_metadata(SourceMetadata {
          title: field("title"),
          published_at: None,
          mime_type: Some("application/json".into()),
          is_demo,
        }))
      }
    };

    parsed.records.push(SignalRecord {
      jurisdiction,
      tax_type,
      name,
      proposed_rate,
      effective_date,
      own_source,
    });
  }
  parsed.nulled_fields = tally.count();
  Ok(parsed)
}

pub async fn ingest_signals(
  store: &SqliteStore,
  path: impl AsRef<Path>,
  opts: SignalOptions,
) -> Result<PipelineReport> {
  let path = path.as_ref().to_path_buf();
  async move {
    let input = InputFile::read(&path).await?;
    let parsed = parse_signals(input.text()?, opts.source.is_demo)?;
    let doc = opts.source.document(&path, input.content_hash(), "application/json", None);

    let mut report = PipelineReport::new("signals");
    report.records = parsed.records.len();
    report.nulled_fields = parsed.nulled_fields;
    let methodology = opts.methodology;
    let report = store
      .write("signals", move |w| {
        let file_source = w.upsert_source_doc(&doc)?;
        let version = w.ensure_methodology_version(&methodology)?;
        report.source_doc_id = Some(file_source.id);
        for record in parsed.records {
          let source_id = match &record.own_source {
            Some(own) => w.upsert_source_doc(own)?.id,
            None => file_source.id,
          };
          let jurisdiction_id = w.resolve_jurisdiction(&record.jurisdiction)?;
          let instrument = TaxInstrument::new(jurisdiction_id, record.tax_type, record.name, source_id);
          w.ensure_tax_instrument(&instrument)?;
          w.upsert_rate_snapshot(&TaxRateSnapshot::new(
            instrument.id,
            version.id,
            record.effective_date,
            RateValue::Flat { rate: record.proposed_rate },
            source_id,
          ))?;
          report.upserted += 1;
        }
        Ok(report)
      })
      .await?;
    tracing::info!(records = report.records, upserted = report.upserted, "signals ingested");
    Ok(report)
  }
  .instrument(tracing::info_span!("pipeline", name = "signals"))
  .await
}

#[cfg(test)]
mod tests {
  use levy_core::{
    geography::JurisdictionType, methodology::DataClass, store::TaxStore as _,
  };
  use levy_store_sqlite::JurisdictionInput;

  use super::*;

  const FILE: &str = r#"{ "signals": [
    { "state_code": "06", "jurisdiction_type": "city", "jurisdiction_external_id": "alpha",
      "tax_type": "sales", "name": "Measure Q", "proposed_rate": "0.5%",
      "effective_date": "2025-04-01", "title": "Measure Q text", "url": "https://alpha.example/q" },
    { "state_code": "06", "jurisdiction_type": "city", "jurisdiction_external_id": "alpha",
      "tax_type": "sales", "name": "Measure R", "proposed_rate": "TBD",
      "effective_date": "2025-07-01" }
  ] }"#;

  #[test]
  fn signals_parse_with_optional_provenance() {
    let parsed = parse_signals(FILE, false).unwrap();
    assert_eq!(parsed.records.len(), 2);
    assert_eq!(parsed.records[0].proposed_rate, Some(0.005));
    let own = parsed.records[0].own_source.as_ref().unwrap();
    assert_eq!(own.origin_url, "https://alpha.example/q");
    assert_eq!(own.metadata.title.as_deref(), Some("Measure Q text"));
    assert!(parsed.records[1].own_source.is_none());
    assert_eq!(parsed.nulled_fields, 1);
  }

  #[test]
  fn signal_needs_tax_type() {
    let text = r#"{ "signals": [ { "state_code": "06", "jurisdiction_type": "city",
      "jurisdiction_external_id": "alpha", "name": "x", "effective_date": "2025-01-01" } ] }"#;
    assert!(parse_signals(text, false).is_err());
  }

  #[tokio::test]
  async fn signals_land_in_history_as_signals() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let key = JurisdictionKey::new(JurisdictionType::City, Some("06"), "alpha");
    let seed_key = key.clone();
    let src = store
      .upsert_source_doc(NewSourceDoc::new("file:///j", content_hash(b"j")))
      .await
      .unwrap()
      .id;
    store
      .write("seed", move |w| {
        w.upsert_jurisdiction(&JurisdictionInput {
          key:           seed_key,
          name:          "Alpha".into(),
          geometry:      None,
          source_doc_id: src,
        })
      })
      .await
      .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signals.json");
    std::fs::write(&path, FILE).unwrap();
    let report = ingest_signals(&store, &path, SignalOptions::default()).await.unwrap();
    assert_eq!(report.upserted, 2);

    let history = store.rate_history(key.id(), None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.classification == DataClass::Signal));
    assert_eq!(history[0].source.url, "https://alpha.example/q");
    assert_eq!(history[1].rate, None);
    // file doc, seed doc, and the one signal that cites its own url
    assert_eq!(store.counts().await.unwrap().source_docs, 3);
  }
}
