//! Published rate tables: sales-tax and property-tax CSVs.
//!
//! Both tables resolve each row to an existing jurisdiction by natural key
//! and write one snapshot per row under the published-rates methodology.
//! An unknown jurisdiction aborts the whole file.

use std::{collections::BTreeMap, path::Path};

use chrono::NaiveDate;
use levy_core::{
  geography::JurisdictionKey,
  methodology::MethodologyRef,
  provenance::NewSourceDoc,
  tax::{RateValue, TaxInstrument, TaxRateSnapshot, TaxType},
};
use levy_store_sqlite::{SqliteStore, Writer};
use serde::Deserialize;
use tracing::Instrument as _;

use crate::{
  PipelineReport, Result, SourceOptions,
  fields::{self, NullTally},
  origin::InputFile,
};

#[derive(Debug, Clone)]
pub struct RateTableOptions {
  pub source:      SourceOptions,
  pub methodology: MethodologyRef,
}

impl Default for RateTableOptions {
  fn default() -> Self {
    Self { source: SourceOptions::default(), methodology: MethodologyRef::published_rates_default() }
  }
}

/// One rate observation, resolved to domain types but not yet to ids.
#[derive(Debug, Clone, PartialEq)]
pub struct RateRecord {
  pub jurisdiction:    JurisdictionKey,
  pub tax_type:        TaxType,
  pub instrument_name: String,
  pub value:           RateValue,
  pub effective_date:  NaiveDate,
  pub end_date:        Option<NaiveDate>,
  pub metadata:        BTreeMap<String, Option<f64>>,
}

/// Parsed rows plus the per-file facts the pipeline reports.
#[derive(Debug, Default)]
pub struct ParsedTable {
  pub records:       Vec<RateRecord>,
  pub nulled_fields: usize,
  pub published_at:  Option<NaiveDate>,
}

fn row_context(line: usize) -> String { format!("row {line}") }

// ─── Sales tax ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SalesTaxRow {
  state_code:               Option<String>,
  jurisdiction_type:        Option<String>,
  jurisdiction_external_id: Option<String>,
  tax_type:                 Option<String>,
  instrument_name:          Option<String>,
  rate:                     Option<String>,
  effective_date:           Option<String>,
  end_date:                 Option<String>,
  published_at:             Option<String>,
}

/// Parse a sales-tax CSV. Key columns are fatal when blank; `rate`,
/// `end_date` and `published_at` are parse-tolerant.
pub fn parse_sales_tax(text: &str) -> Result<ParsedTable> {
  let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(text.as_bytes());
  let mut table = ParsedTable::default();
  let mut tally = NullTally::default();

  for (i, row) in reader.deserialize::<SalesTaxRow>().enumerate() {
    let row = row?;
    // Header is line 1.
    let ctx = row_context(i + 2);
    let jurisdiction = fields::jurisdiction_key(
      &ctx,
      row.state_code.as_deref(),
      row.jurisdiction_type.as_deref(),
      row.jurisdiction_external_id.as_deref(),
    )?;
    let tax_type = match fields::clean(row.tax_type.as_deref()) {
      Some(t) => fields::variant("tax type", t)?,
      None => TaxType::Sales,
    };
    let effective_date = fields::required_date(&ctx, "effective_date", row.effective_date.as_deref())?;
    let rate = tally.note(&ctx, "rate", row.rate.as_deref(), fields::rate(row.rate.as_deref()));
    let end_date =
      tally.note(&ctx, "end_date", row.end_date.as_deref(), fields::date(row.end_date.as_deref()));
    let published = tally.note(
      &ctx,
      "published_at",
      row.published_at.as_deref(),
      fields::date(row.published_at.as_deref()),
    );
    table.published_at = table.published_at.max(published);

    table.records.push(RateRecord {
      jurisdiction,
      tax_type,
      instrument_name: fields::clean(row.instrument_name.as_deref())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{tax_type} tax")),
      value: RateValue::Flat { rate },
      effective_date,
      end_date: end_date.filter(|end| *end > effective_date),
      metadata: BTreeMap::new(),
    });
  }
  table.nulled_fields = tally.count();
  Ok(table)
}

pub async fn ingest_sales_tax(
  store: &SqliteStore,
  path: impl AsRef<Path>,
  opts: RateTableOptions,
) -> Result<PipelineReport> {
  let path = path.as_ref().to_path_buf();
  async move {
    let input = InputFile::read(&path).await?;
    let table = parse_sales_tax(input.text()?)?;
    let doc = opts.source.document(&path, input.content_hash(), "text/csv", table.published_at);
    write_table(store, "sales_tax", doc, opts.methodology, table).await
  }
  .instrument(tracing::info_span!("pipeline", name = "sales_tax"))
  .await
}

// ─── Property tax ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PropertyTaxRow {
  state_code:               Option<String>,
  jurisdiction_type:        Option<String>,
  jurisdiction_external_id: Option<String>,
  year:                     Option<String>,
  effective_rate:           Option<String>,
  median_tax_bill:          Option<String>,
  median_home_value:        Option<String>,
  levy:                     Option<String>,
}

pub const PROPERTY_TAX_INSTRUMENT: &str = "property tax";

/// Parse a property-tax context CSV. Each row becomes a snapshot effective
/// January 1 of its `year`, with the supporting amounts as metadata.
pub fn parse_property_tax(text: &str) -> Result<ParsedTable> {
  let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(text.as_bytes());
  let mut table = ParsedTable::default();
  let mut tally = NullTally::default();

  for (i, row) in reader.deserialize::<PropertyTaxRow>().enumerate() {
    let row = row?;
    let ctx = row_context(i + 2);
    let jurisdiction = fields::jurisdiction_key(
      &ctx,
      row.state_code.as_deref(),
      row.jurisdiction_type.as_deref(),
      row.jurisdiction_external_id.as_deref(),
    )?;
    let year_raw = fields::required(&ctx, "year", row.year.as_deref())?;
    let effective_date = year_raw
      .parse::<i32>()
      .ok()
      .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
      .ok_or_else(|| levy_core::Error::MalformedInput(format!("{ctx}: year {year_raw:?}")))?;

    let rate = tally.note(
      &ctx,
      "effective_rate",
      row.effective_rate.as_deref(),
      fields::rate(row.effective_rate.as_deref()),
    );
    let mut metadata = BTreeMap::new();
    for (field, raw) in [
      ("median_tax_bill", &row.median_tax_bill),
      ("median_home_value", &row.median_home_value),
      ("levy", &row.levy),
    ] {
      let value = tally.note(&ctx, field, raw.as_deref(), fields::number(raw.as_deref()));
      metadata.insert(field.to_owned(), value);
    }

    table.records.push(RateRecord {
      jurisdiction,
      tax_type: TaxType::Property,
      instrument_name: PROPERTY_TAX_INSTRUMENT.to_owned(),
      value: RateValue::Flat { rate },
      effective_date,
      end_date: None,
      metadata,
    });
  }
  table.nulled_fields = tally.count();
  Ok(table)
}

pub async fn ingest_property_tax(
  store: &SqliteStore,
  path: impl AsRef<Path>,
  opts: RateTableOptions,
) -> Result<PipelineReport> {
  let path = path.as_ref().to_path_buf();
  async move {
    let input = InputFile::read(&path).await?;
    let table = parse_property_tax(input.text()?)?;
    let doc = opts.source.document(&path, input.content_hash(), "text/csv", None);
    write_table(store, "property_tax", doc, opts.methodology, table).await
  }
  .instrument(tracing::info_span!("pipeline", name = "property_tax"))
  .await
}

// ─── Shared write path ───────────────────────────────────────────────────────

/// Upsert one record's instrument and snapshot.
pub(crate) fn write_record(
  w: &Writer<'_>,
  record: RateRecord,
  methodology_version_id: uuid::Uuid,
  source_doc_id: uuid::Uuid,
) -> levy_store_sqlite::Result<()> {
  let jurisdiction_id = w.resolve_jurisdiction(&record.jurisdiction)?;
  let instrument =
    TaxInstrument::new(jurisdiction_id, record.tax_type, record.instrument_name, source_doc_id);
  w.upsert_tax_instrument(&instrument)?;
  let mut snapshot = TaxRateSnapshot::new(
    instrument.id,
    methodology_version_id,
    record.effective_date,
    record.value,
    source_doc_id,
  )
  .with_end_date(record.end_date);
  snapshot.metadata = record.metadata;
  w.upsert_rate_snapshot(&snapshot)?;
  Ok(())
}

async fn write_table(
  store: &SqliteStore,
  pipeline: &'static str,
  doc: NewSourceDoc,
  methodology: MethodologyRef,
  table: ParsedTable,
) -> Result<PipelineReport> {
  let mut report = PipelineReport::new(pipeline);
  report.records = table.records.len();
  report.nulled_fields = table.nulled_fields;

  let report = store
    .write(pipeline, move |w| {
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

  tracing::info!(
    records = report.records,
    upserted = report.upserted,
    nulled = report.nulled_fields,
    "rate table ingested"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use levy_core::{
    geography::JurisdictionType,
    provenance::{NewSourceDoc, content_hash},
    store::TaxStore as _,
  };
  use levy_store_sqlite::JurisdictionInput;

  use super::*;

  const SALES: &str = "\
state_code,jurisdiction_type,jurisdiction_external_id,rate,effective_date,end_date,published_at
06,state,06,7.25%,2023-01-01,2024-01-01,2022-12-01
06,state,06,0.0735,2024-01-01,,2023-12-15
06,city,alpha,n/a,2024-01-01,,
";

  async fn store_with(keys: &[JurisdictionKey]) -> SqliteStore {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let src = store
      .upsert_source_doc(NewSourceDoc::new("file:///j", content_hash(b"j")))
      .await
      .unwrap()
      .id;
    let keys = keys.to_vec();
    store
      .write("seed", move |w| {
        for key in keys {
          w.upsert_jurisdiction(&JurisdictionInput {
            name: key.external_id.clone(),
            key,
            geometry: None,
            source_doc_id: src,
          })?;
        }
        Ok(())
      })
      .await
      .unwrap();
    store
  }

  fn state() -> JurisdictionKey { JurisdictionKey::new(JurisdictionType::State, Some("06"), "06") }

  fn alpha() -> JurisdictionKey { JurisdictionKey::new(JurisdictionType::City, Some("06"), "alpha") }

  #[test]
  fn sales_rows_parse_tolerantly() {
    let table = parse_sales_tax(SALES).unwrap();
    assert_eq!(table.records.len(), 3);
    assert_eq!(table.records[0].value, RateValue::flat(0.0725));
    assert_eq!(table.records[0].end_date, NaiveDate::from_ymd_opt(2024, 1, 1));
    assert_eq!(table.records[0].instrument_name, "sales tax");
    assert_eq!(table.records[2].value, RateValue::Flat { rate: None });
    assert_eq!(table.nulled_fields, 1);
    assert_eq!(table.published_at, NaiveDate::from_ymd_opt(2023, 12, 15));
  }

  #[test]
  fn missing_effective_date_is_fatal() {
    let text = "state_code,jurisdiction_type,jurisdiction_external_id,rate,effective_date\n\
                06,state,06,0.06,\n";
    assert!(matches!(
      parse_sales_tax(text),
      Err(crate::Error::Core(levy_core::Error::MissingField { ref field, .. })) if field == "effective_date"
    ));
  }

  #[test]
  fn property_rows_carry_context_metadata() {
    let text = "\
state_code,jurisdiction_type,jurisdiction_external_id,year,effective_rate,median_tax_bill,median_home_value,levy
06,city,alpha,2023,1.1%,\"$5,120\",465000,unknown
";
    let table = parse_property_tax(text).unwrap();
    let record = &table.records[0];
    assert_eq!(record.effective_date, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
    assert_eq!(record.tax_type, TaxType::Property);
    assert!((record.value.headline_rate().unwrap() - 0.011).abs() < 1e-12);
    assert_eq!(record.metadata["median_tax_bill"], Some(5120.0));
    assert_eq!(record.metadata["levy"], None);
    assert_eq!(table.nulled_fields, 1);
  }

  #[test]
  fn property_year_is_the_fatal_key() {
    let text = "state_code,jurisdiction_type,jurisdiction_external_id,year\n06,city,alpha,\n";
    assert!(parse_property_tax(text).is_err());
  }

  #[tokio::test]
  async fn sales_table_ingests_against_known_jurisdictions() {
    let store = store_with(&[state(), alpha()]).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.csv");
    std::fs::write(&path, SALES).unwrap();

    let report = ingest_sales_tax(&store, &path, RateTableOptions::default()).await.unwrap();
    assert_eq!(report.upserted, 3);
    assert_eq!(report.nulled_fields, 1);

    let history = store.rate_history(state().id(), Some(TaxType::Sales)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].rate, Some(0.0725));
    assert_eq!(history[1].rate, Some(0.0735));

    let doc = store.get_source_doc(report.source_doc_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(doc.published_at, NaiveDate::from_ymd_opt(2023, 12, 15));
    assert_eq!(doc.mime_type.as_deref(), Some("text/csv"));
  }

  #[tokio::test]
  async fn unknown_jurisdiction_aborts_the_file() {
    let store = store_with(&[state()]).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.csv");
    std::fs::write(&path, SALES).unwrap();

    let err = ingest_sales_tax(&store, &path, RateTableOptions::default()).await.unwrap_err();
    let (kind, key) = err.missing_reference().unwrap();
    assert_eq!(kind, "jurisdiction");
    assert!(key.contains("alpha"));
    let counts = store.counts().await.unwrap();
    assert_eq!(counts.tax_instruments, 0);
    assert_eq!(counts.tax_rate_snapshots, 0);
  }
}
