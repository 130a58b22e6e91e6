//! Synchronous queries, run inside `conn.call` closures or inside a
//! pipeline's transaction.

use levy_core::{
  aggregate::{Candidate, ClassifiedSnapshot, RateContext},
  coverage::{CoverageEntry, GeoUnitCoverage},
  geography::{GeoUnit, Jurisdiction, JurisdictionType},
  methodology::{DataClass, MethodologyVersion},
  provenance::{SourceDoc, Sourced},
  tax::{RateHistoryEntry, TaxType},
};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  Result,
  encode::{
    GEO_UNIT_COLUMNS, INSTRUMENT_COLUMNS, JURISDICTION_COLUMNS, METHODOLOGY_COLUMNS, RawGeoUnit,
    RawInstrument, RawJurisdiction, RawMethodology, RawSnapshot, RawSourceDoc, SNAPSHOT_COLUMNS, SOURCE_DOC_COLUMNS,
    decode_date, decode_opt_date, decode_opt_uuid, decode_rate_value, decode_uuid, decode_variant,
    encode_uuid,
  },
};

/// Prefix every column of a column list with a table alias.
fn qualified(columns: &str, alias: &str) -> String {
  columns
    .split(',')
    .map(|c| format!("{alias}.{}", c.trim()))
    .collect::<Vec<_>>()
    .join(", ")
}

// ─── Entities ────────────────────────────────────────────────────────────────

pub fn source_doc(conn: &Connection, id: Uuid) -> Result<Option<SourceDoc>> {
  let sql = format!("SELECT {SOURCE_DOC_COLUMNS} FROM source_docs WHERE id = ?1");
  conn
    .query_row(&sql, params![encode_uuid(id)], RawSourceDoc::from_row)
    .optional()?
    .map(RawSourceDoc::into_source_doc)
    .transpose()
}

pub fn geo_unit(conn: &Connection, id: Uuid) -> Result<Option<GeoUnit>> {
  let sql = format!("SELECT {GEO_UNIT_COLUMNS} FROM geo_units WHERE id = ?1");
  conn
    .query_row(&sql, params![encode_uuid(id)], RawGeoUnit::from_row)
    .optional()?
    .map(RawGeoUnit::into_geo_unit)
    .transpose()
}

pub fn jurisdiction(conn: &Connection, id: Uuid) -> Result<Option<Jurisdiction>> {
  let sql = format!("SELECT {JURISDICTION_COLUMNS} FROM jurisdictions WHERE id = ?1");
  conn
    .query_row(&sql, params![encode_uuid(id)], RawJurisdiction::from_row)
    .optional()?
    .map(RawJurisdiction::into_jurisdiction)
    .transpose()
}

pub fn methodology_version(conn: &Connection, id: Uuid) -> Result<Option<MethodologyVersion>> {
  let sql = format!("SELECT {METHODOLOGY_COLUMNS} FROM methodology_versions WHERE id = ?1");
  conn
    .query_row(&sql, params![encode_uuid(id)], RawMethodology::from_row)
    .optional()?
    .map(RawMethodology::into_methodology)
    .transpose()
}

// ─── Coverage ────────────────────────────────────────────────────────────────

struct RawCoverageRow {
  jurisdiction_id:   String,
  jurisdiction_type: String,
  jurisdiction_name: String,
  parent_id:         Option<String>,
  coverage_ratio:    f64,
  coverage_area:     f64,
  kind:              String,
  source:            RawSourceDoc,
}

fn coverage_rows(
  conn: &Connection,
  geo_unit_id: Uuid,
  methodology_version_id: Uuid,
) -> Result<Vec<RawCoverageRow>> {
  let sql = format!(
    "SELECT j.id, j.jurisdiction_type, j.name, j.parent_jurisdiction_id,
            g.coverage_ratio, g.coverage_area, m.kind, {}
     FROM geo_unit_jurisdictions g
     JOIN jurisdictions j        ON j.id = g.jurisdiction_id
     JOIN methodology_versions m ON m.id = g.methodology_version_id
     JOIN source_docs s          ON s.id = g.source_doc_id
     WHERE g.geo_unit_id = ?1 AND g.methodology_version_id = ?2
     ORDER BY g.coverage_ratio DESC, j.name, j.id",
    qualified(SOURCE_DOC_COLUMNS, "s")
  );
  let mut stmt = conn.prepare_cached(&sql)?;
  let rows = stmt
    .query_map(params![encode_uuid(geo_unit_id), encode_uuid(methodology_version_id)], |r| {
      Ok(RawCoverageRow {
        jurisdiction_id:   r.get(0)?,
        jurisdiction_type: r.get(1)?,
        jurisdiction_name: r.get(2)?,
        parent_id:         r.get(3)?,
        coverage_ratio:    r.get(4)?,
        coverage_area:     r.get(5)?,
        kind:              r.get(6)?,
        source:            RawSourceDoc::from_row_at(r, 7)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Overlapping jurisdictions of a geo unit under one methodology version.
/// No overlay rows is a valid, empty result.
pub fn coverage_for(
  conn: &Connection,
  geo_unit_id: Uuid,
  methodology_version_id: Uuid,
) -> Result<GeoUnitCoverage> {
  let mut jurisdictions = Vec::new();
  for row in coverage_rows(conn, geo_unit_id, methodology_version_id)? {
    let classification = decode_variant::<DataClass>("methodology kind", &row.kind)?;
    let source = row.source.into_source_ref()?;
    jurisdictions.push(CoverageEntry {
      jurisdiction_id:        decode_uuid(&row.jurisdiction_id)?,
      jurisdiction_type:      decode_variant("jurisdiction type", &row.jurisdiction_type)?,
      jurisdiction_name:      row.jurisdiction_name,
      parent_jurisdiction_id: decode_opt_uuid(row.parent_id.as_deref())?,
      methodology_version_id,
      coverage_ratio:         Sourced::new(row.coverage_ratio, classification, source.clone()),
      coverage_area:          Sourced::new(row.coverage_area, classification, source),
    });
  }
  Ok(GeoUnitCoverage { geo_unit_id, methodology_version_id, jurisdictions })
}

// ─── Rate candidates ─────────────────────────────────────────────────────────

/// Gather everything the aggregator needs for one geo unit: each covering
/// jurisdiction's instruments with their full classified time series.
pub fn rate_candidates(
  conn: &Connection,
  geo_unit_id: Uuid,
  ctx: &RateContext,
) -> Result<Vec<Candidate>> {
  let instrument_sql = format!(
    "SELECT {INSTRUMENT_COLUMNS} FROM tax_instruments
     WHERE jurisdiction_id = ?1 AND (?2 IS NULL OR tax_type = ?2)
     ORDER BY tax_type, name"
  );
  let snapshot_sql = format!(
    "SELECT {}, m.kind, {}
     FROM tax_rate_snapshots t
     JOIN methodology_versions m ON m.id = t.methodology_version_id
     JOIN source_docs s          ON s.id = t.source_doc_id
     WHERE t.instrument_id = ?1
     ORDER BY t.effective_date",
    qualified(SNAPSHOT_COLUMNS, "t"),
    qualified(SOURCE_DOC_COLUMNS, "s"),
  );
  let tax_type = ctx.tax_type.map(|t| t.as_ref().to_owned());

  let mut candidates = Vec::new();
  for row in coverage_rows(conn, geo_unit_id, ctx.coverage_methodology_version_id)? {
    if row.coverage_ratio <= 0.0 {
      continue;
    }
    let coverage_source = row.source.into_source_ref()?;
    let jurisdiction_type: JurisdictionType =
      decode_variant("jurisdiction type", &row.jurisdiction_type)?;

    let mut stmt = conn.prepare_cached(&instrument_sql)?;
    let instruments = stmt
      .query_map(params![row.jurisdiction_id, tax_type], |r| RawInstrument::from_row_at(r, 0))?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    for raw in instruments {
      let instrument = raw.into_instrument()?;
      let mut stmt = conn.prepare_cached(&snapshot_sql)?;
      let raws = stmt
        .query_map(params![encode_uuid(instrument.id)], |r| {
          Ok((
            RawSnapshot::from_row_at(r, 0)?,
            r.get::<_, String>(8)?,
            RawSourceDoc::from_row_at(r, 9)?,
          ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      let snapshots = raws
        .into_iter()
        .map(|(snapshot, kind, source)| -> Result<ClassifiedSnapshot> {
          Ok(ClassifiedSnapshot {
            snapshot:       snapshot.into_snapshot()?,
            classification: decode_variant("methodology kind", &kind)?,
            source:         source.into_source_ref()?,
          })
        })
        .collect::<Result<Vec<_>>>()?;

      candidates.push(Candidate {
        jurisdiction_id: decode_uuid(&row.jurisdiction_id)?,
        jurisdiction_type,
        jurisdiction_name: row.jurisdiction_name.clone(),
        coverage_ratio: row.coverage_ratio,
        coverage_source: coverage_source.clone(),
        instrument,
        snapshots,
      });
    }
  }
  Ok(candidates)
}

// ─── History ─────────────────────────────────────────────────────────────────

/// Every snapshot of a jurisdiction's instruments, ascending by effective
/// date. Signals are included and classified as such.
pub fn rate_history(
  conn: &Connection,
  jurisdiction_id: Uuid,
  tax_type: Option<TaxType>,
) -> Result<Vec<RateHistoryEntry>> {
  let sql = format!(
    "SELECT j.jurisdiction_type, j.name, i.id, i.name, i.tax_type,
            t.id, t.effective_date, t.end_date, t.rate, t.value_json, m.kind, {}
     FROM tax_rate_snapshots t
     JOIN tax_instruments i      ON i.id = t.instrument_id
     JOIN jurisdictions j        ON j.id = i.jurisdiction_id
     JOIN methodology_versions m ON m.id = t.methodology_version_id
     JOIN source_docs s          ON s.id = t.source_doc_id
     WHERE i.jurisdiction_id = ?1 AND (?2 IS NULL OR i.tax_type = ?2)
     ORDER BY t.effective_date, i.tax_type, i.name, m.kind",
    qualified(SOURCE_DOC_COLUMNS, "s")
  );
  #[allow(clippy::type_complexity)]
  let rows: Vec<(
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<f64>,
    String,
    String,
    RawSourceDoc,
  )> = conn
    .prepare_cached(&sql)?
    .query_map(params![encode_uuid(jurisdiction_id), tax_type.map(|t| t.as_ref().to_owned())], |r| {
      Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
        r.get(8)?,
        r.get(9)?,
        r.get(10)?,
        RawSourceDoc::from_row_at(r, 11)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  rows
    .into_iter()
    .map(
      |(j_type, j_name, i_id, i_name, i_tax, s_id, eff, end, rate, value, kind, source)| -> Result<RateHistoryEntry> {
        Ok(RateHistoryEntry {
          jurisdiction_id,
          jurisdiction_type: decode_variant("jurisdiction type", &j_type)?,
          jurisdiction_name: j_name,
          instrument_id: decode_uuid(&i_id)?,
          instrument_name: i_name,
          tax_type: decode_variant("tax type", &i_tax)?,
          snapshot_id: decode_uuid(&s_id)?,
          effective_date: decode_date(&eff)?,
          end_date: decode_opt_date(end.as_deref())?,
          rate,
          value: decode_rate_value(&value)?,
          classification: decode_variant("methodology kind", &kind)?,
          source: source.into_source_ref()?,
        })
      },
    )
    .collect()
}

// ─── Bookkeeping ─────────────────────────────────────────────────────────────

/// Row counts per table; used to verify that re-runs converge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
  pub source_docs:            usize,
  pub methodology_versions:   usize,
  pub geo_units:              usize,
  pub jurisdictions:          usize,
  pub geo_unit_jurisdictions: usize,
  pub tax_instruments:        usize,
  pub tax_rate_snapshots:     usize,
}

pub fn counts(conn: &Connection) -> Result<TableCounts> {
  let count = |table: &str| -> Result<usize> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(usize::try_from(n).unwrap_or_default())
  };
  Ok(TableCounts {
    source_docs:            count("source_docs")?,
    methodology_versions:   count("methodology_versions")?,
    geo_units:              count("geo_units")?,
    jurisdictions:          count("jurisdictions")?,
    geo_unit_jurisdictions: count("geo_unit_jurisdictions")?,
    tax_instruments:        count("tax_instruments")?,
    tax_rate_snapshots:     count("tax_rate_snapshots")?,
  })
}

/// Distinct state codes that have geo units; the overlay scope set.
pub fn geo_unit_states(conn: &Connection) -> Result<Vec<String>> {
  let mut stmt = conn
    .prepare_cached("SELECT DISTINCT state_code FROM geo_units WHERE state_code IS NOT NULL ORDER BY 1")?;
  let states = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(states)
}

