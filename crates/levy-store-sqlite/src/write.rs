//! [`Writer`]: idempotent upserts against an open transaction.
//!
//! A writer is only ever handed out by [`SqliteStore::write`], which wraps it
//! in a transaction; any error returned from the pipeline closure rolls back
//! every statement the writer issued.
//!
//! [`SqliteStore::write`]: crate::SqliteStore::write

use std::collections::HashSet;

use chrono::Utc;
use levy_core::{
  coverage::OverlaySummary,
  geography::{GeoUnitType, JurisdictionKey},
  identity,
  methodology::{MethodologyRef, MethodologyVersion},
  provenance::{NewSourceDoc, SourceDoc},
  tax::{TaxInstrument, TaxRateSnapshot},
};
use levy_geo::{
  MultiPolygon,
  overlay::{OverlayJurisdiction, OverlayUnit, compute_overlay},
  shape,
};
use rusqlite::{OptionalExtension as _, params};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    METHODOLOGY_COLUMNS, RawMethodology, RawSourceDoc, SOURCE_DOC_COLUMNS, decode_uuid,
    encode_date, encode_dt, encode_metadata, encode_point, encode_rate_value, encode_uuid,
  },
};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// A geo unit ready to upsert. Area and representative point are derived
/// from `geometry` at write time.
#[derive(Debug, Clone)]
pub struct GeoUnitInput {
  pub unit_type:     GeoUnitType,
  pub geoid:         String,
  pub name:          String,
  pub state_code:    Option<String>,
  pub geometry:      MultiPolygon<f64>,
  pub source_doc_id: Uuid,
}

impl GeoUnitInput {
  pub fn id(&self) -> Uuid { identity::geo_unit_id(self.unit_type.as_ref(), &self.geoid) }
}

/// A jurisdiction node ready to upsert. Parent edges are applied separately,
/// see [`HierarchyBuilder`](crate::HierarchyBuilder).
#[derive(Debug, Clone)]
pub struct JurisdictionInput {
  pub key:           JurisdictionKey,
  pub name:          String,
  pub geometry:      Option<MultiPolygon<f64>>,
  pub source_doc_id: Uuid,
}

// ─── Writer ──────────────────────────────────────────────────────────────────

pub struct Writer<'c> {
  conn: &'c rusqlite::Connection,
}

impl<'c> Writer<'c> {
  pub(crate) fn new(conn: &'c rusqlite::Connection) -> Self { Self { conn } }

  // ── Provenance & lineage ───────────────────────────────────────────────

  /// Register a source document. A repeat of the same `(origin, hash)`
  /// keeps `retrieved_at` and `is_demo` and only fills metadata still NULL.
  pub fn upsert_source_doc(&self, doc: &NewSourceDoc) -> Result<SourceDoc> {
    if doc.origin_url.trim().is_empty() || doc.content_hash.trim().is_empty() {
      return Err(malformed("source document needs an origin and a content hash"));
    }
    let sql = format!(
      "INSERT INTO source_docs ({SOURCE_DOC_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
       ON CONFLICT (origin_url, content_hash) DO UPDATE SET
         title        = COALESCE(source_docs.title, excluded.title),
         published_at = COALESCE(source_docs.published_at, excluded.published_at),
         mime_type    = COALESCE(source_docs.mime_type, excluded.mime_type)
       RETURNING {SOURCE_DOC_COLUMNS}"
    );
    let meta = &doc.metadata;
    let raw = self.conn.query_row(
      &sql,
      params![
        encode_uuid(doc.id()),
        doc.origin_url,
        doc.content_hash,
        meta.is_demo,
        encode_dt(Utc::now()),
        meta.published_at.map(encode_date),
        meta.title,
        meta.mime_type,
      ],
      RawSourceDoc::from_row,
    )?;
    raw.into_source_doc()
  }

  /// Ensure a methodology version exists. Only `kind` and `description` are
  /// ever updated.
  pub fn ensure_methodology_version(
    &self,
    methodology: &MethodologyRef,
  ) -> Result<MethodologyVersion> {
    if methodology.name.trim().is_empty() || methodology.version.trim().is_empty() {
      return Err(malformed("methodology needs a name and a version"));
    }
    let sql = format!(
      "INSERT INTO methodology_versions ({METHODOLOGY_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5)
       ON CONFLICT (name, version) DO UPDATE SET
         kind        = excluded.kind,
         description = COALESCE(excluded.description, methodology_versions.description)
       RETURNING {METHODOLOGY_COLUMNS}"
    );
    let raw = self.conn.query_row(
      &sql,
      params![
        encode_uuid(methodology.id()),
        methodology.kind.as_ref(),
        methodology.name.trim(),
        methodology.version.trim(),
        methodology.description,
      ],
      RawMethodology::from_row,
    )?;
    raw.into_methodology()
  }

  // ── Canonical entities ─────────────────────────────────────────────────

  /// Upsert a geo unit; the latest name and shape win.
  pub fn upsert_geo_unit(&self, input: &GeoUnitInput) -> Result<Uuid> {
    if input.geoid.trim().is_empty() {
      return Err(missing_field("geo unit", "geoid"));
    }
    let geometry = shape::to_geojson(&input.geometry)?;
    let (rep_lon, rep_lat) = encode_point(shape::representative_point(&input.geometry));
    let id: String = self.conn.query_row(
      "INSERT INTO geo_units
         (id, unit_type, geoid, name, state_code, geometry, srid, area_m2, rep_lon, rep_lat,
          source_doc_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
       ON CONFLICT (unit_type, geoid) DO UPDATE SET
         name          = excluded.name,
         state_code    = excluded.state_code,
         geometry      = excluded.geometry,
         area_m2       = excluded.area_m2,
         rep_lon       = excluded.rep_lon,
         rep_lat       = excluded.rep_lat,
         source_doc_id = excluded.source_doc_id
       RETURNING id",
      params![
        encode_uuid(input.id()),
        input.unit_type.as_ref(),
        input.geoid.trim(),
        input.name.trim(),
        input.state_code.as_deref().map(str::trim),
        geometry,
        shape::REFERENCE_SRID,
        shape::area_m2(&input.geometry),
        rep_lon,
        rep_lat,
        encode_uuid(input.source_doc_id),
      ],
      |r| r.get(0),
    )?;
    decode_uuid(&id)
  }

  /// Upsert a jurisdiction node. The parent edge is left untouched.
  pub fn upsert_jurisdiction(&self, input: &JurisdictionInput) -> Result<Uuid> {
    if input.key.external_id.is_empty() {
      return Err(missing_field("jurisdiction", "external_id"));
    }
    let geometry = input.geometry.as_ref().map(shape::to_geojson).transpose()?;
    let (rep_lon, rep_lat) =
      encode_point(input.geometry.as_ref().and_then(shape::representative_point));
    let id: String = self.conn.query_row(
      "INSERT INTO jurisdictions
         (id, jurisdiction_type, name, state_code, external_id, geometry, srid, rep_lon, rep_lat,
          source_doc_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
       ON CONFLICT (id) DO UPDATE SET
         name          = excluded.name,
         geometry      = excluded.geometry,
         rep_lon       = excluded.rep_lon,
         rep_lat       = excluded.rep_lat,
         source_doc_id = excluded.source_doc_id
       RETURNING id",
      params![
        encode_uuid(input.key.id()),
        input.key.jurisdiction_type.as_ref(),
        input.name.trim(),
        input.key.state_code,
        input.key.external_id,
        geometry,
        shape::REFERENCE_SRID,
        rep_lon,
        rep_lat,
        encode_uuid(input.source_doc_id),
      ],
      |r| r.get(0),
    )?;
    decode_uuid(&id)
  }

  /// Point `child` at `parent` (or detach it).
  pub fn set_parent(&self, child: Uuid, parent: Option<Uuid>) -> Result<()> {
    if parent == Some(child) {
      return Err(Error::Core(levy_core::Error::SelfParent(child.to_string())));
    }
    let updated = self.conn.execute(
      "UPDATE jurisdictions SET parent_jurisdiction_id = ?2 WHERE id = ?1",
      params![encode_uuid(child), parent.map(encode_uuid)],
    )?;
    if updated == 0 {
      return Err(Error::missing("jurisdiction", child));
    }
    Ok(())
  }

  /// Resolve a natural key to an already-ingested jurisdiction.
  pub fn resolve_jurisdiction(&self, key: &JurisdictionKey) -> Result<Uuid> {
    let id = key.id();
    let found = self
      .conn
      .query_row(
        "SELECT 1 FROM jurisdictions WHERE id = ?1",
        params![encode_uuid(id)],
        |_| Ok(()),
      )
      .optional()?;
    found.map(|()| id).ok_or_else(|| Error::missing("jurisdiction", key))
  }

  // ── Tax instruments & rates ────────────────────────────────────────────

  pub fn upsert_tax_instrument(&self, instrument: &TaxInstrument) -> Result<Uuid> {
    if instrument.name.trim().is_empty() {
      return Err(missing_field("tax instrument", "name"));
    }
    let id: String = self.conn.query_row(
      "INSERT INTO tax_instruments (id, jurisdiction_id, tax_type, name, is_active, source_doc_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
       ON CONFLICT (jurisdiction_id, tax_type, name) DO UPDATE SET
         is_active     = excluded.is_active,
         source_doc_id = excluded.source_doc_id
       RETURNING id",
      params![
        encode_uuid(instrument.id),
        encode_uuid(instrument.jurisdiction_id),
        instrument.tax_type.as_ref(),
        instrument.name,
        instrument.is_active,
        encode_uuid(instrument.source_doc_id),
      ],
      |r| r.get(0),
    )?;
    decode_uuid(&id)
  }

  /// Insert an instrument only if it is not known yet; an existing row keeps
  /// its provenance and active flag.
  pub fn ensure_tax_instrument(&self, instrument: &TaxInstrument) -> Result<Uuid> {
    if instrument.name.trim().is_empty() {
      return Err(missing_field("tax instrument", "name"));
    }
    self.conn.execute(
      "INSERT INTO tax_instruments (id, jurisdiction_id, tax_type, name, is_active, source_doc_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
       ON CONFLICT (jurisdiction_id, tax_type, name) DO NOTHING",
      params![
        encode_uuid(instrument.id),
        encode_uuid(instrument.jurisdiction_id),
        instrument.tax_type.as_ref(),
        instrument.name,
        instrument.is_active,
        encode_uuid(instrument.source_doc_id),
      ],
    )?;
    Ok(instrument.id)
  }

  /// Upsert one point of a rate time series. A repeat of the same
  /// `(instrument, methodology, effective_date)` replaces the value.
  pub fn upsert_rate_snapshot(&self, snapshot: &TaxRateSnapshot) -> Result<Uuid> {
    if let Some(end) = snapshot.end_date
      && end <= snapshot.effective_date
    {
      return Err(malformed(format!(
        "snapshot ends ({end}) on or before it takes effect ({})",
        snapshot.effective_date
      )));
    }
    let id: String = self.conn.query_row(
      "INSERT INTO tax_rate_snapshots
         (id, instrument_id, methodology_version_id, effective_date, end_date, rate, value_json,
          metadata_json, source_doc_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
       ON CONFLICT (instrument_id, methodology_version_id, effective_date) DO UPDATE SET
         end_date      = excluded.end_date,
         rate          = excluded.rate,
         value_json    = excluded.value_json,
         metadata_json = excluded.metadata_json,
         source_doc_id = excluded.source_doc_id
       RETURNING id",
      params![
        encode_uuid(snapshot.id),
        encode_uuid(snapshot.instrument_id),
        encode_uuid(snapshot.methodology_version_id),
        encode_date(snapshot.effective_date),
        snapshot.end_date.map(encode_date),
        snapshot.value.headline_rate(),
        encode_rate_value(&snapshot.value)?,
        encode_metadata(&snapshot.metadata)?,
        encode_uuid(snapshot.source_doc_id),
      ],
      |r| r.get(0),
    )?;
    decode_uuid(&id)
  }

  // ── Overlay ────────────────────────────────────────────────────────────

  /// Recompute coverage for one state under one methodology version.
  ///
  /// Pairs that intersect are upserted; rows of this methodology for this
  /// state whose pair no longer intersects are deleted. Rows of any other
  /// methodology version are never touched.
  pub fn run_overlay(
    &self,
    state_code: &str,
    methodology: &MethodologyVersion,
    source_doc_id: Uuid,
  ) -> Result<OverlaySummary> {
    let state_code = state_code.trim();
    let units: Vec<OverlayUnit> = self
      .load_shapes("SELECT id, geometry FROM geo_units WHERE state_code = ?1", state_code)?
      .into_iter()
      .map(|(id, geometry)| OverlayUnit { id, geometry })
      .collect();
    let jurisdictions: Vec<OverlayJurisdiction> = self
      .load_shapes(
        "SELECT id, geometry FROM jurisdictions
         WHERE state_code = ?1 AND geometry IS NOT NULL",
        state_code,
      )?
      .into_iter()
      .map(|(id, geometry)| OverlayJurisdiction { id, geometry })
      .collect();

    let outcome = compute_overlay(&units, &jurisdictions);
    if outcome.degenerate_skipped > 0 {
      tracing::warn!(
        state_code,
        skipped = outcome.degenerate_skipped,
        "skipped overlay pairs of zero-area geo units"
      );
    }

    let mut stale = self.existing_pairs(state_code, methodology.id)?;
    let methodology_id = encode_uuid(methodology.id);
    let source_id = encode_uuid(source_doc_id);
    let mut upsert = self.conn.prepare_cached(
      "INSERT INTO geo_unit_jurisdictions
         (geo_unit_id, jurisdiction_id, methodology_version_id, coverage_ratio, coverage_area,
          source_doc_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
       ON CONFLICT (geo_unit_id, jurisdiction_id, methodology_version_id) DO UPDATE SET
         coverage_ratio = excluded.coverage_ratio,
         coverage_area  = excluded.coverage_area,
         source_doc_id  = excluded.source_doc_id",
    )?;
    for edge in &outcome.edges {
      upsert.execute(params![
        encode_uuid(edge.geo_unit_id),
        encode_uuid(edge.jurisdiction_id),
        methodology_id,
        edge.coverage_ratio,
        edge.coverage_area,
        source_id,
      ])?;
      stale.remove(&(edge.geo_unit_id, edge.jurisdiction_id));
    }

    let mut delete = self.conn.prepare_cached(
      "DELETE FROM geo_unit_jurisdictions
       WHERE geo_unit_id = ?1 AND jurisdiction_id = ?2 AND methodology_version_id = ?3",
    )?;
    for (unit, jurisdiction) in &stale {
      delete.execute(params![encode_uuid(*unit), encode_uuid(*jurisdiction), methodology_id])?;
    }

    let summary = OverlaySummary {
      state_code:         state_code.to_owned(),
      geo_units:          units.len(),
      jurisdictions:      jurisdictions.len(),
      candidate_pairs:    outcome.candidate_pairs,
      rows_written:       outcome.edges.len(),
      degenerate_skipped: outcome.degenerate_skipped,
      stale_removed:      stale.len(),
    };
    tracing::info!(
      state_code,
      methodology = %methodology.name,
      version = %methodology.version,
      geo_units = summary.geo_units,
      jurisdictions = summary.jurisdictions,
      rows = summary.rows_written,
      stale = summary.stale_removed,
      "overlay complete"
    );
    Ok(summary)
  }

  fn load_shapes(&self, sql: &str, state_code: &str) -> Result<Vec<(Uuid, MultiPolygon<f64>)>> {
    let mut stmt = self.conn.prepare_cached(sql)?;
    let rows = stmt
      .query_map(params![state_code], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    rows
      .into_iter()
      .map(|(id, geometry)| -> Result<(Uuid, MultiPolygon<f64>)> {
        Ok((decode_uuid(&id)?, shape::from_geojson(&geometry)?))
      })
      .collect()
  }

  fn existing_pairs(&self, state_code: &str, methodology_id: Uuid) -> Result<HashSet<(Uuid, Uuid)>> {
    let mut stmt = self.conn.prepare_cached(
      "SELECT g.geo_unit_id, g.jurisdiction_id
       FROM geo_unit_jurisdictions g
       JOIN geo_units u ON u.id = g.geo_unit_id
       WHERE g.methodology_version_id = ?1 AND u.state_code = ?2",
    )?;
    let rows = stmt
      .query_map(params![encode_uuid(methodology_id), state_code], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    rows
      .into_iter()
      .map(|(u, j)| -> Result<(Uuid, Uuid)> { Ok((decode_uuid(&u)?, decode_uuid(&j)?)) })
      .collect()
  }
}

fn malformed(msg: impl Into<String>) -> Error {
  Error::Core(levy_core::Error::MalformedInput(msg.into()))
}

fn missing_field(context: &str, field: &str) -> Error {
  Error::Core(levy_core::Error::MissingField { context: context.into(), field: field.into() })
}
