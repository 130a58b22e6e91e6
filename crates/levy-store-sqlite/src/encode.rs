//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, calendar dates `YYYY-MM-DD`, UUIDs
//! hyphenated lowercase. Enum discriminants use their snake_case names.
//! Rate values and snapshot metadata are compact JSON.

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use levy_core::{
  geography::{GeoUnit, GeoUnitType, Jurisdiction, JurisdictionType, LonLat},
  methodology::{DataClass, MethodologyVersion},
  provenance::{SourceDoc, SourceRef},
  tax::{RateValue, TaxInstrument, TaxRateSnapshot, TaxType},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn decode_opt_uuid(s: Option<&str>) -> Result<Option<Uuid>> {
  s.map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn decode_opt_date(s: Option<&str>) -> Result<Option<NaiveDate>> {
  s.map(decode_date).transpose()
}

/// Parse a stored enum discriminant.
pub fn decode_variant<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::UnknownVariant { kind, value: s.to_owned() })
}

pub fn encode_point(p: Option<LonLat>) -> (Option<f64>, Option<f64>) {
  (p.map(|p| p.lon), p.map(|p| p.lat))
}

fn decode_point(lon: Option<f64>, lat: Option<f64>) -> Option<LonLat> {
  Some(LonLat { lon: lon?, lat: lat? })
}

// ─── Structured columns ──────────────────────────────────────────────────────

pub fn encode_rate_value(v: &RateValue) -> Result<String> { Ok(serde_json::to_string(v)?) }

pub fn decode_rate_value(s: &str) -> Result<RateValue> { Ok(serde_json::from_str(s)?) }

pub fn encode_metadata(m: &BTreeMap<String, Option<f64>>) -> Result<String> {
  Ok(serde_json::to_string(m)?)
}

pub fn decode_metadata(s: &str) -> Result<BTreeMap<String, Option<f64>>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Raw row types ───────────────────────────────────────────────────────────
//
// Each `Raw*` struct mirrors one SELECT's column list. They are built inside
// `conn.call` closures (where only rusqlite errors can be raised) and decoded
// afterwards.

/// Column list shared by every `source_docs` select.
pub const SOURCE_DOC_COLUMNS: &str =
  "id, origin_url, content_hash, is_demo, retrieved_at, published_at, title, mime_type";

pub struct RawSourceDoc {
  pub id:           String,
  pub origin_url:   String,
  pub content_hash: String,
  pub is_demo:      bool,
  pub retrieved_at: String,
  pub published_at: Option<String>,
  pub title:        Option<String>,
  pub mime_type:    Option<String>,
}

impl RawSourceDoc {
  /// Read from a row whose columns start at `offset` in
  /// [`SOURCE_DOC_COLUMNS`] order.
  pub fn from_row_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(offset)?,
      origin_url:   row.get(offset + 1)?,
      content_hash: row.get(offset + 2)?,
      is_demo:      row.get(offset + 3)?,
      retrieved_at: row.get(offset + 4)?,
      published_at: row.get(offset + 5)?,
      title:        row.get(offset + 6)?,
      mime_type:    row.get(offset + 7)?,
    })
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> { Self::from_row_at(row, 0) }

  pub fn into_source_doc(self) -> Result<SourceDoc> {
    Ok(SourceDoc {
      id:           decode_uuid(&self.id)?,
      origin_url:   self.origin_url,
      content_hash: self.content_hash,
      is_demo:      self.is_demo,
      retrieved_at: decode_dt(&self.retrieved_at)?,
      published_at: decode_opt_date(self.published_at.as_deref())?,
      title:        self.title,
      mime_type:    self.mime_type,
    })
  }

  pub fn into_source_ref(self) -> Result<SourceRef> { Ok(self.into_source_doc()?.reference()) }
}

pub const METHODOLOGY_COLUMNS: &str = "id, kind, name, version, description";

pub struct RawMethodology {
  pub id:          String,
  pub kind:        String,
  pub name:        String,
  pub version:     String,
  pub description: Option<String>,
}

impl RawMethodology {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      kind:        row.get(1)?,
      name:        row.get(2)?,
      version:     row.get(3)?,
      description: row.get(4)?,
    })
  }

  pub fn into_methodology(self) -> Result<MethodologyVersion> {
    Ok(MethodologyVersion {
      id:          decode_uuid(&self.id)?,
      kind:        decode_variant::<DataClass>("methodology kind", &self.kind)?,
      name:        self.name,
      version:     self.version,
      description: self.description,
    })
  }
}

pub const GEO_UNIT_COLUMNS: &str =
  "id, unit_type, geoid, name, state_code, rep_lon, rep_lat, area_m2, source_doc_id";

pub struct RawGeoUnit {
  pub id:            String,
  pub unit_type:     String,
  pub geoid:         String,
  pub name:          String,
  pub state_code:    Option<String>,
  pub rep_lon:       Option<f64>,
  pub rep_lat:       Option<f64>,
  pub area_m2:       f64,
  pub source_doc_id: String,
}

impl RawGeoUnit {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      unit_type:     row.get(1)?,
      geoid:         row.get(2)?,
      name:          row.get(3)?,
      state_code:    row.get(4)?,
      rep_lon:       row.get(5)?,
      rep_lat:       row.get(6)?,
      area_m2:       row.get(7)?,
      source_doc_id: row.get(8)?,
    })
  }

  pub fn into_geo_unit(self) -> Result<GeoUnit> {
    Ok(GeoUnit {
      id:                   decode_uuid(&self.id)?,
      unit_type:            decode_variant::<GeoUnitType>("geo unit type", &self.unit_type)?,
      geoid:                self.geoid,
      name:                 self.name,
      state_code:           self.state_code,
      representative_point: decode_point(self.rep_lon, self.rep_lat),
      area_m2:              self.area_m2,
      source_doc_id:        decode_uuid(&self.source_doc_id)?,
    })
  }
}

pub const JURISDICTION_COLUMNS: &str = "id, jurisdiction_type, name, state_code, external_id, \
                                        parent_jurisdiction_id, geometry IS NOT NULL, rep_lon, \
                                        rep_lat, source_doc_id";

pub struct RawJurisdiction {
  pub id:                     String,
  pub jurisdiction_type:      String,
  pub name:                   String,
  pub state_code:             Option<String>,
  pub external_id:            String,
  pub parent_jurisdiction_id: Option<String>,
  pub has_geometry:           bool,
  pub rep_lon:                Option<f64>,
  pub rep_lat:                Option<f64>,
  pub source_doc_id:          String,
}

impl RawJurisdiction {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                     row.get(0)?,
      jurisdiction_type:      row.get(1)?,
      name:                   row.get(2)?,
      state_code:             row.get(3)?,
      external_id:            row.get(4)?,
      parent_jurisdiction_id: row.get(5)?,
      has_geometry:           row.get(6)?,
      rep_lon:                row.get(7)?,
      rep_lat:                row.get(8)?,
      source_doc_id:          row.get(9)?,
    })
  }

  pub fn into_jurisdiction(self) -> Result<Jurisdiction> {
    Ok(Jurisdiction {
      id:                     decode_uuid(&self.id)?,
      jurisdiction_type:      decode_variant::<JurisdictionType>(
        "jurisdiction type",
        &self.jurisdiction_type,
      )?,
      name:                   self.name,
      state_code:             self.state_code,
      external_id:            self.external_id,
      parent_jurisdiction_id: decode_opt_uuid(self.parent_jurisdiction_id.as_deref())?,
      has_geometry:           self.has_geometry,
      representative_point:   decode_point(self.rep_lon, self.rep_lat),
      source_doc_id:          decode_uuid(&self.source_doc_id)?,
    })
  }
}

pub const INSTRUMENT_COLUMNS: &str = "id, jurisdiction_id, tax_type, name, is_active, source_doc_id";

pub struct RawInstrument {
  pub id:              String,
  pub jurisdiction_id: String,
  pub tax_type:        String,
  pub name:            String,
  pub is_active:       bool,
  pub source_doc_id:   String,
}

impl RawInstrument {
  pub fn from_row_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(offset)?,
      jurisdiction_id: row.get(offset + 1)?,
      tax_type:        row.get(offset + 2)?,
      name:            row.get(offset + 3)?,
      is_active:       row.get(offset + 4)?,
      source_doc_id:   row.get(offset + 5)?,
    })
  }

  pub fn into_instrument(self) -> Result<TaxInstrument> {
    Ok(TaxInstrument {
      id:              decode_uuid(&self.id)?,
      jurisdiction_id: decode_uuid(&self.jurisdiction_id)?,
      tax_type:        decode_variant::<TaxType>("tax type", &self.tax_type)?,
      name:            self.name,
      is_active:       self.is_active,
      source_doc_id:   decode_uuid(&self.source_doc_id)?,
    })
  }
}

pub const SNAPSHOT_COLUMNS: &str = "id, instrument_id, methodology_version_id, effective_date, \
                                    end_date, value_json, metadata_json, source_doc_id";

pub struct RawSnapshot {
  pub id:                     String,
  pub instrument_id:          String,
  pub methodology_version_id: String,
  pub effective_date:         String,
  pub end_date:               Option<String>,
  pub value_json:             String,
  pub metadata_json:          String,
  pub source_doc_id:          String,
}

impl RawSnapshot {
  pub fn from_row_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                     row.get(offset)?,
      instrument_id:          row.get(offset + 1)?,
      methodology_version_id: row.get(offset + 2)?,
      effective_date:         row.get(offset + 3)?,
      end_date:               row.get(offset + 4)?,
      value_json:             row.get(offset + 5)?,
      metadata_json:          row.get(offset + 6)?,
      source_doc_id:          row.get(offset + 7)?,
    })
  }

  pub fn into_snapshot(self) -> Result<TaxRateSnapshot> {
    Ok(TaxRateSnapshot {
      id:                     decode_uuid(&self.id)?,
      instrument_id:          decode_uuid(&self.instrument_id)?,
      methodology_version_id: decode_uuid(&self.methodology_version_id)?,
      effective_date:         decode_date(&self.effective_date)?,
      end_date:               decode_opt_date(self.end_date.as_deref())?,
      value:                  decode_rate_value(&self.value_json)?,
      metadata:               decode_metadata(&self.metadata_json)?,
      source_doc_id:          decode_uuid(&self.source_doc_id)?,
    })
  }
}
