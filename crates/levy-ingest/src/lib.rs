//! Batch ingestion pipelines for levy.
//!
//! Every pipeline performs all writes inside one transaction: it either
//! commits completely or leaves the store untouched. Text inputs are read and
//! validated in full before the first write; shapefiles are streamed feature
//! by feature inside the transaction. Re-running a pipeline over unchanged bytes converges
//! to the same rows.
//!
//! | Pipeline | Input | Writes |
//! |---|---|---|
//! | [`geography::ingest_shapefile`] | census `.shp` + `.dbf` | geo units |
//! | [`geography::ingest_geo_units`] | GeoJSON | geo units |
//! | [`jurisdictions::ingest_jurisdictions`] | GeoJSON | jurisdictions, parent edges, overlay |
//! | [`rates::ingest_sales_tax`] | CSV | instruments, fact snapshots |
//! | [`rates::ingest_property_tax`] | CSV | instruments, fact snapshots + context |
//! | [`schedules::ingest_income_tax`] | JSON | instruments, bracket snapshots |
//! | [`signals::ingest_signals`] | JSON | instruments, signal snapshots |

pub mod error;
pub mod fields;
pub mod geography;
pub mod jurisdictions;
pub mod origin;
pub mod rates;
pub mod schedules;
pub mod signals;

use levy_core::coverage::OverlaySummary;
use serde::Serialize;
use uuid::Uuid;

pub use error::{Error, Result};
pub use origin::SourceOptions;

/// What one pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
  pub pipeline:      &'static str,
  pub source_doc_id: Option<Uuid>,
  /// Records parsed from the input.
  pub records:       usize,
  /// Rows inserted or updated.
  pub upserted:      usize,
  /// Fields present in the input but unparseable, stored as null.
  pub nulled_fields: usize,
  /// Records filtered out by a caller-supplied scope (e.g. state filter).
  pub skipped:       usize,
  pub overlays:      Vec<OverlaySummary>,
}

impl PipelineReport {
  pub(crate) fn new(pipeline: &'static str) -> Self { Self { pipeline, ..Default::default() } }
}
