//! The `TaxStore` trait: the command and query surface of the engine.
//!
//! The trait is implemented by storage backends (e.g. `levy-store-sqlite`).
//! Higher layers (ingest pipelines, the CLI) depend on this abstraction for
//! single operations and queries. Every query takes its methodology version
//! explicitly.

use std::future::Future;

use uuid::Uuid;

use crate::{
  aggregate::{RateContext, WeightedRate},
  coverage::{GeoUnitCoverage, OverlaySummary},
  geography::{GeoUnit, Jurisdiction},
  methodology::{MethodologyRef, MethodologyVersion},
  provenance::{NewSourceDoc, SourceDoc},
  tax::{RateHistoryEntry, TaxType},
};

/// Abstraction over a levy store backend.
///
/// All writes are idempotent upserts keyed by deterministic identity.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait TaxStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Provenance & lineage ───────────────────────────────────────────────

  /// Register a source document. Re-registering the same
  /// `(origin_url, content_hash)` only fills metadata that was still unset.
  fn upsert_source_doc(
    &self,
    doc: NewSourceDoc,
  ) -> impl Future<Output = Result<SourceDoc, Self::Error>> + Send + '_;

  /// Ensure a methodology version exists. Updates `kind` and `description`
  /// only; the meaning of `(name, version)` never changes.
  fn ensure_methodology_version(
    &self,
    methodology: MethodologyRef,
  ) -> impl Future<Output = Result<MethodologyVersion, Self::Error>> + Send + '_;

  fn get_source_doc(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<SourceDoc>, Self::Error>> + Send + '_;

  // ── Canonical entities ─────────────────────────────────────────────────

  fn get_geo_unit(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<GeoUnit>, Self::Error>> + Send + '_;

  fn get_jurisdiction(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Jurisdiction>, Self::Error>> + Send + '_;

  // ── Overlay ────────────────────────────────────────────────────────────

  /// Recompute coverage for every intersecting `(geo unit, jurisdiction)`
  /// pair sharing `state_code`, under `methodology`. Rows of other
  /// methodology versions are never touched.
  fn run_overlay<'a>(
    &'a self,
    state_code: &'a str,
    methodology: &'a MethodologyRef,
    source_doc_id: Uuid,
  ) -> impl Future<Output = Result<OverlaySummary, Self::Error>> + Send + 'a;

  // ── Queries ────────────────────────────────────────────────────────────

  /// Overlapping jurisdictions with their coverage ratios. A geo unit with
  /// no overlay rows yields an empty list, not an error.
  fn coverage_for(
    &self,
    geo_unit_id: Uuid,
    methodology_version_id: Uuid,
  ) -> impl Future<Output = Result<GeoUnitCoverage, Self::Error>> + Send + '_;

  /// Coverage-weighted current rate per tax type.
  fn weighted_rates<'a>(
    &'a self,
    geo_unit_id: Uuid,
    ctx: &'a RateContext,
  ) -> impl Future<Output = Result<Vec<WeightedRate>, Self::Error>> + Send + 'a;

  /// Historical rates of one jurisdiction, ascending by effective date.
  fn rate_history(
    &self,
    jurisdiction_id: Uuid,
    tax_type: Option<TaxType>,
  ) -> impl Future<Output = Result<Vec<RateHistoryEntry>, Self::Error>> + Send + '_;
}
