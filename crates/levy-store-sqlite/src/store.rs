//! [`SqliteStore`]: the SQLite implementation of [`TaxStore`].

use std::{path::Path, time::Instant};

use levy_core::{
  aggregate::{RateContext, WeightedRate, aggregate},
  coverage::{GeoUnitCoverage, OverlaySummary},
  geography::{GeoUnit, Jurisdiction},
  methodology::{MethodologyRef, MethodologyVersion},
  provenance::{NewSourceDoc, SourceDoc},
  store::TaxStore,
  tax::{RateHistoryEntry, TaxType},
};
use uuid::Uuid;

use crate::{Error, Result, TableCounts, Writer, read, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A levy store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection handle is shared.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` inside one transaction. Any error returned from `f` rolls back
  /// every write it made; nothing is partially committed.
  pub async fn write<T, F>(&self, label: &'static str, f: F) -> Result<T>
  where
    F: FnOnce(&Writer<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let started = Instant::now();
    let result = self.conn.call(move |conn| Ok(in_transaction(conn, f))).await?;
    match &result {
      Ok(_) => tracing::debug!(label, elapsed_ms = started.elapsed().as_millis() as u64, "committed"),
      Err(e) => tracing::debug!(label, error = %e, "rolled back"),
    }
    result
  }

  /// Run a read-only closure on the connection thread.
  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&rusqlite::Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(&*conn))).await?
  }

  /// Row counts per table.
  pub async fn counts(&self) -> Result<TableCounts> { self.read(read::counts).await }

  /// State codes that have at least one geo unit.
  pub async fn geo_unit_states(&self) -> Result<Vec<String>> {
    self.read(read::geo_unit_states).await
  }

  /// Look up a methodology version by `(name, version)` without creating it.
  pub async fn find_methodology_version(
    &self,
    methodology: &MethodologyRef,
  ) -> Result<Option<MethodologyVersion>> {
    let id = methodology.id();
    self.read(move |conn| read::methodology_version(conn, id)).await
  }
}

fn in_transaction<T>(
  conn: &mut rusqlite::Connection,
  f: impl FnOnce(&Writer<'_>) -> Result<T>,
) -> Result<T> {
  let tx = conn.transaction()?;
  let value = f(&Writer::new(&tx))?;
  tx.commit()?;
  Ok(value)
}

// ─── TaxStore impl ───────────────────────────────────────────────────────────

impl TaxStore for SqliteStore {
  type Error = Error;

  // ── Provenance & lineage ─────────────────────────────────────────────────

  async fn upsert_source_doc(&self, doc: NewSourceDoc) -> Result<SourceDoc> {
    self.write("upsert_source_doc", move |w| w.upsert_source_doc(&doc)).await
  }

  async fn ensure_methodology_version(
    &self,
    methodology: MethodologyRef,
  ) -> Result<MethodologyVersion> {
    self
      .write("ensure_methodology_version", move |w| w.ensure_methodology_version(&methodology))
      .await
  }

  async fn get_source_doc(&self, id: Uuid) -> Result<Option<SourceDoc>> {
    self.read(move |conn| read::source_doc(conn, id)).await
  }

  // ── Canonical entities ───────────────────────────────────────────────────

  async fn get_geo_unit(&self, id: Uuid) -> Result<Option<GeoUnit>> {
    self.read(move |conn| read::geo_unit(conn, id)).await
  }

  async fn get_jurisdiction(&self, id: Uuid) -> Result<Option<Jurisdiction>> {
    self.read(move |conn| read::jurisdiction(conn, id)).await
  }

  // ── Overlay ──────────────────────────────────────────────────────────────

  async fn run_overlay<'a>(
    &'a self,
    state_code: &'a str,
    methodology: &'a MethodologyRef,
    source_doc_id: Uuid,
  ) -> Result<OverlaySummary> {
    let state_code = state_code.to_owned();
    let methodology = methodology.clone();
    self
      .write("overlay", move |w| {
        let version = w.ensure_methodology_version(&methodology)?;
        w.run_overlay(&state_code, &version, source_doc_id)
      })
      .await
  }

  // ── Queries ──────────────────────────────────────────────────────────────

  async fn coverage_for(
    &self,
    geo_unit_id: Uuid,
    methodology_version_id: Uuid,
  ) -> Result<GeoUnitCoverage> {
    self.read(move |conn| read::coverage_for(conn, geo_unit_id, methodology_version_id)).await
  }

  async fn weighted_rates<'a>(
    &'a self,
    geo_unit_id: Uuid,
    ctx: &'a RateContext,
  ) -> Result<Vec<WeightedRate>> {
    let query = ctx.clone();
    let candidates = self.read(move |conn| read::rate_candidates(conn, geo_unit_id, &query)).await?;
    let rates = aggregate(geo_unit_id, &candidates, ctx);
    for rate in &rates {
      for ambiguity in &rate.ambiguities {
        tracing::warn!(
          geo_unit = %geo_unit_id,
          jurisdiction = %ambiguity.jurisdiction_id,
          tax_type = %ambiguity.tax_type,
          kept = %ambiguity.kept_instrument_id,
          dropped = ambiguity.dropped_instrument_ids.len(),
          "several applicable instruments of one tax type; kept one"
        );
      }
    }
    Ok(rates)
  }

  async fn rate_history(
    &self,
    jurisdiction_id: Uuid,
    tax_type: Option<TaxType>,
  ) -> Result<Vec<RateHistoryEntry>> {
    self.read(move |conn| read::rate_history(conn, jurisdiction_id, tax_type)).await
  }
}
