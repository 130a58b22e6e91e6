//! Subcommand execution. Every command returns the JSON it prints.

use anyhow::{Context as _, bail};
use levy_core::{
  aggregate::RateContext,
  geography::JurisdictionKey,
  identity,
  methodology::MethodologyRef,
  provenance::{NewSourceDoc, SourceMetadata, content_hash},
  store::TaxStore as _,
};
use levy_ingest::{
  SourceOptions, geography, jurisdictions, rates, schedules,
  signals::{self, SignalOptions},
};
use levy_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{GeoUnitArgs, Ingest, JurisdictionArgs, Query, SourceArgs, settings::Settings};

/// Everything resolved once per invocation.
pub struct Invocation {
  pub store:    SqliteStore,
  pub settings: Settings,
  /// The overlay lineage every coverage read and write uses.
  pub overlay:  MethodologyRef,
}

impl Invocation {
  fn source(&self, args: SourceArgs) -> SourceOptions {
    SourceOptions { origin_url: args.origin_url, title: args.title, is_demo: self.settings.demo }
  }
}

// ─── Ingest ───────────────────────────────────────────────────────────────────

pub(crate) async fn ingest(inv: &Invocation, command: Ingest) -> anyhow::Result<Value> {
  let report = match command {
    Ingest::Geography { unit_type, shp, state, source } => {
      let opts = geography::ShapefileOptions {
        unit_type,
        state_filter: state,
        source: inv.source(source),
      };
      geography::ingest_shapefile(&inv.store, &shp, opts)
        .await
        .with_context(|| format!("ingesting shapefile {}", shp.display()))?
    }
    Ingest::GeoUnits { path, source } => geography::ingest_geo_units(&inv.store, &path, inv.source(source))
      .await
      .with_context(|| format!("ingesting geo units {}", path.display()))?,
    Ingest::Jurisdictions { path, no_overlay, source } => {
      let opts = jurisdictions::JurisdictionOptions {
        source:  inv.source(source),
        overlay: (!no_overlay).then(|| inv.overlay.clone()),
      };
      jurisdictions::ingest_jurisdictions(&inv.store, &path, opts)
        .await
        .with_context(|| format!("ingesting jurisdictions {}", path.display()))?
    }
    Ingest::SalesTax { path, source } => {
      let opts = rates::RateTableOptions { source: inv.source(source), methodology: inv.settings.rates() };
      rates::ingest_sales_tax(&inv.store, &path, opts)
        .await
        .with_context(|| format!("ingesting sales tax {}", path.display()))?
    }
    Ingest::PropertyTax { path, source } => {
      let opts = rates::RateTableOptions { source: inv.source(source), methodology: inv.settings.rates() };
      rates::ingest_property_tax(&inv.store, &path, opts)
        .await
        .with_context(|| format!("ingesting property tax {}", path.display()))?
    }
    Ingest::IncomeTax { path, source } => {
      let opts = rates::RateTableOptions { source: inv.source(source), methodology: inv.settings.rates() };
      schedules::ingest_income_tax(&inv.store, &path, opts)
        .await
        .with_context(|| format!("ingesting income tax {}", path.display()))?
    }
    Ingest::Signals { path, source } => {
      let opts = SignalOptions { source: inv.source(source), methodology: inv.settings.signals() };
      signals::ingest_signals(&inv.store, &path, opts)
        .await
        .with_context(|| format!("ingesting signals {}", path.display()))?
    }
  };
  Ok(serde_json::to_value(report)?)
}

// ─── Overlay ──────────────────────────────────────────────────────────────────

/// Source document for a recomputation that reads nothing but the store.
/// Its hash covers the lineage, so the same lineage converges on one row.
fn overlay_source(state_code: &str, methodology: &MethodologyRef, is_demo: bool) -> NewSourceDoc {
  let lineage = format!("{}:{}", methodology.name, methodology.version);
  NewSourceDoc::new(format!("levy:overlay/{state_code}"), content_hash(lineage.as_bytes()))
    .with_metadata(SourceMetadata {
      title: Some(format!("overlay recomputation ({lineage})")),
      is_demo,
      ..Default::default()
    })
}

pub(crate) async fn overlay(inv: &Invocation, state: Option<String>) -> anyhow::Result<Value> {
  let states = match state {
    Some(state) => vec![state],
    None => inv.store.geo_unit_states().await?,
  };
  let mut summaries = Vec::with_capacity(states.len());
  for state in states {
    let source = inv
      .store
      .upsert_source_doc(overlay_source(&state, &inv.overlay, inv.settings.demo))
      .await?;
    let summary = inv
      .store
      .run_overlay(&state, &inv.overlay, source.id)
      .await
      .with_context(|| format!("overlay for state {state}"))?;
    summaries.push(json!({ "state_code": state, "summary": summary }));
  }
  Ok(json!({
    "methodology": { "name": inv.overlay.name, "version": inv.overlay.version, "id": inv.overlay.id() },
    "states": summaries,
  }))
}

// ─── Queries ──────────────────────────────────────────────────────────────────

async fn resolve_geo_unit(inv: &Invocation, args: GeoUnitArgs) -> anyhow::Result<Uuid> {
  let id = match (args.id, args.unit_type, args.geoid) {
    (Some(id), ..) => id,
    (None, Some(unit_type), Some(geoid)) => identity::geo_unit_id(unit_type.as_ref(), geoid.trim()),
    _ => bail!("a geo unit needs --id, or --unit-type with --geoid"),
  };
  if inv.store.get_geo_unit(id).await?.is_none() {
    bail!("unknown geo unit {id}");
  }
  Ok(id)
}

async fn resolve_jurisdiction(inv: &Invocation, args: JurisdictionArgs) -> anyhow::Result<Uuid> {
  let id = match (args.id, args.jurisdiction_type, args.external_id) {
    (Some(id), ..) => id,
    (None, Some(jurisdiction_type), Some(external_id)) => {
      JurisdictionKey::new(jurisdiction_type, args.state.as_deref(), &external_id).id()
    }
    _ => bail!("a jurisdiction needs --id, or --type with --external-id"),
  };
  if inv.store.get_jurisdiction(id).await?.is_none() {
    bail!("unknown jurisdiction {id}");
  }
  Ok(id)
}

/// The overlay lineage must have been computed before it can be read.
async fn require_overlay(inv: &Invocation) -> anyhow::Result<Uuid> {
  match inv.store.find_methodology_version(&inv.overlay).await? {
    Some(version) => Ok(version.id),
    None => bail!(
      "methodology {}/{} has never been run; run `levy overlay` first",
      inv.overlay.name,
      inv.overlay.version
    ),
  }
}

pub(crate) async fn query(inv: &Invocation, query: Query) -> anyhow::Result<Value> {
  match query {
    Query::Coverage { unit } => {
      let methodology_id = require_overlay(inv).await?;
      let unit_id = resolve_geo_unit(inv, unit).await?;
      let coverage = inv.store.coverage_for(unit_id, methodology_id).await?;
      Ok(json!({ "total_ratio": coverage.total_ratio(), "coverage": coverage }))
    }
    Query::Rates { unit, tax_type, as_of, tax_year } => {
      let methodology_id = require_overlay(inv).await?;
      let unit_id = resolve_geo_unit(inv, unit).await?;
      let mut ctx =
        RateContext::current(methodology_id, as_of.unwrap_or_else(|| chrono::Utc::now().date_naive()));
      if let Some(tax_type) = tax_type {
        ctx = ctx.for_tax_type(tax_type);
      }
      if let Some(tax_year) = tax_year {
        ctx = ctx.for_tax_year(tax_year);
      }
      let rates = inv.store.weighted_rates(unit_id, &ctx).await?;
      Ok(json!({ "reference_date": ctx.reference_date(), "rates": rates }))
    }
    Query::History { jurisdiction, tax_type } => {
      let jurisdiction_id = resolve_jurisdiction(inv, jurisdiction).await?;
      let history = inv.store.rate_history(jurisdiction_id, tax_type).await?;
      Ok(serde_json::to_value(history)?)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn overlay_source_is_stable_per_lineage() {
    let v1 = MethodologyRef::overlay_default();
    let mut v2 = v1.clone();
    v2.version = "v2".into();
    let a = overlay_source("06", &v1, false);
    assert_eq!(a, overlay_source("06", &v1, false));
    assert_ne!(a.content_hash, overlay_source("06", &v2, false).content_hash);
    assert_ne!(a.origin_url, overlay_source("41", &v1, false).origin_url);
  }
}
