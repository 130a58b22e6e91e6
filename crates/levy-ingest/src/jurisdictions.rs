//! Jurisdiction pipeline: nodes, parent edges and (optionally) the overlay,
//! all in one transaction.

use std::{collections::BTreeSet, path::Path};

use levy_core::{
  geography::{JurisdictionKey, JurisdictionType},
  methodology::MethodologyRef,
};
use levy_geo::{MultiPolygon, source::GeoJsonCollection};
use levy_store_sqlite::{HierarchyBuilder, JurisdictionInput, SqliteStore};
use tracing::Instrument as _;

use crate::{PipelineReport, Result, SourceOptions, fields, origin::InputFile};

pub const JURISDICTION_PROPERTIES: [&str; 3] = ["jurisdiction_type", "name", "external_id"];

#[derive(Debug, Clone)]
pub struct ParsedJurisdiction {
  pub key:      JurisdictionKey,
  pub name:     String,
  pub geometry: Option<MultiPolygon<f64>>,
  pub parent:   Option<JurisdictionKey>,
}

#[derive(Debug, Clone, Default)]
pub struct JurisdictionOptions {
  pub source:  SourceOptions,
  /// When set, recompute coverage for every state in the file under this
  /// methodology, inside the same transaction.
  pub overlay: Option<MethodologyRef>,
}

/// The usual parent type when a file names a parent without its type.
fn default_parent_type(child: JurisdictionType) -> JurisdictionType {
  match child {
    JurisdictionType::Federal | JurisdictionType::State => JurisdictionType::Federal,
    JurisdictionType::County => JurisdictionType::State,
    _ => JurisdictionType::County,
  }
}

/// Parse a jurisdiction `FeatureCollection`. Geometry may be null
/// (e.g. federal); every feature needs [`JURISDICTION_PROPERTIES`].
pub fn parse_jurisdictions(text: &str) -> Result<Vec<ParsedJurisdiction>> {
  let collection = GeoJsonCollection::parse(text)?;
  collection.require(&JURISDICTION_PROPERTIES)?;
  collection
    .features()
    .iter()
    .map(|feature| -> Result<ParsedJurisdiction> {
      let context = format!("feature {}", feature.index);
      let type_raw = feature.prop("jurisdiction_type");
      let jurisdiction_type: JurisdictionType = fields::variant(
        "jurisdiction type",
        fields::required(&context, "jurisdiction_type", type_raw.as_deref())?,
      )?;
      let state_code = feature.prop("state_code");
      let external_id = feature.prop("external_id").unwrap_or_default();
      let key = JurisdictionKey::new(jurisdiction_type, state_code.as_deref(), &external_id);

      let parent = match feature.prop("parent_external_id") {
        None => None,
        Some(parent_id) => {
          let parent_type = match feature.prop("parent_jurisdiction_type") {
            Some(t) => fields::variant("jurisdiction type", &t)?,
            None => default_parent_type(jurisdiction_type),
          };
          let parent_state = match parent_type {
            JurisdictionType::Federal => None,
            _ => state_code.as_deref(),
          };
          Some(JurisdictionKey::new(parent_type, parent_state, &parent_id))
        }
      };

      Ok(ParsedJurisdiction {
        key,
        name: feature.prop("name").unwrap_or_default(),
        geometry: feature.geometry.clone(),
        parent,
      })
    })
    .collect()
}

/// Ingest jurisdictions from GeoJSON, link the hierarchy, and optionally run
/// the overlay for each state the file touches.
pub async fn ingest_jurisdictions(
  store: &SqliteStore,
  path: impl AsRef<Path>,
  opts: JurisdictionOptions,
) -> Result<PipelineReport> {
  let path = path.as_ref().to_path_buf();
  async move {
    let input = InputFile::read(&path).await?;
    let parsed = parse_jurisdictions(input.text()?)?;
    let doc = opts.source.document(&path, input.content_hash(), "application/geo+json", None);
    let states: BTreeSet<String> = parsed
      .iter()
      .filter(|j| j.geometry.is_some())
      .filter_map(|j| j.key.state_code.clone())
      .collect();

    let mut report = PipelineReport::new("jurisdictions");
    report.records = parsed.len();
    let overlay = opts.overlay.clone();
    let report = store
      .write("jurisdictions", move |w| {
        let source = w.upsert_source_doc(&doc)?;
        report.source_doc_id = Some(source.id);

        let mut builder = HierarchyBuilder::new(w);
        for j in parsed {
          let node = JurisdictionInput {
            key:           j.key,
            name:          j.name,
            geometry:      j.geometry,
            source_doc_id: source.id,
          };
          builder.insert(&node, j.parent)?;
        }
        report.upserted = builder.len();
        builder.link()?;

        if let Some(methodology) = overlay {
          let version = w.ensure_methodology_version(&methodology)?;
          for state in &states {
            report.overlays.push(w.run_overlay(state, &version, source.id)?);
          }
        }
        Ok(report)
      })
      .await?;

    tracing::info!(
      records = report.records,
      upserted = report.upserted,
      overlays = report.overlays.len(),
      "jurisdictions ingested"
    );
    Ok(report)
  }
  .instrument(tracing::info_span!("pipeline", name = "jurisdictions"))
  .await
}
