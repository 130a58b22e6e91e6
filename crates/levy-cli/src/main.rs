//! `levy`: ingest tax geography and rates, recompute overlays, and query
//! coverage-weighted rates.
//!
//! # Usage
//!
//! ```text
//! levy ingest geography tract tl_2023_06_tract.shp --state 06
//! levy ingest jurisdictions cities.geojson
//! levy ingest sales-tax rates.csv --origin-url https://cdtfa.ca.gov/rates.csv
//! levy overlay --state 06
//! levy query rates --unit-type tract --geoid 06075010100 --tax-year 2024
//! levy --config levy.toml --methodology-version v2 query coverage --id <uuid>
//! ```
//!
//! Configuration is read from `levy.toml` (or `--config`) and `LEVY_*`
//! environment variables. Results are printed as JSON on stdout.

mod commands;
mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use levy_core::{
  geography::{GeoUnitType, JurisdictionType},
  tax::TaxType,
};
use levy_store_sqlite::SqliteStore;
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "levy", author, version, about = "Spatial tax attribution engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, global = true, default_value = "levy.toml")]
  config: PathBuf,

  /// SQLite database path; overrides `database_path`.
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  /// Overlay methodology name for this invocation.
  #[arg(long, global = true)]
  methodology_name: Option<String>,

  /// Overlay methodology version for this invocation.
  #[arg(long, global = true)]
  methodology_version: Option<String>,

  /// Mark source documents written by this invocation as demo data.
  #[arg(long, global = true)]
  demo: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run an ingestion pipeline.
  #[command(subcommand)]
  Ingest(Ingest),
  /// Recompute coverage ratios for one state, or every state with geo units.
  Overlay {
    #[arg(long)]
    state: Option<String>,
  },
  #[command(subcommand)]
  Query(Query),
  /// Print row counts per table.
  Status,
}

/// Where an input came from, recorded on its source document.
#[derive(Args, Debug, Clone, Default)]
struct SourceArgs {
  /// Origin URL of the input; defaults to the file's own `file://` URL.
  #[arg(long)]
  origin_url: Option<String>,
  #[arg(long)]
  title:      Option<String>,
}

#[derive(Subcommand, Debug)]
enum Ingest {
  /// Census boundary shapefile (`.shp` with a sibling `.dbf`).
  Geography {
    unit_type: GeoUnitType,
    shp:       PathBuf,
    /// Only keep features of this state FIPS code.
    #[arg(long)]
    state:     Option<String>,
    #[command(flatten)]
    source:    SourceArgs,
  },
  /// Custom geo units from GeoJSON.
  GeoUnits {
    path:   PathBuf,
    #[command(flatten)]
    source: SourceArgs,
  },
  /// Jurisdictions from GeoJSON, followed by the overlay for their states.
  Jurisdictions {
    path:       PathBuf,
    /// Skip the overlay recomputation.
    #[arg(long)]
    no_overlay: bool,
    #[command(flatten)]
    source:     SourceArgs,
  },
  /// Sales-tax rate table (CSV).
  SalesTax {
    path:   PathBuf,
    #[command(flatten)]
    source: SourceArgs,
  },
  /// Property-tax context table (CSV).
  PropertyTax {
    path:   PathBuf,
    #[command(flatten)]
    source: SourceArgs,
  },
  /// Income-tax bracket schedules (JSON).
  IncomeTax {
    path:   PathBuf,
    #[command(flatten)]
    source: SourceArgs,
  },
  /// Policy signals (JSON).
  Signals {
    path:   PathBuf,
    #[command(flatten)]
    source: SourceArgs,
  },
}

/// A geo unit, by id or by natural key.
#[derive(Args, Debug, Clone)]
struct GeoUnitArgs {
  #[arg(long, conflicts_with_all = ["unit_type", "geoid"], required_unless_present_all = ["unit_type", "geoid"])]
  id:        Option<Uuid>,
  #[arg(long, requires = "geoid")]
  unit_type: Option<GeoUnitType>,
  #[arg(long, requires = "unit_type")]
  geoid:     Option<String>,
}

/// A jurisdiction, by id or by natural key.
#[derive(Args, Debug, Clone)]
struct JurisdictionArgs {
  #[arg(long, conflicts_with_all = ["jurisdiction_type", "external_id"], required_unless_present_all = ["jurisdiction_type", "external_id"])]
  id:                Option<Uuid>,
  #[arg(long = "type", requires = "external_id")]
  jurisdiction_type: Option<JurisdictionType>,
  /// State FIPS code; omitted for federal.
  #[arg(long)]
  state:             Option<String>,
  #[arg(long, requires = "jurisdiction_type")]
  external_id:       Option<String>,
}

#[derive(Subcommand, Debug)]
enum Query {
  /// Jurisdictions overlapping a geo unit, with coverage ratios.
  Coverage {
    #[command(flatten)]
    unit: GeoUnitArgs,
  },
  /// Coverage-weighted current rates for a geo unit.
  Rates {
    #[command(flatten)]
    unit:     GeoUnitArgs,
    #[arg(long)]
    tax_type: Option<TaxType>,
    /// Reference date; defaults to today.
    #[arg(long, conflicts_with = "tax_year")]
    as_of:    Option<NaiveDate>,
    /// Select rates in force at the end of this tax year.
    #[arg(long)]
    tax_year: Option<i32>,
  },
  /// Rate history of a jurisdiction.
  History {
    #[command(flatten)]
    jurisdiction: JurisdictionArgs,
    #[arg(long)]
    tax_type:     Option<TaxType>,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let mut settings = Settings::load(&cli.config)?;
  if let Some(database) = cli.database {
    settings.database_path = database;
  }
  settings.demo |= cli.demo;
  let overlay = settings.overlay(cli.methodology_name.as_deref(), cli.methodology_version.as_deref());

  let store_path = settings.database_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let ctx = commands::Invocation { store, settings, overlay };
  let output = match cli.command {
    Command::Ingest(ingest) => commands::ingest(&ctx, ingest).await?,
    Command::Overlay { state } => commands::overlay(&ctx, state).await?,
    Command::Query(query) => commands::query(&ctx, query).await?,
    Command::Status => serde_json::to_value(ctx.store.counts().await?)?,
  };
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}
