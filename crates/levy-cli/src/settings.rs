//! Layered configuration: an optional TOML file, then `LEVY_*` environment
//! variables, then command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use levy_core::methodology::{DataClass, MethodologyRef};
use serde::Deserialize;

/// A methodology as written in configuration. Its kind is fixed by the role
/// it is configured for.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodologySettings {
  pub name:        String,
  pub version:     String,
  #[serde(default)]
  pub description: Option<String>,
}

impl MethodologySettings {
  fn from_ref(methodology: MethodologyRef) -> Self {
    Self {
      name:        methodology.name,
      version:     methodology.version,
      description: methodology.description,
    }
  }

  pub fn to_ref(&self, kind: DataClass) -> MethodologyRef {
    MethodologyRef {
      description: self.description.clone(),
      ..MethodologyRef::new(&self.name, &self.version, kind)
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub database_path:       PathBuf,
  pub overlay_methodology: MethodologySettings,
  pub rate_methodology:    MethodologySettings,
  pub signal_methodology:  MethodologySettings,
  /// Marks every source document written by this invocation as demo data.
  pub demo:                bool,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      database_path:       PathBuf::from("levy.db"),
      overlay_methodology: MethodologySettings::from_ref(MethodologyRef::overlay_default()),
      rate_methodology:    MethodologySettings::from_ref(MethodologyRef::published_rates_default()),
      signal_methodology:  MethodologySettings::from_ref(MethodologyRef::policy_signal_default()),
      demo:                false,
    }
  }
}

impl Settings {
  /// Read `path` if it exists, then the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("LEVY"))
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;
    settings.try_deserialize().context("failed to deserialise settings")
  }

  /// The overlay lineage, with a one-off `name`/`version` override.
  pub fn overlay(&self, name: Option<&str>, version: Option<&str>) -> MethodologyRef {
    let mut methodology = self.overlay_methodology.to_ref(DataClass::Estimate);
    if name.is_some() || version.is_some() {
      // An overridden lineage is a different computation; the configured
      // description no longer applies.
      methodology.description = None;
    }
    if let Some(name) = name {
      methodology.name = name.to_owned();
    }
    if let Some(version) = version {
      methodology.version = version.to_owned();
    }
    methodology
  }

  pub fn rates(&self) -> MethodologyRef { self.rate_methodology.to_ref(DataClass::Fact) }

  pub fn signals(&self) -> MethodologyRef { self.signal_methodology.to_ref(DataClass::Signal) }

  pub fn database_path(&self) -> PathBuf { expand_tilde(&self.database_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
