//! Error type for `levy-ingest`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Store(#[from] levy_store_sqlite::Error),

  #[error(transparent)]
  Geo(#[from] levy_geo::Error),

  #[error(transparent)]
  Core(#[from] levy_core::Error),

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("cannot read {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl Error {
  /// Carry a pipeline error out of a store transaction closure.
  pub(crate) fn into_store(self) -> levy_store_sqlite::Error {
    match self {
      Self::Store(e) => e,
      Self::Geo(e) => levy_store_sqlite::Error::Geo(e),
      Self::Core(e) => levy_store_sqlite::Error::Core(e),
      Self::Json(e) => levy_store_sqlite::Error::Json(e),
      other => levy_store_sqlite::Error::Core(levy_core::Error::MalformedInput(other.to_string())),
    }
  }

  /// Undo [`Error::into_store`] so callers see the same variants whether an
  /// error was raised before or inside the transaction.
  pub(crate) fn from_store(e: levy_store_sqlite::Error) -> Self {
    match e {
      levy_store_sqlite::Error::Geo(e) => Self::Geo(e),
      levy_store_sqlite::Error::Core(e) => Self::Core(e),
      other => Self::Store(other),
    }
  }

  /// The missing-reference payload, wherever in the stack it was raised.
  pub fn missing_reference(&self) -> Option<(&'static str, &str)> {
    let core = match self {
      Self::Core(e) | Self::Store(levy_store_sqlite::Error::Core(e)) => e,
      _ => return None,
    };
    match core {
      levy_core::Error::MissingReference { kind, key } => Some((kind, key.as_str())),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
