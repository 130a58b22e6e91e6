//! Error type for `levy-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] levy_core::Error),

  #[error("geometry error: {0}")]
  Geo(#[from] levy_geo::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown {kind} stored in database: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },
}

impl Error {
  /// Shorthand for a missing natural-key reference.
  pub fn missing(kind: &'static str, key: impl ToString) -> Self {
    Self::Core(levy_core::Error::MissingReference { kind, key: key.to_string() })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
