//! Error types for `levy-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A record points at a natural key that has not been ingested.
  #[error("unknown {kind}: {key}")]
  MissingReference { kind: &'static str, key: String },

  #[error("malformed input: {0}")]
  MalformedInput(String),

  #[error("{context}: missing required field {field:?}")]
  MissingField { context: String, field: String },

  #[error("jurisdiction {0} cannot be its own parent")]
  SelfParent(String),

  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
