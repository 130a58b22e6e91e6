//! Content-addressed provenance.
//!
//! A [`SourceDoc`] records the exact byte content a fact was derived from.
//! Identity is `(origin_url, content_hash)`: the same bytes from the same
//! origin always map to the same document, so repeated pipeline runs never
//! inflate provenance.

use std::io::Read;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::methodology::DataClass;

// ─── Hashing ─────────────────────────────────────────────────────────────────

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

/// Streams one or more byte sources into a single content hash.
///
/// Multi-file inputs (a shapefile's `.shp` and `.dbf`) are fed in a fixed
/// order so the hash is stable across runs.
#[derive(Default)]
pub struct ContentHasher {
  inner: Sha256,
}

impl ContentHasher {
  pub fn new() -> Self { Self::default() }

  pub fn update(&mut self, bytes: &[u8]) { self.inner.update(bytes); }

  /// Feed a reader to exhaustion in fixed-size chunks.
  pub fn update_reader(&mut self, mut reader: impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
      let n = reader.read(&mut buf)?;
      if n == 0 {
        return Ok(total);
      }
      self.inner.update(&buf[..n]);
      total += n as u64;
    }
  }

  pub fn finish(self) -> String { hex::encode(self.inner.finalize()) }
}

// ─── Source documents ────────────────────────────────────────────────────────

/// Optional descriptive fields. Filled in when first known, never cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
  pub title:        Option<String>,
  pub published_at: Option<NaiveDate>,
  pub mime_type:    Option<String>,
  pub is_demo:      bool,
}

/// Input to a source-document upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSourceDoc {
  pub origin_url:   String,
  pub content_hash: String,
  pub metadata:     SourceMetadata,
}

impl NewSourceDoc {
  pub fn new(origin_url: impl Into<String>, content_hash: impl Into<String>) -> Self {
    Self {
      origin_url:   origin_url.into(),
      content_hash: content_hash.into(),
      metadata:     SourceMetadata::default(),
    }
  }

  pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
    self.metadata = metadata;
    self
  }

  /// The identifier this document will have once persisted.
  pub fn id(&self) -> Uuid {
    crate::identity::source_doc_id(&self.origin_url, &self.content_hash)
  }
}

/// A persisted source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDoc {
  pub id:           Uuid,
  pub origin_url:   String,
  pub content_hash: String,
  pub is_demo:      bool,
  /// Set on first ingest of these bytes; later runs keep the original value.
  pub retrieved_at: DateTime<Utc>,
  pub published_at: Option<NaiveDate>,
  pub title:        Option<String>,
  pub mime_type:    Option<String>,
}

impl SourceDoc {
  pub fn reference(&self) -> SourceRef {
    SourceRef {
      source_id:    self.id,
      url:          self.origin_url.clone(),
      title:        self.title.clone(),
      retrieved_at: self.retrieved_at,
      published_at: self.published_at,
      is_demo:      self.is_demo,
    }
  }
}

// ─── Query-surface provenance ────────────────────────────────────────────────

/// The provenance tuple attached to every number the query surface returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
  pub source_id:    Uuid,
  pub url:          String,
  pub title:        Option<String>,
  pub retrieved_at: DateTime<Utc>,
  pub published_at: Option<NaiveDate>,
  pub is_demo:      bool,
}

/// A value together with its trust classification and the sources it was
/// derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
  pub value:          T,
  pub classification: DataClass,
  pub sources:        Vec<SourceRef>,
}

impl<T> Sourced<T> {
  pub fn new(value: T, classification: DataClass, source: SourceRef) -> Self {
    Self { value, classification, sources: vec![source] }
  }

  /// Any value computed from other values is an estimate, even when every
  /// input is a verified fact.
  pub fn derived(value: T, sources: Vec<SourceRef>) -> Self {
    Self { value, classification: DataClass::Estimate, sources }
  }
}
