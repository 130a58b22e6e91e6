//! Input files and their provenance.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use levy_core::provenance::{ContentHasher, NewSourceDoc, SourceMetadata, content_hash};

use crate::{Error, Result};

/// How a pipeline describes the document it ingests.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
  /// Where the bytes came from; defaults to a `file://` URL of the input.
  pub origin_url: Option<String>,
  pub title:      Option<String>,
  pub is_demo:    bool,
}

impl SourceOptions {
  pub(crate) fn document(
    &self,
    path: &Path,
    content_hash: String,
    mime_type: &str,
    published_at: Option<NaiveDate>,
  ) -> NewSourceDoc {
    let origin = self.origin_url.clone().unwrap_or_else(|| file_url(path));
    NewSourceDoc::new(origin, content_hash).with_metadata(SourceMetadata {
      title: self.title.clone(),
      published_at,
      mime_type: Some(mime_type.to_owned()),
      is_demo: self.is_demo,
    })
  }
}

#[cfg(test)]
impl SourceOptions {
  pub(crate) fn demo() -> Self { Self { is_demo: true, ..Default::default() } }
}

fn file_url(path: &Path) -> String {
  let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
  format!("file://{}", absolute.display())
}

/// A fully read input file.
pub(crate) struct InputFile {
  pub path:  PathBuf,
  pub bytes: Vec<u8>,
}

impl InputFile {
  pub async fn read(path: &Path) -> Result<Self> {
    let bytes = tokio::fs::read(path)
      .await
      .map_err(|source| Error::Io { path: path.to_path_buf(), source })?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "read input");
    Ok(Self { path: path.to_path_buf(), bytes })
  }

  pub fn content_hash(&self) -> String { content_hash(&self.bytes) }

  pub fn text(&self) -> Result<&str> {
    std::str::from_utf8(&self.bytes).map_err(|e| {
      Error::Core(levy_core::Error::MalformedInput(format!(
        "{} is not UTF-8: {e}",
        self.path.display()
      )))
    })
  }
}

/// Hash several files as one document, in the order given.
pub(crate) fn hash_files(paths: &[PathBuf]) -> Result<String> {
  let mut hasher = ContentHasher::new();
  for path in paths {
    let file = std::fs::File::open(path)
      .map_err(|source| Error::Io { path: path.clone(), source })?;
    hasher.update_reader(file).map_err(|source| Error::Io { path: path.clone(), source })?;
  }
  Ok(hasher.finish())
}
