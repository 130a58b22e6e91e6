//! Two-phase jurisdiction hierarchy construction.
//!
//! Phase one upserts every node with its parent unset and records the
//! natural-key → id table. Phase two resolves parent keys against that table
//! (falling back to jurisdictions ingested by earlier runs) and writes the
//! edges. File order therefore never matters: a child may appear before its
//! parent.

use std::collections::BTreeMap;

use levy_core::geography::JurisdictionKey;
use uuid::Uuid;

use crate::{Error, JurisdictionInput, Result, Writer};

pub struct HierarchyBuilder<'w, 'c> {
  writer:   &'w Writer<'c>,
  inserted: BTreeMap<JurisdictionKey, Uuid>,
  edges:    Vec<(JurisdictionKey, Option<JurisdictionKey>)>,
}

impl<'w, 'c> HierarchyBuilder<'w, 'c> {
  pub fn new(writer: &'w Writer<'c>) -> Self {
    Self { writer, inserted: BTreeMap::new(), edges: Vec::new() }
  }

  /// Phase one: upsert a node and remember its parent edge for later.
  pub fn insert(
    &mut self,
    node: &JurisdictionInput,
    parent: Option<JurisdictionKey>,
  ) -> Result<Uuid> {
    if parent.as_ref() == Some(&node.key) {
      return Err(Error::Core(levy_core::Error::SelfParent(node.key.to_string())));
    }
    let id = self.writer.upsert_jurisdiction(node)?;
    self.inserted.insert(node.key.clone(), id);
    self.edges.push((node.key.clone(), parent));
    Ok(id)
  }

  /// Number of distinct nodes inserted so far.
  pub fn len(&self) -> usize { self.inserted.len() }

  pub fn is_empty(&self) -> bool { self.inserted.is_empty() }

  /// Phase two: apply every recorded parent edge.
  ///
  /// An unknown parent key fails with a missing-reference error naming it.
  pub fn link(self) -> Result<BTreeMap<JurisdictionKey, Uuid>> {
    let mut linked = 0usize;
    for (child, parent) in &self.edges {
      let child_id = self.id_of(child)?;
      let parent_id = parent.as_ref().map(|p| self.id_of(p)).transpose()?;
      self.writer.set_parent(child_id, parent_id)?;
      linked += usize::from(parent_id.is_some());
    }
    tracing::debug!(nodes = self.inserted.len(), linked, "jurisdiction hierarchy linked");
    Ok(self.inserted)
  }

  fn id_of(&self, key: &JurisdictionKey) -> Result<Uuid> {
    match self.inserted.get(key) {
      Some(id) => Ok(*id),
      None => self.writer.resolve_jurisdiction(key),
    }
  }
}
