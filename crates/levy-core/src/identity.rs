//! Deterministic, name-based identifiers.
//!
//! Every persisted entity is keyed by a version-5 UUID derived from its
//! semantic natural key. Re-ingesting the same record on any machine yields
//! the same identifier, so upserts converge instead of duplicating rows.

use chrono::NaiveDate;
use uuid::Uuid;

/// Fixed namespace for all levy identifiers. Changing it re-keys every row.
pub const NAMESPACE: Uuid = Uuid::from_u128(0x6c65_7679_2d69_6400_8a4e_51c2_07d3_9b11);

/// Joins normalised key parts. ASCII unit separator; never present in
/// trimmed natural keys.
const SEPARATOR: char = '\u{1f}';

/// A value that can appear in an identity tuple.
///
/// Normalisation never fails: absent values become the empty string.
pub trait KeyPart {
  fn normalized(&self) -> String;
}

impl KeyPart for str {
  fn normalized(&self) -> String { self.trim().to_owned() }
}

impl KeyPart for String {
  fn normalized(&self) -> String { self.as_str().normalized() }
}

impl KeyPart for Uuid {
  fn normalized(&self) -> String { self.hyphenated().to_string() }
}

impl KeyPart for NaiveDate {
  fn normalized(&self) -> String { self.format("%Y-%m-%d").to_string() }
}

impl KeyPart for i64 {
  fn normalized(&self) -> String { self.to_string() }
}

impl KeyPart for i32 {
  fn normalized(&self) -> String { self.to_string() }
}

impl<T: KeyPart + ?Sized> KeyPart for &T {
  fn normalized(&self) -> String { (**self).normalized() }
}

impl<T: KeyPart> KeyPart for Option<T> {
  fn normalized(&self) -> String {
    self.as_ref().map(KeyPart::normalized).unwrap_or_default()
  }
}

/// Derive the stable identifier for an ordered tuple of key parts.
///
/// ```
/// use levy_core::identity::stable_id;
///
/// let a = stable_id(&[&"geo_unit" as &dyn levy_core::identity::KeyPart, &"tract", &"06075010100"]);
/// let b = stable_id(&[&" geo_unit " as &dyn levy_core::identity::KeyPart, &"tract", &"06075010100"]);
/// assert_eq!(a, b);
/// ```
pub fn stable_id(parts: &[&dyn KeyPart]) -> Uuid {
  let mut joined = String::new();
  for (i, part) in parts.iter().enumerate() {
    if i > 0 {
      joined.push(SEPARATOR);
    }
    joined.push_str(&part.normalized());
  }
  Uuid::new_v5(&NAMESPACE, joined.as_bytes())
}

/// Builds an identity tuple fluently, starting from the entity kind.
#[derive(Debug, Clone)]
pub struct IdentityKey {
  parts: Vec<String>,
}

impl IdentityKey {
  pub fn new(entity_kind: &str) -> Self {
    Self { parts: vec![entity_kind.normalized()] }
  }

  pub fn part(mut self, part: impl KeyPart) -> Self {
    self.parts.push(part.normalized());
    self
  }

  pub fn id(&self) -> Uuid {
    let refs: Vec<&dyn KeyPart> =
      self.parts.iter().map(|p| p as &dyn KeyPart).collect();
    stable_id(&refs)
  }
}

// ─── Entity identities ───────────────────────────────────────────────────────

pub fn source_doc_id(origin_url: &str, content_hash: &str) -> Uuid {
  IdentityKey::new("source_doc").part(origin_url).part(content_hash).id()
}

pub fn methodology_version_id(name: &str, version: &str) -> Uuid {
  IdentityKey::new("methodology_version").part(name).part(version).id()
}

pub fn geo_unit_id(unit_type: &str, geoid: &str) -> Uuid {
  IdentityKey::new("geo_unit").part(unit_type).part(geoid).id()
}

pub fn jurisdiction_id(
  jurisdiction_type: &str,
  state_code: Option<&str>,
  external_id: &str,
) -> Uuid {
  IdentityKey::new("jurisdiction")
    .part(jurisdiction_type)
    .part(state_code)
    .part(external_id)
    .id()
}

pub fn tax_instrument_id(jurisdiction_id: Uuid, tax_type: &str, name: &str) -> Uuid {
  IdentityKey::new("tax_instrument")
    .part(jurisdiction_id)
    .part(tax_type)
    .part(name)
    .id()
}

pub fn rate_snapshot_id(
  instrument_id: Uuid,
  methodology_version_id: Uuid,
  effective_date: NaiveDate,
) -> Uuid {
  IdentityKey::new("tax_rate_snapshot")
    .part(instrument_id)
    .part(methodology_version_id)
    .part(effective_date)
    .id()
}
