//! SQLite backend for the levy engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every pipeline runs as one
//! all-or-nothing transaction through [`SqliteStore::write`].

mod encode;
mod hierarchy;
mod read;
mod schema;
mod store;
mod write;

pub mod error;

pub use error::{Error, Result};
pub use hierarchy::HierarchyBuilder;
pub use read::TableCounts;
pub use store::SqliteStore;
pub use write::{GeoUnitInput, JurisdictionInput, Writer};

#[cfg(test)]
mod tests;
