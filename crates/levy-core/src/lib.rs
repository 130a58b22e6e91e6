//! Core types and trait definitions for the levy tax-attribution engine.
//!
//! This crate is deliberately free of geometry and database dependencies.
//! It owns deterministic identity, provenance, methodology lineage, the tax
//! rate model, and the pure coverage-weighted aggregation used at query time.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod aggregate;
pub mod coverage;
pub mod error;
pub mod geography;
pub mod identity;
pub mod methodology;
pub mod provenance;
pub mod store;
pub mod tax;

pub use error::{Error, Result};
