//! Core types and pure logic for the Strata contract-message indexer.
//!
//! This crate contains everything that can be reasoned about without a
//! database in reach:
//!
//! - [`schema`] - recursive schema inference from JSON payloads
//! - [`names`] - identifier naming and deterministic compression
//! - Shared error types
//!
//! The ingestion service (`strata-ingest`) consumes the [`SchemaPlan`]
//! produced here and reconciles it against the backing store.

mod error;
pub mod names;
pub mod schema;

pub use error::{Error, Result};
pub use schema::{infer, ColumnType, SchemaPlan, TableDefinition};
