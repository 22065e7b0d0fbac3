//! Strata ingestion pipeline components.
//!
//! This crate turns raw contract messages sitting in category tables into
//! typed relational tables, one entity table per contract code id.
//!
//! # Modules
//!
//! - [`store`] - store access contract plus Postgres, in-memory, and
//!   connection-limited implementations
//! - [`materialize`] - schema reconciliation from inferred plans
//! - [`persist`] - row persistence with deterministic entity ids
//! - [`sync`] - height cursor over the `sync` bookkeeping table
//! - [`worker`] - per-category fetch/replay loop
//! - [`client`] - contract metadata lookup for failure diagnostics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Category tables │  raw messages written by the chain scraper
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   SyncCursor    │  height-cursored fetch, oldest-first replay
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  Materializer   │  infers schema, issues idempotent DDL
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Persister    │  inserts rows with replay-stable ids
//! └─────────────────┘
//! ```
//!
//! The pipeline is at-least-once end to end: every step is idempotent,
//! so a crash anywhere is repaired by replaying the pending sync entry.

pub mod client;
pub mod error;
pub mod materialize;
pub mod metrics;
pub mod persist;
pub mod store;
pub mod sync;
pub mod worker;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use client::{ContractDirectory, ContractInfo, HttpContractDirectory};
pub use materialize::Materializer;
pub use persist::{IdSeed, Persister};
pub use store::{LimitedStore, MemoryStore, PostgresStore, Query, SqlValue, Store};
pub use sync::{SyncCursor, SyncEntry};
pub use worker::{Worker, WorkerConfig};
