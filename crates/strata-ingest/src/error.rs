//! Error types for the ingestion service.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while materializing and persisting messages.
#[derive(Error, Debug)]
pub enum Error {
    /// Postgres error, wrapped with the operation and table it hit.
    #[error("postgres error during {op} on '{table}': {source}")]
    Postgres {
        op: &'static str,
        table: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Store-level failure that is not driver-specific (used by the
    /// in-memory store and the connection limiter).
    #[error("store error during {op} on '{table}': {reason}")]
    Store {
        op: &'static str,
        table: String,
        reason: String,
    },

    /// Schema inference failed for a payload.
    #[error("inference error: {0}")]
    Inference(#[from] strata_core::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Two distinct generated names compressed to the same store
    /// identifier. Materializing either would silently alias the other,
    /// so this is a hard error.
    #[error("identifier collision: '{short}' is both '{existing}' and '{incoming}'")]
    IdentifierCollision {
        short: String,
        existing: String,
        incoming: String,
    },

    /// A message carries no usable contract code identifier.
    #[error("missing discriminator for {category} at height {height} tx {tx_hash} index {index}")]
    MissingDiscriminator {
        category: String,
        height: i64,
        tx_hash: String,
        index: i64,
    },

    /// A selected row did not decode into the expected column types.
    #[error("row decode error on '{table}': {reason}")]
    Decode { table: String, reason: String },

    /// The raw message referenced by a sync entry is gone upstream.
    #[error("raw message not found in {category} at height {height} tx {tx_hash} index {index}")]
    RawMessageMissing {
        category: String,
        height: i64,
        tx_hash: String,
        index: i64,
    },

    /// Diagnostic contract metadata lookup failed.
    #[error("contract lookup failed: {0}")]
    ContractLookup(String),
}

impl Error {
    /// Whether retrying the same operation later could succeed.
    ///
    /// Store/driver errors are treated as transient (connectivity, load);
    /// everything else is a property of the message itself and will fail
    /// again on replay.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Postgres { .. } | Self::Store { .. })
    }
}
