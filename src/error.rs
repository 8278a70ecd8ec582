use thiserror::Error;

/// Failure taxonomy for the settlement engine.
///
/// The first five variants carry the distinguishing phrases callers branch
/// on; the remaining variants wrap infrastructure errors from the CSV/JSON
/// boundary and the storage backends.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// A referenced record does not exist. Never retried internally.
    #[error("{0} not found")]
    NotFound(String),
    /// Malformed input, rejected before any write.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A policy gate failed. The message names the gate.
    #[error("not eligible: {0}")]
    Eligibility(String),
    /// The operation is not legal in the record's current state.
    /// Rejected with no partial mutation.
    #[error("state conflict: {0}")]
    StateConflict(String),
    /// An external collaborator (payout, delivery) could not confirm.
    /// Retryable; never reported after a money-state change.
    #[error("external service failure: {0}")]
    External(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(String),
}

impl SettlementError {
    /// `NotFound` for a record kind + identifier, e.g. `escrow ESC_… not found`.
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for SettlementError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;
