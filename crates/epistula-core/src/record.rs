use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A completed inference exchange awaiting scoring. Rows are created by the
/// hub write path; the bucket cache is the only component that flips them to
/// scored, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// Monotonically increasing store identifier.
    pub id: i64,
    pub model: String,
    pub uid: i64,
    pub pubkey: String,
    pub endpoint: String,
    pub success: bool,
    pub request: Value,
    pub response: Value,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage query failed: {0}")]
    Query(String),
}

/// Data-access capability the bucket cache consumes. Both operations are
/// invoked inside the cache's critical section, so an implementation only
/// needs per-call consistency.
pub trait RecordStore: Send + Sync {
    /// Up to `limit` unscored records for `model`, newest first.
    fn select_unscored(&self, model: &str, limit: usize)
        -> Result<Vec<ExchangeRecord>, StoreError>;

    /// Flips the given record ids to scored.
    fn mark_scored(&self, ids: &[i64]) -> Result<(), StoreError>;
}
