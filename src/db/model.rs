//! Row and value types returned by the key-value layer.

use serde::Serialize;

/// Raw `kv_store` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRow {
    pub key: String,
    pub value: String,
    pub version: u64,
}

/// A decoded value together with the row version it was read at.
/// Versions start at 1 on insert and grow by one on every write; 0 means
/// "no record" when passed as an expected version.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}
