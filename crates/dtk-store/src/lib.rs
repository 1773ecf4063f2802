//! Persistence layer: the database adapter seam and the typed store over
//! the four `_dtk_*` internal tables.
//!
//! Everything the engine remembers between runs lives in the user's
//! database; there is no other durable state. The [`Database`] trait is the
//! narrow adapter the rest of the workspace depends on, and
//! [`SqliteDatabase`] is the embedded implementation.

pub mod adapter;
pub mod internal;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use adapter::{Database, SqlValue};
pub use internal::{
    DatapointRow, DetectionRow, InternalStore, MetricMetaRow, TableNames, TaskRow,
};
pub use sqlite::SqliteDatabase;

/// Errors surfaced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database driver failure (connection, SQL, constraint).
    #[error("Store: database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A row held a value the engine could not interpret.
    #[error("Store: malformed row: {0}")]
    MalformedRow(String),

    /// JSON blob (seasonality or detection metadata) failed to parse.
    #[error("Store: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested operation is not valid for this adapter.
    #[error("Store: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
