//! Error types for migrate-core

use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error taxonomy for the migration core (see design notes for the rationale:
/// kinds, not exception types).
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Invalid input caught by a validator before a job starts.
    #[error("Config error: {0}")]
    Config(String),

    /// Could not open a source/target connection.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// COPY probe failed; job aborts before touching data.
    #[error("Permission error: {0}")]
    Permission(String),

    /// Parent/partition creation failed.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Producer/consumer exception mid-chunk.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// User-requested stop.
    #[error("Cancelled")]
    Cancelled,

    /// Source partition missing or empty; not a failure, but not success either.
    #[error("Data skipped: {0}")]
    DataSkipped(String),

    /// Underlying driver error that doesn't map to a more specific kind.
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Embedded checkpoint/history store error.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Pool acquisition error for the embedded store.
    #[error("Store pool error: {0}")]
    StorePool(String),

    /// Other errors that don't fit the taxonomy above.
    #[error("{0}")]
    Other(String),
}

impl MigrateError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Self::Permission(_))
    }

    /// Map a raw driver error into the taxonomy using its SQLSTATE code where
    /// one is present, falling back to `Query` otherwise.
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message();
            match db_err.code().code() {
                "42501" => return Self::Permission(message.to_string()),
                "42P01" | "42701" | "42P16" => return Self::Schema(message.to_string()),
                "57014" => return Self::Cancelled,
                _ => {}
            }
        }
        Self::Query(err)
    }
}

impl From<r2d2::Error> for MigrateError {
    fn from(err: r2d2::Error) -> Self {
        Self::StorePool(err.to_string())
    }
}
