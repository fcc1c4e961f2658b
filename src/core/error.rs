/// sqlutil Error Module
///
/// This module defines the error type shared by every execution mode.
/// Errors from the SQLite client are carried unmodified, except on the
/// table-materialization path, which reports the message text only.
use thiserror::Error;

/// Error type for the sqlutil façade.
///
/// This enum covers:
/// - Client-library failures (connection, preparation, execution)
/// - Re-wrapped table-fill failures
/// - Parameter binding and procedure lookup
/// - Configuration loading
#[derive(Error, Debug)]
pub enum SqlUtilError {
    /// Connection and execution errors from SQLite, propagated as-is
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failure while filling a `DataTable`; only the original message survives
    #[error("Query error: {0}")]
    Query(String),

    /// A parameter could not be placed on the prepared statement
    #[error("Binding error: {0}")]
    Binding(String),

    /// A stored-procedure command named a procedure that is not registered
    #[error("Unknown procedure: {0}")]
    UnknownProcedure(String),

    /// Configuration loading and connection-string parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and thread spawning errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The worker behind a row cursor stopped unexpectedly
    #[error("Cursor error: {0}")]
    Cursor(String),
}

impl SqlUtilError {
    /// Returns the underlying SQLite error code, when the error still carries one.
    ///
    /// Errors re-wrapped by the table path return `None`.
    pub fn sqlite_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            SqlUtilError::Database(e) => e.sqlite_error_code(),
            _ => None,
        }
    }
}

/// Type alias for Result to use SqlUtilError as the error type.
pub type Result<T> = std::result::Result<T, SqlUtilError>;
