//! Thin command-execution helpers over SQLite.
//!
//! [`SqlUtil`] runs a command in one of four modes (non-query, reader,
//! table, scalar) against a connection string, a caller-owned connection or
//! a caller-owned transaction.

// Core infrastructure modules
pub mod core;

pub mod config;

pub use crate::config::{load_config, Config, DEFAULT_CONNECTION_NAME};
pub use crate::core::db::{
    CommandKind, ConnectionGauge, ConnectionOptions, ConnectionState, DataTable, DbConnection,
    DbTransaction, Direction, OpenMode, Parameter, Procedures, Row, RowCursor, SqlUtil, Target,
    Value, DEFAULT_TABLE_NAME,
};
pub use crate::core::{Result, SqlUtilError};
