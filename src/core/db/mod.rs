/// Database Module
///
/// The database layer, organized into focused submodules:
/// - **Connection Management** (`connection.rs`): connection strings, open/close state, transactions
/// - **Commands** (`command.rs`): command descriptors, parameter binding, stored procedures
/// - **Values** (`value.rs`): cells exchanged with SQLite
/// - **Query Results** (`query.rs`): materialized tables and row cursors
/// - **Execution** (`executor.rs`): the `SqlUtil` façade
///
/// ## Error Handling
///
/// All database operations return the crate's `SqlUtilError`.
pub mod command;
pub mod connection;
pub mod executor;
pub mod query;
pub mod value;

pub use command::{bind_parameters, Command, CommandKind, Direction, Parameter, Procedures};
pub use connection::{
    ConnectionGauge, ConnectionOptions, ConnectionState, DbConnection, DbTransaction, OpenMode,
};
pub use executor::{SqlUtil, Target, DEFAULT_TABLE_NAME};
pub use query::{DataTable, Row, RowCursor};
pub use value::Value;
