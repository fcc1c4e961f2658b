/// Command Execution Module
///
/// `SqlUtil` is the façade every caller goes through. It runs a command in
/// one of four modes against one of three targets and owns the lifecycle of
/// any connection it opens itself.
///
/// ## Ownership
///
/// - A connection opened from a connection string is closed before the call
///   returns, except for [`SqlUtil::execute_reader`], where the returned
///   cursor takes it over.
/// - A `DbConnection` or `DbTransaction` passed in by the caller is opened if
///   needed but never closed, committed or rolled back.

use crate::config::Config;
use crate::core::db::command::{Command, CommandKind, Parameter, Procedures};
use crate::core::db::connection::{ConnectionGauge, DbConnection, DbTransaction};
use crate::core::db::query::{fill_table, DataTable, RowCursor};
use crate::core::db::value::Value;
use crate::core::{Result, SqlUtilError};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::debug;

/// Name given to every table produced by [`SqlUtil::execute_table`]
pub const DEFAULT_TABLE_NAME: &str = "ds";

/// Where a command runs
pub enum Target<'a, 'c> {
    /// Open a connection for this call only
    ConnectionString(&'a str),
    /// Run on a caller-owned connection, opening it if it is closed
    Connection(&'a mut DbConnection),
    /// Run inside a caller-owned transaction
    Transaction(&'a DbTransaction<'c>),
}

impl<'a, 'c> From<&'a str> for Target<'a, 'c> {
    fn from(connection_string: &'a str) -> Self {
        Target::ConnectionString(connection_string)
    }
}

impl<'a, 'c> From<&'a mut DbConnection> for Target<'a, 'c> {
    fn from(connection: &'a mut DbConnection) -> Self {
        Target::Connection(connection)
    }
}

impl<'a, 'c> From<&'a DbTransaction<'c>> for Target<'a, 'c> {
    fn from(transaction: &'a DbTransaction<'c>) -> Self {
        Target::Transaction(transaction)
    }
}

/// Command-execution façade.
///
/// Holds a default connection string and a stored-procedure catalog, both
/// fixed after construction. Cheap to clone; clones share the open-connection
/// gauge.
///
/// # Examples
///
/// ```
/// use sqlutil::{CommandKind, Parameter, SqlUtil, Value};
///
/// let util = SqlUtil::new(":memory:");
/// let mut conn = util.connection()?;
/// util.execute_non_query(
///     (&mut conn).into(),
///     CommandKind::Text,
///     "CREATE TABLE t (id INTEGER)",
///     &[],
/// )?;
/// let inserted = util.execute_non_query(
///     (&mut conn).into(),
///     CommandKind::Text,
///     "INSERT INTO t VALUES (?)",
///     &[Parameter::new("id", 5)],
/// )?;
/// assert_eq!(inserted, 1);
///
/// let count = util.execute_scalar((&mut conn).into(), CommandKind::Text, "SELECT COUNT(*) FROM t", &[])?;
/// assert_eq!(count, Some(Value::Integer(1)));
/// # Ok::<(), sqlutil::SqlUtilError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SqlUtil {
    connection_string: String,
    procedures: Arc<Procedures>,
    gauge: ConnectionGauge,
}

impl SqlUtil {
    /// Creates a façade whose shortcuts run against `connection_string`
    pub fn new(connection_string: impl Into<String>) -> Self {
        SqlUtil {
            connection_string: connection_string.into(),
            procedures: Arc::new(Procedures::new()),
            gauge: ConnectionGauge::new(),
        }
    }

    /// Creates a façade from the `DefaultConnection` entry and the procedures of `config`
    ///
    /// # Errors
    ///
    /// Returns `SqlUtilError::Config` if there is no default connection string.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut util = SqlUtil::new(config.default_connection_string()?);
        util.procedures = Arc::new(config.procedures());
        Ok(util)
    }

    /// Registers a stored procedure body under `name`
    pub fn with_procedure(mut self, name: &str, body: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.procedures).register(name, body);
        self
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn procedures(&self) -> &Procedures {
        &self.procedures
    }

    /// Number of connections opened through this façade that are still open,
    /// including connections held by live cursors
    pub fn open_connections(&self) -> usize {
        self.gauge.open_connections()
    }

    /// Creates a closed connection to the default database, counted by this façade
    pub fn connection(&self) -> Result<DbConnection> {
        self.connection_to(&self.connection_string)
    }

    /// Creates a closed connection to `connection_string`, counted by this façade
    pub fn connection_to(&self, connection_string: &str) -> Result<DbConnection> {
        DbConnection::with_gauge(connection_string, self.gauge.clone())
    }

    /// Executes a command and returns the number of rows it affected
    ///
    /// # Errors
    ///
    /// Connection and execution failures are returned unmodified as
    /// `SqlUtilError::Database`.
    pub fn execute_non_query(
        &self,
        target: Target<'_, '_>,
        kind: CommandKind,
        text: &str,
        parameters: &[Parameter],
    ) -> Result<usize> {
        debug!(mode = "non_query", kind = ?kind, "executing command");
        let command = self.prepare(kind, text, Some(parameters))?;
        let affected = self.run(target, command, |conn, command| {
            let mut stmt = command.statement(conn, &self.procedures)?;
            Ok(stmt.raw_execute()?)
        })?;
        debug!(affected, "command completed");
        Ok(affected)
    }

    /// Executes a query on a new connection and returns a cursor over its rows
    ///
    /// The connection is handed to the cursor and closed when the cursor is
    /// closed or dropped. The caller must release the cursor to release the
    /// connection.
    ///
    /// # Errors
    ///
    /// Connection and execution failures are returned unmodified; the new
    /// connection is closed before the error is returned.
    pub fn execute_reader(
        &self,
        connection_string: &str,
        kind: CommandKind,
        text: &str,
        parameters: &[Parameter],
    ) -> Result<RowCursor> {
        debug!(mode = "reader", kind = ?kind, "executing command");
        let command = self.prepare(kind, text, Some(parameters))?;

        let mut connection = self.connection_to(connection_string)?;
        connection.open()?;
        RowCursor::open(connection, command, Arc::clone(&self.procedures))
    }

    /// Executes a query and materializes its full result as a [`DataTable`]
    /// named [`DEFAULT_TABLE_NAME`]
    ///
    /// # Errors
    ///
    /// Failures while preparing, executing or draining the query are reported
    /// as `SqlUtilError::Query` carrying only the SQLite message; the original
    /// error code is not kept. Failures to open the connection are returned
    /// unmodified.
    pub fn execute_table(
        &self,
        target: Target<'_, '_>,
        kind: CommandKind,
        text: &str,
        parameters: &[Parameter],
    ) -> Result<DataTable> {
        debug!(mode = "table", kind = ?kind, "executing command");
        let command = self.prepare(kind, text, Some(parameters))?;
        let table = self.run(target, command, |conn, command| {
            let mut stmt = command
                .statement(conn, &self.procedures)
                .map_err(message_only)?;
            fill_table(&mut stmt, DEFAULT_TABLE_NAME)
                .map_err(|e| SqlUtilError::Query(e.to_string()))
        })?;
        debug!(rows = table.row_count(), columns = table.column_count(), "command completed");
        Ok(table)
    }

    /// Executes a query and returns the first column of the first row
    ///
    /// Returns `Ok(None)` when the query produces no rows. A NULL in that cell
    /// is `Some(Value::Null)`.
    ///
    /// # Errors
    ///
    /// Connection and execution failures are returned unmodified.
    pub fn execute_scalar(
        &self,
        target: Target<'_, '_>,
        kind: CommandKind,
        text: &str,
        parameters: &[Parameter],
    ) -> Result<Option<Value>> {
        debug!(mode = "scalar", kind = ?kind, "executing command");
        let command = self.prepare(kind, text, Some(parameters))?;
        self.run(target, command, |conn, command| {
            let mut stmt = command.statement(conn, &self.procedures)?;
            let mut rows = stmt.raw_query();
            let first = rows
                .next()?
                .map(|row| row.get_ref(0).map(Value::from))
                .transpose()?;
            Ok(first)
        })
    }

    /// Runs a text command against the default connection string
    pub fn non_query(&self, text: &str, parameters: &[Parameter]) -> Result<usize> {
        let target = Target::ConnectionString(&self.connection_string);
        self.execute_non_query(target, CommandKind::Text, text, parameters)
    }

    /// Opens a cursor for a text query against the default connection string
    pub fn reader(&self, text: &str, parameters: &[Parameter]) -> Result<RowCursor> {
        self.execute_reader(&self.connection_string, CommandKind::Text, text, parameters)
    }

    /// Materializes a text query against the default connection string
    pub fn table(&self, text: &str, parameters: &[Parameter]) -> Result<DataTable> {
        let target = Target::ConnectionString(&self.connection_string);
        self.execute_table(target, CommandKind::Text, text, parameters)
    }

    /// Runs a scalar text query against the default connection string
    pub fn scalar(&self, text: &str, parameters: &[Parameter]) -> Result<Option<Value>> {
        let target = Target::ConnectionString(&self.connection_string);
        self.execute_scalar(target, CommandKind::Text, text, parameters)
    }

    /// Builds the command for one call. Stored-procedure names are checked
    /// here, before any connection is opened.
    fn prepare(
        &self,
        kind: CommandKind,
        text: &str,
        parameters: Option<&[Parameter]>,
    ) -> Result<Command> {
        self.procedures.resolve(kind, text)?;
        let mut command = Command::new(kind, text);
        command.add_parameters(parameters);
        Ok(command)
    }

    /// Resolves `target` to an open SQLite handle, runs `op`, then clears the
    /// command's parameters and closes the connection if it was opened here.
    fn run<T>(
        &self,
        target: Target<'_, '_>,
        mut command: Command,
        op: impl FnOnce(&Connection, &Command) -> Result<T>,
    ) -> Result<T> {
        match target {
            Target::ConnectionString(connection_string) => {
                let mut connection = self.connection_to(connection_string)?;
                let result = self.run(Target::Connection(&mut connection), command, op);
                let closed = connection.close();
                let value = result?;
                closed?;
                Ok(value)
            }
            Target::Connection(connection) => {
                let conn = connection.open_handle()?;
                let result = op(conn, &command);
                command.clear_parameters();
                result
            }
            Target::Transaction(transaction) => {
                command.set_transactional(true);
                let result = op(transaction.connection(), &command);
                command.clear_parameters();
                result
            }
        }
    }
}

/// Collapses a SQLite error to its message, leaving the crate's own errors as they are
fn message_only(err: SqlUtilError) -> SqlUtilError {
    match err {
        SqlUtilError::Database(e) => SqlUtilError::Query(e.to_string()),
        other => other,
    }
}
