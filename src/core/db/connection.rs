/// Connection Management Module
///
/// This module provides the connection handle used by every execution mode,
/// connection-string parsing, and the transaction handle callers pass in
/// when commands must run inside their own transaction.

use crate::core::{Result, SqlUtilError};
use rusqlite::{Connection, OpenFlags};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Represents the lifecycle state of a `DbConnection`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No SQLite handle is held
    #[default]
    Closed,
    /// A SQLite handle is open
    Open,
}

/// How the database file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Read-write, creating the file if missing
    #[default]
    ReadWriteCreate,
    /// Read-write, the file must exist
    ReadWrite,
    /// Read-only
    ReadOnly,
    /// Private in-memory database, the data source is ignored
    Memory,
}

impl OpenMode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "readwritecreate" => Some(Self::ReadWriteCreate),
            "readwrite" => Some(Self::ReadWrite),
            "readonly" => Some(Self::ReadOnly),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }

    fn flags(&self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenMode::ReadWriteCreate | OpenMode::Memory => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
            OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
        }
    }
}

/// Options parsed from a connection string.
///
/// A connection string is either a bare SQLite path or URI (`app.db`,
/// `:memory:`, `file:app.db?mode=ro`) or a `key=value;` list:
///
/// ```text
/// Data Source=app.db;Mode=ReadOnly;Busy Timeout=5000;Foreign Keys=true
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionOptions {
    /// Path or URI handed to SQLite
    pub data_source: String,
    pub mode: OpenMode,
    /// How long to wait on a locked database before failing
    pub busy_timeout: Option<Duration>,
    /// `PRAGMA foreign_keys` value applied on open
    pub foreign_keys: Option<bool>,
}

impl ConnectionOptions {
    /// Parses a connection string
    ///
    /// # Errors
    ///
    /// Returns `SqlUtilError::Config` for unknown keys, malformed pairs or
    /// invalid values.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let trimmed = connection_string.trim();
        let leading_key = trimmed.split_once('=').map(|(key, _)| normalize_key(key));
        if trimmed.starts_with("file:") || !leading_key.as_deref().is_some_and(is_known_key) {
            return Ok(ConnectionOptions {
                data_source: trimmed.to_string(),
                ..Default::default()
            });
        }

        let mut options = ConnectionOptions::default();
        for pair in trimmed.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                SqlUtilError::Config(format!("Malformed connection string segment '{}'", pair))
            })?;
            let key = normalize_key(key);
            let value = value.trim();

            match key.as_str() {
                "datasource" | "filename" => options.data_source = value.to_string(),
                "mode" => {
                    options.mode = OpenMode::parse(value).ok_or_else(|| {
                        SqlUtilError::Config(format!("Unknown open mode '{}'", value))
                    })?
                }
                "busytimeout" | "defaulttimeout" => {
                    let millis: u64 = value.parse().map_err(|_| {
                        SqlUtilError::Config(format!("Invalid busy timeout '{}'", value))
                    })?;
                    options.busy_timeout = Some(Duration::from_millis(millis));
                }
                "foreignkeys" => {
                    options.foreign_keys = Some(parse_bool(value).ok_or_else(|| {
                        SqlUtilError::Config(format!("Invalid foreign keys flag '{}'", value))
                    })?)
                }
                _ => {
                    return Err(SqlUtilError::Config(format!(
                        "Unknown connection string key '{}'",
                        key
                    )))
                }
            }
        }

        if options.data_source.is_empty() && options.mode != OpenMode::Memory {
            return Err(SqlUtilError::Config(
                "Connection string has no data source".to_string(),
            ));
        }

        Ok(options)
    }

    fn open(&self) -> Result<Connection> {
        let path = match self.mode {
            OpenMode::Memory => ":memory:",
            _ => self.data_source.as_str(),
        };
        let conn = Connection::open_with_flags(path, self.mode.flags())?;

        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout)?;
        }
        match self.foreign_keys {
            Some(true) => conn.execute_batch("PRAGMA foreign_keys = ON;")?,
            Some(false) => conn.execute_batch("PRAGMA foreign_keys = OFF;")?,
            None => {}
        }

        Ok(conn)
    }
}

const KNOWN_KEYS: [&str; 6] = [
    "datasource",
    "filename",
    "mode",
    "busytimeout",
    "defaulttimeout",
    "foreignkeys",
];

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn is_known_key(key: &str) -> bool {
    KNOWN_KEYS.contains(&key)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Counts the SQLite handles currently open through connections that share it.
///
/// Cloning shares the count.
#[derive(Debug, Clone, Default)]
pub struct ConnectionGauge {
    open: Arc<AtomicUsize>,
}

impl ConnectionGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections currently open
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> GaugeLease {
        self.open.fetch_add(1, Ordering::SeqCst);
        GaugeLease {
            open: Arc::clone(&self.open),
        }
    }
}

#[derive(Debug)]
struct GaugeLease {
    open: Arc<AtomicUsize>,
}

impl Drop for GaugeLease {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An open SQLite handle. Field order matters: the handle closes before the lease is returned.
#[derive(Debug)]
struct OpenSession {
    connection: Connection,
    _lease: GaugeLease,
}

/// A database connection that may be open or closed.
///
/// Created closed; opened explicitly with [`DbConnection::open`] or
/// implicitly by any execution mode. Dropping an open connection closes it.
#[derive(Debug)]
pub struct DbConnection {
    connection_string: String,
    options: ConnectionOptions,
    gauge: ConnectionGauge,
    session: Option<OpenSession>,
}

impl DbConnection {
    /// Creates a closed connection for the given connection string
    ///
    /// # Errors
    ///
    /// Returns `SqlUtilError::Config` if the connection string cannot be parsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlutil::{ConnectionState, DbConnection};
    ///
    /// let mut conn = DbConnection::new(":memory:")?;
    /// assert_eq!(conn.state(), ConnectionState::Closed);
    /// conn.open()?;
    /// assert_eq!(conn.state(), ConnectionState::Open);
    /// # Ok::<(), sqlutil::SqlUtilError>(())
    /// ```
    pub fn new(connection_string: &str) -> Result<Self> {
        Self::with_gauge(connection_string, ConnectionGauge::new())
    }

    /// Creates a closed connection whose open handle is counted by `gauge`
    pub fn with_gauge(connection_string: &str, gauge: ConnectionGauge) -> Result<Self> {
        Ok(DbConnection {
            connection_string: connection_string.to_string(),
            options: ConnectionOptions::parse(connection_string)?,
            gauge,
            session: None,
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        if self.session.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Opens the connection. A no-op if it is already open.
    pub fn open(&mut self) -> Result<()> {
        self.session_mut().map(|_| ())
    }

    /// Closes the connection. A no-op if it is already closed.
    ///
    /// # Errors
    ///
    /// Returns `SqlUtilError::Database` if SQLite refuses to close the handle;
    /// the connection then stays open and the close can be retried.
    pub fn close(&mut self) -> Result<()> {
        if let Some(OpenSession { connection, _lease }) = self.session.take() {
            debug!(data_source = %self.options.data_source, "closing connection");
            if let Err((connection, e)) = connection.close() {
                debug!(error = %e, "close refused, connection kept open");
                self.session = Some(OpenSession { connection, _lease });
                return Err(SqlUtilError::Database(e));
            }
        }
        Ok(())
    }

    /// Starts a transaction, opening the connection first if needed.
    ///
    /// The transaction rolls back when dropped without [`DbTransaction::commit`].
    pub fn begin(&mut self) -> Result<DbTransaction<'_>> {
        let session = self.session_mut()?;
        let tx = session.connection.transaction()?;
        trace!("transaction started");
        Ok(DbTransaction { tx })
    }

    /// Returns true if the connection is open and no transaction is active
    pub fn is_autocommit(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.connection.is_autocommit())
            .unwrap_or(false)
    }

    /// Returns the SQLite handle, opening the connection if it is closed
    pub(crate) fn open_handle(&mut self) -> Result<&Connection> {
        Ok(&self.session_mut()?.connection)
    }

    fn session_mut(&mut self) -> Result<&mut OpenSession> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                debug!(data_source = %self.options.data_source, mode = ?self.options.mode, "opening connection");
                let connection = self.options.open()?;
                OpenSession {
                    connection,
                    _lease: self.gauge.acquire(),
                }
            }
        };
        Ok(self.session.insert(session))
    }
}

/// A transaction owned by the caller.
///
/// Commands executed through it run on its connection; the façade never
/// commits or rolls it back.
pub struct DbTransaction<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl<'c> DbTransaction<'c> {
    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        trace!("transaction committed");
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        trace!("transaction rolled back");
        Ok(())
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_paths_are_data_sources() {
        let opts = ConnectionOptions::parse("app.db").unwrap();
        assert_eq!(opts.data_source, "app.db");
        assert_eq!(opts.mode, OpenMode::ReadWriteCreate);

        let uri = ConnectionOptions::parse("file:app.db?mode=ro&cache=shared").unwrap();
        assert_eq!(uri.data_source, "file:app.db?mode=ro&cache=shared");

        for path in ["/tmp/x/a=b.db", "reports/q=1;v=2.db", "  key = value.db "] {
            let opts = ConnectionOptions::parse(path).unwrap();
            assert_eq!(opts.data_source, path.trim());
            assert_eq!(opts.mode, OpenMode::ReadWriteCreate);
        }
    }

    #[test]
    fn test_path_with_equals_sign_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a=b.db");
        let path = path.to_string_lossy();

        let mut conn = DbConnection::new(&path).unwrap();
        let one: i64 = conn
            .open_handle()
            .unwrap()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(one, 1);
        conn.close().unwrap();
        assert!(dir.path().join("a=b.db").exists());
    }

    #[test]
    fn test_key_value_connection_string() {
        let opts = ConnectionOptions::parse(
            "Data Source=/tmp/app.db; Mode=ReadOnly; Busy Timeout=2500; Foreign Keys=true;",
        )
        .unwrap();
        assert_eq!(opts.data_source, "/tmp/app.db");
        assert_eq!(opts.mode, OpenMode::ReadOnly);
        assert_eq!(opts.busy_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(opts.foreign_keys, Some(true));

        let mem = ConnectionOptions::parse("mode=memory").unwrap();
        assert_eq!(mem.mode, OpenMode::Memory);
    }

    #[test]
    fn test_connection_string_errors() {
        for bad in [
            "Data Source=a.db;Password=secret",
            "Data Source=a.db;Mode=sometimes",
            "Data Source=a.db;Busy Timeout=soon",
            "Mode=ReadOnly",
            "Data Source=a.db;garbage",
        ] {
            match ConnectionOptions::parse(bad) {
                Err(SqlUtilError::Config(_)) => {}
                other => panic!("Expected Config error for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_open_close_lifecycle() {
        let gauge = ConnectionGauge::new();
        let mut conn = DbConnection::with_gauge(":memory:", gauge.clone()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(gauge.open_connections(), 0);

        conn.open().unwrap();
        conn.open().unwrap();
        assert!(conn.is_open());
        assert_eq!(gauge.open_connections(), 1);

        conn.close().unwrap();
        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(gauge.open_connections(), 0);
    }

    #[test]
    fn test_drop_releases_gauge() {
        let gauge = ConnectionGauge::new();
        {
            let mut conn = DbConnection::with_gauge(":memory:", gauge.clone()).unwrap();
            conn.open().unwrap();
            assert_eq!(gauge.open_connections(), 1);
        }
        assert_eq!(gauge.open_connections(), 0);
    }

    #[test]
    fn test_open_failure_leaves_connection_closed() {
        let gauge = ConnectionGauge::new();
        let mut conn =
            DbConnection::with_gauge("/nonexistent/path/database.db", gauge.clone()).unwrap();

        match conn.open() {
            Err(SqlUtilError::Database(_)) => {}
            other => panic!("Expected Database error, got {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(gauge.open_connections(), 0);
    }

    #[test]
    fn test_connection_options_applied() {
        let mut conn = DbConnection::new("Mode=Memory;Foreign Keys=on").unwrap();
        let fk: i64 = conn
            .open_handle()
            .unwrap()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut conn = DbConnection::new(":memory:").unwrap();
        conn.open().unwrap();
        conn.open_handle()
            .unwrap()
            .execute_batch("CREATE TABLE t (id INTEGER)")
            .unwrap();
        assert!(conn.is_autocommit());

        let tx = conn.begin().unwrap();
        tx.connection().execute("INSERT INTO t VALUES (1)", []).unwrap();
        tx.rollback().unwrap();

        let count: i64 = conn
            .open_handle()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let tx = conn.begin().unwrap();
        tx.connection().execute("INSERT INTO t VALUES (2)", []).unwrap();
        tx.commit().unwrap();
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_begin_opens_closed_connection() {
        let mut conn = DbConnection::new(":memory:").unwrap();
        let tx = conn.begin().unwrap();
        tx.commit().unwrap();
        assert!(conn.is_open());
    }
}
