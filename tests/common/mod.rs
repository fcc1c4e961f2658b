//! Shared fixtures for the integration tests.
//!
//! Every fixture is backed by a database file in its own temporary
//! directory, so separate connections opened by the façade see the same data.

#![allow(dead_code)]

use rusqlite::Connection;
use sqlutil::SqlUtil;
use std::sync::Once;
use tempfile::TempDir;

static LOGGING: Once = Once::new();

/// Routes `tracing` output through the test harness
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Isolated database test fixture
pub struct DatabaseFixture {
    _dir: TempDir,
    pub path: String,
    pub util: SqlUtil,
}

impl DatabaseFixture {
    /// Creates an empty database file and a façade defaulting to it
    pub fn new() -> Self {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.db").to_string_lossy().into_owned();
        Connection::open(&path).unwrap();

        DatabaseFixture {
            util: SqlUtil::new(path.clone()),
            path,
            _dir: dir,
        }
    }

    /// Creates table `t (id INTEGER PRIMARY KEY, name TEXT)` holding `rows`
    pub fn with_rows(rows: &[(i64, &str)]) -> Self {
        let fixture = Self::new();
        let conn = fixture.raw();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        for (id, name) in rows {
            conn.execute(
                "INSERT INTO t (id, name) VALUES (?1, ?2)",
                rusqlite::params![id, name],
            )
            .unwrap();
        }
        fixture
    }

    /// A direct rusqlite connection, bypassing the façade
    pub fn raw(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    pub fn count(&self) -> i64 {
        self.raw()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }
}
