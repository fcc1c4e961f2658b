/// Query Results Module
///
/// This module provides the two row-producing result shapes: the
/// materialized `DataTable` and the forward-only `RowCursor`.

use crate::core::db::command::{Command, Procedures};
use crate::core::db::connection::DbConnection;
use crate::core::db::value::Value;
use crate::core::{Result, SqlUtilError};
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

/// A row of values in projection order.
pub type Row = Vec<Value>;

/// An in-memory, fully drained query result.
///
/// Independent of any connection once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataTable {
    /// Table name
    pub name: String,
    /// Column names in projection order
    pub columns: Vec<String>,
    /// Rows of data
    pub rows: Vec<Row>,
}

impl DataTable {
    /// Creates a new DataTable from column names and row data
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        DataTable {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Finds a column by name, ignoring ASCII case
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Returns the value at `row` in the named column
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }
}

impl fmt::Display for DataTable {
    /// Renders a pipe-separated grid, one line per row.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(Value::to_string).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                cells
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let line = |values: &[String]| -> String {
            let padded: Vec<String> = values
                .iter()
                .zip(&widths)
                .map(|(value, width)| format!("{:<width$}", value, width = *width))
                .collect();
            padded.join(" | ").trim_end().to_string()
        };

        writeln!(f, "{}", line(&self.columns))?;
        let underline: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", underline.join("-|-"))?;
        for row in &cells {
            writeln!(f, "{}", line(row))?;
        }
        Ok(())
    }
}

pub(crate) fn read_row(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Row> {
    (0..width)
        .map(|i| row.get_ref(i).map(Value::from))
        .collect()
}

/// Drains a bound statement into a table
pub(crate) fn fill_table(
    stmt: &mut rusqlite::Statement<'_>,
    name: &str,
) -> rusqlite::Result<DataTable> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.raw_query();
    while let Some(row) = cursor.next()? {
        rows.push(read_row(row, width)?);
    }

    Ok(DataTable::new(name, columns, rows))
}

enum CursorMessage {
    Columns(Vec<String>),
    Row(Row),
    Failed(SqlUtilError),
}

/// A forward-only, single-pass cursor over a query's rows.
///
/// The cursor owns the connection it was opened on. Rows are produced one at
/// a time as the cursor is advanced; closing or dropping the cursor closes
/// the connection.
///
/// # Examples
///
/// ```
/// use sqlutil::{CommandKind, SqlUtil};
///
/// let util = SqlUtil::new(":memory:");
/// let mut cursor = util.execute_reader(":memory:", CommandKind::Text, "SELECT 1 AS one", &[])?;
/// assert_eq!(cursor.columns(), ["one"]);
/// assert!(cursor.next().is_some());
/// cursor.close()?;
/// # Ok::<(), sqlutil::SqlUtilError>(())
/// ```
pub struct RowCursor {
    columns: Vec<String>,
    receiver: Option<Receiver<CursorMessage>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl RowCursor {
    /// Executes `command` on `connection` and hands both to a new cursor.
    ///
    /// Returns only after the first row has been stepped, so preparation and
    /// execution errors are reported here. On error the connection is closed
    /// before this returns.
    pub(crate) fn open(
        connection: DbConnection,
        command: Command,
        procedures: Arc<Procedures>,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(0);

        let worker = thread::Builder::new()
            .name("sqlutil-cursor".to_string())
            .spawn(move || run_cursor(connection, command, procedures, sender))?;

        match receiver.recv() {
            Ok(CursorMessage::Columns(columns)) => Ok(RowCursor {
                columns,
                receiver: Some(receiver),
                worker: Some(worker),
            }),
            Ok(CursorMessage::Failed(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Ok(CursorMessage::Row(_)) | Err(_) => {
                let _ = worker.join();
                Err(SqlUtilError::Cursor(
                    "cursor stopped before producing a result".to_string(),
                ))
            }
        }
    }

    /// Column names in projection order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Closes the cursor and its connection.
    ///
    /// # Errors
    ///
    /// Returns the error SQLite reported while closing the connection, or
    /// `SqlUtilError::Cursor` if the worker stepping the statement panicked.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        // The worker notices the dropped receiver on its next send.
        drop(self.receiver.take());
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| SqlUtilError::Cursor("cursor worker panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Iterator for RowCursor {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv() {
            Ok(CursorMessage::Row(row)) => Some(Ok(row)),
            Ok(CursorMessage::Failed(e)) => Some(Err(e)),
            Ok(CursorMessage::Columns(_)) => Some(Err(SqlUtilError::Cursor(
                "unexpected column header".to_string(),
            ))),
            Err(_) => None,
        }
    }
}

impl fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowCursor")
            .field("columns", &self.columns)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            debug!(error = %e, "cursor release failed");
        }
    }
}

fn run_cursor(
    mut connection: DbConnection,
    mut command: Command,
    procedures: Arc<Procedures>,
    sender: SyncSender<CursorMessage>,
) -> Result<()> {
    let streamed = stream_rows(&mut connection, &mut command, &procedures, &sender);
    // Closed before the consumer sees the failure or the end of the rows.
    let closed = connection.close();
    if let Err(e) = streamed {
        let _ = sender.send(CursorMessage::Failed(e));
    }
    drop(sender);
    closed
}

fn stream_rows(
    connection: &mut DbConnection,
    command: &mut Command,
    procedures: &Procedures,
    sender: &SyncSender<CursorMessage>,
) -> Result<()> {
    let conn = connection.open_handle()?;
    let mut stmt = command.statement(conn, procedures)?;
    command.clear_parameters();

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.raw_query();

    let mut next = rows.next()?.map(|row| read_row(row, width)).transpose()?;
    if sender.send(CursorMessage::Columns(columns)).is_err() {
        return Ok(());
    }

    let mut produced = 0usize;
    while let Some(row) = next {
        if sender.send(CursorMessage::Row(row)).is_err() {
            trace!(produced, "cursor closed by consumer");
            return Ok(());
        }
        produced += 1;
        next = rows.next()?.map(|row| read_row(row, width)).transpose()?;
    }

    trace!(produced, "cursor exhausted");
    Ok(())
}
