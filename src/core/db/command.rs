/// Command Module
///
/// This module describes a command before it runs: its kind, its text, and
/// the ordered bind parameters. It also owns the step shared by every
/// execution mode, turning a command into a bound SQLite statement.

use crate::core::db::value::Value;
use crate::core::{Result, SqlUtilError};
use rusqlite::{Connection, Statement};
use std::collections::HashMap;
use tracing::trace;

/// Selects how command text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// The text is literal SQL
    #[default]
    Text,
    /// The text names a procedure registered in a `Procedures` catalog
    StoredProcedure,
}

/// Direction of a bind parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Input,
    InputOutput,
    Output,
    ReturnValue,
}

impl Direction {
    /// Whether the parameter carries a value into the statement
    pub fn is_input(&self) -> bool {
        matches!(self, Direction::Input | Direction::InputOutput)
    }
}

/// A named bind parameter.
///
/// The name may carry a SQLite prefix (`:id`, `@id`, `$id`) or none (`id`).
/// An empty name binds purely by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub direction: Direction,
}

impl Parameter {
    /// Creates an input parameter
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Parameter {
            name: name.into(),
            value: value.into(),
            direction: Direction::Input,
        }
    }

    /// Creates an unnamed input parameter bound by position
    pub fn positional(value: impl Into<Value>) -> Self {
        Self::new("", value)
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// Named SQL bodies invoked by `CommandKind::StoredProcedure` commands.
///
/// Lookup ignores ASCII case.
#[derive(Debug, Clone, Default)]
pub struct Procedures {
    bodies: HashMap<String, String>,
}

impl Procedures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a procedure body
    pub fn register(&mut self, name: impl AsRef<str>, body: impl Into<String>) {
        self.bodies
            .insert(name.as_ref().to_ascii_lowercase(), body.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.bodies
            .get(&name.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Resolves command text to the SQL that will be prepared
    ///
    /// # Errors
    ///
    /// Returns `SqlUtilError::UnknownProcedure` for an unregistered name.
    pub fn resolve<'a>(&'a self, kind: CommandKind, text: &'a str) -> Result<&'a str> {
        match kind {
            CommandKind::Text => Ok(text),
            CommandKind::StoredProcedure => self
                .get(text)
                .ok_or_else(|| SqlUtilError::UnknownProcedure(text.trim().to_string())),
        }
    }
}

/// A command being assembled for one call.
///
/// Built fresh for every execution and cleared afterwards, so parameters
/// never leak into an unrelated call.
#[derive(Debug, Clone, Default)]
pub struct Command {
    kind: CommandKind,
    text: String,
    parameters: Vec<Parameter>,
    transactional: bool,
}

impl Command {
    pub fn new(kind: CommandKind, text: impl Into<String>) -> Self {
        Command {
            kind,
            text: text.into(),
            parameters: Vec::new(),
            transactional: false,
        }
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Marks the command as running inside a caller-supplied transaction
    pub fn set_transactional(&mut self, transactional: bool) {
        self.transactional = transactional;
    }

    /// Appends parameters in input order. `None` adds nothing.
    pub fn add_parameters(&mut self, parameters: Option<&[Parameter]>) {
        if let Some(parameters) = parameters {
            self.parameters.extend(parameters.iter().cloned());
        }
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    /// Prepares the command on `conn` and binds its parameters
    ///
    /// # Errors
    ///
    /// Returns `SqlUtilError::UnknownProcedure` if a stored-procedure name is not
    /// registered, `SqlUtilError::Database` if SQLite rejects the statement or a
    /// value, and `SqlUtilError::Binding` if a parameter cannot be placed.
    pub fn statement<'c>(
        &self,
        conn: &'c Connection,
        procedures: &Procedures,
    ) -> Result<Statement<'c>> {
        let sql = procedures.resolve(self.kind, &self.text)?;
        trace!(kind = ?self.kind, transactional = self.transactional, params = self.parameters.len(), "preparing command");

        let mut stmt = conn.prepare(sql)?;
        bind_parameters(&mut stmt, &self.parameters)?;
        Ok(stmt)
    }
}

/// Binds parameters to a prepared statement.
///
/// Parameters whose name matches a placeholder bind there first. The rest
/// fill the slots still free, in input order, so `WHERE id = ?` takes `id`
/// and `? AND name = :name` takes `[name, id]`.
///
/// # Errors
///
/// Returns `SqlUtilError::Binding` for a non-input parameter, for two
/// parameters naming the same placeholder, and when no free slot is left.
pub fn bind_parameters(stmt: &mut Statement<'_>, parameters: &[Parameter]) -> Result<()> {
    let slots = stmt.parameter_count();
    let mut bound = vec![false; slots];
    let mut unplaced = Vec::new();

    for param in parameters {
        if !param.direction.is_input() {
            return Err(SqlUtilError::Binding(format!(
                "Parameter '{}' has direction {:?}; only input parameters can be bound",
                param.name, param.direction
            )));
        }

        match named_index(stmt, &param.name)? {
            Some(index) if bound[index - 1] => {
                return Err(SqlUtilError::Binding(format!(
                    "Placeholder {} is bound more than once (parameter '{}')",
                    index, param.name
                )))
            }
            Some(index) => {
                stmt.raw_bind_parameter(index, &param.value)?;
                bound[index - 1] = true;
            }
            None => unplaced.push(param),
        }
    }

    let mut free = (1..=slots).filter(|index| !bound[index - 1]);
    for param in unplaced {
        let index = free.next().ok_or_else(|| {
            SqlUtilError::Binding(format!(
                "No free placeholder for parameter '{}' (statement has {})",
                param.name, slots
            ))
        })?;
        stmt.raw_bind_parameter(index, &param.value)?;
    }

    Ok(())
}

fn named_index(stmt: &Statement<'_>, name: &str) -> Result<Option<usize>> {
    if name.is_empty() {
        return Ok(None);
    }
    if name.starts_with([':', '@', '$']) {
        return Ok(stmt.parameter_index(name)?);
    }
    for prefix in [':', '@', '$'] {
        if let Some(index) = stmt.parameter_index(&format!("{}{}", prefix, name))? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}
