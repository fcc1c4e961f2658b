use crate::core::db::command::Procedures;
use crate::core::{Result, SqlUtilError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Name of the connection string used as the façade's default target.
pub const DEFAULT_CONNECTION_NAME: &str = "DefaultConnection";

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Named connection strings
    #[serde(default)]
    pub connection_strings: BTreeMap<String, String>,
    /// Stored procedure bodies keyed by name
    #[serde(default)]
    pub procedures: BTreeMap<String, String>,
}

impl Config {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SqlUtilError::Config(e.to_string()))
    }

    /// Looks up a named connection string. An exact match wins; otherwise the
    /// name is matched ignoring ASCII case.
    pub fn connection_string(&self, name: &str) -> Result<&str> {
        self.connection_strings
            .get(name)
            .or_else(|| {
                self.connection_strings
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
            .ok_or_else(|| SqlUtilError::Config(format!("No connection string named '{}'", name)))
    }

    /// The `DefaultConnection` entry.
    pub fn default_connection_string(&self) -> Result<&str> {
        self.connection_string(DEFAULT_CONNECTION_NAME)
    }

    /// Builds the stored-procedure catalog.
    pub fn procedures(&self) -> Procedures {
        let mut procedures = Procedures::new();
        for (name, body) in &self.procedures {
            procedures.register(name, body.clone());
        }
        procedures
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = sqlutil::load_config("sqlutil.toml").expect("Failed to load config");
/// println!("{:?}", config.default_connection_string());
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    Config::from_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::command::CommandKind;

    const SAMPLE_CONFIG: &str = r#"
[connection_strings]
DefaultConnection = "Data Source=app.db;Busy Timeout=5000"
Reporting = "file:reports.db?mode=ro"

[procedures]
active_users = "SELECT id, name FROM users WHERE active = 1"
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = Config::from_toml_str(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(
            config.default_connection_string().unwrap(),
            "Data Source=app.db;Busy Timeout=5000"
        );
        assert_eq!(
            config.connection_string("reporting").unwrap(),
            "file:reports.db?mode=ro"
        );
        assert!(matches!(
            config.connection_string("Archive"),
            Err(SqlUtilError::Config(_))
        ));

        let procedures = config.procedures();
        assert_eq!(
            procedures
                .resolve(CommandKind::StoredProcedure, "ACTIVE_USERS")
                .unwrap(),
            "SELECT id, name FROM users WHERE active = 1"
        );
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.connection_strings.is_empty());
        assert!(config.procedures().is_empty());
        assert!(config.default_connection_string().is_err());
    }

    #[test]
    fn test_invalid_toml() {
        match Config::from_toml_str("[connection_strings\nDefaultConnection = 1") {
            Err(SqlUtilError::Config(_)) => {}
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_config_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), SAMPLE_CONFIG).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.connection_strings.len(), 2);

        let missing = load_config("/nonexistent/sqlutil.toml");
        assert!(matches!(missing, Err(SqlUtilError::Io(_))));
    }
}
