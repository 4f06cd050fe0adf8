//! Configuration: a small `serde`-deserializable file, overridable by CLI
//! flags with a "flags win" precedence established informally through
//! clap's `default_value`.

use std::path::Path;

use serde::Deserialize;

use crate::error::CoreResult;

fn default_migrations_dir() -> String {
    "migrations".to_string()
}

fn default_dialect() -> String {
    "default".to_string()
}

fn default_tx_mode() -> String {
    "file".to_string()
}

/// On-disk project configuration, loaded from `oxischema.toml`/`oxischema.json`
/// in the current directory if present.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: String,
    pub schema_dir: Option<String>,
    pub connection: Option<String>,
    pub schema: Option<String>,
    #[serde(default = "default_dialect")]
    pub dialect: String,
    #[serde(default = "default_tx_mode")]
    pub tx_mode: String,
    pub log_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            migrations_dir: default_migrations_dir(),
            schema_dir: None,
            connection: None,
            schema: None,
            dialect: default_dialect(),
            tx_mode: default_tx_mode(),
            log_file: None,
        }
    }
}

impl Config {
    /// Reads `oxischema.toml`, falling back to `oxischema.json`, falling
    /// back to built-in defaults when neither file exists.
    pub fn load() -> CoreResult<Config> {
        if Path::new("oxischema.toml").exists() {
            let text = std::fs::read_to_string("oxischema.toml")?;
            return toml::from_str(&text)
                .map_err(|e| crate::error::CoreError::Other(format!("oxischema.toml: {e}")));
        }
        if Path::new("oxischema.json").exists() {
            let text = std::fs::read_to_string("oxischema.json")?;
            return serde_json::from_str(&text)
                .map_err(|e| crate::error::CoreError::Other(format!("oxischema.json: {e}")));
        }
        Ok(Config::default())
    }

    /// Applies a CLI override only when the caller actually passed it.
    pub fn with_migrations_dir(mut self, dir: Option<String>) -> Self {
        if let Some(dir) = dir {
            self.migrations_dir = dir;
        }
        self
    }

    pub fn with_connection(mut self, connection: Option<String>) -> Self {
        if connection.is_some() {
            self.connection = connection;
        }
        self
    }

    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        if schema.is_some() {
            self.schema = schema;
        }
        self
    }

    pub fn with_tx_mode(mut self, tx_mode: Option<String>) -> Self {
        if let Some(tx_mode) = tx_mode {
            self.tx_mode = tx_mode;
        }
        self
    }

    pub fn tx_mode(&self) -> crate::executor::TxMode {
        parse_tx_mode(&self.tx_mode)
    }

    pub fn name_dialect(&self) -> Box<dyn crate::directory::dialects::NameDialect> {
        match self.dialect.as_str() {
            "flyway" => Box::new(crate::directory::dialects::FlywayDialect),
            "golang-migrate" => Box::new(crate::directory::dialects::GolangMigrateDialect),
            "goose" => Box::new(crate::directory::dialects::GooseDialect),
            _ => Box::new(crate::directory::dialects::DefaultDialect),
        }
    }
}

/// Parses the `--tx-mode`/config string form, defaulting to `File` for any
/// unrecognized value rather than rejecting it outright.
pub fn parse_tx_mode(s: &str) -> crate::executor::TxMode {
    match s {
        "none" => crate::executor::TxMode::None,
        "all" => crate::executor::TxMode::All,
        _ => crate::executor::TxMode::File,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file_present() {
        let dir = tempfile::tempdir().unwrap();
        let prev = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let config = Config::load().unwrap();
        std::env::set_current_dir(prev).unwrap();
        assert_eq!(config.migrations_dir, "migrations");
        assert_eq!(config.dialect, "default");
    }

    #[test]
    fn cli_override_wins_over_default() {
        let config = Config::default().with_migrations_dir(Some("custom/".to_string()));
        assert_eq!(config.migrations_dir, "custom/");
    }
}
