//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{ReplicateError, Result};
use crate::state::Phase;
use std::path::{Path, PathBuf};
use tracing::debug;

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplicateError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_with_env(&content, |key| std::env::var(key).ok())
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML, apply overrides from `lookup`, then validate.
    pub fn from_yaml_with_env<F>(yaml: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.apply_env_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Override file values with environment variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MSSQL_HOST") {
            self.source.host = v;
        }
        if let Some(v) = get("MSSQL_PORT") {
            self.source.port = parse_number("MSSQL_PORT", &v)?;
        }
        if let Some(v) = get("MSSQL_DATABASE") {
            self.source.database = v;
        }
        if let Some(v) = get("MSSQL_USER") {
            self.source.user = v;
        }
        if let Some(v) = get("MSSQL_PASSWORD") {
            self.source.password = v;
        }

        if let Some(v) = get("POSTGRES_HOST") {
            self.target.host = v;
        }
        if let Some(v) = get("POSTGRES_PORT") {
            self.target.port = parse_number("POSTGRES_PORT", &v)?;
        }
        if let Some(v) = get("POSTGRES_DATABASE") {
            self.target.database = v;
        }
        if let Some(v) = get("POSTGRES_USER") {
            self.target.user = v;
        }
        if let Some(v) = get("POSTGRES_PASSWORD") {
            self.target.password = v;
        }
        if let Some(v) = get("POSTGRES_SCHEMA") {
            self.target.schema = v;
        }

        if let Some(v) = get("SYNC_BATCH_SIZE") {
            self.replication.batch_size = parse_number("SYNC_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("UUID_COLUMNS") {
            self.replication.uuid_columns = split_list(&v);
        }
        if let Some(v) = get("JSON_COLUMNS") {
            self.replication.json_columns = split_list(&v);
        }
        if let Some(v) = get("CDC_ENABLED") {
            self.replication.prefer_cdc_tables = v.trim().eq_ignore_ascii_case("true");
        }

        debug!("Effective configuration: {:?}", self);
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Progress file for a phase.
    pub fn progress_file(&self, phase: Phase) -> &PathBuf {
        match phase {
            Phase::Schema => &self.replication.schema_progress_file,
            Phase::Data => &self.replication.data_progress_file,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ReplicateError::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
source:
  host: mssql.local
  database: Sales
  user: sa
  password: secret
target:
  host: pg.local
  database: sales
  user: postgres
  password: secret
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 1433);
        assert_eq!(config.source.schema, "dbo");
        assert_eq!(config.source.encrypt, "true");
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "dbo");
        assert_eq!(config.target.ssl_mode, "prefer");
        assert_eq!(config.replication.batch_size, 1000);
        assert!(config.replication.prefer_cdc_tables);
        assert!(config.replication.truncate);
        assert_eq!(
            config.progress_file(Phase::Schema),
            &PathBuf::from("schema_progress.json")
        );
        assert_eq!(
            config.progress_file(Phase::Data),
            &PathBuf::from("data_progress.json")
        );
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config = Config::from_yaml_with_env(
            MINIMAL,
            env(&[
                ("MSSQL_HOST", "other-mssql"),
                ("POSTGRES_PORT", "6543"),
                ("POSTGRES_SCHEMA", "public"),
                ("SYNC_BATCH_SIZE", "250"),
                ("UUID_COLUMNS", "ExternalRef, RowGuid ,"),
                ("JSON_COLUMNS", "Payload"),
                ("CDC_ENABLED", "false"),
            ]),
        )
        .unwrap();

        assert_eq!(config.source.host, "other-mssql");
        assert_eq!(config.target.port, 6543);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.replication.batch_size, 250);
        assert_eq!(config.replication.uuid_columns, vec!["ExternalRef", "RowGuid"]);
        assert_eq!(config.replication.json_columns, vec!["Payload"]);
        assert!(!config.replication.prefer_cdc_tables);
    }

    #[test]
    fn test_env_only_configuration() {
        let config = Config::from_yaml_with_env(
            "{}",
            env(&[
                ("MSSQL_HOST", "mssql"),
                ("MSSQL_DATABASE", "Sales"),
                ("MSSQL_USER", "sa"),
                ("POSTGRES_HOST", "postgres"),
                ("POSTGRES_DATABASE", "sales"),
                ("POSTGRES_USER", "postgres"),
            ]),
        )
        .unwrap();
        assert_eq!(config.source.database, "Sales");
        assert_eq!(config.target.user, "postgres");
    }

    #[test]
    fn test_bad_numeric_override() {
        let err = Config::from_yaml_with_env(MINIMAL, env(&[("SYNC_BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("SYNC_BATCH_SIZE"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ReplicateError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.target.database, "sales");
    }
}
