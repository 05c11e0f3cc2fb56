//! Configuration validation.

use super::Config;
use crate::error::{ReplicateError, Result};

/// SSL modes that can be honored without TLS support on the target side.
const SSL_MODES: &[&str] = &["disable", "prefer"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(ReplicateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(ReplicateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(ReplicateError::Config("source.user is required".into()));
    }
    if config.source.schema.is_empty() {
        return Err(ReplicateError::Config("source.schema is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(ReplicateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(ReplicateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(ReplicateError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(ReplicateError::Config("target.schema is required".into()));
    }
    if !SSL_MODES.contains(&config.target.ssl_mode.as_str()) {
        return Err(ReplicateError::Config(format!(
            "target.ssl_mode must be one of {}, got '{}'",
            SSL_MODES.join(", "),
            config.target.ssl_mode
        )));
    }

    // Cannot replicate into the source itself
    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(ReplicateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    if config.replication.batch_size == 0 {
        return Err(ReplicateError::Config(
            "replication.batch_size must be at least 1".into(),
        ));
    }
    if config.replication.schema_progress_file == config.replication.data_progress_file {
        return Err(ReplicateError::Config(
            "schema and data progress files must differ".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReplicationConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                host: "localhost".to_string(),
                database: "source_db".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                ..SourceConfig::default()
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                database: "target_db".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                ..TargetConfig::default()
            },
            replication: ReplicationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("source.host"));
    }

    #[test]
    fn test_missing_target_user() {
        let mut config = valid_config();
        config.target.user = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unsupported_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "verify-full".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("ssl_mode"));
    }

    #[test]
    fn test_same_endpoint_rejected() {
        let mut config = valid_config();
        config.target.port = config.source.port;
        config.target.database = config.source.database.clone();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.replication.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_shared_progress_file_rejected() {
        let mut config = valid_config();
        config.replication.data_progress_file = config.replication.schema_progress_file.clone();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let config = valid_config();
        let debug = format!("{:?}", config.source);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("\"password\""));
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "hunter2".to_string();
        let debug = format!("{:?}", config.target);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
