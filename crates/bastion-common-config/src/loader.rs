//! Configuration file loading and parsing.

use crate::env::vars;
use crate::types::{BastionConfig, RuntimeEnvironment};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },
}

/// Configuration loader.
pub struct ConfigLoader {
    base_path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for the given project directory.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            base_path: project_dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the config file this loader reads.
    pub fn config_path(&self) -> PathBuf {
        self.base_path.join(".bastion/config.yaml")
    }

    /// Load configuration from `.bastion/config.yaml`, then apply environment overrides.
    pub fn load(&self) -> Result<BastionConfig, ConfigError> {
        let config_path = self.config_path();

        let mut config = if config_path.exists() {
            self.read_file(&config_path)?
        } else {
            BastionConfig::default()
        };

        apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
        validate(&config)?;
        Ok(config)
    }

    /// Load an explicit config file. Unlike [`load`](Self::load), a missing file is an error.
    pub fn load_file(path: impl AsRef<Path>) -> Result<BastionConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let loader = Self::new(path.parent().unwrap_or_else(|| Path::new(".")));
        let mut config = loader.read_file(path)?;
        apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
        validate(&config)?;
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> Result<BastionConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let expanded = self.expand_env_vars(&contents)?;

        serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })
    }

    /// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
    fn expand_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();

        for cap in re.captures_iter(content) {
            let full_match = cap.get(0).unwrap().as_str();
            let var_name = &cap[1];
            let default = cap.get(2).map(|m| m.as_str());

            let value = match std::env::var(var_name) {
                Ok(v) => v,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        return Err(ConfigError::EnvVarNotFound {
                            var: var_name.to_string(),
                        })
                    }
                },
            };

            result = result.replace(full_match, &value);
        }

        Ok(result)
    }

    /// Save configuration to file.
    pub fn save(&self, config: &BastionConfig) -> Result<(), ConfigError> {
        let config_dir = self.base_path.join(".bastion");
        std::fs::create_dir_all(&config_dir)?;

        let yaml = serde_yaml::to_string(config).map_err(|e| ConfigError::ParseError {
            line: None,
            message: e.to_string(),
        })?;

        std::fs::write(self.config_path(), yaml)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_default())
    }
}

/// Apply environment overrides on top of file values.
///
/// `lookup` resolves a variable name; [`ConfigLoader::load`] passes `std::env::var`.
pub fn apply_env_overrides<F>(config: &mut BastionConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup(vars::BASTION_ENV) {
        config.environment =
            RuntimeEnvironment::parse(&env).ok_or_else(|| ConfigError::ValidationError {
                message: format!("{} has unknown value '{}'", vars::BASTION_ENV, env),
            })?;
    }

    let db = &mut config.database;
    if let Some(url) = lookup(vars::DATABASE_URL) {
        db.url = Some(url);
    }
    if let Some(host) = lookup(vars::BASTION_DB_HOST) {
        db.host = host;
    }
    if let Some(port) = lookup(vars::BASTION_DB_PORT) {
        db.port = port.parse().map_err(|_| ConfigError::ValidationError {
            message: format!("{} must be a port number, got '{}'", vars::BASTION_DB_PORT, port),
        })?;
    }
    if let Some(name) = lookup(vars::BASTION_DB_NAME) {
        db.database = name;
    }
    if let Some(user) = lookup(vars::BASTION_DB_USER) {
        db.user = user;
    }
    if let Some(password) = lookup(vars::BASTION_DB_PASSWORD) {
        db.password = Some(password);
    }
    if let Some(schema) = lookup(vars::BASTION_DB_SCHEMA) {
        db.schema = Some(schema);
    }

    if let Some(email) = lookup(vars::BASTION_ADMIN_EMAIL) {
        config.bootstrap.admin_email = email;
    }
    if let Some(password) = lookup(vars::BASTION_ADMIN_PASSWORD) {
        config.bootstrap.admin_password = Some(password);
    }

    Ok(())
}

/// Validate configuration values.
pub fn validate(config: &BastionConfig) -> Result<(), ConfigError> {
    let db = &config.database;

    if db.max_connections == 0 {
        return Err(ConfigError::ValidationError {
            message: "database.max_connections must be at least 1".to_string(),
        });
    }

    if db.min_connections > db.max_connections {
        return Err(ConfigError::ValidationError {
            message: "database.min_connections cannot exceed database.max_connections".to_string(),
        });
    }

    if db.url.is_none() && (db.database.trim().is_empty() || db.user.trim().is_empty()) {
        return Err(ConfigError::ValidationError {
            message: "database.database and database.user are required when database.url is not set"
                .to_string(),
        });
    }

    if db.metrics_buffer_size == 0 {
        return Err(ConfigError::ValidationError {
            message: "database.metrics_buffer_size must be at least 1".to_string(),
        });
    }

    if db.connect_retries == 0 {
        return Err(ConfigError::ValidationError {
            message: "database.connect_retries must be at least 1".to_string(),
        });
    }

    if let Some(schema) = &db.schema {
        let valid = !schema.is_empty()
            && schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ConfigError::ValidationError {
                message: format!("database.schema '{}' must be a plain identifier", schema),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SslMode;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults_when_no_file() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        let config = loader.read_or_default_for_test();
        validate(&config).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.max_connections, 10);
        assert!(config.migrations.advisory_lock);
    }

    impl ConfigLoader {
        fn read_or_default_for_test(&self) -> BastionConfig {
            let path = self.config_path();
            if path.exists() {
                self.read_file(&path).unwrap()
            } else {
                BastionConfig::default()
            }
        }
    }

    #[test]
    fn test_load_config_from_yaml_file() {
        let dir = tempdir().unwrap();
        let bastion_dir = dir.path().join(".bastion");
        fs::create_dir_all(&bastion_dir).unwrap();

        let config_content = r#"
environment: staging
database:
  host: db.internal
  port: 6543
  database: app
  user: app_user
  ssl:
    mode: verify-ca
  min_connections: 2
  max_connections: 5
  max_uses: 7500
migrations:
  fail_on_checksum_mismatch: true
bootstrap:
  create_sample_data: true
"#;

        fs::write(bastion_dir.join("config.yaml"), config_content).unwrap();

        let loader = ConfigLoader::new(dir.path());
        let config = loader.read_or_default_for_test();

        assert_eq!(config.environment, RuntimeEnvironment::Staging);
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.ssl.mode(), SslMode::VerifyCa);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.max_uses, Some(7500));
        assert!(config.migrations.fail_on_checksum_mismatch);
        assert!(config.bootstrap.create_sample_data);

        // Unspecified values use defaults
        assert_eq!(config.database.slow_query_threshold_ms, 1_000);
        assert!(config.migrations.record_failures);
        assert_eq!(config.bootstrap.tenant_slug, "default");
    }

    #[test]
    fn test_env_var_default() {
        let loader = ConfigLoader::new(".");
        let result = loader
            .expand_env_vars("password: ${BASTION_NONEXISTENT_PW:-secret}")
            .unwrap();
        assert_eq!(result, "password: secret");
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("BASTION_LOADER_TEST_HOST", "pg.local");
        let loader = ConfigLoader::new(".");
        let result = loader.expand_env_vars("host: ${BASTION_LOADER_TEST_HOST}").unwrap();
        assert_eq!(result, "host: pg.local");
        std::env::remove_var("BASTION_LOADER_TEST_HOST");
    }

    #[test]
    fn test_env_var_missing_error() {
        let loader = ConfigLoader::new(".");
        let result = loader.expand_env_vars("key: ${BASTION_MISSING_VAR}");
        match result.unwrap_err() {
            ConfigError::EnvVarNotFound { var } => assert_eq!(var, "BASTION_MISSING_VAR"),
            _ => panic!("Expected EnvVarNotFound error"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (vars::BASTION_ENV, "production"),
            (vars::BASTION_DB_HOST, "override-host"),
            (vars::BASTION_DB_PORT, "15432"),
            (vars::BASTION_DB_PASSWORD, "pw"),
            (vars::BASTION_ADMIN_EMAIL, "root@corp.test"),
        ]
        .into_iter()
        .collect();

        let mut config = BastionConfig::default();
        apply_env_overrides(&mut config, |var| env.get(var).map(|v| v.to_string())).unwrap();

        assert!(config.environment.is_production());
        assert_eq!(config.database.host, "override-host");
        assert_eq!(config.database.port, 15432);
        assert_eq!(config.database.password.as_deref(), Some("pw"));
        assert_eq!(config.bootstrap.admin_email, "root@corp.test");
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut config = BastionConfig::default();
        let result = apply_env_overrides(&mut config, |var| {
            (var == vars::BASTION_DB_PORT).then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = BastionConfig::default();
        config.database.max_connections = 0;
        match validate(&config).unwrap_err() {
            ConfigError::ValidationError { message } => assert!(message.contains("max_connections")),
            _ => panic!("Expected ValidationError"),
        }

        let mut config = BastionConfig::default();
        config.database.min_connections = 20;
        config.database.max_connections = 5;
        match validate(&config).unwrap_err() {
            ConfigError::ValidationError { message } => assert!(message.contains("min_connections")),
            _ => panic!("Expected ValidationError"),
        }

        let mut config = BastionConfig::default();
        config.database.schema = Some("bad; drop".to_string());
        assert!(validate(&config).is_err());

        let mut config = BastionConfig::default();
        config.database.metrics_buffer_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_parse_error_with_line_number() {
        let dir = tempdir().unwrap();
        let bastion_dir = dir.path().join(".bastion");
        fs::create_dir_all(&bastion_dir).unwrap();

        let bad_yaml = r#"
database:
  host: localhost
  invalid_yaml: [unclosed
"#;

        fs::write(bastion_dir.join("config.yaml"), bad_yaml).unwrap();

        let loader = ConfigLoader::new(dir.path());
        match loader.read_file(&loader.config_path()).unwrap_err() {
            ConfigError::ParseError { line, .. } => assert!(line.is_some()),
            _ => panic!("Expected ParseError with line number"),
        }
    }

    #[test]
    fn test_load_file_missing() {
        let dir = tempdir().unwrap();
        let result = ConfigLoader::load_file(dir.path().join("nope.yaml"));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_save_config() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());

        let mut config = BastionConfig::default();
        config.database.host = "saved-host".to_string();
        config.database.max_connections = 42;

        loader.save(&config).unwrap();
        assert!(loader.config_path().exists());

        let loaded = loader.read_or_default_for_test();
        assert_eq!(loaded.database.host, "saved-host");
        assert_eq!(loaded.database.max_connections, 42);
    }
}
