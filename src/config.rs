//! Application configuration module
//!
//! Layers an optional TOML file, `STATDIFF_*` environment variables and the
//! command line into one immutable [`Settings`] value.

use crate::catalog::CounterCatalog;
use crate::cli::Cli;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 1,
            require_tls: false,
        }
    }
}

impl DatabaseConfig {
    /// Parse a DATABASE_URL connection string (postgresql://...)
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        if parsed.scheme() != "postgres" && parsed.scheme() != "postgresql" {
            return Err(ConfigError::InvalidValue(format!(
                "Unsupported database scheme '{}'. Use postgres://",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let user = if parsed.username().is_empty() {
            "postgres".to_string()
        } else {
            decode_component(parsed.username(), "user")?
        };

        let password = match parsed.password() {
            Some(password) => decode_component(password, "password")?,
            None => String::new(),
        };

        let require_tls = parsed
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && (v == "require" || v == "verify-full"));

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(5432),
            user,
            password,
            database,
            require_tls,
            ..Self::default()
        })
    }

    /// Connection string with the password masked, for logs
    pub fn to_display_string(&self) -> String {
        format!(
            "postgres://{}:****@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

/// Userinfo in a URL is percent-encoded
fn decode_component(raw: &str, what: &str) -> Result<String, ConfigError> {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| {
            ConfigError::InvalidValue(format!("DATABASE_URL {} is not valid UTF-8", what))
        })
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct DatabaseSection {
    url: Option<String>,
    max_pool_size: usize,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            max_pool_size: DatabaseConfig::default().max_pool_size,
        }
    }
}

/// Shape of the configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    database: DatabaseSection,
    storage: StorageConfig,
    catalog: CounterCatalog,
}

/// Values given on the command line, highest precedence
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub snapshot_dir: Option<PathBuf>,
}

impl From<&Cli> for Overrides {
    fn from(cli: &Cli) -> Self {
        Self {
            database_url: cli.database_url.clone(),
            snapshot_dir: cli.snapshot_dir.clone(),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub catalog: CounterCatalog,
}

/// `STATDIFF_<SECTION>__<KEY>`, e.g. `STATDIFF_STORAGE__DIR`
fn env_source() -> config::Environment {
    config::Environment::with_prefix("STATDIFF")
        .prefix_separator("_")
        .separator("__")
}

impl Settings {
    /// Load settings for a CLI invocation
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let env_url = std::env::var("DATABASE_URL").ok();
        Self::load(&cli.config, env_url, Overrides::from(cli))
    }

    /// Merge file, environment and overrides. `env_url` is the DATABASE_URL
    /// value, if any.
    pub fn load(
        config_file: &Path,
        env_url: Option<String>,
        overrides: Overrides,
    ) -> Result<Self, ConfigError> {
        Self::load_with_env(config_file, env_source(), env_url, overrides)
    }

    fn load_with_env(
        config_file: &Path,
        env: config::Environment,
        env_url: Option<String>,
        overrides: Overrides,
    ) -> Result<Self, ConfigError> {
        let file: FileSettings = config::Config::builder()
            .add_source(
                config::File::from(config_file.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(env)
            .build()?
            .try_deserialize()?;

        let url = overrides
            .database_url
            .or(env_url)
            .or(file.database.url)
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        if file.database.max_pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "database.max_pool_size must be at least 1".to_string(),
            ));
        }

        let database = DatabaseConfig {
            max_pool_size: file.database.max_pool_size,
            ..DatabaseConfig::from_url(&url)?
        };

        let storage = match overrides.snapshot_dir {
            Some(dir) => StorageConfig { dir },
            None => file.storage,
        };

        Ok(Self {
            database,
            storage,
            catalog: file.catalog,
        })
    }
}
