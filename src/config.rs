//! Configuration handling for the connection registry.
//!
//! Connection settings are read from environment-style key/value pairs
//! (process environment plus an optional `.env` file) or from a JSON document:
//!
//! ```text
//! DB_DEFAULT_CONNECTION=default
//! DB_ECHO=false
//! DB_CONNECTIONS__DEFAULT__HOST=localhost
//! DB_CONNECTIONS__DEFAULT__USERNAME=app
//! DB_CONNECTIONS__DEFAULT__PASSWORD=secret
//! DB_CONNECTIONS__DEFAULT__DATABASE=appdb
//! DB_CONNECTIONS__ADMIN__IS_SUPERUSER=true
//! ```
//!
//! The command line of the `pg-registry` binary is parsed with clap.

use crate::error::{RegistryError, RegistryResult};
use crate::models::{ConfigError, ConnectionConfig, RawConnectionConfig, parse_bool};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_PREFIX: &str = "db_";
pub const NESTED_DELIMITER: &str = "__";
pub const DEFAULT_CONNECTION_NAME: &str = "default";
pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Settings for every named connection plus the global defaults.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Named connections. Iteration order (by name) is the configuration order.
    pub connections: BTreeMap<String, ConnectionConfig>,
    /// Connection used when a caller does not name one.
    pub default_connection: String,
    /// Global statement logging, overridable per connection.
    pub echo: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            connections: BTreeMap::new(),
            default_connection: DEFAULT_CONNECTION_NAME.to_string(),
            echo: false,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    connections: BTreeMap<String, RawConnectionConfig>,
    default_connection: Option<String>,
    echo: Option<bool>,
}

impl RegistrySettings {
    /// Build settings from already validated connections.
    pub fn new(connections: impl IntoIterator<Item = ConnectionConfig>) -> Self {
        Self {
            connections: connections
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_default_connection(mut self, name: impl Into<String>) -> Self {
        self.default_connection = name.into();
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Load settings from `./.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_file(Path::new(DEFAULT_ENV_FILE))
    }

    /// Load settings from the given env file (if present) and the process environment.
    ///
    /// Process environment variables take precedence over the file.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        let mut vars: Vec<(String, String)> = Vec::new();

        match dotenvy::from_path_iter(path) {
            Ok(iter) => {
                for item in iter {
                    let pair = item.map_err(|e| {
                        ConfigError::source(path.display().to_string(), e.to_string())
                    })?;
                    vars.push(pair);
                }
                debug!(path = %path.display(), count = vars.len(), "Loaded env file");
            }
            Err(e) if e.not_found() => {
                debug!(path = %path.display(), "No env file found");
            }
            Err(e) => {
                return Err(ConfigError::source(
                    path.display().to_string(),
                    e.to_string(),
                ));
            }
        }

        // Non UTF-8 variables cannot hold DB_* settings; skip them
        vars.extend(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        );
        Self::from_vars(vars)
    }

    /// Parse settings from environment-style key/value pairs.
    ///
    /// Keys are case-insensitive; connection names are lowercased. Keys
    /// outside the `DB_` prefix and unknown connection fields are ignored.
    /// Later pairs override earlier ones.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut raw = RawSettings::default();

        for (key, value) in vars {
            let key = key.as_ref().to_ascii_lowercase();
            let value = value.as_ref();
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match rest {
                "default_connection" => raw.default_connection = Some(value.trim().to_string()),
                "echo" => {
                    let echo = parse_bool(value).ok_or_else(|| {
                        ConfigError::invalid_setting(
                            "DB_ECHO",
                            format!("expected a boolean, got '{}'", value),
                        )
                    })?;
                    raw.echo = Some(echo);
                }
                _ => {
                    let Some(path) = rest
                        .strip_prefix("connections")
                        .and_then(|p| p.strip_prefix(NESTED_DELIMITER))
                    else {
                        continue;
                    };
                    let Some((name, field)) = path.split_once(NESTED_DELIMITER) else {
                        continue;
                    };
                    raw.connections
                        .entry(name.to_string())
                        .or_default()
                        .set_field(name, field, value)?;
                }
            }
        }

        Self::from_raw(raw)
    }

    /// Parse settings from a JSON document with the same structure.
    ///
    /// ```text
    /// {"default_connection": "main", "connections": {"main": {"host": "localhost", ...}}}
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawSettings =
            serde_json::from_str(json).map_err(|e| ConfigError::source("JSON", e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let mut connections = BTreeMap::new();
        for (name, raw_conn) in raw.connections {
            let config = raw_conn.validate(&name)?;
            connections.insert(name, config);
        }

        let default_connection = match raw.default_connection {
            Some(name) if name.is_empty() => {
                return Err(ConfigError::invalid_setting(
                    "DB_DEFAULT_CONNECTION",
                    "must not be empty",
                ));
            }
            Some(name) => name,
            None => DEFAULT_CONNECTION_NAME.to_string(),
        };

        if connections.is_empty() {
            warn!(
                "No database connections configured. Example: \
                 DB_CONNECTIONS__DEFAULT__HOST=localhost \
                 DB_CONNECTIONS__DEFAULT__USERNAME=myuser \
                 DB_CONNECTIONS__DEFAULT__PASSWORD=mypassword \
                 DB_CONNECTIONS__DEFAULT__DATABASE=mydb"
            );
        }

        Ok(Self {
            connections,
            default_connection,
            echo: raw.echo.unwrap_or(false),
        })
    }

    /// Resolve an optional connection name to the effective one.
    pub fn resolve_name<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.default_connection)
    }

    /// Get a connection configuration by name (default connection when `None`).
    pub fn get_connection(&self, name: Option<&str>) -> RegistryResult<&ConnectionConfig> {
        let name = self.resolve_name(name);
        self.connections.get(name).ok_or_else(|| {
            RegistryError::unknown_connection(name, self.connections.keys().map(String::as_str))
        })
    }

    /// Check if a connection is configured.
    pub fn has_connection(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    /// All configured connection names, in configuration order.
    pub fn connection_names(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    /// Get the connection URL for a connection (contains the password).
    pub fn connection_url(&self, name: Option<&str>) -> RegistryResult<secrecy::SecretString> {
        Ok(self.get_connection(name)?.connection_url())
    }

    /// First connection flagged as superuser, in configuration order.
    pub fn superuser_connection(&self) -> Option<&ConnectionConfig> {
        self.connections.values().find(|c| c.is_superuser)
    }

    /// Name of the first connection flagged as superuser.
    pub fn superuser_connection_name(&self) -> Option<&str> {
        self.superuser_connection().map(|c| c.name.as_str())
    }
}

/// Command line configuration for the `pg-registry` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pg-registry",
    about = "Inspect named PostgreSQL connections and manage databases through a superuser connection",
    version,
    author
)]
pub struct Config {
    /// Env file with DB_* settings (missing file is not an error)
    #[arg(
        long,
        value_name = "PATH",
        default_value = DEFAULT_ENV_FILE,
        env = "PGREG_ENV_FILE"
    )]
    pub env_file: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "PGREG_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "PGREG_JSON_LOGS")]
    pub json_logs: bool,

    /// Print command results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Seconds to wait for each engine to close at shutdown
    #[arg(
        long,
        default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        env = "PGREG_SHUTDOWN_TIMEOUT"
    )]
    pub shutdown_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations exposed by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List configured connections
    Connections,
    /// Check connectivity of one connection, or of all when no name is given
    Health { name: Option<String> },
    /// List non-template databases on the server
    Databases {
        #[arg(short, long)]
        connection: Option<String>,
    },
    /// Check whether a database exists
    Exists {
        database: String,
        #[arg(short, long)]
        connection: Option<String>,
    },
    /// Create a database (no-op when it already exists)
    Create {
        database: String,
        #[arg(long)]
        owner: Option<String>,
        #[arg(short, long)]
        connection: Option<String>,
    },
    /// Drop a database (no-op when it does not exist)
    Drop {
        database: String,
        /// Terminate other sessions on the database first
        #[arg(long)]
        force: bool,
        #[arg(short, long)]
        connection: Option<String>,
    },
}

impl Config {
    /// Get the shutdown timeout as a Duration.
    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}
