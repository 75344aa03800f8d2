//! Connection-related data models.
//!
//! This module defines the validated configuration of one named PostgreSQL
//! target, the raw (unvalidated) form it is built from, and the summaries
//! reported back to callers.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// URL scheme understood by the sqlx PostgreSQL driver.
pub const POSTGRES_SCHEME: &str = "postgres";

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_MAX_OVERFLOW: u32 = 10;
pub const DEFAULT_POOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POOL_RECYCLE_SECS: u64 = 3600;

/// Placeholder used instead of the password in log-safe URLs.
const MASKED_PASSWORD: &str = "****";

/// Validated configuration for one named database connection.
///
/// Built once at configuration load time and never mutated afterwards.
#[derive(Debug)]
pub struct ConnectionConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Contains sensitive data - never log
    pub password: SecretString,
    pub database: String,
    /// Whether this connection may run database-level administration.
    pub is_superuser: bool,
    /// Base share of the pool. Added to `max_overflow` to cap open
    /// connections; idle connections are not kept open to reach it.
    pub pool_size: u32,
    /// Connections allowed beyond `pool_size` under load.
    pub max_overflow: u32,
    /// How long a checkout waits for a free connection.
    pub pool_timeout: Duration,
    /// Maximum connection age. `None` disables recycling.
    pub pool_recycle: Option<Duration>,
    /// Statement logging. `None` defers to the global setting.
    pub echo: Option<bool>,
}

impl Clone for ConnectionConfig {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: SecretString::from(self.password.expose_secret().to_owned()),
            database: self.database.clone(),
            is_superuser: self.is_superuser,
            pool_size: self.pool_size,
            max_overflow: self.max_overflow,
            pool_timeout: self.pool_timeout,
            pool_recycle: self.pool_recycle,
            echo: self.echo,
        }
    }
}

impl ConnectionConfig {
    /// Create a connection configuration with default pool settings.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        RawConnectionConfig {
            host: Some(host.into()),
            username: Some(username.into()),
            password: Some(password.into()),
            database: Some(database.into()),
            ..RawConnectionConfig::default()
        }
        .validate(&name)
    }

    pub fn with_port(mut self, port: u16) -> Result<Self, ConfigError> {
        if port == 0 {
            return Err(ConfigError::invalid_value(
                &self.name,
                "port",
                "must be between 1 and 65535 (got 0)",
            ));
        }
        self.port = port;
        Ok(self)
    }

    pub fn with_superuser(mut self, is_superuser: bool) -> Self {
        self.is_superuser = is_superuser;
        self
    }

    pub fn with_pool(mut self, pool_size: u32, max_overflow: u32) -> Result<Self, ConfigError> {
        if pool_size == 0 {
            return Err(ConfigError::invalid_value(
                &self.name,
                "pool_size",
                "must be greater than 0 (got 0)",
            ));
        }
        self.pool_size = pool_size;
        self.max_overflow = max_overflow;
        Ok(self)
    }

    pub fn with_pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    pub fn with_pool_recycle(mut self, recycle: Option<Duration>) -> Self {
        self.pool_recycle = recycle;
        self
    }

    pub fn with_echo(mut self, echo: Option<bool>) -> Self {
        self.echo = echo;
        self
    }

    /// Upper bound on simultaneously open connections.
    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }

    /// Statement logging after applying the global fallback.
    pub fn effective_echo(&self, global_echo: bool) -> bool {
        self.echo.unwrap_or(global_echo)
    }

    /// Connection URL including the password.
    pub fn connection_url(&self) -> SecretString {
        SecretString::from(self.build_url(self.password.expose_secret()))
    }

    /// Connection URL with the password replaced, safe for logs.
    pub fn masked_url(&self) -> String {
        self.build_url(MASKED_PASSWORD)
    }

    fn build_url(&self, password: &str) -> String {
        let base = format!("{}://{}:{}/", POSTGRES_SCHEME, self.host, self.port);
        let built = Url::parse(&base).ok().and_then(|mut url| {
            url.set_username(&self.username).ok()?;
            url.set_password(Some(password)).ok()?;
            url.set_path(&self.database);
            Some(url.to_string())
        });

        built.unwrap_or_else(|| {
            format!(
                "{}://{}:{}@{}:{}/{}",
                POSTGRES_SCHEME, self.username, password, self.host, self.port, self.database
            )
        })
    }
}

/// Connection settings as read from a configuration source, before validation.
///
/// Numeric fields are signed so that out-of-range values reach validation and
/// produce a field-specific message instead of a parse failure.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConnectionConfig {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub is_superuser: Option<bool>,
    pub pool_size: Option<i64>,
    pub max_overflow: Option<i64>,
    pub pool_timeout: Option<i64>,
    pub pool_recycle: Option<i64>,
    pub echo: Option<bool>,
}

impl RawConnectionConfig {
    /// Set one field from its textual value (environment-style sources).
    ///
    /// Unknown fields are ignored.
    pub fn set_field(&mut self, connection: &str, field: &str, value: &str) -> Result<(), ConfigError> {
        match field {
            "host" => self.host = Some(value.to_string()),
            "port" => self.port = Some(parse_int(connection, "port", value)?),
            "username" => self.username = Some(value.to_string()),
            "password" => self.password = Some(value.to_string()),
            "database" => self.database = Some(value.to_string()),
            "is_superuser" => self.is_superuser = Some(parse_flag(connection, "is_superuser", value)?),
            "pool_size" => self.pool_size = Some(parse_int(connection, "pool_size", value)?),
            "max_overflow" => self.max_overflow = Some(parse_int(connection, "max_overflow", value)?),
            "pool_timeout" => self.pool_timeout = Some(parse_int(connection, "pool_timeout", value)?),
            "pool_recycle" => self.pool_recycle = Some(parse_int(connection, "pool_recycle", value)?),
            "echo" => self.echo = Some(parse_flag(connection, "echo", value)?),
            _ => {}
        }
        Ok(())
    }

    /// Validate every field and build the immutable configuration.
    pub fn validate(self, name: &str) -> Result<ConnectionConfig, ConfigError> {
        validate_name(name)?;

        let host = required_text(name, "host", self.host)?;
        let username = required_text(name, "username", self.username)?;
        let database = required_text(name, "database", self.database)?;
        // An empty password is legal (trust / peer authentication).
        let password = self
            .password
            .ok_or_else(|| ConfigError::missing_field(name, "password"))?;

        let port = match self.port {
            None => DEFAULT_PORT,
            Some(p) if (1..=65535).contains(&p) => p as u16,
            Some(p) => {
                return Err(ConfigError::invalid_value(
                    name,
                    "port",
                    format!("must be between 1 and 65535 (got {})", p),
                ));
            }
        };

        let pool_size = match self.pool_size {
            None => DEFAULT_POOL_SIZE,
            Some(n) if n > 0 => to_u32(name, "pool_size", n)?,
            Some(n) => {
                return Err(ConfigError::invalid_value(
                    name,
                    "pool_size",
                    format!("must be greater than 0 (got {})", n),
                ));
            }
        };

        let max_overflow = match self.max_overflow {
            None => DEFAULT_MAX_OVERFLOW,
            Some(n) if n >= 0 => to_u32(name, "max_overflow", n)?,
            Some(n) => {
                return Err(ConfigError::invalid_value(
                    name,
                    "max_overflow",
                    format!("must be non-negative (got {})", n),
                ));
            }
        };

        let pool_timeout = match self.pool_timeout {
            None => Duration::from_secs(DEFAULT_POOL_TIMEOUT_SECS),
            Some(n) if n > 0 => Duration::from_secs(n as u64),
            Some(n) => {
                return Err(ConfigError::invalid_value(
                    name,
                    "pool_timeout",
                    format!("must be greater than 0 seconds (got {})", n),
                ));
            }
        };

        // Zero or negative disables recycling.
        let pool_recycle = match self.pool_recycle {
            None => Some(Duration::from_secs(DEFAULT_POOL_RECYCLE_SECS)),
            Some(n) if n > 0 => Some(Duration::from_secs(n as u64)),
            Some(_) => None,
        };

        Ok(ConnectionConfig {
            name: name.to_string(),
            host,
            port,
            username,
            password: SecretString::from(password),
            database,
            is_superuser: self.is_superuser.unwrap_or(false),
            pool_size,
            max_overflow,
            pool_timeout,
            pool_recycle,
            echo: self.echo,
        })
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyName);
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn required_text(
    connection: &str,
    field: &'static str,
    value: Option<String>,
) -> Result<String, ConfigError> {
    match value {
        None => Err(ConfigError::missing_field(connection, field)),
        Some(v) if v.trim().is_empty() => Err(ConfigError::invalid_value(
            connection,
            field,
            "must not be empty",
        )),
        Some(v) => Ok(v),
    }
}

fn to_u32(connection: &str, field: &str, value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|_| {
        ConfigError::invalid_value(connection, field, format!("value {} is too large", value))
    })
}

fn parse_int(connection: &str, field: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| {
        ConfigError::invalid_value(
            connection,
            field,
            format!("expected an integer, got '{}'", value),
        )
    })
}

fn parse_flag(connection: &str, field: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| {
        ConfigError::invalid_value(
            connection,
            field,
            format!("expected a boolean, got '{}'", value),
        )
    })
}

/// Parse a boolean the way environment-style sources spell it.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("connection '{connection}': missing required field '{field}'")]
    MissingField { connection: String, field: String },

    #[error("connection '{connection}': field '{field}': {message}")]
    InvalidValue {
        connection: String,
        field: String,
        message: String,
    },

    #[error("Connection name cannot be empty")]
    EmptyName,

    #[error("Connection name contains invalid characters: {0}")]
    InvalidName(String),

    /// A global (non per-connection) setting is malformed
    #[error("setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },

    /// The configuration source itself could not be read or parsed
    #[error("failed to read configuration from {source_name}: {message}")]
    Source {
        source_name: String,
        message: String,
    },
}

impl ConfigError {
    pub fn missing_field(connection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            connection: connection.into(),
            field: field.into(),
        }
    }

    pub fn invalid_value(
        connection: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            connection: connection.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_setting(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Connection information returned by listing (no secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub is_superuser: bool,
    /// True once the engine for this connection has been created.
    pub engine_created: bool,
    /// Connection URL with the password masked.
    pub url: String,
}

/// Result of one health check, as reported at startup.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub name: String,
    pub healthy: bool,
    pub is_superuser: bool,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}
