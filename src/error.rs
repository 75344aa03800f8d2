//! Error types for the connection registry.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver errors are kept as the error source so callers can still inspect them.

use crate::models::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Database connection '{name}' not found. Available connections: {available}")]
    UnknownConnection { name: String, available: String },

    #[error(
        "No superuser connection available. Please configure a connection with is_superuser=true"
    )]
    NoSuperuserConnection,

    #[error(
        "Connection '{name}' does not have superuser privileges. Set is_superuser=true in the connection configuration."
    )]
    NotSuperuser { name: String },

    #[error("Cannot drop protected database '{database}'. Protected databases: {protected}")]
    ProtectedDatabase { database: String, protected: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Connectivity failure: {message}")]
    Connectivity {
        message: String,
        /// e.g., "42P04" for duplicate database
        sql_state: Option<String>,
        suggestion: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Session for connection '{connection}' is closed")]
    SessionClosed { connection: String },
}

impl RegistryError {
    /// Create an unknown connection error listing the configured names.
    pub fn unknown_connection<'a>(
        name: impl Into<String>,
        available: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let available: Vec<&str> = available.into_iter().collect();
        Self::UnknownConnection {
            name: name.into(),
            available: if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            },
        }
    }

    /// Create a not-superuser error.
    pub fn not_superuser(name: impl Into<String>) -> Self {
        Self::NotSuperuser { name: name.into() }
    }

    /// Create a protected database error.
    pub fn protected_database(database: impl Into<String>, protected: &[&str]) -> Self {
        Self::ProtectedDatabase {
            database: database.into(),
            protected: protected.join(", "),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a session closed error.
    pub fn session_closed(connection: impl Into<String>) -> Self {
        Self::SessionClosed {
            connection: connection.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connectivity { suggestion, .. } => Some(suggestion),
            Self::NoSuperuserConnection => {
                Some("Example: DB_CONNECTIONS__ADMIN__IS_SUPERUSER=true")
            }
            Self::UnknownConnection { .. } => {
                Some("Declare it with DB_CONNECTIONS__<NAME>__HOST and related settings")
            }
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Connectivity { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connectivity { source, .. } => matches!(
                source,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

/// Convert sqlx errors to RegistryError.
impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        let (message, sql_state, suggestion) = match &err {
            sqlx::Error::Configuration(msg) => (
                msg.to_string(),
                None,
                "Check the connection settings and credentials".to_string(),
            ),
            sqlx::Error::Database(db_err) => (
                db_err.message().to_string(),
                db_err.code().map(|c| c.to_string()),
                database_suggestion(db_err.code().as_deref()),
            ),
            sqlx::Error::PoolTimedOut => (
                "Timed out waiting for a pooled connection".to_string(),
                None,
                "Check that the server is reachable, or raise pool_size / pool_timeout".to_string(),
            ),
            sqlx::Error::PoolClosed => (
                "Connection pool is closed".to_string(),
                None,
                "The registry was shut down; request a new engine".to_string(),
            ),
            sqlx::Error::Io(io_err) => (
                format!("I/O error: {}", io_err),
                None,
                "Check network connectivity and database server status".to_string(),
            ),
            sqlx::Error::Tls(tls_err) => (
                format!("TLS error: {}", tls_err),
                None,
                "Verify TLS configuration and certificates".to_string(),
            ),
            sqlx::Error::Protocol(msg) => (
                format!("Protocol error: {}", msg),
                None,
                "Check database server compatibility".to_string(),
            ),
            other => (
                other.to_string(),
                None,
                "See the underlying driver error for details".to_string(),
            ),
        };

        RegistryError::Connectivity {
            message,
            sql_state,
            suggestion,
            source: err,
        }
    }
}

fn database_suggestion(code: Option<&str>) -> String {
    match code {
        Some("28P01") | Some("28000") => "Verify the username and password".to_string(),
        Some("3D000") => "Check that the database name exists".to_string(),
        Some("42501") => "The connection lacks the privilege for this operation".to_string(),
        Some("42P04") => "The database already exists".to_string(),
        Some("55006") => {
            "Other sessions are using the database; retry with force enabled".to_string()
        }
        _ => "Check the statement and referenced objects".to_string(),
    }
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_connection_lists_available() {
        let err = RegistryError::unknown_connection("missing", ["admin", "default"]);
        let msg = err.to_string();
        assert!(msg.contains("'missing'"));
        assert!(msg.contains("admin, default"));
    }

    #[test]
    fn test_unknown_connection_with_nothing_configured() {
        let err = RegistryError::unknown_connection("default", std::iter::empty());
        assert!(err.to_string().ends_with("Available connections: none"));
    }

    #[test]
    fn test_protected_database_message() {
        let err = RegistryError::protected_database("postgres", &["postgres", "template0"]);
        assert!(err.to_string().contains("postgres, template0"));
    }

    #[test]
    fn test_configuration_error_wraps_config_error() {
        let err: RegistryError = ConfigError::missing_field("main", "host").into();
        assert!(matches!(err, RegistryError::Configuration(_)));
        assert!(err.to_string().contains("'host'"));
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        let err: RegistryError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());
        assert!(err.suggestion().is_some());
        assert!(err.sql_state().is_none());
    }

    #[test]
    fn test_io_error_maps_to_connectivity() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: RegistryError = sqlx::Error::Io(io).into();
        assert!(matches!(err, RegistryError::Connectivity { .. }));
        assert!(err.to_string().contains("refused"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_policy_errors_are_not_retryable() {
        assert!(!RegistryError::NoSuperuserConnection.is_retryable());
        assert!(!RegistryError::not_superuser("app").is_retryable());
        assert!(!RegistryError::invalid_input("bad").is_retryable());
    }
}
