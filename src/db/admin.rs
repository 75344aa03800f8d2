//! Database-level administration through a superuser connection.
//!
//! Every operation resolves its connection the same way: an explicitly named
//! connection must be flagged superuser, otherwise the first superuser
//! connection by name is used. Statements run on a plain pooled connection
//! outside any transaction, since `CREATE DATABASE` and `DROP DATABASE`
//! cannot run inside one.

use crate::db::registry::ConnectionRegistry;
use crate::error::{RegistryError, RegistryResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Databases that `drop_database` always refuses.
pub const PROTECTED_DATABASES: &[&str] = &["postgres", "template0", "template1"];

mod queries {
    pub mod postgres {
        pub const DATABASE_EXISTS: &str = "SELECT 1 FROM pg_database WHERE datname = $1";

        pub const LIST_DATABASES: &str = r#"
            SELECT datname::text
            FROM pg_database
            WHERE NOT datistemplate
            ORDER BY datname
            "#;

        pub const TERMINATE_BACKENDS: &str = r#"
            SELECT pg_terminate_backend(pid)
            FROM pg_stat_activity
            WHERE datname = $1 AND pid <> pg_backend_pid()
            "#;
    }
}

pub fn is_protected_database(name: &str) -> bool {
    PROTECTED_DATABASES.contains(&name)
}

/// Quote an identifier for PostgreSQL: `a"b` becomes `"a""b"`.
pub fn quote_identifier(name: &str) -> RegistryResult<String> {
    if name.is_empty() {
        return Err(RegistryError::invalid_input("Identifier cannot be empty"));
    }
    if name.contains('\0') {
        return Err(RegistryError::invalid_input(
            "Identifier cannot contain a NUL character",
        ));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Create, drop, list and check databases on the server.
#[derive(Debug, Clone)]
pub struct DatabaseAdmin {
    registry: Arc<ConnectionRegistry>,
}

impl DatabaseAdmin {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Check whether `database` exists. Always queries the server.
    pub async fn database_exists(
        &self,
        database: &str,
        connection: Option<&str>,
    ) -> RegistryResult<bool> {
        let engine = self.registry.superuser_engine(connection).await?;
        let mut conn = engine.pool().acquire().await?;

        let row = sqlx::query_scalar::<_, i32>(queries::postgres::DATABASE_EXISTS)
            .bind(database)
            .fetch_optional(&mut *conn)
            .await?;

        debug!(
            connection = %engine.name(),
            database = %database,
            exists = row.is_some(),
            "Checked database existence"
        );
        Ok(row.is_some())
    }

    /// Create `database`, optionally owned by `owner`.
    ///
    /// Returns `false` when it already exists.
    pub async fn create_database(
        &self,
        database: &str,
        owner: Option<&str>,
        connection: Option<&str>,
    ) -> RegistryResult<bool> {
        let mut statement = format!("CREATE DATABASE {}", quote_identifier(database)?);
        if let Some(owner) = owner {
            statement.push_str(&format!(" OWNER {}", quote_identifier(owner)?));
        }

        let engine = self.registry.superuser_engine(connection).await?;

        if self.database_exists(database, Some(engine.name())).await? {
            warn!(
                connection = %engine.name(),
                database = %database,
                "Database already exists, skipping creation"
            );
            return Ok(false);
        }

        let mut conn = engine.pool().acquire().await?;
        sqlx::raw_sql(&statement).execute(&mut *conn).await?;

        info!(
            connection = %engine.name(),
            database = %database,
            owner = ?owner,
            "Created database"
        );
        Ok(true)
    }

    /// Drop `database`. Returns `false` when it does not exist.
    ///
    /// With `force`, other sessions on the database are terminated first. A
    /// session connecting after that step makes the drop itself fail.
    pub async fn drop_database(
        &self,
        database: &str,
        connection: Option<&str>,
        force: bool,
    ) -> RegistryResult<bool> {
        if is_protected_database(database) {
            return Err(RegistryError::protected_database(
                database,
                PROTECTED_DATABASES,
            ));
        }
        let statement = format!("DROP DATABASE {}", quote_identifier(database)?);

        let engine = self.registry.superuser_engine(connection).await?;

        if !self.database_exists(database, Some(engine.name())).await? {
            warn!(
                connection = %engine.name(),
                database = %database,
                "Database does not exist, skipping drop"
            );
            return Ok(false);
        }

        let mut conn = engine.pool().acquire().await?;

        if force {
            let terminated =
                sqlx::query_scalar::<_, Option<bool>>(queries::postgres::TERMINATE_BACKENDS)
                    .bind(database)
                    .fetch_all(&mut *conn)
                    .await?;
            info!(
                connection = %engine.name(),
                database = %database,
                sessions = terminated.len(),
                "Terminated sessions before drop"
            );
        }

        sqlx::raw_sql(&statement).execute(&mut *conn).await?;

        info!(
            connection = %engine.name(),
            database = %database,
            "Dropped database"
        );
        Ok(true)
    }

    /// Non-template databases, sorted by name.
    pub async fn list_databases(&self, connection: Option<&str>) -> RegistryResult<Vec<String>> {
        let engine = self.registry.superuser_engine(connection).await?;
        let mut conn = engine.pool().acquire().await?;

        let databases = sqlx::query_scalar::<_, String>(queries::postgres::LIST_DATABASES)
            .fetch_all(&mut *conn)
            .await?;
        Ok(databases)
    }
}
