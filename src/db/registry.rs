//! Connection registry.
//!
//! Maps connection names to lazily created [`EngineHandle`]s. Engines are
//! built on first access, cached until [`ConnectionRegistry::close_all`], and
//! shared as `Arc`s.
//!
//! # Concurrency
//!
//! - Lookups take the read lock only.
//! - Creation re-checks under the write lock, so concurrent first calls for
//!   one name construct exactly one engine.
//! - Engine construction does no network I/O, so holding the write lock
//!   across it never blocks on the server.
//! - `close_all` drains the cache under the lock and disposes outside it.

use crate::config::{DEFAULT_SHUTDOWN_TIMEOUT_SECS, RegistrySettings};
use crate::db::engine::{EngineHandle, SessionFactory};
use crate::db::session::{self, Session};
use crate::error::{RegistryError, RegistryResult};
use crate::models::{ConnectionConfig, ConnectionSummary};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ConnectionRegistry {
    settings: RegistrySettings,
    engines: RwLock<HashMap<String, Arc<EngineHandle>>>,
    engines_created: AtomicUsize,
    dispose_timeout: Duration,
}

impl ConnectionRegistry {
    /// Create a registry. No engine is built until first requested.
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            settings,
            engines: RwLock::new(HashMap::new()),
            engines_created: AtomicUsize::new(0),
            dispose_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    /// Upper bound on how long disposing one engine may take in `close_all`.
    pub fn with_dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Get the engine for `name` (default connection when `None`), creating it on first use.
    pub async fn get_engine(&self, name: Option<&str>) -> RegistryResult<Arc<EngineHandle>> {
        let config = self.settings.get_connection(name)?;

        // Fast path: engine already cached
        {
            let engines = self.engines.read().await;
            if let Some(engine) = engines.get(&config.name) {
                debug!(connection = %config.name, "Reusing database engine");
                return Ok(Arc::clone(engine));
            }
        } // Read lock released here

        let mut engines = self.engines.write().await;

        // Re-check: another caller may have created it while we waited
        if let Some(engine) = engines.get(&config.name) {
            debug!(connection = %config.name, "Reusing database engine");
            return Ok(Arc::clone(engine));
        }

        let engine = Arc::new(EngineHandle::new(config.clone(), self.settings.echo));
        self.engines_created.fetch_add(1, Ordering::AcqRel);
        engines.insert(config.name.clone(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Get the session factory bound to the engine for `name`.
    pub async fn get_session_factory(&self, name: Option<&str>) -> RegistryResult<SessionFactory> {
        Ok(self.get_engine(name).await?.session_factory())
    }

    /// Get a new session. The caller must commit or roll back, then close it.
    pub async fn get_session(&self, name: Option<&str>) -> RegistryResult<Session> {
        Ok(self.get_session_factory(name).await?.session())
    }

    /// Run `f` in a scoped session: commit on `Ok`, roll back on `Err`, close always.
    pub async fn with_session<F, R, E>(&self, name: Option<&str>, f: F) -> Result<R, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<R, E>>,
        E: From<RegistryError>,
    {
        let factory = self.get_session_factory(name).await.map_err(E::from)?;
        session::with_session(&factory, f).await
    }

    /// Dispose every cached engine and clear the cache. Safe to call repeatedly.
    pub async fn close_all(&self) {
        // Drain under lock, dispose outside lock
        let engines: Vec<(String, Arc<EngineHandle>)> = {
            let mut engines = self.engines.write().await;
            engines.drain().collect()
        }; // Lock released here

        if engines.is_empty() {
            debug!("No database engines to close");
            return;
        }

        for (name, engine) in engines {
            match tokio::time::timeout(self.dispose_timeout, engine.dispose()).await {
                Ok(()) => info!(connection = %name, "Closed database engine"),
                Err(_) => warn!(
                    connection = %name,
                    timeout_secs = self.dispose_timeout.as_secs(),
                    "Timed out closing database engine; sessions may still be checked out"
                ),
            }
        }
        info!("All database engines closed");
    }

    /// Run `SELECT 1` against the engine. Failures are logged and reported as `false`.
    pub async fn health_check(&self, name: Option<&str>) -> bool {
        let connection = self.settings.resolve_name(name).to_string();

        let engine = match self.get_engine(name).await {
            Ok(engine) => engine,
            Err(e) => {
                warn!(connection = %connection, error = %e, "Health check failed");
                return false;
            }
        };

        match engine.ping().await {
            Ok(()) => {
                debug!(connection = %connection, "Health check passed");
                true
            }
            Err(e) => {
                warn!(connection = %connection, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Every configured connection name, sorted.
    pub fn list_connections(&self) -> Vec<String> {
        self.settings.connection_names()
    }

    /// Whether the connection is flagged superuser. Needs no engine.
    pub fn is_superuser_connection(&self, name: Option<&str>) -> RegistryResult<bool> {
        Ok(self.settings.get_connection(name)?.is_superuser)
    }

    /// Resolve the connection to use for database administration.
    ///
    /// Without a name, the first superuser connection in name order.
    /// A named connection must exist and be flagged superuser.
    pub fn resolve_superuser(&self, name: Option<&str>) -> RegistryResult<&ConnectionConfig> {
        match name {
            Some(name) => {
                let config = self.settings.get_connection(Some(name))?;
                if !config.is_superuser {
                    return Err(RegistryError::not_superuser(name));
                }
                Ok(config)
            }
            None => self
                .settings
                .superuser_connection()
                .ok_or(RegistryError::NoSuperuserConnection),
        }
    }

    /// Engine of the resolved superuser connection.
    pub async fn superuser_engine(&self, name: Option<&str>) -> RegistryResult<Arc<EngineHandle>> {
        let config = self.resolve_superuser(name)?;
        self.get_engine(Some(config.name.as_str())).await
    }

    /// Number of engines constructed over the registry's lifetime.
    pub fn engines_created(&self) -> usize {
        self.engines_created.load(Ordering::Acquire)
    }

    /// Number of engines currently cached.
    pub async fn engine_count(&self) -> usize {
        self.engines.read().await.len()
    }

    pub async fn has_engine(&self, name: &str) -> bool {
        self.engines.read().await.contains_key(name)
    }

    /// Configured connections without secrets.
    pub async fn connection_summaries(&self) -> Vec<ConnectionSummary> {
        let engines = self.engines.read().await;
        self.settings
            .connections
            .values()
            .map(|config| ConnectionSummary {
                name: config.name.clone(),
                host: config.host.clone(),
                port: config.port,
                database: config.database.clone(),
                username: config.username.clone(),
                is_superuser: config.is_superuser,
                engine_created: engines.contains_key(&config.name),
                url: config.masked_url(),
            })
            .collect()
    }
}
