//! Application-facing database state.
//!
//! [`DatabaseState`] is the value a web framework keeps in its shared
//! application context. It hands out engines and scoped sessions, and
//! brackets the process lifetime with [`DatabaseState::startup`] and
//! [`DatabaseState::shutdown`].

use crate::config::RegistrySettings;
use crate::db::{ConnectionRegistry, DatabaseAdmin, EngineHandle, Session};
use crate::error::{RegistryError, RegistryResult};
use crate::models::ConnectionHealth;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Per-connection health captured at startup.
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub connections: Vec<ConnectionHealth>,
}

impl StartupReport {
    pub fn all_healthy(&self) -> bool {
        self.connections.iter().all(|c| c.healthy)
    }

    /// Names of connections that failed their health check.
    pub fn unhealthy(&self) -> Vec<&str> {
        self.connections
            .iter()
            .filter(|c| !c.healthy)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseState {
    registry: Arc<ConnectionRegistry>,
    admin: DatabaseAdmin,
}

impl DatabaseState {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let admin = DatabaseAdmin::new(Arc::clone(&registry));
        Self { registry, admin }
    }

    pub fn from_settings(settings: RegistrySettings) -> Self {
        Self::new(Arc::new(ConnectionRegistry::new(settings)))
    }

    /// Build the state, create every engine and check each connection.
    ///
    /// Individual connection failures are logged and reported, never fatal.
    pub async fn startup(
        settings: RegistrySettings,
        dispose_timeout: Duration,
    ) -> (Self, StartupReport) {
        let registry = ConnectionRegistry::new(settings).with_dispose_timeout(dispose_timeout);
        let state = Self::new(Arc::new(registry));
        let report = state.check_connections().await;
        (state, report)
    }

    /// Create every configured engine and run a health check on each.
    pub async fn check_connections(&self) -> StartupReport {
        let names = self.registry.list_connections();
        info!(count = names.len(), "Initializing database connections");

        let mut connections = Vec::with_capacity(names.len());
        for name in names {
            let healthy = self.registry.health_check(Some(name.as_str())).await;
            let is_superuser = self
                .registry
                .is_superuser_connection(Some(name.as_str()))
                .unwrap_or(false);

            if healthy {
                info!(connection = %name, superuser = is_superuser, "Connection healthy");
            } else {
                warn!(connection = %name, superuser = is_superuser, "Connection unhealthy");
            }

            connections.push(ConnectionHealth {
                name,
                healthy,
                is_superuser,
                checked_at: chrono::Utc::now(),
            });
        }

        StartupReport { connections }
    }

    /// Dispose every engine.
    pub async fn shutdown(&self) {
        info!("Closing database connections");
        self.registry.close_all().await;
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn admin(&self) -> &DatabaseAdmin {
        &self.admin
    }

    pub async fn engine(&self, name: Option<&str>) -> RegistryResult<Arc<EngineHandle>> {
        self.registry.get_engine(name).await
    }

    /// Scoped session: commit on `Ok`, roll back on `Err`, close always.
    pub async fn with_session<F, R, E>(&self, name: Option<&str>, f: F) -> Result<R, E>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<R, E>>,
        E: From<RegistryError>,
    {
        self.registry.with_session(name, f).await
    }
}
