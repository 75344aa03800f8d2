//! Engine handles: one lazily connecting pool per named connection.

use crate::db::session::Session;
use crate::error::RegistryResult;
use crate::models::ConnectionConfig;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Idle connections are closed after this long. With no minimum pool size,
/// every idle connection is eligible, so `pool_size` is not a retained floor.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Application name reported to the server in `pg_stat_activity`.
pub const APPLICATION_NAME: &str = "pg-registry";

/// A live connection pool bound to one [`ConnectionConfig`].
///
/// Creating an engine performs no network I/O. Connections are opened on
/// first checkout and every checkout is preceded by a liveness probe.
pub struct EngineHandle {
    config: ConnectionConfig,
    pool: PgPool,
    echo: bool,
}

impl EngineHandle {
    /// Build the pool for `config`. Must be called from within a tokio runtime.
    pub fn new(config: ConnectionConfig, global_echo: bool) -> Self {
        let echo = config.effective_echo(global_echo);
        let pool = pool_options(&config).connect_lazy_with(connect_options(&config, echo));

        info!(
            connection = %config.name,
            url = %config.masked_url(),
            max_connections = config.max_connections(),
            echo,
            "Created database engine"
        );

        Self { config, pool, echo }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The underlying sqlx pool, for running queries directly.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn is_superuser(&self) -> bool {
        self.config.is_superuser
    }

    /// Open connections, idle or in use.
    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn masked_url(&self) -> String {
        self.config.masked_url()
    }

    /// Factory producing sessions bound to this engine.
    pub fn session_factory(self: &Arc<Self>) -> SessionFactory {
        SessionFactory {
            engine: Arc::clone(self),
        }
    }

    /// Run a trivial round-trip query.
    pub async fn ping(&self) -> RegistryResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Close every pooled connection. Waits for checked-out connections to be returned.
    pub async fn dispose(&self) {
        debug!(connection = %self.config.name, "Disposing database engine");
        self.pool.close().await;
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("name", &self.config.name)
            .field("url", &self.config.masked_url())
            .field("echo", &self.echo)
            .field("size", &self.pool.size())
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

fn pool_options(config: &ConnectionConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(config.max_connections())
        .acquire_timeout(config.pool_timeout)
        .max_lifetime(config.pool_recycle)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .test_before_acquire(true)
}

fn connect_options(config: &ConnectionConfig, echo: bool) -> PgConnectOptions {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .password(config.password.expose_secret())
        .database(&config.database)
        .application_name(APPLICATION_NAME);

    if echo {
        options.log_statements(log::LevelFilter::Info)
    } else {
        options.disable_statement_logging()
    }
}

/// Produces new sessions for one engine.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    engine: Arc<EngineHandle>,
}

impl SessionFactory {
    /// A new session with no transaction open yet.
    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.engine))
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn connection_name(&self) -> &str {
        self.engine.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("main", "127.0.0.1", "app", "secret", "appdb")
            .unwrap()
            .with_pool(3, 2)
            .unwrap()
    }

    #[test]
    fn test_pool_options_mapping() {
        let options = pool_options(&config().with_pool_recycle(None));
        assert_eq!(options.get_max_connections(), 5);
        assert_eq!(options.get_min_connections(), 0);
        assert_eq!(options.get_acquire_timeout(), Duration::from_secs(30));
        assert_eq!(options.get_max_lifetime(), None);
        assert_eq!(options.get_idle_timeout(), Some(IDLE_TIMEOUT));
        assert!(options.get_test_before_acquire());
    }

    #[test]
    fn test_connect_options_mapping() {
        let options = connect_options(&config().with_port(6543).unwrap(), false);
        assert_eq!(options.get_host(), "127.0.0.1");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("appdb"));
    }

    #[tokio::test]
    async fn test_engine_creation_is_lazy() {
        let engine = Arc::new(EngineHandle::new(config(), false));
        assert_eq!(engine.name(), "main");
        assert_eq!(engine.size(), 0);
        assert!(!engine.is_closed());
        assert!(!engine.echo());
        assert!(!engine.is_superuser());
        assert_eq!(engine.num_idle(), 0);

        let factory = engine.session_factory();
        assert!(Arc::ptr_eq(factory.engine(), &engine));
        assert_eq!(factory.connection_name(), "main");

        engine.dispose().await;
        assert!(engine.is_closed());
    }

    #[tokio::test]
    async fn test_per_connection_echo_overrides_global() {
        let engine = EngineHandle::new(config().with_echo(Some(true)), false);
        assert!(engine.echo());

        let engine = EngineHandle::new(config(), true);
        assert!(engine.echo());

        let engine = EngineHandle::new(config().with_echo(Some(false)), true);
        assert!(!engine.echo());
    }

    #[tokio::test]
    async fn test_superuser_flag_follows_config() {
        let engine = EngineHandle::new(config().with_superuser(true), false);
        assert!(engine.is_superuser());
    }

    #[tokio::test]
    async fn test_debug_hides_password() {
        let engine = EngineHandle::new(config(), false);
        let debug = format!("{:?}", engine);
        assert!(debug.contains("main"));
        assert!(!debug.contains("secret"));
    }
}
