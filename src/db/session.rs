//! Unit-of-work sessions.
//!
//! A [`Session`] lazily begins a transaction on its first use and holds the
//! pooled connection only while that transaction is open. Dropping a session
//! with an open transaction rolls it back.

use crate::db::engine::{EngineHandle, SessionFactory};
use crate::error::{RegistryError, RegistryResult};
use futures_util::future::BoxFuture;
use sqlx::{PgConnection, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, warn};

enum SessionState {
    Idle,
    Active(Transaction<'static, Postgres>),
    Closed,
}

/// A unit of work bound to one engine. Not shared across concurrent operations.
pub struct Session {
    engine: Arc<EngineHandle>,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(engine: Arc<EngineHandle>) -> Self {
        Self {
            engine,
            state: SessionState::Idle,
        }
    }

    pub fn connection_name(&self) -> &str {
        self.engine.name()
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.state, SessionState::Active(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// Begin a transaction unless one is already open.
    pub async fn begin(&mut self) -> RegistryResult<()> {
        self.transaction().await.map(|_| ())
    }

    /// Connection of the open transaction, beginning one if needed.
    ///
    /// Usable with any sqlx query: `query(..).fetch_all(session.connection().await?)`.
    pub async fn connection(&mut self) -> RegistryResult<&mut PgConnection> {
        let tx = self.transaction().await?;
        Ok(&mut **tx)
    }

    /// Execute one SQL statement inside the session's transaction. Returns rows affected.
    ///
    /// The future is `Send` for any borrow of the session, so it can run
    /// inside a [`with_session`] closure.
    pub async fn execute(&mut self, sql: &str) -> RegistryResult<u64> {
        let conn = self.connection().await?;
        let result = sqlx::query(sql).execute(conn).await?;
        Ok(result.rows_affected())
    }

    /// Commit the open transaction. No-op when none is open.
    pub async fn commit(&mut self) -> RegistryResult<()> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Active(tx) => {
                tx.commit().await?;
                debug!(connection = %self.engine.name(), "Session committed");
                Ok(())
            }
            SessionState::Idle => Ok(()),
            SessionState::Closed => {
                self.state = SessionState::Closed;
                Err(RegistryError::session_closed(self.engine.name()))
            }
        }
    }

    /// Roll back the open transaction. No-op when none is open.
    pub async fn rollback(&mut self) -> RegistryResult<()> {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Active(tx) => {
                tx.rollback().await?;
                debug!(connection = %self.engine.name(), "Session rolled back");
                Ok(())
            }
            SessionState::Idle => Ok(()),
            SessionState::Closed => {
                self.state = SessionState::Closed;
                Err(RegistryError::session_closed(self.engine.name()))
            }
        }
    }

    /// Release the session. An open transaction is rolled back.
    ///
    /// Idempotent; the session is unusable afterwards.
    pub async fn close(&mut self) {
        if let SessionState::Active(tx) = std::mem::replace(&mut self.state, SessionState::Closed) {
            if let Err(e) = tx.rollback().await {
                warn!(
                    connection = %self.engine.name(),
                    error = %e,
                    "Rollback on session close failed"
                );
            }
        }
    }

    async fn transaction(&mut self) -> RegistryResult<&mut Transaction<'static, Postgres>> {
        if matches!(self.state, SessionState::Idle) {
            let tx = self.engine.pool().begin().await?;
            debug!(connection = %self.engine.name(), "Session began transaction");
            self.state = SessionState::Active(tx);
        }

        match &mut self.state {
            SessionState::Active(tx) => Ok(tx),
            _ => Err(RegistryError::session_closed(self.engine.name())),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            SessionState::Idle => "idle",
            SessionState::Active(_) => "active",
            SessionState::Closed => "closed",
        };
        f.debug_struct("Session")
            .field("connection", &self.engine.name())
            .field("state", &state)
            .finish()
    }
}

/// Run `f` with a fresh session from `factory`.
///
/// Commits when `f` returns `Ok`, rolls back (best effort, keeping the
/// original error) when it returns `Err`, and closes the session either way.
///
/// ```ignore
/// let count: i64 = with_session(&factory, |session| {
///     Box::pin(async move {
///         let conn = session.connection().await?;
///         Ok::<_, RegistryError>(sqlx::query_scalar("SELECT count(*) FROM users").fetch_one(conn).await?)
///     })
/// })
/// .await?;
/// ```
pub async fn with_session<F, R, E>(factory: &SessionFactory, f: F) -> Result<R, E>
where
    F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<R, E>>,
    E: From<RegistryError>,
{
    let mut session = factory.session();
    let outcome = match f(&mut session).await {
        Ok(value) => session.commit().await.map(|_| value).map_err(E::from),
        Err(err) => {
            if let Err(rollback_err) = session.rollback().await {
                warn!(
                    connection = %session.connection_name(),
                    error = %rollback_err,
                    "Rollback after failed unit of work failed"
                );
            }
            Err(err)
        }
    };
    session.close().await;
    outcome
}
