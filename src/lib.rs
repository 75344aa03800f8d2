//! pg-registry library
//!
//! Named, lazily pooled PostgreSQL connections for async services, plus
//! database administration (exists / create / drop / list) through a
//! connection flagged as superuser.
//!
//! ```no_run
//! use pg_registry::{DatabaseState, RegistrySettings};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = RegistrySettings::from_env()?;
//! let (state, report) = DatabaseState::startup(settings, Duration::from_secs(10)).await;
//! if !report.all_healthy() {
//!     eprintln!("unhealthy: {:?}", report.unhealthy());
//! }
//! let databases = state.admin().list_databases(None).await?;
//! println!("{databases:?}");
//! state.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod state;

pub use config::{Config, RegistrySettings};
pub use db::{ConnectionRegistry, DatabaseAdmin, EngineHandle, Session, SessionFactory};
pub use error::{RegistryError, RegistryResult};
pub use models::{ConfigError, ConnectionConfig};
pub use state::{DatabaseState, StartupReport};
