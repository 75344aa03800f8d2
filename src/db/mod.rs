//! Database access layer.
//!
//! This module provides:
//! - Lazily created, cached engines per named connection
//! - Sessions with commit/rollback/close and a scoped accessor
//! - Database administration through a superuser connection

pub mod admin;
pub mod engine;
pub mod registry;
pub mod session;

pub use admin::{DatabaseAdmin, PROTECTED_DATABASES, is_protected_database, quote_identifier};
pub use engine::{EngineHandle, SessionFactory};
pub use registry::ConnectionRegistry;
pub use session::{Session, with_session};
