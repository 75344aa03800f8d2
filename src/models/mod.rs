//! Data models for the connection registry.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;

// Re-export commonly used types
pub use connection::{
    ConfigError, ConnectionConfig, ConnectionHealth, ConnectionSummary, DEFAULT_MAX_OVERFLOW,
    DEFAULT_POOL_RECYCLE_SECS, DEFAULT_POOL_SIZE, DEFAULT_POOL_TIMEOUT_SECS, DEFAULT_PORT,
    POSTGRES_SCHEME, RawConnectionConfig, parse_bool,
};
