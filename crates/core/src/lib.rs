//! # Cinerec Core
//!
//! Shared building blocks for the Cinerec recommendation services.
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `database`: Shared PostgreSQL connection pool
//! - `error`: Error types and handling
//! - `observability`: Structured logging initialization

pub mod config;
pub mod database;
pub mod error;
pub mod observability;

pub use config::{load_dotenv, parse_env_var, ConfigLoader, DatabaseConfig, ServiceConfig};
pub use database::{DatabasePool, PoolStats};
pub use error::CinerecError;
pub use observability::{init_logging, LogConfig, LogFormat, ObservabilityError};

/// Result type alias for Cinerec operations
pub type Result<T> = std::result::Result<T, CinerecError>;
