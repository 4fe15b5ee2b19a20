//! Shared configuration loader for Cinerec services
//!
//! Configuration is read from environment variables with the `CINEREC_` prefix,
//! optionally seeded from a `.env` file via dotenvy. Override order is
//! defaults < .env < environment.
//!
//! # Example
//!
//! ```no_run
//! use cinerec_core::config::{ConfigLoader, DatabaseConfig, ServiceConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! cinerec_core::config::load_dotenv();
//!
//! let db_config = DatabaseConfig::from_env()?;
//! let service_config = ServiceConfig::from_env()?;
//!
//! db_config.validate()?;
//! service_config.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::CinerecError;
use std::time::Duration;
use url::Url;

/// Configuration loader trait
///
/// Implementors read their fields from `CINEREC_*` environment variables and
/// fall back to defaults for anything optional.
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a required variable is missing or a
    /// value cannot be parsed.
    fn from_env() -> Result<Self, CinerecError>;

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if any validation check fails.
    fn validate(&self) -> Result<(), CinerecError>;
}

/// Database configuration
///
/// # Environment Variables
///
/// - `CINEREC_DATABASE_URL` / `DATABASE_URL` (required): PostgreSQL connection URL
/// - `CINEREC_DATABASE_MAX_CONNECTIONS` (optional, default 20)
/// - `CINEREC_DATABASE_MIN_CONNECTIONS` (optional, default 2)
/// - `CINEREC_DATABASE_CONNECT_TIMEOUT` (optional, seconds, default 30)
/// - `CINEREC_DATABASE_IDLE_TIMEOUT` (optional, seconds, default 600)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle connection timeout duration
    pub idle_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/cinerec".to_string(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl ConfigLoader for DatabaseConfig {
    fn from_env() -> Result<Self, CinerecError> {
        let url = std::env::var("CINEREC_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| {
                CinerecError::config(
                    "DATABASE_URL or CINEREC_DATABASE_URL must be set",
                    "CINEREC_DATABASE_URL",
                )
            })?;

        let defaults = DatabaseConfig::default();

        let max_connections =
            parse_env_var("CINEREC_DATABASE_MAX_CONNECTIONS", defaults.max_connections)?;
        let min_connections =
            parse_env_var("CINEREC_DATABASE_MIN_CONNECTIONS", defaults.min_connections)?;
        let connect_timeout_secs = parse_env_var("CINEREC_DATABASE_CONNECT_TIMEOUT", 30u64)?;
        let idle_timeout_secs = parse_env_var("CINEREC_DATABASE_IDLE_TIMEOUT", 600u64)?;

        Ok(Self {
            url,
            max_connections,
            min_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), CinerecError> {
        Url::parse(&self.url).map_err(|e| {
            CinerecError::config(format!("Invalid DATABASE_URL: {}", e), "CINEREC_DATABASE_URL")
        })?;

        if self.max_connections == 0 {
            return Err(CinerecError::config(
                "max_connections must be greater than 0",
                "CINEREC_DATABASE_MAX_CONNECTIONS",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(CinerecError::config(
                format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    self.min_connections, self.max_connections
                ),
                "CINEREC_DATABASE_MIN_CONNECTIONS",
            ));
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(CinerecError::config(
                "connect_timeout must be greater than 0 seconds",
                "CINEREC_DATABASE_CONNECT_TIMEOUT",
            ));
        }

        if self.idle_timeout.as_secs() == 0 {
            return Err(CinerecError::config(
                "idle_timeout must be greater than 0 seconds",
                "CINEREC_DATABASE_IDLE_TIMEOUT",
            ));
        }

        Ok(())
    }
}

/// Service configuration
///
/// # Environment Variables
///
/// - `CINEREC_SERVICE_HOST` / `HOST` (optional, default "0.0.0.0")
/// - `CINEREC_SERVICE_PORT` / `PORT` (optional, default 8082)
/// - `CINEREC_SERVICE_WORKERS` (optional, default CPU count)
/// - `CINEREC_SERVICE_LOG_LEVEL` / `RUST_LOG` (optional, default "info")
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service bind host
    pub host: String,
    /// Service bind port
    pub port: u16,
    /// Number of HTTP worker threads
    pub workers: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            workers: num_cpus::get(),
            log_level: "info".to_string(),
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, CinerecError> {
        let defaults = ServiceConfig::default();

        let host = std::env::var("CINEREC_SERVICE_HOST")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or(defaults.host);

        let port = match std::env::var("CINEREC_SERVICE_PORT") {
            Ok(_) => parse_env_var("CINEREC_SERVICE_PORT", defaults.port)?,
            Err(_) => parse_env_var("PORT", defaults.port)?,
        };

        let workers = parse_env_var("CINEREC_SERVICE_WORKERS", defaults.workers)?;

        let log_level = std::env::var("CINEREC_SERVICE_LOG_LEVEL")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(defaults.log_level);

        Ok(Self {
            host,
            port,
            workers,
            log_level,
        })
    }

    fn validate(&self) -> Result<(), CinerecError> {
        if self.port == 0 {
            return Err(CinerecError::config(
                "port must be greater than 0",
                "CINEREC_SERVICE_PORT",
            ));
        }

        if self.workers == 0 {
            return Err(CinerecError::config(
                "workers must be greater than 0",
                "CINEREC_SERVICE_WORKERS",
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(CinerecError::config(
                format!(
                    "Invalid log_level '{}'. Must be one of: {}",
                    self.log_level,
                    valid_log_levels.join(", ")
                ),
                "CINEREC_SERVICE_LOG_LEVEL",
            ));
        }

        Ok(())
    }
}

/// Parse an environment variable, returning `default` when it is unset
///
/// # Errors
///
/// Returns a `ConfigurationError` if the variable is set but cannot be parsed.
pub fn parse_env_var<T>(key: &str, default: T) -> Result<T, CinerecError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| CinerecError::config(format!("Failed to parse {}: {}", key, e), key))
        })
        .unwrap_or(Ok(default))
}

/// Load .env file if present
///
/// A missing `.env` file is not an error.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}
