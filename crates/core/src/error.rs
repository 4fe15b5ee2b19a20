//! Error types shared across Cinerec services

use thiserror::Error;

/// Top-level error for configuration and infrastructure failures
#[derive(Debug, Error)]
pub enum CinerecError {
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        /// Environment variable responsible for the failure, if known
        key: Option<String>,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl CinerecError {
    /// Build a configuration error tied to an environment variable
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        CinerecError::ConfigurationError {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Environment variable key, for configuration errors
    pub fn key(&self) -> Option<&str> {
        match self {
            CinerecError::ConfigurationError { key, .. } => key.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_carries_key() {
        let err = CinerecError::config("bad port", "CINEREC_SERVICE_PORT");
        assert_eq!(err.key(), Some("CINEREC_SERVICE_PORT"));
        assert_eq!(err.to_string(), "Configuration error: bad port");
    }

    #[test]
    fn test_database_error_has_no_key() {
        let err: CinerecError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, CinerecError::DatabaseError(_)));
        assert!(err.key().is_none());
    }
}
