//! Engine configuration
//!
//! # Environment Variables
//!
//! - `CINEREC_MODEL_FACTORS` (default 100)
//! - `CINEREC_MODEL_EPOCHS` (default 30)
//! - `CINEREC_MODEL_LEARNING_RATE` (default 0.005)
//! - `CINEREC_MODEL_REGULARIZATION` (default 0.04)
//! - `CINEREC_MODEL_SEED` (default 42, `random` for an unseeded fit)
//! - `CINEREC_MODEL_CLIP_PREDICTIONS` (default true)
//! - `CINEREC_COLD_START_THRESHOLD` (default 5)
//! - `CINEREC_RETRAIN_INTERVAL` (seconds, default 0 = only on rating changes)

use crate::cold_start::COLD_START_THRESHOLD;
use crate::matrix_factorization::SgdConfig;
use cinerec_core::{parse_env_var, CinerecError, ConfigLoader};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecommenderConfig {
    pub sgd: SgdConfig,
    pub cold_start_threshold: usize,
    /// Periodic retrain on top of the rating-driven ones
    pub retrain_interval: Option<Duration>,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            sgd: SgdConfig::default(),
            cold_start_threshold: COLD_START_THRESHOLD,
            retrain_interval: None,
        }
    }
}

fn parse_seed(default: Option<u64>) -> Result<Option<u64>, CinerecError> {
    const KEY: &str = "CINEREC_MODEL_SEED";
    match std::env::var(KEY) {
        Ok(value) if value.eq_ignore_ascii_case("random") => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|e| CinerecError::config(format!("Failed to parse {}: {}", KEY, e), KEY)),
        Err(_) => Ok(default),
    }
}

impl ConfigLoader for RecommenderConfig {
    fn from_env() -> Result<Self, CinerecError> {
        let defaults = SgdConfig::default();

        let sgd = SgdConfig {
            factors: parse_env_var("CINEREC_MODEL_FACTORS", defaults.factors)?,
            epochs: parse_env_var("CINEREC_MODEL_EPOCHS", defaults.epochs)?,
            learning_rate: parse_env_var("CINEREC_MODEL_LEARNING_RATE", defaults.learning_rate)?,
            regularization: parse_env_var(
                "CINEREC_MODEL_REGULARIZATION",
                defaults.regularization,
            )?,
            seed: parse_seed(defaults.seed)?,
            clip_predictions: parse_env_var(
                "CINEREC_MODEL_CLIP_PREDICTIONS",
                defaults.clip_predictions,
            )?,
            ..defaults
        };

        let cold_start_threshold =
            parse_env_var("CINEREC_COLD_START_THRESHOLD", COLD_START_THRESHOLD)?;
        let interval_secs = parse_env_var("CINEREC_RETRAIN_INTERVAL", 0u64)?;

        Ok(Self {
            sgd,
            cold_start_threshold,
            retrain_interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
        })
    }

    fn validate(&self) -> Result<(), CinerecError> {
        self.sgd
            .validate()
            .map_err(|e| CinerecError::config(e.to_string(), "CINEREC_MODEL_*"))?;

        if self.cold_start_threshold == 0 {
            return Err(CinerecError::config(
                "cold_start_threshold must be greater than 0",
                "CINEREC_COLD_START_THRESHOLD",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = RecommenderConfig::default();
        assert_eq!(config.sgd.factors, 100);
        assert_eq!(config.sgd.epochs, 30);
        assert_eq!(config.sgd.seed, Some(42));
        assert_eq!(config.cold_start_threshold, 5);
        assert!(config.retrain_interval.is_none());
        assert!(config.validate().is_ok());
    }

    // All env mutation for this module lives in this one test
    #[test]
    fn test_from_env() {
        env::set_var("CINEREC_MODEL_FACTORS", "16");
        env::set_var("CINEREC_MODEL_SEED", "random");
        env::set_var("CINEREC_RETRAIN_INTERVAL", "3600");

        let config = RecommenderConfig::from_env().unwrap();
        assert_eq!(config.sgd.factors, 16);
        assert_eq!(config.sgd.seed, None);
        assert_eq!(config.retrain_interval, Some(Duration::from_secs(3600)));

        env::set_var("CINEREC_MODEL_EPOCHS", "many");
        let err = RecommenderConfig::from_env().unwrap_err();
        assert_eq!(err.key(), Some("CINEREC_MODEL_EPOCHS"));

        env::remove_var("CINEREC_MODEL_FACTORS");
        env::remove_var("CINEREC_MODEL_SEED");
        env::remove_var("CINEREC_RETRAIN_INTERVAL");
        env::remove_var("CINEREC_MODEL_EPOCHS");
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = RecommenderConfig {
            cold_start_threshold: 0,
            ..RecommenderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_learning_rate() {
        let mut config = RecommenderConfig::default();
        config.sgd.learning_rate = 0.0;
        assert!(config.validate().is_err());
    }
}
