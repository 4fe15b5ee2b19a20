//! Cinerec hybrid recommendation engine
//!
//! Blends a latent factor model trained on user ratings with TF-IDF text
//! similarity between movies, and falls back to popularity for users with
//! little history. Rating writes trigger full retrains in the background; the
//! live model is swapped atomically so reads never wait on training.

pub mod cold_start;
pub mod collaborative;
pub mod config;
pub mod content_based;
pub mod error;
pub mod matrix_factorization;
pub mod recommendation;
pub mod stopwords;
pub mod store;
pub mod training;
pub mod types;

pub use cold_start::{popular_movies, COLD_START_THRESHOLD};
pub use collaborative::{CollaborativeFilteringEngine, TrainingReport};
pub use config::RecommenderConfig;
pub use content_based::{ContentIndex, ContentSimilarityEngine};
pub use error::{EntityKind, RecommenderError, Result, StoreError};
pub use matrix_factorization::{MatrixFactorization, ModelSnapshot, SgdConfig};
pub use recommendation::{HybridRecommender, DEFAULT_NUM_RECS};
pub use store::{InMemoryRatingStore, PostgresRatingStore, RatingStore};
pub use training::{retrain_channel, ModelTrainer, RetrainReason, RetrainScheduler, RetrainWorker};
pub use types::*;
