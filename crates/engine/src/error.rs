//! Engine error taxonomy
//!
//! Only `rate_movie` and `train` hand these to callers. The read path turns
//! every variant into a fallback list or an empty list.

use crate::types::{MovieId, UserId};
use std::fmt;
use thiserror::Error;

/// Kind of identifier that was not found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Movie,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Movie => write!(f, "movie"),
        }
    }
}

/// Failures raised by the rating store collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum RecommenderError {
    /// No ratings (or no movies) exist at all
    #[error("No data available: {0}")]
    DataUnavailable(String),

    #[error("Unknown {kind} {id}")]
    UnknownEntity { kind: EntityKind, id: i64 },

    #[error("Training failed: {0}")]
    TrainingFailure(String),

    #[error("Invalid rating score {score} (must be 0.5-5.0 in steps of 0.5)")]
    InvalidRating { score: f32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RecommenderError {
    pub fn unknown_user(id: UserId) -> Self {
        RecommenderError::UnknownEntity {
            kind: EntityKind::User,
            id,
        }
    }

    pub fn unknown_movie(id: MovieId) -> Self {
        RecommenderError::UnknownEntity {
            kind: EntityKind::Movie,
            id,
        }
    }

    pub fn is_unknown_entity(&self) -> bool {
        matches!(self, RecommenderError::UnknownEntity { .. })
    }
}

pub type Result<T> = std::result::Result<T, RecommenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_entity_display() {
        assert_eq!(RecommenderError::unknown_user(7).to_string(), "Unknown user 7");
        assert_eq!(
            RecommenderError::unknown_movie(42).to_string(),
            "Unknown movie 42"
        );
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: RecommenderError = StoreError::Unavailable("connection reset".into()).into();
        assert_eq!(err.to_string(), "Store unavailable: connection reset");
        assert!(!err.is_unknown_entity());
    }
}
