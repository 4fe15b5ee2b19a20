//! Core domain types for the recommendation engine

use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type MovieId = i64;

/// Lowest score a user can give
pub const MIN_SCORE: f32 = 0.5;
/// Highest score a user can give
pub const MAX_SCORE: f32 = 5.0;
/// Scores move in half-star increments
pub const SCORE_STEP: f32 = 0.5;

/// A single user rating. At most one exists per (user_id, movie_id).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub movie_id: MovieId,
    pub score: f32,
}

impl Rating {
    pub fn new(user_id: UserId, movie_id: MovieId, score: f32) -> Self {
        Self {
            user_id,
            movie_id,
            score,
        }
    }

    /// True for scores in [0.5, 5.0] on a half-star boundary
    pub fn is_valid_score(score: f32) -> bool {
        if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return false;
        }
        let steps = score / SCORE_STEP;
        (steps - steps.round()).abs() < 1e-6
    }
}

/// Movie metadata used to build the text corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Movie {
    pub id: MovieId,
    pub title: Option<String>,
    pub genres: Option<String>,
    pub description: Option<String>,
}

impl Movie {
    pub fn new(
        id: MovieId,
        title: impl Into<String>,
        genres: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: Some(title.into()),
            genres: Some(genres.into()),
            description: Some(description.into()),
        }
    }

    /// Text document for similarity: title, genres and description joined by
    /// spaces, missing fields empty.
    pub fn document(&self) -> String {
        format!(
            "{} {} {}",
            self.title.as_deref().unwrap_or(""),
            self.genres.as_deref().unwrap_or(""),
            self.description.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

/// Which branch produced a recommendation list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPath {
    /// Most-rated movies the user has not rated yet
    Popularity,
    /// Latent factor predictions topped up with content-similar movies
    Hybrid,
}

/// Ordered recommendation list plus how it was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationOutcome {
    pub user_id: UserId,
    pub movie_ids: Vec<MovieId>,
    pub path: RecommendationPath,
    /// Version of the model snapshot used on the hybrid path
    pub model_version: Option<u64>,
}

impl RecommendationOutcome {
    pub fn popularity(user_id: UserId, movie_ids: Vec<MovieId>) -> Self {
        Self {
            user_id,
            movie_ids,
            path: RecommendationPath::Popularity,
            model_version: None,
        }
    }
}

/// Lifecycle of the latent factor model as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelState {
    Untrained,
    /// A run is in flight and no snapshot has been published yet
    Training,
    Trained {
        version: u64,
    },
}

impl ModelState {
    pub fn is_trained(&self) -> bool {
        matches!(self, ModelState::Trained { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_scores() {
        for score in [0.5, 1.0, 2.5, 4.5, 5.0] {
            assert!(Rating::is_valid_score(score), "{score} should be valid");
        }
    }

    #[test]
    fn test_invalid_scores() {
        for score in [0.0, 0.25, 5.5, -1.0, 3.3, f32::NAN, f32::INFINITY] {
            assert!(!Rating::is_valid_score(score), "{score} should be invalid");
        }
    }

    #[test]
    fn test_movie_document_joins_fields() {
        let movie = Movie::new(1, "Alien", "Horror|Sci-Fi", "A crew meets a creature");
        assert_eq!(movie.document(), "Alien Horror|Sci-Fi A crew meets a creature");
    }

    #[test]
    fn test_movie_document_missing_fields() {
        let movie = Movie {
            id: 2,
            title: Some("Heat".to_string()),
            genres: None,
            description: None,
        };
        assert_eq!(movie.document(), "Heat");

        let empty = Movie {
            id: 3,
            title: None,
            genres: None,
            description: None,
        };
        assert_eq!(empty.document(), "");
    }

    #[test]
    fn test_model_state_serialization() {
        let json = serde_json::to_value(ModelState::Trained { version: 3 }).unwrap();
        assert_eq!(json["state"], "trained");
        assert_eq!(json["version"], 3);
    }
}
