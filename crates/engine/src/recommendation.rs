//! Hybrid Recommendation Engine
//!
//! Picks between the popularity fallback and the hybrid path for each request:
//!
//! 1. Users with fewer than `cold_start_threshold` ratings get popular movies.
//! 2. Otherwise the live latent factor snapshot ranks unseen movies. An empty
//!    ranking (untrained model, user missing from a stale snapshot) falls back
//!    to popularity.
//! 3. The collaborative list is topped up with movies similar in text to the
//!    user's highest-rated movie, deduplicated, up to the requested size.
//!
//! Read paths never fail. Store errors and unknown ids turn into the fallback
//! or an empty list.

use crate::cold_start::{is_cold_start, popular_movies};
use crate::collaborative::{CollaborativeFilteringEngine, TrainingReport};
use crate::config::RecommenderConfig;
use crate::content_based::ContentSimilarityEngine;
use crate::error::{RecommenderError, Result};
use crate::store::RatingStore;
use crate::training::{retrain_channel, ModelTrainer, RetrainReason, RetrainScheduler, RetrainWorker};
use crate::types::{
    ModelState, MovieId, Rating, RecommendationOutcome, RecommendationPath, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// List size used when a caller does not pick one
pub const DEFAULT_NUM_RECS: usize = 10;

pub struct HybridRecommender {
    store: Arc<dyn RatingStore>,
    collaborative: Arc<CollaborativeFilteringEngine>,
    content: Arc<ContentSimilarityEngine>,
    trainer: ModelTrainer,
    scheduler: Option<RetrainScheduler>,
    cold_start_threshold: usize,
}

impl HybridRecommender {
    /// Recommender without background retraining; call [`train`](Self::train)
    /// to refresh the model.
    pub fn new(store: Arc<dyn RatingStore>, config: &RecommenderConfig) -> Self {
        let collaborative = Arc::new(CollaborativeFilteringEngine::new(config.sgd.clone()));
        Self {
            trainer: ModelTrainer::new(Arc::clone(&store), Arc::clone(&collaborative)),
            store,
            collaborative,
            content: Arc::new(ContentSimilarityEngine::new()),
            scheduler: None,
            cold_start_threshold: config.cold_start_threshold,
        }
    }

    /// Recommender whose rating writes feed a retrain worker. The worker must
    /// be spawned by the caller; it exits once the recommender is dropped.
    pub fn with_background_retraining(
        store: Arc<dyn RatingStore>,
        config: &RecommenderConfig,
    ) -> (Self, RetrainWorker) {
        let mut recommender = Self::new(store, config);
        let (scheduler, worker) =
            retrain_channel(recommender.trainer.clone(), config.retrain_interval);
        recommender.scheduler = Some(scheduler);
        (recommender, worker)
    }

    pub fn collaborative(&self) -> &Arc<CollaborativeFilteringEngine> {
        &self.collaborative
    }

    pub fn state(&self) -> ModelState {
        self.collaborative.state()
    }

    /// Retrain on every rating in the store and publish the new snapshot
    ///
    /// An empty store reports `DataUnavailable` and leaves the model untrained.
    pub async fn train(&self) -> Result<TrainingReport> {
        self.trainer.train().await
    }

    /// Ordered, distinct movie ids for `user_id`, at most `num_recs` long
    pub async fn recommend(&self, user_id: UserId, num_recs: usize) -> Vec<MovieId> {
        self.recommend_detailed(user_id, num_recs).await.movie_ids
    }

    /// Same as [`recommend`](Self::recommend), also reporting which path ran
    #[instrument(skip(self), fields(path = tracing::field::Empty))]
    pub async fn recommend_detailed(
        &self,
        user_id: UserId,
        num_recs: usize,
    ) -> RecommendationOutcome {
        if num_recs == 0 {
            return RecommendationOutcome::popularity(user_id, Vec::new());
        }

        let rating_count = match self.store.count_ratings_for_user(user_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(user_id, error = %e, "Could not count user ratings, using popularity");
                return self.popularity(user_id, num_recs, None).await;
            }
        };

        if rating_count == 0 {
            debug!(user_id, "User has no ratings");
            return self.popularity(user_id, num_recs, Some(HashSet::new())).await;
        }

        let user_ratings = match self.store.list_ratings_for_user(user_id).await {
            Ok(ratings) => ratings,
            Err(e) => {
                warn!(user_id, error = %e, "Could not list user ratings, using popularity");
                return self.popularity(user_id, num_recs, None).await;
            }
        };
        let rated: HashSet<MovieId> = user_ratings.iter().map(|(id, _)| *id).collect();

        if is_cold_start(rating_count, self.cold_start_threshold) {
            debug!(
                user_id,
                rating_count,
                threshold = self.cold_start_threshold,
                "Cold start user"
            );
            return self.popularity(user_id, num_recs, Some(rated)).await;
        }

        let Some(snapshot) = self.collaborative.snapshot() else {
            debug!(user_id, "Model untrained, using popularity");
            return self.popularity(user_id, num_recs, Some(rated)).await;
        };
        let model_version = snapshot.version;

        let scoring = {
            let rated = rated.clone();
            tokio::task::spawn_blocking(move || snapshot.recommend(user_id, num_recs, &rated))
        };
        let collaborative: Vec<MovieId> = match scoring.await {
            Ok(scored) => scored.into_iter().map(|(id, _)| id).collect(),
            Err(e) => {
                warn!(user_id, error = %e, "Scoring task failed");
                Vec::new()
            }
        };

        if collaborative.is_empty() {
            debug!(user_id, model_version, "No collaborative candidates, using popularity");
            return self.popularity(user_id, num_recs, Some(rated)).await;
        }

        let content = match top_rated_movie(&user_ratings) {
            Some(seed) => self.similar_movies(seed, num_recs).await,
            None => Vec::new(),
        };

        let movie_ids = merge_candidates(collaborative, content, &rated, num_recs);
        tracing::Span::current().record("path", "hybrid");
        debug!(user_id, model_version, count = movie_ids.len(), "Hybrid recommendations");

        RecommendationOutcome {
            user_id,
            movie_ids,
            path: RecommendationPath::Hybrid,
            model_version: Some(model_version),
        }
    }

    /// Queue a retrain after a rating was created or updated
    pub fn on_rating_mutation(&self, rating: &Rating) {
        match &self.scheduler {
            Some(scheduler) => {
                scheduler.schedule(RetrainReason::RatingChanged {
                    user_id: rating.user_id,
                    movie_id: rating.movie_id,
                });
            }
            None => debug!(
                user_id = rating.user_id,
                movie_id = rating.movie_id,
                "No retrain worker attached"
            ),
        }
    }

    /// Create or update a rating, then schedule a retrain
    ///
    /// Returns once the store has the rating; training happens later.
    pub async fn rate_movie(&self, rating: Rating) -> Result<Rating> {
        if !Rating::is_valid_score(rating.score) {
            return Err(RecommenderError::InvalidRating {
                score: rating.score,
            });
        }

        if !self.store.movie_exists(rating.movie_id).await? {
            return Err(RecommenderError::unknown_movie(rating.movie_id));
        }

        let saved = self.store.upsert_rating(rating).await?;
        info!(
            user_id = saved.user_id,
            movie_id = saved.movie_id,
            score = saved.score,
            "Rating saved"
        );

        self.on_rating_mutation(&saved);
        Ok(saved)
    }

    /// `rated` is fetched from the store when not already known
    async fn popularity(
        &self,
        user_id: UserId,
        num_recs: usize,
        rated: Option<HashSet<MovieId>>,
    ) -> RecommendationOutcome {
        tracing::Span::current().record("path", "popularity");

        let rated = match rated {
            Some(rated) => rated,
            None => match self.store.list_ratings_for_user(user_id).await {
                Ok(ratings) => ratings.into_iter().map(|(id, _)| id).collect(),
                Err(e) => {
                    warn!(user_id, error = %e, "Popularity fallback unavailable");
                    return RecommendationOutcome::popularity(user_id, Vec::new());
                }
            },
        };

        let (movies, counts) = match tokio::try_join!(
            self.store.list_all_movies(),
            self.store.count_raters_per_movie()
        ) {
            Ok(data) => data,
            Err(e) => {
                warn!(user_id, error = %e, "Popularity fallback unavailable");
                return RecommendationOutcome::popularity(user_id, Vec::new());
            }
        };

        let movie_ids = popular_movies(&movies, &counts, &rated, num_recs);
        debug!(user_id, count = movie_ids.len(), "Popularity recommendations");
        RecommendationOutcome::popularity(user_id, movie_ids)
    }

    async fn similar_movies(&self, movie_id: MovieId, limit: usize) -> Vec<MovieId> {
        let movies = match self.store.list_all_movies().await {
            Ok(movies) => movies,
            Err(e) => {
                warn!(movie_id, error = %e, "Could not load movies for content similarity");
                return Vec::new();
            }
        };

        let content = Arc::clone(&self.content);
        match tokio::task::spawn_blocking(move || content.similar_to(&movies, movie_id, limit))
            .await
        {
            Ok(similar) => similar,
            Err(e) => {
                warn!(movie_id, error = %e, "Content similarity task failed");
                Vec::new()
            }
        }
    }
}

/// Highest score in store order; the earliest wins a tie
pub fn top_rated_movie(ratings: &[(MovieId, f32)]) -> Option<MovieId> {
    let mut best: Option<(MovieId, f32)> = None;
    for &(movie_id, score) in ratings {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((movie_id, score)),
        }
    }
    best.map(|(movie_id, _)| movie_id)
}

/// Collaborative ids in order, then content ids not yet present, capped at `limit`.
/// Ids in `exclude` never make it into the result.
pub fn merge_candidates(
    collaborative: Vec<MovieId>,
    content: Vec<MovieId>,
    exclude: &HashSet<MovieId>,
    limit: usize,
) -> Vec<MovieId> {
    let capacity = limit.min(collaborative.len() + content.len());
    let mut seen: HashSet<MovieId> = HashSet::with_capacity(capacity);
    let mut merged = Vec::with_capacity(capacity);

    for movie_id in collaborative.into_iter().chain(content) {
        if merged.len() >= limit {
            break;
        }
        if exclude.contains(&movie_id) || !seen.insert(movie_id) {
            continue;
        }
        merged.push(movie_id);
    }

    merged
}
