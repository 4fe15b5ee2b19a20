//! Collaborative Filtering Engine
//!
//! Owns the live [`ModelSnapshot`] behind an atomically swappable pointer.
//! Readers load the pointer once per call and work on that snapshot; a
//! finished training run replaces it in a single store. Failed runs leave the
//! previous snapshot serving.

use crate::error::{RecommenderError, Result};
use crate::matrix_factorization::{MatrixFactorization, ModelSnapshot, SgdConfig};
use crate::types::{ModelState, MovieId, Rating, UserId};
use arc_swap::ArcSwapOption;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Summary of a successful training run
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainingReport {
    pub version: u64,
    pub run_id: uuid::Uuid,
    pub num_users: usize,
    pub num_items: usize,
    pub num_ratings: usize,
    pub training_rmse: f32,
    pub duration_ms: u64,
}

pub struct CollaborativeFilteringEngine {
    trainer: MatrixFactorization,
    live: ArcSwapOption<ModelSnapshot>,
    next_version: AtomicU64,
    runs_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CollaborativeFilteringEngine {
    pub fn new(config: SgdConfig) -> Self {
        Self {
            trainer: MatrixFactorization::new(config),
            live: ArcSwapOption::const_empty(),
            next_version: AtomicU64::new(1),
            runs_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SgdConfig {
        self.trainer.config()
    }

    /// Current live snapshot, if any run has succeeded
    pub fn snapshot(&self) -> Option<Arc<ModelSnapshot>> {
        self.live.load_full()
    }

    pub fn state(&self) -> ModelState {
        match self.live.load().as_ref() {
            Some(snapshot) => ModelState::Trained {
                version: snapshot.version,
            },
            None if self.runs_in_flight.load(Ordering::SeqCst) > 0 => ModelState::Training,
            None => ModelState::Untrained,
        }
    }

    /// Fit a new snapshot on the complete rating set and publish it
    ///
    /// CPU bound; async callers should run it on a blocking thread. Concurrent
    /// calls are allowed and the last one to finish wins.
    pub fn train(&self, ratings: &[Rating]) -> Result<TrainingReport> {
        self.runs_in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.runs_in_flight);

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        info!(
            version,
            num_ratings = ratings.len(),
            factors = self.trainer.config().factors,
            epochs = self.trainer.config().epochs,
            "Training collaborative filtering model"
        );

        let snapshot = match self.trainer.fit(ratings, version) {
            Ok(snapshot) => snapshot,
            Err(RecommenderError::DataUnavailable(reason)) => {
                warn!(version, %reason, "Skipping training, keeping current model");
                return Err(RecommenderError::DataUnavailable(reason));
            }
            Err(e) => {
                error!(version, error = %e, "Model training failed, keeping current model");
                return Err(e);
            }
        };

        let report = TrainingReport {
            version,
            run_id: snapshot.run_id,
            num_users: snapshot.num_users(),
            num_items: snapshot.num_items(),
            num_ratings: snapshot.num_ratings,
            training_rmse: snapshot.training_rmse,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.live.store(Some(Arc::new(snapshot)));

        info!(
            version = report.version,
            run_id = %report.run_id,
            num_users = report.num_users,
            num_items = report.num_items,
            rmse = report.training_rmse,
            duration_ms = report.duration_ms,
            "Model training complete"
        );

        Ok(report)
    }

    /// Predicted score from the live snapshot
    ///
    /// `UnknownEntity` when untrained or either id was not part of training.
    pub fn predict(&self, user_id: UserId, movie_id: MovieId) -> Result<f32> {
        match self.live.load().as_ref() {
            Some(snapshot) => snapshot.predict(user_id, movie_id),
            None => Err(RecommenderError::unknown_user(user_id)),
        }
    }

    /// Top `limit` unseen movies for `user_id`, best first
    ///
    /// `rated` must come from the rating store, not from training-time data.
    /// Empty when untrained, the user is unknown or nothing is left to rank.
    pub fn recommend(
        &self,
        user_id: UserId,
        limit: usize,
        rated: &HashSet<MovieId>,
    ) -> Vec<MovieId> {
        self.recommend_scored(user_id, limit, rated)
            .into_iter()
            .map(|(movie_id, _)| movie_id)
            .collect()
    }

    /// Same as [`recommend`](Self::recommend) with predicted scores attached
    pub fn recommend_scored(
        &self,
        user_id: UserId,
        limit: usize,
        rated: &HashSet<MovieId>,
    ) -> Vec<(MovieId, f32)> {
        let Some(snapshot) = self.snapshot() else {
            debug!(user_id, "Collaborative model not trained");
            return Vec::new();
        };

        if !snapshot.knows_user(user_id) {
            debug!(
                user_id,
                version = snapshot.version,
                "User not in training set"
            );
            return Vec::new();
        }

        let recommendations = snapshot.recommend(user_id, limit, rated);
        if recommendations.is_empty() {
            debug!(user_id, "No unrated movies left to score");
        }
        recommendations
    }
}

impl Default for CollaborativeFilteringEngine {
    fn default() -> Self {
        Self::new(SgdConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CollaborativeFilteringEngine {
        CollaborativeFilteringEngine::new(SgdConfig {
            factors: 4,
            epochs: 20,
            ..SgdConfig::default()
        })
    }

    fn ratings() -> Vec<Rating> {
        vec![
            Rating::new(1, 10, 5.0),
            Rating::new(1, 20, 3.0),
            Rating::new(2, 10, 4.0),
            Rating::new(2, 30, 2.5),
        ]
    }

    #[test]
    fn test_untrained_engine() {
        let engine = engine();
        assert_eq!(engine.state(), ModelState::Untrained);
        assert!(engine.snapshot().is_none());
        assert!(engine.recommend(1, 5, &HashSet::new()).is_empty());
        assert!(engine.predict(1, 10).unwrap_err().is_unknown_entity());
    }

    #[test]
    fn test_train_publishes_snapshot() {
        let engine = engine();
        let report = engine.train(&ratings()).unwrap();

        assert_eq!(report.version, 1);
        assert_eq!(report.num_users, 2);
        assert_eq!(report.num_items, 3);
        assert_eq!(engine.state(), ModelState::Trained { version: 1 });
        assert!(engine.predict(1, 30).is_ok());
    }

    #[test]
    fn test_failed_training_keeps_previous_snapshot() {
        let engine = engine();
        engine.train(&ratings()).unwrap();

        let result = engine.train(&[]);
        assert!(matches!(result, Err(RecommenderError::DataUnavailable(_))));
        assert_eq!(engine.state(), ModelState::Trained { version: 1 });
    }

    #[test]
    fn test_empty_training_leaves_untrained() {
        let engine = engine();
        assert!(engine.train(&[]).is_err());
        assert_eq!(engine.state(), ModelState::Untrained);
    }

    #[test]
    fn test_first_run_in_flight_reports_training() {
        let engine = CollaborativeFilteringEngine::new(SgdConfig {
            factors: 32,
            epochs: 300,
            ..SgdConfig::default()
        });
        let ratings: Vec<Rating> = (1..=60i64)
            .flat_map(|user_id| {
                (1..=40i64).map(move |movie_id| {
                    Rating::new(user_id, movie_id, ((user_id + movie_id) % 9 + 1) as f32 * 0.5)
                })
            })
            .collect();

        std::thread::scope(|scope| {
            let run = scope.spawn(|| engine.train(&ratings));

            let mut saw_training = false;
            while !run.is_finished() {
                if engine.state() == ModelState::Training {
                    saw_training = true;
                    break;
                }
                std::thread::yield_now();
            }
            assert!(saw_training, "training finished before it was observed");
            assert!(engine.snapshot().is_none());

            run.join().unwrap().unwrap();
        });

        assert_eq!(engine.state(), ModelState::Trained { version: 1 });
    }

    #[test]
    fn test_retrain_bumps_version() {
        let engine = engine();
        engine.train(&ratings()).unwrap();
        let held = engine.snapshot().unwrap();

        engine.train(&ratings()).unwrap();

        assert_eq!(engine.state(), ModelState::Trained { version: 2 });
        // Readers holding the old snapshot keep a complete view of it
        assert_eq!(held.version, 1);
        assert!(held.predict(2, 20).is_ok());
    }

    #[test]
    fn test_recommend_uses_supplied_rated_set() {
        let engine = engine();
        engine.train(&ratings()).unwrap();

        let rated: HashSet<MovieId> = [10, 20, 30].into_iter().collect();
        assert!(engine.recommend(1, 5, &rated).is_empty());

        let rated: HashSet<MovieId> = [10].into_iter().collect();
        let recs = engine.recommend(1, 5, &rated);
        assert_eq!(recs.len(), 2);
        assert!(!recs.contains(&10));
    }
}
