//! Biased Matrix Factorization trained with Stochastic Gradient Descent
//!
//! Learns user and item latent factors plus bias terms so that
//! `μ + b_u + b_i + p_u·q_i` approximates each observed rating. A fit produces
//! an immutable [`ModelSnapshot`]; nothing is updated in place after that.

use crate::error::{RecommenderError, Result};
use crate::types::{MovieId, Rating, UserId, MAX_SCORE, MIN_SCORE};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// SGD configuration parameters
#[derive(Debug, Clone)]
pub struct SgdConfig {
    /// Number of latent factors (embedding dimension)
    pub factors: usize,
    /// Full passes over the observed ratings
    pub epochs: usize,
    /// Step size for every parameter
    pub learning_rate: f32,
    /// L2 penalty on factors and biases
    pub regularization: f32,
    /// Standard deviation of the normal factor initialisation
    pub init_std: f32,
    /// Fixed seed for reproducible fits; `None` draws from OS entropy
    pub seed: Option<u64>,
    /// (min, max) of valid scores
    pub rating_scale: (f32, f32),
    /// Clamp predictions into `rating_scale`
    pub clip_predictions: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            factors: 100,
            epochs: 30,
            learning_rate: 0.005,
            regularization: 0.04,
            init_std: 0.1,
            seed: Some(42),
            rating_scale: (MIN_SCORE, MAX_SCORE),
            clip_predictions: true,
        }
    }
}

impl SgdConfig {
    pub fn validate(&self) -> Result<()> {
        if self.factors == 0 {
            return Err(RecommenderError::TrainingFailure(
                "factors must be greater than 0".to_string(),
            ));
        }
        if self.epochs == 0 {
            return Err(RecommenderError::TrainingFailure(
                "epochs must be greater than 0".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RecommenderError::TrainingFailure(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.regularization.is_finite() && self.regularization >= 0.0) {
            return Err(RecommenderError::TrainingFailure(format!(
                "regularization must be non-negative, got {}",
                self.regularization
            )));
        }
        if !(self.init_std.is_finite() && self.init_std >= 0.0) {
            return Err(RecommenderError::TrainingFailure(format!(
                "init_std must be non-negative, got {}",
                self.init_std
            )));
        }
        if self.rating_scale.0 > self.rating_scale.1 {
            return Err(RecommenderError::TrainingFailure(
                "rating_scale minimum exceeds maximum".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dense index over raw ids, assigned in first-seen order
#[derive(Debug, Clone, Default)]
pub struct IdIndex {
    forward: HashMap<i64, usize>,
    reverse: Vec<i64>,
}

impl IdIndex {
    pub fn get_or_insert(&mut self, id: i64) -> usize {
        if let Some(&idx) = self.forward.get(&id) {
            return idx;
        }
        let idx = self.reverse.len();
        self.forward.insert(id, idx);
        self.reverse.push(id);
        idx
    }

    pub fn get(&self, id: i64) -> Option<usize> {
        self.forward.get(&id).copied()
    }

    pub fn ids(&self) -> &[i64] {
        &self.reverse
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}

/// Observed ratings as (user_idx, item_idx, score) in input order
#[derive(Debug, Clone, Default)]
pub struct RatingMatrix {
    pub entries: Vec<(usize, usize, f32)>,
    pub users: IdIndex,
    pub items: IdIndex,
}

impl RatingMatrix {
    /// Index every user and movie appearing in `ratings`
    pub fn build(ratings: &[Rating]) -> Self {
        let mut matrix = RatingMatrix {
            entries: Vec::with_capacity(ratings.len()),
            ..Default::default()
        };

        for rating in ratings {
            let user_idx = matrix.users.get_or_insert(rating.user_id);
            let item_idx = matrix.items.get_or_insert(rating.movie_id);
            matrix.entries.push((user_idx, item_idx, rating.score));
        }

        matrix
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn global_mean(&self) -> f32 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.entries.iter().map(|&(_, _, r)| r as f64).sum();
        (sum / self.entries.len() as f64) as f32
    }
}

/// Fully trained, immutable model parameters
#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub version: u64,
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    /// RMSE over the training ratings after the last epoch
    pub training_rmse: f32,
    pub num_ratings: usize,
    users: IdIndex,
    items: IdIndex,
    /// [num_users x factors]
    user_factors: Array2<f32>,
    /// [num_items x factors]
    item_factors: Array2<f32>,
    user_bias: Array1<f32>,
    item_bias: Array1<f32>,
    global_mean: f32,
    rating_scale: (f32, f32),
    clip_predictions: bool,
}

impl ModelSnapshot {
    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn num_factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn global_mean(&self) -> f32 {
        self.global_mean
    }

    pub fn knows_user(&self, user_id: UserId) -> bool {
        self.users.get(user_id).is_some()
    }

    pub fn knows_movie(&self, movie_id: MovieId) -> bool {
        self.items.get(movie_id).is_some()
    }

    /// Every movie id seen at training time
    pub fn movie_ids(&self) -> &[MovieId] {
        self.items.ids()
    }

    fn estimate(&self, user_idx: usize, item_idx: usize) -> f32 {
        let raw = self.global_mean
            + self.user_bias[user_idx]
            + self.item_bias[item_idx]
            + self
                .user_factors
                .row(user_idx)
                .dot(&self.item_factors.row(item_idx));

        if self.clip_predictions {
            raw.clamp(self.rating_scale.0, self.rating_scale.1)
        } else {
            raw
        }
    }

    /// Predict the score `user_id` would give `movie_id`
    ///
    /// Returns `UnknownEntity` when either id was absent from training.
    pub fn predict(&self, user_id: UserId, movie_id: MovieId) -> Result<f32> {
        let user_idx = self
            .users
            .get(user_id)
            .ok_or_else(|| RecommenderError::unknown_user(user_id))?;
        let item_idx = self
            .items
            .get(movie_id)
            .ok_or_else(|| RecommenderError::unknown_movie(movie_id))?;

        Ok(self.estimate(user_idx, item_idx))
    }

    /// Score every known movie not in `rated` and return the best `limit`,
    /// highest score first, ties by ascending movie id.
    pub fn recommend(
        &self,
        user_id: UserId,
        limit: usize,
        rated: &HashSet<MovieId>,
    ) -> Vec<(MovieId, f32)> {
        let Some(user_idx) = self.users.get(user_id) else {
            return Vec::new();
        };

        let mut scored: Vec<(MovieId, f32)> = self
            .items
            .ids()
            .iter()
            .enumerate()
            .filter(|(_, movie_id)| !rated.contains(*movie_id))
            .map(|(item_idx, &movie_id)| (movie_id, self.estimate(user_idx, item_idx)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }
}

/// SGD trainer producing [`ModelSnapshot`]s
#[derive(Debug, Clone)]
pub struct MatrixFactorization {
    config: SgdConfig,
}

impl MatrixFactorization {
    pub fn new(config: SgdConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    /// Train on the complete rating set
    ///
    /// Fails with `DataUnavailable` on an empty set and `TrainingFailure` on
    /// invalid configuration or if any parameter stops being finite.
    pub fn fit(&self, ratings: &[Rating], version: u64) -> Result<ModelSnapshot> {
        self.config.validate()?;

        if ratings.is_empty() {
            return Err(RecommenderError::DataUnavailable(
                "no ratings to train on".to_string(),
            ));
        }

        let matrix = RatingMatrix::build(ratings);
        let k = self.config.factors;
        let lr = self.config.learning_rate;
        let reg = self.config.regularization;
        let global_mean = matrix.global_mean();

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let init = Normal::new(0.0, self.config.init_std).map_err(|e| {
            RecommenderError::TrainingFailure(format!("invalid factor initialisation: {}", e))
        })?;
        let mut user_factors = init_factors(matrix.num_users(), k, init, &mut rng);
        let mut item_factors = init_factors(matrix.num_items(), k, init, &mut rng);
        let mut user_bias = Array1::<f32>::zeros(matrix.num_users());
        let mut item_bias = Array1::<f32>::zeros(matrix.num_items());

        let mut rmse = f32::NAN;
        for epoch in 0..self.config.epochs {
            for &(u, i, rating) in &matrix.entries {
                let dot = user_factors.row(u).dot(&item_factors.row(i));
                let err = rating - (global_mean + user_bias[u] + item_bias[i] + dot);

                user_bias[u] += lr * (err - reg * user_bias[u]);
                item_bias[i] += lr * (err - reg * item_bias[i]);

                for f in 0..k {
                    let puf = user_factors[[u, f]];
                    let qif = item_factors[[i, f]];
                    user_factors[[u, f]] += lr * (err * qif - reg * puf);
                    item_factors[[i, f]] += lr * (err * puf - reg * qif);
                }
            }

            rmse = Self::compute_rmse(
                &matrix,
                global_mean,
                &user_bias,
                &item_bias,
                &user_factors,
                &item_factors,
            );

            if !rmse.is_finite() {
                return Err(RecommenderError::TrainingFailure(format!(
                    "parameters diverged at epoch {}",
                    epoch
                )));
            }

            if epoch % 5 == 0 {
                tracing::debug!(epoch, rmse, "SGD epoch complete");
            }
        }

        Ok(ModelSnapshot {
            version,
            run_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            training_rmse: rmse,
            num_ratings: matrix.entries.len(),
            users: matrix.users,
            items: matrix.items,
            user_factors,
            item_factors,
            user_bias,
            item_bias,
            global_mean,
            rating_scale: self.config.rating_scale,
            clip_predictions: self.config.clip_predictions,
        })
    }

    /// Root mean squared error of the unclipped estimates
    fn compute_rmse(
        matrix: &RatingMatrix,
        global_mean: f32,
        user_bias: &Array1<f32>,
        item_bias: &Array1<f32>,
        user_factors: &Array2<f32>,
        item_factors: &Array2<f32>,
    ) -> f32 {
        if matrix.entries.is_empty() {
            return 0.0;
        }

        let sum: f32 = matrix
            .entries
            .iter()
            .map(|&(u, i, rating)| {
                let prediction = global_mean
                    + user_bias[u]
                    + item_bias[i]
                    + user_factors.row(u).dot(&item_factors.row(i));
                (rating - prediction).powi(2)
            })
            .sum();

        (sum / matrix.entries.len() as f32).sqrt()
    }
}

/// `rows x k` factors drawn from `init`; all zeros when its spread is zero
fn init_factors(rows: usize, k: usize, init: Normal<f32>, rng: &mut StdRng) -> Array2<f32> {
    let mut factors = Array2::<f32>::zeros((rows, k));
    if init.std_dev() > 0.0 {
        factors.mapv_inplace(|_| rng.sample(init));
    }
    factors
}
