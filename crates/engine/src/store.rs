//! Rating store collaborator
//!
//! The engine reads ratings and movies through [`RatingStore`]. The store owns
//! the one-rating-per-(user, movie) invariant; the engine never mutates what it
//! reads.

use crate::error::StoreError;
use crate::types::{Movie, MovieId, Rating, UserId};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Schema expected by [`PostgresRatingStore`]
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS movies (
    id BIGSERIAL PRIMARY KEY,
    title TEXT,
    description TEXT,
    release_year INTEGER,
    genres TEXT
);

CREATE TABLE IF NOT EXISTS ratings (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    movie_id BIGINT NOT NULL REFERENCES movies(id),
    score DOUBLE PRECISION NOT NULL,
    CONSTRAINT ratings_user_movie_uc UNIQUE (user_id, movie_id)
);

CREATE INDEX IF NOT EXISTS idx_ratings_user_id ON ratings(user_id);
"#;

/// Read access to ratings and movies, plus the rating upsert used by the
/// write path.
#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn list_all_ratings(&self) -> Result<Vec<Rating>, StoreError>;

    async fn count_ratings_for_user(&self, user_id: UserId) -> Result<usize, StoreError>;

    /// Ratings of one user in the store's natural order
    async fn list_ratings_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(MovieId, f32)>, StoreError>;

    async fn list_all_movies(&self) -> Result<Vec<Movie>, StoreError>;

    async fn movie_exists(&self, movie_id: MovieId) -> Result<bool, StoreError>;

    /// Number of distinct users that rated each movie. Movies nobody rated are absent.
    async fn count_raters_per_movie(&self) -> Result<HashMap<MovieId, usize>, StoreError>;

    /// Create or update the rating for (user_id, movie_id)
    async fn upsert_rating(&self, rating: Rating) -> Result<Rating, StoreError>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PostgresRatingStore {
    pool: PgPool,
}

impl PostgresRatingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn rating_from_row(row: &sqlx::postgres::PgRow) -> Rating {
        Rating {
            user_id: row.get("user_id"),
            movie_id: row.get("movie_id"),
            score: row.get::<f64, _>("score") as f32,
        }
    }
}

#[async_trait]
impl RatingStore for PostgresRatingStore {
    async fn list_all_ratings(&self) -> Result<Vec<Rating>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id::BIGINT AS user_id,
                   movie_id::BIGINT AS movie_id,
                   score::DOUBLE PRECISION AS score
            FROM ratings
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::rating_from_row).collect())
    }

    async fn count_ratings_for_user(&self, user_id: UserId) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as usize)
    }

    async fn list_ratings_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(MovieId, f32)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT movie_id::BIGINT AS movie_id, score::DOUBLE PRECISION AS score
            FROM ratings
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get("movie_id"), r.get::<f64, _>("score") as f32))
            .collect())
    }

    async fn list_all_movies(&self) -> Result<Vec<Movie>, StoreError> {
        let movies = sqlx::query_as::<_, Movie>(
            r#"
            SELECT id::BIGINT AS id, title, genres, description
            FROM movies
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(movies)
    }

    async fn movie_exists(&self, movie_id: MovieId) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM movies WHERE id = $1)")
            .bind(movie_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }

    async fn count_raters_per_movie(&self) -> Result<HashMap<MovieId, usize>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT movie_id::BIGINT AS movie_id, COUNT(DISTINCT user_id) AS raters
            FROM ratings
            GROUP BY movie_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let raters: i64 = r.get("raters");
                (r.get("movie_id"), raters.max(0) as usize)
            })
            .collect())
    }

    async fn upsert_rating(&self, rating: Rating) -> Result<Rating, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ratings (user_id, movie_id, score)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, movie_id)
            DO UPDATE SET score = EXCLUDED.score
            RETURNING user_id::BIGINT AS user_id,
                      movie_id::BIGINT AS movie_id,
                      score::DOUBLE PRECISION AS score
            "#,
        )
        .bind(rating.user_id)
        .bind(rating.movie_id)
        .bind(rating.score as f64)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::rating_from_row(&row))
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    movies: Vec<Movie>,
    ratings: Vec<Rating>,
    /// Position in `movies` by movie id
    movie_positions: HashMap<MovieId, usize>,
    /// Position in `ratings` by (user, movie)
    rating_positions: HashMap<(UserId, MovieId), usize>,
}

/// Store kept in process memory. Insertion order is the natural order.
#[derive(Debug, Default)]
pub struct InMemoryRatingStore {
    state: RwLock<InMemoryState>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a movie corpus and ratings. Later duplicates of a
    /// (user, movie) pair overwrite earlier ones, as an upsert would.
    pub fn with_data(movies: Vec<Movie>, ratings: Vec<Rating>) -> Self {
        let mut state = InMemoryState {
            movies: Vec::with_capacity(movies.len()),
            ratings: Vec::with_capacity(ratings.len()),
            movie_positions: HashMap::with_capacity(movies.len()),
            rating_positions: HashMap::with_capacity(ratings.len()),
        };
        for movie in movies {
            Self::put_movie(&mut state, movie);
        }
        for rating in ratings {
            Self::put_rating(&mut state, rating);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Insert or replace a movie
    pub async fn insert_movie(&self, movie: Movie) {
        let mut state = self.state.write().await;
        Self::put_movie(&mut state, movie);
    }

    fn put_movie(state: &mut InMemoryState, movie: Movie) {
        match state.movie_positions.get(&movie.id) {
            Some(&pos) => state.movies[pos] = movie,
            None => {
                state.movie_positions.insert(movie.id, state.movies.len());
                state.movies.push(movie);
            }
        }
    }

    fn put_rating(state: &mut InMemoryState, rating: Rating) -> Rating {
        let key = (rating.user_id, rating.movie_id);
        match state.rating_positions.get(&key) {
            Some(&pos) => state.ratings[pos].score = rating.score,
            None => {
                state.rating_positions.insert(key, state.ratings.len());
                state.ratings.push(rating);
            }
        }
        rating
    }
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn list_all_ratings(&self) -> Result<Vec<Rating>, StoreError> {
        Ok(self.state.read().await.ratings.clone())
    }

    async fn count_ratings_for_user(&self, user_id: UserId) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state.ratings.iter().filter(|r| r.user_id == user_id).count())
    }

    async fn list_ratings_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(MovieId, f32)>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .ratings
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| (r.movie_id, r.score))
            .collect())
    }

    async fn list_all_movies(&self) -> Result<Vec<Movie>, StoreError> {
        Ok(self.state.read().await.movies.clone())
    }

    async fn movie_exists(&self, movie_id: MovieId) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(state.movie_positions.contains_key(&movie_id))
    }

    async fn count_raters_per_movie(&self) -> Result<HashMap<MovieId, usize>, StoreError> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for rating in &state.ratings {
            *counts.entry(rating.movie_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn upsert_rating(&self, rating: Rating) -> Result<Rating, StoreError> {
        let mut state = self.state.write().await;
        Ok(Self::put_rating(&mut state, rating))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movies() -> Vec<Movie> {
        vec![
            Movie::new(10, "Alien", "Horror|Sci-Fi", "Crew meets creature"),
            Movie::new(20, "Heat", "Crime|Thriller", "Cops and robbers"),
            Movie::new(30, "Up", "Animation", "Balloons lift a house"),
        ]
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let store = InMemoryRatingStore::with_data(
            movies(),
            vec![Rating::new(1, 10, 3.0), Rating::new(1, 20, 4.0)],
        );

        store.upsert_rating(Rating::new(1, 10, 5.0)).await.unwrap();

        let ratings = store.list_ratings_for_user(1).await.unwrap();
        assert_eq!(ratings, vec![(10, 5.0), (20, 4.0)]);
        assert_eq!(store.count_ratings_for_user(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_with_data_deduplicates_pairs() {
        let store = InMemoryRatingStore::with_data(
            movies(),
            vec![Rating::new(1, 10, 3.0), Rating::new(1, 10, 4.5)],
        );

        let all = store.list_all_ratings().await.unwrap();
        assert_eq!(all, vec![Rating::new(1, 10, 4.5)]);
    }

    #[tokio::test]
    async fn test_bulk_reload_keeps_first_position() {
        let pairs: Vec<(UserId, MovieId)> = (1..=200i64)
            .flat_map(|user_id| (1..=500i64).map(move |movie_id| (user_id, movie_id)))
            .collect();
        let ratings: Vec<Rating> = pairs
            .iter()
            .map(|&(u, m)| Rating::new(u, m, 1.0))
            .chain(pairs.iter().rev().map(|&(u, m)| Rating::new(u, m, 4.0)))
            .collect();

        let store = InMemoryRatingStore::with_data(Vec::new(), ratings);

        let all = store.list_all_ratings().await.unwrap();
        assert_eq!(all.len(), pairs.len());
        assert_eq!(all[0], Rating::new(1, 1, 4.0));
        assert_eq!(all[all.len() - 1], Rating::new(200, 500, 4.0));
        assert!(all.iter().all(|r| r.score == 4.0));
        assert_eq!(store.count_ratings_for_user(7).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_replaced_movie_keeps_its_slot() {
        let store = InMemoryRatingStore::with_data(movies(), Vec::new());
        store
            .insert_movie(Movie::new(10, "Aliens", "Action|Sci-Fi", "The sequel"))
            .await;

        let movies = store.list_all_movies().await.unwrap();
        assert_eq!(movies.len(), 3);
        assert_eq!(movies[0].title.as_deref(), Some("Aliens"));
    }

    #[tokio::test]
    async fn test_count_raters_per_movie() {
        let store = InMemoryRatingStore::with_data(
            movies(),
            vec![
                Rating::new(1, 10, 3.0),
                Rating::new(2, 10, 4.0),
                Rating::new(2, 20, 2.0),
            ],
        );

        let counts = store.count_raters_per_movie().await.unwrap();
        assert_eq!(counts.get(&10), Some(&2));
        assert_eq!(counts.get(&20), Some(&1));
        assert_eq!(counts.get(&30), None);
    }

    #[test]
    fn test_natural_order_is_insertion_order() {
        let store = InMemoryRatingStore::with_data(
            movies(),
            vec![
                Rating::new(1, 30, 4.0),
                Rating::new(1, 10, 4.0),
                Rating::new(2, 20, 1.0),
            ],
        );

        let ratings = tokio_test::block_on(store.list_ratings_for_user(1)).unwrap();
        assert_eq!(ratings, vec![(30, 4.0), (10, 4.0)]);

        let ids: Vec<_> = tokio_test::block_on(store.list_all_movies())
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_movie_exists() {
        let store = InMemoryRatingStore::with_data(movies(), Vec::new());
        assert!(store.movie_exists(20).await.unwrap());
        assert!(!store.movie_exists(99).await.unwrap());

        store
            .insert_movie(Movie::new(99, "Late Addition", "Drama", ""))
            .await;
        assert!(store.movie_exists(99).await.unwrap());
    }
}
