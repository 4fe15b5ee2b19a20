//! End-to-end engine behaviour through the public API

use cinerec_engine::{
    HybridRecommender, InMemoryRatingStore, ModelState, Movie, Rating, RatingStore,
    RecommendationPath, RecommenderConfig, SgdConfig, DEFAULT_NUM_RECS,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn config() -> RecommenderConfig {
    RecommenderConfig {
        sgd: SgdConfig {
            factors: 10,
            epochs: 20,
            ..SgdConfig::default()
        },
        ..RecommenderConfig::default()
    }
}

/// 20 movies in four genres; 12 users who each favour one genre
fn catalogue() -> (Vec<Movie>, Vec<Rating>) {
    let genres = ["Action|Adventure", "Romance|Drama", "Comedy", "Horror|Thriller"];
    let movies: Vec<Movie> = (1..=20)
        .map(|id| {
            let genre = genres[(id as usize - 1) % genres.len()];
            Movie::new(id, format!("Feature {id}"), genre, format!("A {genre} story"))
        })
        .collect();

    let mut ratings = Vec::new();
    for user_id in 1..=12i64 {
        let favourite = (user_id as usize - 1) % genres.len();
        for movie in movies.iter().filter(|m| (m.id + user_id) % 3 != 0) {
            let genre = (movie.id as usize - 1) % genres.len();
            let score = if genre == favourite { 5.0 } else { 1.5 };
            ratings.push(Rating::new(user_id, movie.id, score));
        }
    }
    (movies, ratings)
}

#[tokio::test]
async fn test_full_flow_from_cold_start_to_hybrid() {
    let (movies, ratings) = catalogue();
    let store = Arc::new(InMemoryRatingStore::with_data(movies, ratings));
    let (recommender, worker) =
        HybridRecommender::with_background_retraining(store.clone(), &config());
    let worker = worker.spawn();

    recommender.train().await.unwrap();
    assert!(recommender.state().is_trained());

    // A new user starts on the popularity list
    let newcomer = 100;
    let outcome = recommender
        .recommend_detailed(newcomer, DEFAULT_NUM_RECS)
        .await;
    assert_eq!(outcome.path, RecommendationPath::Popularity);
    assert_eq!(outcome.movie_ids.len(), DEFAULT_NUM_RECS);

    for movie_id in [1, 5, 9, 13, 17] {
        recommender
            .rate_movie(Rating::new(newcomer, movie_id, 5.0))
            .await
            .unwrap();
    }

    // Training is asynchronous; wait for a snapshot that includes the newcomer
    let mut hybrid = None;
    for _ in 0..100 {
        let outcome = recommender.recommend_detailed(newcomer, 5).await;
        if outcome.path == RecommendationPath::Hybrid {
            hybrid = Some(outcome);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let hybrid = hybrid.expect("background retrain never picked up the new user");

    let rated: HashSet<i64> = [1, 5, 9, 13, 17].into_iter().collect();
    assert!(hybrid.movie_ids.len() <= 5);
    assert!(hybrid.movie_ids.iter().all(|id| !rated.contains(id)));
    assert!(hybrid.model_version.unwrap() >= 2);

    drop(recommender);
    let stats = worker.await.unwrap();
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
async fn test_genre_fans_get_their_genre_first() {
    let (movies, ratings) = catalogue();
    let store = Arc::new(InMemoryRatingStore::with_data(movies, ratings));
    let mut config = config();
    config.sgd.learning_rate = 0.02;
    config.sgd.epochs = 200;
    let recommender = HybridRecommender::new(store, &config);
    recommender.train().await.unwrap();

    // User 1 loves Action|Adventure: movies 1, 5, 9, 13, 17
    let action: HashSet<i64> = [1, 5, 9, 13, 17].into_iter().collect();
    let top = recommender.recommend(1, 1).await;
    assert_eq!(top.len(), 1);
    assert!(action.contains(&top[0]), "top pick {top:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_retrain_see_complete_snapshots() {
    let (movies, ratings) = catalogue();
    let store = Arc::new(InMemoryRatingStore::with_data(movies, ratings));
    let recommender = Arc::new(HybridRecommender::new(store, &config()));
    recommender.train().await.unwrap();

    let trainer = {
        let recommender = Arc::clone(&recommender);
        tokio::spawn(async move {
            for _ in 0..3 {
                recommender.train().await.unwrap();
            }
        })
    };

    let mut readers = Vec::new();
    for user_id in 1..=8 {
        let recommender = Arc::clone(&recommender);
        readers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let outcome = recommender.recommend_detailed(user_id, 5).await;
                assert_eq!(outcome.path, RecommendationPath::Hybrid);
                assert!(!outcome.movie_ids.is_empty());
                let unique: HashSet<_> = outcome.movie_ids.iter().collect();
                assert_eq!(unique.len(), outcome.movie_ids.len());
            }
        }));
    }

    trainer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(recommender.state(), ModelState::Trained { version: 4 });
}

#[tokio::test]
async fn test_outcome_serializes_path() {
    let store = Arc::new(InMemoryRatingStore::new());
    store.insert_movie(Movie::new(1, "Solo", "Drama", "")).await;
    assert!(store.movie_exists(1).await.unwrap());

    let recommender = HybridRecommender::new(store, &config());
    let outcome = recommender.recommend_detailed(7, 3).await;

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["path"], "popularity");
    assert_eq!(json["movie_ids"], serde_json::json!([1]));
    assert_eq!(
        serde_json::to_value(recommender.state()).unwrap()["state"],
        "untrained"
    );
}
