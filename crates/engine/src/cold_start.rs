//! Cold start handling
//!
//! Users with too few ratings get the most-rated movies they have not seen.

use crate::types::{Movie, MovieId};
use std::collections::{HashMap, HashSet};

/// Users with fewer ratings than this take the popularity path
pub const COLD_START_THRESHOLD: usize = 5;

/// Popularity ranking over the movie corpus
///
/// Every corpus movie takes part (count 0 when nobody rated it), as does any
/// movie that only appears in `rater_counts`. Order is rater count descending,
/// ties by ascending movie id. Movies in `rated` are skipped.
pub fn popular_movies(
    movies: &[Movie],
    rater_counts: &HashMap<MovieId, usize>,
    rated: &HashSet<MovieId>,
    limit: usize,
) -> Vec<MovieId> {
    if limit == 0 {
        return Vec::new();
    }

    let mut candidates: HashMap<MovieId, usize> = movies
        .iter()
        .map(|movie| (movie.id, rater_counts.get(&movie.id).copied().unwrap_or(0)))
        .collect();
    for (&movie_id, &count) in rater_counts {
        candidates.entry(movie_id).or_insert(count);
    }

    let mut ranked: Vec<(MovieId, usize)> = candidates
        .into_iter()
        .filter(|(movie_id, _)| !rated.contains(movie_id))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(movie_id, _)| movie_id)
        .collect()
}

/// True when a user with `rating_count` ratings should take the popularity path
pub fn is_cold_start(rating_count: usize, threshold: usize) -> bool {
    rating_count < threshold
}
