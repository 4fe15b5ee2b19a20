//! Content-based filtering over movie text
//!
//! Each movie becomes a TF-IDF vector over its title, genres and description.
//! Similar movies are ranked by cosine similarity of those vectors.

use crate::stopwords::is_stop_word;
use crate::types::{Movie, MovieId};
use arc_swap::ArcSwapOption;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Shortest token kept by the tokenizer
const MIN_TOKEN_CHARS: usize = 2;

/// Lowercased word tokens of at least two characters, stop words removed.
/// Word characters are alphanumerics and underscore.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !is_stop_word(token))
        .map(str::to_string)
        .collect()
}

/// L2-normalised sparse vector, term ids ascending
#[derive(Debug, Clone, Default, PartialEq)]
struct SparseVector {
    terms: Vec<(u32, f32)>,
}

impl SparseVector {
    fn from_weights(mut weights: Vec<(u32, f32)>) -> Self {
        weights.sort_by_key(|&(term, _)| term);
        let norm = weights.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, w) in weights.iter_mut() {
                *w /= norm;
            }
        }
        Self { terms: weights }
    }

    /// Dot product; equals cosine similarity since both sides are normalised
    fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.terms.len() && j < other.terms.len() {
            let (ta, wa) = self.terms[i];
            let (tb, wb) = other.terms[j];
            match ta.cmp(&tb) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += wa * wb;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// TF-IDF vectors for one corpus snapshot
#[derive(Debug, Clone, Default)]
pub struct ContentIndex {
    movie_ids: Vec<MovieId>,
    positions: HashMap<MovieId, usize>,
    vectors: Vec<SparseVector>,
    vocabulary_size: usize,
}

impl ContentIndex {
    /// Vectorise every movie in `movies`
    ///
    /// Weight of term t in document d is `count(t, d) * idf(t)` with the
    /// smoothed `idf(t) = ln((1 + N) / (1 + df(t))) + 1`.
    pub fn build(movies: &[Movie]) -> Self {
        let mut vocabulary: HashMap<String, u32> = HashMap::new();
        let mut doc_freq: Vec<u32> = Vec::new();
        let mut term_counts: Vec<HashMap<u32, u32>> = Vec::with_capacity(movies.len());
        let mut movie_ids = Vec::with_capacity(movies.len());
        let mut positions = HashMap::with_capacity(movies.len());

        for movie in movies {
            let mut counts: HashMap<u32, u32> = HashMap::new();
            for token in tokenize(&movie.document()) {
                let next_id = vocabulary.len() as u32;
                let term = *vocabulary.entry(token).or_insert(next_id);
                if term as usize == doc_freq.len() {
                    doc_freq.push(0);
                }
                *counts.entry(term).or_insert(0) += 1;
            }
            for &term in counts.keys() {
                doc_freq[term as usize] += 1;
            }

            positions.entry(movie.id).or_insert(movie_ids.len());
            movie_ids.push(movie.id);
            term_counts.push(counts);
        }

        let n_docs = movies.len() as f32;
        let idf: Vec<f32> = doc_freq
            .iter()
            .map(|&df| ((1.0 + n_docs) / (1.0 + df as f32)).ln() + 1.0)
            .collect();

        let vectors = term_counts
            .into_iter()
            .map(|counts| {
                SparseVector::from_weights(
                    counts
                        .into_iter()
                        .map(|(term, count)| (term, count as f32 * idf[term as usize]))
                        .collect(),
                )
            })
            .collect();

        Self {
            movie_ids,
            positions,
            vectors,
            vocabulary_size: vocabulary.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.movie_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movie_ids.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary_size
    }

    pub fn contains(&self, movie_id: MovieId) -> bool {
        self.positions.contains_key(&movie_id)
    }

    /// Cosine similarity between two indexed movies
    pub fn similarity(&self, a: MovieId, b: MovieId) -> Option<f32> {
        let pa = *self.positions.get(&a)?;
        let pb = *self.positions.get(&b)?;
        Some(self.vectors[pa].dot(&self.vectors[pb]))
    }

    /// Up to `limit` other movies most similar to `movie_id`, most similar
    /// first, ties by ascending id. Empty for an unknown movie, an empty
    /// corpus or a corpus without any indexable term.
    pub fn similar_to(&self, movie_id: MovieId, limit: usize) -> Vec<MovieId> {
        self.similar_to_scored(movie_id, limit)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    pub fn similar_to_scored(&self, movie_id: MovieId, limit: usize) -> Vec<(MovieId, f32)> {
        let Some(&target) = self.positions.get(&movie_id) else {
            debug!(movie_id, "Movie not found in content index");
            return Vec::new();
        };
        if self.vocabulary_size == 0 {
            return Vec::new();
        }

        let target_vector = &self.vectors[target];
        let mut scored: Vec<(MovieId, f32)> = self
            .movie_ids
            .iter()
            .zip(self.vectors.iter())
            .filter(|(&id, _)| id != movie_id)
            .map(|(&id, vector)| (id, target_vector.dot(vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }
}

struct CachedIndex {
    fingerprint: u64,
    index: Arc<ContentIndex>,
}

/// Content similarity with a cached index
///
/// The cache is keyed by a fingerprint of the corpus text, so any change to the
/// corpus rebuilds the index before it is queried.
#[derive(Default)]
pub struct ContentSimilarityEngine {
    cached: ArcSwapOption<CachedIndex>,
}

impl ContentSimilarityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn fingerprint(movies: &[Movie]) -> u64 {
        let mut hasher = DefaultHasher::new();
        movies.len().hash(&mut hasher);
        for movie in movies {
            movie.id.hash(&mut hasher);
            movie.document().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Index for exactly this corpus, reusing the cached one when unchanged
    pub fn index_for(&self, movies: &[Movie]) -> Arc<ContentIndex> {
        let fingerprint = Self::fingerprint(movies);

        if let Some(cached) = self.cached.load().as_ref() {
            if cached.fingerprint == fingerprint {
                return Arc::clone(&cached.index);
            }
        }

        let index = Arc::new(ContentIndex::build(movies));
        debug!(
            movies = index.len(),
            vocabulary = index.vocabulary_size(),
            "Rebuilt content index"
        );
        self.cached.store(Some(Arc::new(CachedIndex {
            fingerprint,
            index: Arc::clone(&index),
        })));
        index
    }

    pub fn similar_to(&self, movies: &[Movie], movie_id: MovieId, limit: usize) -> Vec<MovieId> {
        if movies.is_empty() {
            return Vec::new();
        }
        self.index_for(movies).similar_to(movie_id, limit)
    }

    /// Drop the cached index
    pub fn invalidate(&self) {
        self.cached.store(None);
    }
}
