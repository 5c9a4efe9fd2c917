//! Nearest-neighbor queries by cosine similarity.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use ordered_float::OrderedFloat;

use crate::store::VectorStore;
use crate::{Error, Result};

/// Euclidean length of `v`, ignoring NaN components.
pub fn norm(v: &[f32]) -> f32 {
    v.iter()
        .copied()
        .filter(|e| !e.is_nan())
        .map(|e| e * e)
        .sum::<f32>()
        .sqrt()
}

/// Scales `v` to unit length. A zero vector is left as it is.
pub fn normalize(v: &mut [f32]) {
    let len = norm(v);
    if len > 0.0 {
        for e in v {
            *e /= len;
        }
    }
}

/// Dot product, skipping any position where either side is NaN.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(&a, &b)| a * b)
        .sum()
}

/// What to search near.
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    Word(&'a str),
    /// The average of the words' (unit) vectors.
    Words(&'a [&'a str]),
    /// A raw vector; must have the model's layer size.
    Vector(&'a [f32]),
}

impl<'a> From<&'a str> for Query<'a> {
    fn from(word: &'a str) -> Self {
        Query::Word(word)
    }
}

impl<'a> From<&'a [&'a str]> for Query<'a> {
    fn from(words: &'a [&'a str]) -> Self {
        Query::Words(words)
    }
}

impl<'a> From<&'a [f32]> for Query<'a> {
    fn from(vector: &'a [f32]) -> Self {
        Query::Vector(vector)
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub word: String,
    /// Cosine similarity to the query.
    pub score: f32,
    /// 1 for the best match, 2 for the next, and so on.
    pub rank: usize,
}

/// Answers similarity queries against a fixed set of vectors.
///
/// Immutable once built, so a single engine can be shared between threads.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    size: usize,
    vocab: Vec<String>,
    index: HashMap<String, usize>,
    /// Unit-length copy of the store's vectors.
    vectors: Vec<f32>,
}

impl SearchEngine {
    pub fn new(store: &VectorStore) -> Self {
        let size = store.layer_size();
        let mut vectors = store.embeddings().to_vec();
        for row in vectors.chunks_exact_mut(size) {
            normalize(row);
        }
        let index = (0..store.num_words())
            .rev()
            .map(|i| (store.word(i).to_string(), i))
            .collect();
        SearchEngine {
            size,
            vocab: store.words().to_vec(),
            index,
            vectors,
        }
    }

    pub fn layer_size(&self) -> usize {
        self.size
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(word)
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.size..][..self.size]
    }

    fn lookup(&self, word: &str) -> Result<usize> {
        self.index
            .get(word)
            .copied()
            .ok_or_else(|| Error::UnknownWord(word.to_string()))
    }

    /// The unit-length vector for `word`.
    pub fn vector(&self, word: &str) -> Result<&[f32]> {
        Ok(self.row(self.lookup(word)?))
    }

    /// Cosine similarity between two words.
    pub fn cosine_similarity(&self, a: &str, b: &str) -> Result<f32> {
        Ok(dot(self.vector(a)?, self.vector(b)?))
    }

    /// Turns a query into a unit vector (or the zero vector).
    fn query_vector(&self, query: Query<'_>) -> Result<Vec<f32>> {
        let mut vec = match query {
            Query::Word(word) => self.vector(word)?.to_vec(),
            Query::Words([]) => return Err(Error::config("query has no words")),
            Query::Words(words) => {
                let rows = words
                    .iter()
                    .map(|w| self.vector(w))
                    .collect::<Result<Vec<&[f32]>>>()?;
                // Component-wise mean, each component over the rows where it isn't NaN.
                (0..self.size)
                    .map(|p| {
                        let (sum, card) = rows
                            .iter()
                            .map(|row| row[p])
                            .filter(|e| !e.is_nan())
                            .fold((0.0, 0), |(sum, card), e| (sum + e, card + 1));
                        if card == 0 {
                            0.0
                        } else {
                            sum / card as f32
                        }
                    })
                    .collect()
            }
            Query::Vector(v) => {
                if v.len() != self.size {
                    return Err(Error::config(format!(
                        "query vector has {} dimensions, model has {}",
                        v.len(),
                        self.size
                    )));
                }
                v.iter()
                    .map(|&e| if e.is_nan() { 0.0 } else { e })
                    .collect()
            }
        };
        normalize(&mut vec);
        Ok(vec)
    }

    /// The `k` words most similar to `query`, best first.
    ///
    /// A word query finds the word itself first; use
    /// [`search_excluding`](Self::search_excluding) to leave it out.
    pub fn search<'a>(&self, query: impl Into<Query<'a>>, k: usize) -> Result<Vec<Match>> {
        let vec = self.query_vector(query.into())?;
        Ok(self.top_k(&vec, k, |_| false))
    }

    /// Like [`search`](Self::search), but never returns any of `exclude`.
    pub fn search_excluding<'a>(
        &self,
        query: impl Into<Query<'a>>,
        k: usize,
        exclude: &[&str],
    ) -> Result<Vec<Match>> {
        let vec = self.query_vector(query.into())?;
        let excluded: Vec<usize> = exclude
            .iter()
            .filter_map(|w| self.index.get(*w).copied())
            .collect();
        Ok(self.top_k(&vec, k, |i| excluded.contains(&i)))
    }

    /// Words that are to `c` as `b` is to `a`: the nearest neighbors of
    /// `b - a + c`, leaving out the three inputs.
    pub fn analogy(&self, a: &str, b: &str, c: &str, k: usize) -> Result<Vec<Match>> {
        let (ia, ib, ic) = (self.lookup(a)?, self.lookup(b)?, self.lookup(c)?);
        let zero_nan = |e: f32| if e.is_nan() { 0.0 } else { e };
        let mut vec: Vec<f32> = (0..self.size)
            .map(|i| zero_nan(self.row(ib)[i]) - zero_nan(self.row(ia)[i]) + zero_nan(self.row(ic)[i]))
            .collect();
        normalize(&mut vec);
        Ok(self.top_k(&vec, k, |i| i == ia || i == ib || i == ic))
    }

    /// Scores every word against `query`, keeping the best `k` in a min-heap.
    /// Among equal scores the word with the lower id wins.
    fn top_k(&self, query: &[f32], k: usize, skip: impl Fn(usize) -> bool) -> Vec<Match> {
        if k == 0 {
            return vec![];
        }
        type Entry = Reverse<(OrderedFloat<f32>, Reverse<usize>)>;
        let mut heap: BinaryHeap<Entry> = BinaryHeap::with_capacity(k.min(self.num_words()) + 1);
        for c in 0..self.num_words() {
            if skip(c) {
                continue;
            }
            let entry = Reverse((OrderedFloat(dot(query, self.row(c))), Reverse(c)));
            if heap.len() < k {
                heap.push(entry);
            } else if heap.peek().is_some_and(|worst| entry < *worst) {
                heap.pop();
                heap.push(entry);
            }
        }

        let mut best = heap.into_vec();
        best.sort();
        best.into_iter()
            .enumerate()
            .map(|(rank, Reverse((score, Reverse(c))))| Match {
                word: self.vocab[c].clone(),
                score: score.into_inner(),
                rank: rank + 1,
            })
            .collect()
    }
}
