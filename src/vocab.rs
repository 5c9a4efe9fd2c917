//! Word counting and the frequency-ordered vocabulary.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabWord {
    pub word: String,
    /// Number of occurrences in the training data (or in the supplied counts).
    pub count: u64,
}

/// The words a model knows about, most frequent first.
///
/// A word's position in this list is its id; ids index every per-word table
/// (embedding rows, Huffman codes, negative-sampling weights).
#[derive(Debug, Clone)]
pub struct Vocabulary {
    words: Vec<VocabWord>,
    index: HashMap<String, usize>,
    total_count: u64,
}

impl Vocabulary {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Returns the word with the given id. Panics if `id` is out of range.
    pub fn word(&self, id: usize) -> &str {
        &self.words[id].word
    }

    pub fn count(&self, id: usize) -> u64 {
        self.words[id].count
    }

    /// Get the id for a word. Exact match only, case-sensitive.
    pub fn id(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(word)
    }

    /// Sum of the counts of all words in the vocabulary.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn iter(&self) -> impl Iterator<Item = &VocabWord> + '_ {
        self.words.iter()
    }

    /// Consumes the vocabulary, returning the words in id order.
    pub fn into_words(self) -> Vec<String> {
        self.words.into_iter().map(|vw| vw.word).collect()
    }

    /// Writes one `word count` line per word, in id order.
    pub fn save(&self, vocab_file: &Path) -> Result<()> {
        let mut fo = BufWriter::new(File::create(vocab_file)?);
        for vw in &self.words {
            writeln!(fo, "{} {}", vw.word, vw.count)?;
        }
        fo.flush()?;
        Ok(())
    }
}

/// Reads a vocabulary file written by [`Vocabulary::save`] back into word counts,
/// suitable for [`VocabularyBuilder::from_counts`].
pub fn read_counts(vocab_file: &Path) -> Result<HashMap<String, u64>> {
    let fin = BufReader::new(File::open(vocab_file)?);
    let mut counts = HashMap::new();
    for (line_num, line) in fin.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = line.split_whitespace().collect::<Vec<&str>>();
        if fields.len() != 2 {
            return Err(Error::format(format!(
                "vocabulary file syntax error on line {}",
                line_num + 1
            )));
        }
        let count = fields[1].parse::<u64>().map_err(|_| {
            Error::format(format!(
                "unrecognized frequency number format on line {}",
                line_num + 1
            ))
        })?;
        *counts.entry(fields[0].to_string()).or_insert(0) += count;
    }
    Ok(counts)
}

/// Counts tokens and produces a [`Vocabulary`].
#[derive(Debug, Default)]
pub struct VocabularyBuilder {
    min_count: u64,
    counts: HashMap<String, u64>,
}

impl VocabularyBuilder {
    /// Words occurring less than `min_count` times will be discarded.
    pub fn new(min_count: u64) -> Self {
        VocabularyBuilder {
            min_count,
            counts: HashMap::new(),
        }
    }

    /// Start from precomputed counts instead of counting a corpus.
    pub fn from_counts(min_count: u64, counts: HashMap<String, u64>) -> Self {
        VocabularyBuilder { min_count, counts }
    }

    pub fn add_word(&mut self, word: &str) {
        if let Some(count) = self.counts.get_mut(word) {
            *count += 1;
        } else {
            self.counts.insert(word.to_string(), 1);
        }
    }

    pub fn add_sentences<I, S, T>(&mut self, sentences: I)
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        for sentence in sentences {
            for word in sentence {
                self.add_word(word.as_ref());
            }
        }
    }

    /// Filters out rare words and sorts the rest by count, most frequent
    /// first. Ties are broken by comparing the words, so the order (and
    /// everything derived from it) is deterministic.
    pub fn build(self) -> Result<Vocabulary> {
        let min_count = self.min_count;
        let mut words: Vec<VocabWord> = self
            .counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count)
            .map(|(word, count)| VocabWord { word, count })
            .collect();
        if words.is_empty() {
            return Err(Error::config(format!(
                "no words occur at least {min_count} times"
            )));
        }
        words.sort_unstable_by(|a, b| {
            (Reverse(a.count), &a.word).cmp(&(Reverse(b.count), &b.word))
        });

        let index = words
            .iter()
            .enumerate()
            .map(|(i, vw)| (vw.word.clone(), i))
            .collect();
        let total_count = words.iter().map(|vw| vw.count).sum();
        info!(vocab_size = words.len(), total_count, "built vocabulary");
        Ok(Vocabulary {
            words,
            index,
            total_count,
        })
    }
}
