//! Word vectors: train them from text, store them, and search them.
//!
//! Training follows word2vec: a vocabulary is counted from the corpus, a
//! Huffman code is built over it, and a CBOW or Skip-gram network is trained
//! with hierarchical softmax or negative sampling on several threads at once.
//! The resulting [`VectorStore`] reads and writes the word2vec binary and
//! text formats, and a [`SearchEngine`] answers cosine-similarity queries.

pub mod corpus;
mod error;
pub mod huffman;
mod mmap;
mod network;
mod progress;
pub mod search;
mod store;
mod train;
pub mod vocab;

pub use error::{Error, Result};
pub use huffman::{HuffmanNode, HuffmanTree};
pub use mmap::ONE_GB;
pub use progress::{CancelToken, ProgressListener, Stage};
pub use search::{Match, Query, SearchEngine};
pub use store::{ByteOrder, VectorStore};
pub use train::{NetworkType, OutputLayer, Trainer, TrainerConfig};
pub use vocab::{read_counts, VocabWord, Vocabulary, VocabularyBuilder};
