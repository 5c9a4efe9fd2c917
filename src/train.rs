//! Training configuration and the training entry point.

use std::collections::HashMap;

use tracing::info;

use crate::huffman::HuffmanTree;
use crate::network::{Network, MAX_SENTENCE_LENGTH};
use crate::progress::{CancelToken, ProgressListener, Stage};
use crate::store::VectorStore;
use crate::vocab::{Vocabulary, VocabularyBuilder};
use crate::{Error, Result};

/// Which way round the network predicts words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    /// Continuous bag of words: predict a word from the average of its
    /// context. Faster, slightly better for frequent words.
    Cbow,
    /// Predict a word from each context word separately. Slower, better for
    /// rare words.
    SkipGram,
}

impl NetworkType {
    pub fn default_alpha(self) -> f32 {
        match self {
            NetworkType::Cbow => 0.05,
            NetworkType::SkipGram => 0.025,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayer {
    /// A binary decision at each node on the word's Huffman path.
    HierarchicalSoftmax,
    /// The word itself against `samples` words drawn at random.
    NegativeSampling { samples: usize },
}

/// Everything that controls a training run.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub network: NetworkType,
    pub output: OutputLayer,
    /// Size of word vectors.
    pub layer_size: usize,
    /// Max skip length between words.
    pub window: usize,
    /// Number of passes over the corpus.
    pub iterations: usize,
    /// Threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled; useful
    /// range is (0, 1e-5). Zero disables down-sampling.
    pub sample: f32,
    pub threads: usize,
    /// Discard words that appear less than this many times.
    pub min_count: u64,
    /// Starting learning rate; defaults to [`NetworkType::default_alpha`].
    pub alpha: Option<f32>,
    /// Word counts to use instead of counting the training sentences.
    pub vocab: Option<HashMap<String, u64>>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            network: NetworkType::SkipGram,
            output: OutputLayer::NegativeSampling { samples: 5 },
            layer_size: 100,
            window: 5,
            iterations: 5,
            sample: 1e-3,
            threads: 12,
            min_count: 5,
            alpha: None,
            vocab: None,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        let check = |ok: bool, msg: &str| if ok { Ok(()) } else { Err(Error::config(msg)) };
        check(self.layer_size > 0, "layer size must be positive")?;
        check(self.window > 0, "window must be positive")?;
        check(self.iterations > 0, "iterations must be positive")?;
        check(self.threads > 0, "thread count must be positive")?;
        check(
            self.sample.is_finite() && self.sample >= 0.0,
            "sample threshold must be a non-negative number",
        )?;
        if let OutputLayer::NegativeSampling { samples } = self.output {
            check(samples > 0, "negative sampling needs at least one sample")?;
        }
        if let Some(alpha) = self.alpha {
            check(
                alpha.is_finite() && alpha > 0.0,
                "learning rate must be a positive number",
            )?;
        }
        Ok(())
    }

    pub fn starting_alpha(&self) -> f32 {
        self.alpha.unwrap_or(self.network.default_alpha())
    }
}

/// Trains word vectors.
///
/// ```no_run
/// use wordvec::{Trainer, TrainerConfig};
///
/// let sentences = vec![vec!["hello", "world"]];
/// let trainer = Trainer::new(TrainerConfig { min_count: 1, ..TrainerConfig::default() })?;
/// let vectors = trainer.train(&sentences)?;
/// # Ok::<(), wordvec::Error>(())
/// ```
pub struct Trainer {
    config: TrainerConfig,
    listener: Box<dyn ProgressListener>,
    cancel: CancelToken,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Trainer {
            config,
            listener: Box::new(()),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_listener(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.listener = Box::new(listener);
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// A handle that stops a running [`train`](Self::train) call with
    /// [`Error::Interrupted`]. Workers check it between sentences.
    ///
    /// Cancellation is permanent: once the token fires, every later `train`
    /// call on this trainer fails with `Interrupted` too. Build a new
    /// `Trainer` to train again.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Builds the vocabulary and Huffman tree, then trains the network over
    /// `sentences`. Words missing from the vocabulary are skipped.
    pub fn train<S, T>(&self, sentences: &[S]) -> Result<VectorStore>
    where
        S: AsRef<[T]>,
        T: AsRef<str>,
    {
        let listener = &*self.listener;
        let cancel = &self.cancel;

        listener.update(Stage::AcquireVocab, 0.0);
        cancel.check()?;
        let builder = match &self.config.vocab {
            Some(counts) => VocabularyBuilder::from_counts(self.config.min_count, counts.clone()),
            None => {
                let mut builder = VocabularyBuilder::new(self.config.min_count);
                builder.add_sentences(sentences.iter().map(|s| s.as_ref()));
                builder
            }
        };
        listener.update(Stage::AcquireVocab, 1.0);

        listener.update(Stage::FilterSortVocab, 0.0);
        cancel.check()?;
        let vocab = builder.build()?;
        listener.update(Stage::FilterSortVocab, 1.0);

        let counts: Vec<u64> = vocab.iter().map(|vw| vw.count).collect();
        let tree = HuffmanTree::encode(&counts, listener, cancel)?;

        let (shards, train_words) = self.shard_sentences(&vocab, sentences);
        info!(
            vocab_size = vocab.len(),
            train_words,
            threads = shards.len(),
            "starting training"
        );
        listener.update(Stage::TrainNetwork, 0.0);
        let network = Network::new(&self.config, &vocab, tree, train_words, listener, cancel)?;
        network.train(&shards)?;
        listener.update(Stage::TrainNetwork, 1.0);
        let embeddings = network.into_embeddings();
        info!("finished training");

        VectorStore::new(vocab.into_words(), self.config.layer_size, embeddings)
    }

    /// Converts the sentences to word ids and splits them into one
    /// contiguous run of sentences per thread. Sentences longer than
    /// `MAX_SENTENCE_LENGTH` are cut into pieces.
    ///
    /// Also returns the number of words kept.
    fn shard_sentences<S, T>(
        &self,
        vocab: &Vocabulary,
        sentences: &[S],
    ) -> (Vec<Vec<Vec<usize>>>, u64)
    where
        S: AsRef<[T]>,
        T: AsRef<str>,
    {
        let mut train_words = 0;
        let mut all: Vec<Vec<usize>> = vec![];
        for sentence in sentences {
            let ids: Vec<usize> = sentence
                .as_ref()
                .iter()
                .filter_map(|word| vocab.id(word.as_ref()))
                .collect();
            train_words += ids.len() as u64;
            all.extend(ids.chunks(MAX_SENTENCE_LENGTH).map(<[usize]>::to_vec));
        }

        let num_threads = self.config.threads;
        let mut threads: Vec<Vec<Vec<usize>>> = (0..num_threads)
            .rev()
            .map(|i| {
                let start = all.len() * i / num_threads;
                all.split_off(start)
            })
            .collect();
        threads.reverse();
        (threads, train_words)
    }
}
