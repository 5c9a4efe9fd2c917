//! The word2vec neural network and its multi-threaded training loop.
//!
//! Worker threads update the shared weight matrices without any locking,
//! "Hogwild" style. Each weight is a [`Real`], an `f32` stored in an
//! `AtomicU32` and accessed with relaxed loads and stores, so concurrent
//! updates can be lost but never tear. With more than one thread the result
//! therefore depends on scheduling; with one thread it is deterministic.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use aligned_box::AlignedBox;
use tracing::debug;

use crate::huffman::HuffmanTree;
use crate::progress::{CancelToken, ProgressListener, Stage};
use crate::train::{NetworkType, OutputLayer, TrainerConfig};
use crate::vocab::Vocabulary;
use crate::{Error, Result};

pub(crate) const MAX_SENTENCE_LENGTH: usize = 1000;

const EXP_TABLE_SIZE: usize = 1000;
const MAX_EXP: real = 6.0;

/// Alignment of the weight matrices, in bytes.
const ALIGNMENT: usize = 128;

const UNIGRAM_POWER: f64 = 0.75;
const UNIGRAM_SLOTS_PER_WORD: usize = 1000;
const MAX_UNIGRAM_TABLE_SIZE: usize = 100_000_000;

/// The learning rate never drops below this fraction of its starting value.
const MIN_ALPHA_FRACTION: real = 0.01;

/// Threads publish their word counts (and recompute alpha) this often.
const PROGRESS_INTERVAL: u64 = 10_000;

#[allow(non_camel_case_types)]
pub(crate) type real = f32; // Precision of float numbers

#[derive(Default)]
#[repr(transparent)]
pub(crate) struct Real {
    bits: AtomicU32,
}

impl Real {
    pub(crate) fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Not atomic as a whole: another thread's update between the load and
    /// the store is lost.
    pub(crate) fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// The linear congruential generator from the original word2vec.
pub(crate) struct Rng(pub(crate) u64);

impl Rng {
    pub(crate) fn rand_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(25214903917).wrapping_add(11);
        self.0
    }

    /// Get a uniformly distributed random number in `0.0 .. 1.0`.
    pub(crate) fn rand_real(&mut self) -> real {
        (self.rand_u64() & 0xFFFF) as real / 65536.0
    }
}

fn alloc_weights(len: usize) -> Result<AlignedBox<[Real]>> {
    // aligned_box refuses zero-sized allocations; a one-word vocabulary has no
    // internal Huffman nodes.
    AlignedBox::slice_from_default(ALIGNMENT, len.max(1))
        .map_err(|err| Error::config(format!("unable to allocate {len} weights: {err:?}")))
}

/// The output side of the network.
enum Output {
    /// One predictor per internal Huffman node; `syn1` row `i` belongs to node `i`.
    Hierarchical {
        tree: HuffmanTree,
        syn1: AlignedBox<[Real]>,
    },
    /// One output vector per word, trained against randomly drawn words.
    Negative {
        samples: usize,
        /// Word ids, each repeated in proportion to `count^0.75`.
        table: Vec<u32>,
        syn1neg: AlignedBox<[Real]>,
    },
}

pub(crate) struct Network<'a> {
    vocab: &'a Vocabulary,
    network_type: NetworkType,
    layer1_size: usize,
    window: usize,
    iterations: usize,
    sample: real,
    starting_alpha: real,
    /// Words (after filtering out unknown words) in one pass over the corpus.
    train_words: u64,
    word_count_actual: AtomicU64,
    /// The learned word-vectors.
    syn0: AlignedBox<[Real]>,
    output: Output,
    exp_table: Vec<real>,
    start: Instant,
    listener: &'a dyn ProgressListener,
    cancel: &'a CancelToken,
}

impl<'a> Network<'a> {
    pub(crate) fn new(
        config: &TrainerConfig,
        vocab: &'a Vocabulary,
        tree: HuffmanTree,
        train_words: u64,
        listener: &'a dyn ProgressListener,
        cancel: &'a CancelToken,
    ) -> Result<Self> {
        let vocab_size = vocab.len();
        let layer1_size = config.layer_size;
        let matrix_len = vocab_size.checked_mul(layer1_size).ok_or_else(|| {
            Error::config(format!(
                "{vocab_size} words of {layer1_size} dimensions do not fit in memory"
            ))
        })?;

        let syn0 = alloc_weights(matrix_len)?;
        let mut rng = Rng(1);
        for w in syn0.iter().take(matrix_len) {
            w.set((rng.rand_real() - 0.5) / layer1_size as real);
        }

        let output = match config.output {
            OutputLayer::HierarchicalSoftmax => Output::Hierarchical {
                syn1: alloc_weights(tree.num_internal_nodes() * layer1_size)?,
                tree,
            },
            OutputLayer::NegativeSampling { samples } => Output::Negative {
                samples,
                table: unigram_table(vocab),
                syn1neg: alloc_weights(matrix_len)?,
            },
        };

        let exp_table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let x = (i as f64 / EXP_TABLE_SIZE as f64 * 2.0 - 1.0) * MAX_EXP as f64;
                let e = x.exp();
                (e / (e + 1.0)) as real // Precompute f(x) = x / (x + 1)
            })
            .collect();

        Ok(Network {
            vocab,
            network_type: config.network,
            layer1_size,
            window: config.window,
            iterations: config.iterations,
            sample: config.sample,
            starting_alpha: config.starting_alpha(),
            train_words,
            word_count_actual: AtomicU64::new(0),
            syn0,
            output,
            exp_table,
            start: Instant::now(),
            listener,
            cancel,
        })
    }

    /// Runs every pass over the corpus, one thread per shard, and blocks
    /// until all threads finish.
    pub(crate) fn train(&self, shards: &[Vec<Vec<usize>>]) -> Result<()> {
        let this: &Network = self;
        thread::scope(|s| {
            let threads = shards
                .iter()
                .enumerate()
                .map(|(id, shard)| s.spawn(move || this.train_model_thread(id, shard)))
                .collect::<Vec<_>>();
            let mut result = Ok(());
            for thread in threads {
                match thread.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        if result.is_ok() {
                            result = Err(err);
                        }
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            result
        })
    }

    /// Consumes the network, returning the learned word vectors.
    pub(crate) fn into_embeddings(self) -> Vec<f32> {
        let len = self.vocab.len() * self.layer1_size;
        self.syn0.iter().take(len).map(Real::get).collect()
    }

    fn syn0_row(&self, word: usize) -> &[Real] {
        &self.syn0[word * self.layer1_size..][..self.layer1_size]
    }

    /// Approximate the logistic function, 1 / (1 + e^-x).
    fn sigmoid(&self, x: real) -> real {
        if x > MAX_EXP {
            1.0
        } else if x < -MAX_EXP {
            0.0
        } else {
            let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as real / MAX_EXP / 2.0)) as usize;
            self.exp_table[i.min(EXP_TABLE_SIZE - 1)]
        }
    }

    /// Copies the words of `next_sentence` into `sen`, randomly discarding
    /// frequent words while keeping the ranking the same.
    fn sample_sentence(
        &self,
        next_sentence: &[usize],
        rng: &mut Rng,
        word_count: &mut u64,
        sen: &mut Vec<usize>,
    ) {
        sen.clear();
        let total = self.vocab.total_count() as real;
        for &word in next_sentence {
            *word_count += 1;
            if self.sample > 0.0 {
                // Keep with probability sqrt(t/f) + t/f, f = count / total.
                let f = self.vocab.count(word) as real;
                let k = self.sample * total;
                let ran = ((f / k).sqrt() + 1.0) * k / f;
                if ran < rng.rand_real() {
                    continue;
                }
            }
            sen.push(word);
        }
    }

    fn report_progress(&self, word_count: u64, last_word_count: &mut u64, alpha: &mut real) {
        let n = word_count - *last_word_count;
        let word_count_actual = self.word_count_actual.fetch_add(n, Ordering::Relaxed) + n;
        *last_word_count = word_count;

        let expected = (self.iterations as u64 * self.train_words + 1) as real;
        let progress = word_count_actual as real / expected;
        debug!(
            alpha = *alpha,
            progress = %format!("{:.2}%", progress * 100.0),
            words_per_sec = %format!(
                "{:.2}k",
                word_count_actual as f64 / ((self.start.elapsed().as_secs_f64() + 1.0) * 1000.0)
            ),
            "training"
        );
        self.listener
            .update(Stage::TrainNetwork, f64::from(progress.min(1.0)));
        *alpha = self.starting_alpha * (1.0 - progress).max(MIN_ALPHA_FRACTION);
    }

    fn train_model_thread(&self, id: usize, sentences: &[Vec<usize>]) -> Result<()> {
        let dim = self.layer1_size;
        let mut neu1: Vec<real> = vec![0.0; dim];
        let mut neu1e: Vec<real> = vec![0.0; dim];

        let mut rng = Rng(id as u64);
        let mut alpha = self.starting_alpha;
        let mut sen: Vec<usize> = Vec::with_capacity(MAX_SENTENCE_LENGTH);
        let mut word_count: u64 = 0;
        let mut last_word_count: u64 = 0;

        for _epoch in 0..self.iterations {
            for sentence in sentences {
                self.cancel.check()?;
                self.sample_sentence(sentence, &mut rng, &mut word_count, &mut sen);

                for sentence_position in 0..sen.len() {
                    // Dynamic window: the effective radius is uniform in 1..=window.
                    let radius = self.window - rng.rand_u64() as usize % self.window;
                    let start = sentence_position.saturating_sub(radius);
                    let stop = (sentence_position + radius + 1).min(sen.len());
                    match self.network_type {
                        NetworkType::Cbow => self.train_cbow(
                            &sen,
                            sentence_position,
                            start..stop,
                            alpha,
                            &mut rng,
                            &mut neu1,
                            &mut neu1e,
                        ),
                        NetworkType::SkipGram => self.train_skip_gram(
                            &sen,
                            sentence_position,
                            start..stop,
                            alpha,
                            &mut rng,
                            &mut neu1,
                            &mut neu1e,
                        ),
                    }
                }

                if word_count - last_word_count > PROGRESS_INTERVAL {
                    self.report_progress(word_count, &mut last_word_count, &mut alpha);
                }
            }
        }
        self.word_count_actual
            .fetch_add(word_count - last_word_count, Ordering::Relaxed);
        Ok(())
    }

    /// Predict `sen[position]` from the average of the words around it.
    #[allow(clippy::too_many_arguments)]
    fn train_cbow(
        &self,
        sen: &[usize],
        position: usize,
        context: Range<usize>,
        alpha: real,
        rng: &mut Rng,
        neu1: &mut [real],
        neu1e: &mut [real],
    ) {
        // in -> hidden
        neu1.fill(0.0);
        neu1e.fill(0.0);
        let mut cw = 0;
        for c in context.clone() {
            if c == position {
                continue;
            }
            for (h, w) in neu1.iter_mut().zip(self.syn0_row(sen[c])) {
                *h += w.get();
            }
            cw += 1;
        }
        if cw == 0 {
            return;
        }
        for h in neu1.iter_mut() {
            *h /= cw as real;
        }

        self.propagate(sen[position], neu1, alpha, rng, neu1e);

        // hidden -> in
        for c in context {
            if c == position {
                continue;
            }
            for (w, &e) in self.syn0_row(sen[c]).iter().zip(neu1e.iter()) {
                w.add(e);
            }
        }
    }

    /// Predict `sen[position]` from each word around it, one at a time.
    #[allow(clippy::too_many_arguments)]
    fn train_skip_gram(
        &self,
        sen: &[usize],
        position: usize,
        context: Range<usize>,
        alpha: real,
        rng: &mut Rng,
        neu1: &mut [real],
        neu1e: &mut [real],
    ) {
        let word = sen[position];
        for c in context {
            if c == position {
                continue;
            }
            let row = self.syn0_row(sen[c]);
            for (h, w) in neu1.iter_mut().zip(row) {
                *h = w.get();
            }
            neu1e.fill(0.0);
            self.propagate(word, neu1, alpha, rng, neu1e);

            // Learn weights input -> hidden
            for (w, &e) in row.iter().zip(neu1e.iter()) {
                w.add(e);
            }
        }
    }

    /// Runs the output layer for target `word` given the hidden activations,
    /// updating the output weights and accumulating the error on the hidden
    /// layer into `neu1e`.
    fn propagate(
        &self,
        word: usize,
        hidden: &[real],
        alpha: real,
        rng: &mut Rng,
        neu1e: &mut [real],
    ) {
        let dim = self.layer1_size;
        match &self.output {
            Output::Hierarchical { tree, syn1 } => {
                let node = tree.node(word);
                for (&point, &bit) in node.point.iter().zip(node.code.iter()) {
                    let row = &syn1[point as usize * dim..][..dim];
                    // Propagate hidden -> output
                    let f = dot(hidden, row);
                    if f <= -MAX_EXP || f >= MAX_EXP {
                        continue;
                    }
                    // 'g' is the gradient (d/df loss) multiplied by the learning rate
                    let g = (1.0 - bit as real - self.sigmoid(f)) * alpha;
                    // Propagate errors output -> hidden
                    for (e, w) in neu1e.iter_mut().zip(row) {
                        *e += g * w.get();
                    }
                    // Learn weights hidden -> output
                    for (w, &h) in row.iter().zip(hidden) {
                        w.add(g * h);
                    }
                }
            }
            Output::Negative {
                samples,
                table,
                syn1neg,
            } => {
                for d in 0..=*samples {
                    let (target, label) = if d == 0 {
                        (word, 1.0)
                    } else {
                        let r = rng.rand_u64();
                        let target = table[(r >> 16) as usize % table.len()] as usize;
                        if target == word {
                            continue;
                        }
                        (target, 0.0)
                    };
                    let row = &syn1neg[target * dim..][..dim];
                    let f = dot(hidden, row);
                    let g = (label - self.sigmoid(f)) * alpha;
                    for (e, w) in neu1e.iter_mut().zip(row) {
                        *e += g * w.get();
                    }
                    for (w, &h) in row.iter().zip(hidden) {
                        w.add(g * h);
                    }
                }
            }
        }
    }
}

fn dot(a: &[real], b: &[Real]) -> real {
    a.iter().zip(b).map(|(&a, b)| a * b.get()).sum()
}

/// Builds the table negative samples are drawn from: word `i` fills a share
/// of the slots proportional to `count_i ^ 0.75`.
fn unigram_table(vocab: &Vocabulary) -> Vec<u32> {
    let table_size = (vocab.len() * UNIGRAM_SLOTS_PER_WORD).min(MAX_UNIGRAM_TABLE_SIZE);
    let train_words_pow = vocab
        .iter()
        .map(|vw| (vw.count as f64).powf(UNIGRAM_POWER))
        .sum::<f64>();

    let mut table = Vec::with_capacity(table_size);
    let mut i = 0;
    let mut d1 = (vocab.count(i) as f64).powf(UNIGRAM_POWER) / train_words_pow;
    for a in 0..table_size {
        table.push(i as u32);
        if (a as f64 / table_size as f64) > d1 && i + 1 < vocab.len() {
            i += 1;
            d1 += (vocab.count(i) as f64).powf(UNIGRAM_POWER) / train_words_pow;
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::vocab::VocabularyBuilder;

    fn vocab(pairs: &[(&str, u64)]) -> Vocabulary {
        let counts: HashMap<String, u64> = pairs.iter().map(|&(w, c)| (w.to_string(), c)).collect();
        VocabularyBuilder::from_counts(1, counts).build().unwrap()
    }

    #[test]
    fn rng_matches_word2vec() {
        let mut rng = Rng(0);
        assert_eq!(rng.rand_u64(), 11);
        assert_eq!(rng.rand_u64(), 11 * 25214903917 + 11);
        let r = rng.rand_real();
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn real_add() {
        let x = Real::default();
        x.add(1.5);
        x.add(-0.25);
        assert_eq!(x.get(), 1.25);
    }

    #[test]
    fn unigram_table_is_proportional() {
        let v = vocab(&[("a", 16), ("b", 1)]);
        let table = unigram_table(&v);
        assert_eq!(table.len(), 2 * UNIGRAM_SLOTS_PER_WORD);
        let a = table.iter().filter(|&&i| i == 0).count() as f64;
        let b = table.iter().filter(|&&i| i == 1).count() as f64;
        // 16^0.75 : 1^0.75 == 8 : 1
        assert!((a / b - 8.0).abs() < 0.5, "ratio {}", a / b);
    }

    #[test]
    fn sigmoid_table() {
        let v = vocab(&[("a", 1)]);
        let config = TrainerConfig {
            layer_size: 4,
            ..TrainerConfig::default()
        };
        let tree = HuffmanTree::new(&v);
        let cancel = CancelToken::new();
        let net = Network::new(&config, &v, tree, 1, &(), &cancel).unwrap();
        assert!((net.sigmoid(0.0) - 0.5).abs() < 0.01);
        assert!(net.sigmoid(5.9) > 0.99);
        assert!(net.sigmoid(-5.9) < 0.01);
        assert_eq!(net.sigmoid(100.0), 1.0);
        assert_eq!(net.sigmoid(-100.0), 0.0);
    }

    #[test]
    fn initial_weights_are_small() {
        let v = vocab(&[("a", 3), ("b", 2), ("c", 1)]);
        let config = TrainerConfig {
            layer_size: 10,
            output: OutputLayer::HierarchicalSoftmax,
            ..TrainerConfig::default()
        };
        let tree = HuffmanTree::new(&v);
        let cancel = CancelToken::new();
        let net = Network::new(&config, &v, tree, 6, &(), &cancel).unwrap();
        let embeddings = net.into_embeddings();
        assert_eq!(embeddings.len(), 30);
        assert!(embeddings.iter().all(|&x| x.abs() < 0.05));
        assert!(embeddings.iter().any(|&x| x != 0.0));
    }

    fn network<'a>(
        config: &TrainerConfig,
        v: &'a Vocabulary,
        train_words: u64,
        cancel: &'a CancelToken,
    ) -> Network<'a> {
        Network::new(config, v, HuffmanTree::new(v), train_words, &(), cancel).unwrap()
    }

    fn skewed_vocab() -> Vocabulary {
        let mut pairs = vec![("the".to_string(), 1_000_000)];
        pairs.extend((0..10).map(|i| (format!("r{i}"), 1)));
        let pairs: Vec<(&str, u64)> = pairs.iter().map(|(w, c)| (w.as_str(), *c)).collect();
        vocab(&pairs)
    }

    #[test]
    fn subsampling_drops_only_frequent_words() {
        let v = skewed_vocab();
        let the = v.id("the").unwrap();
        let rare: Vec<usize> = (0..10).map(|i| v.id(&format!("r{i}")).unwrap()).collect();
        let mut sentence = vec![the; 500];
        sentence.extend(&rare);

        let config = TrainerConfig {
            layer_size: 4,
            output: OutputLayer::HierarchicalSoftmax,
            sample: 1e-3,
            ..TrainerConfig::default()
        };
        let cancel = CancelToken::new();
        let net = network(&config, &v, v.total_count(), &cancel);
        let mut rng = Rng(7);
        let mut word_count = 0;
        let mut sen = vec![];
        net.sample_sentence(&sentence, &mut rng, &mut word_count, &mut sen);

        assert_eq!(word_count, 510);
        // Keep probability for "the" is (sqrt(1000) + 1) / 1000, about 3%.
        let kept_the = sen.iter().filter(|&&w| w == the).count();
        assert!(kept_the > 0 && kept_the < 100, "kept {kept_the} of 500");
        for r in &rare {
            assert!(sen.contains(r));
        }
        // Order is preserved.
        assert_eq!(&sen[kept_the..], &rare[..]);
    }

    #[test]
    fn zero_sample_keeps_everything() {
        let v = skewed_vocab();
        let the = v.id("the").unwrap();
        let sentence = vec![the; 300];
        let config = TrainerConfig {
            layer_size: 4,
            output: OutputLayer::HierarchicalSoftmax,
            sample: 0.0,
            ..TrainerConfig::default()
        };
        let cancel = CancelToken::new();
        let net = network(&config, &v, v.total_count(), &cancel);
        let mut word_count = 0;
        let mut sen = vec![];
        net.sample_sentence(&sentence, &mut Rng(7), &mut word_count, &mut sen);
        assert_eq!(sen, sentence);
        assert_eq!(word_count, 300);
    }

    #[test]
    fn alpha_decays_linearly_to_floor() {
        let v = vocab(&[("a", 3), ("b", 2)]);
        let config = TrainerConfig {
            layer_size: 4,
            iterations: 5,
            ..TrainerConfig::default()
        };
        let cancel = CancelToken::new();
        let net = network(&config, &v, 100, &cancel);
        let start = config.starting_alpha();
        let mut alpha = start;
        let mut last_word_count = 0;

        net.report_progress(250, &mut last_word_count, &mut alpha);
        assert_eq!(last_word_count, 250);
        let expected = start * (1.0 - 250.0 / 501.0);
        assert!((alpha - expected).abs() < 1e-6, "{alpha} != {expected}");

        net.report_progress(1000, &mut last_word_count, &mut alpha);
        assert_eq!(alpha, start * MIN_ALPHA_FRACTION);
    }
}
