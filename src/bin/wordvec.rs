use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use wordvec::{
    corpus, read_counts, NetworkType, OutputLayer, Stage, Trainer, TrainerConfig,
    VocabularyBuilder,
};

#[derive(Parser)]
#[command(about = "WORD VECTOR estimation toolkit", long_about = None)]
struct Options {
    /// Use text data from FILE to train the model
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Use FILE to save the resulting word vectors
    #[arg(long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Set size of word vectors; default is 100
    #[arg(long = "size", default_value_t = 100)]
    layer1_size: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled; default
    /// is 1e-3, useful range is (0, 1e-5)
    #[arg(long, default_value_t = 1e-3)]
    sample: f32,

    /// Use Hierarchical Softmax instead of negative sampling
    #[arg(long)]
    hs: bool,

    /// Number of negative examples; default is 5, common values are 3 - 10
    #[arg(long, default_value_t = 5)]
    negative: usize,

    /// Use N threads
    #[arg(long = "threads", value_name = "N", default_value_t = 12)]
    num_threads: usize,

    /// Run more training iterations
    #[arg(long, default_value_t = 5)]
    iter: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Set the starting learning rate; default is 0.025 for skip-gram and 0.05 for CBOW
    #[arg(long)]
    alpha: Option<f32>,

    /// Save the resulting vectors in binary mode
    #[arg(long)]
    binary: bool,

    /// The vocabulary will be saved to FILE
    #[arg(long = "save-vocab", value_name = "FILE")]
    save_vocab_file: Option<PathBuf>,

    /// The vocabulary will be read from FILE, not constructed from the training data
    #[arg(long = "read-vocab", value_name = "FILE")]
    read_vocab_file: Option<PathBuf>,

    /// Use the continuous bag of words model (otherwise, use skip-gram model)
    #[arg(long)]
    cbow: bool,
}

impl Options {
    fn trainer_config(&self) -> Result<TrainerConfig> {
        let output = if self.hs {
            OutputLayer::HierarchicalSoftmax
        } else if self.negative > 0 {
            OutputLayer::NegativeSampling {
                samples: self.negative,
            }
        } else {
            bail!("--negative 0 needs --hs, or there is nothing to train");
        };
        Ok(TrainerConfig {
            network: if self.cbow {
                NetworkType::Cbow
            } else {
                NetworkType::SkipGram
            },
            output,
            layer_size: self.layer1_size,
            window: self.window,
            iterations: self.iter,
            sample: self.sample,
            threads: self.num_threads,
            min_count: self.min_count,
            alpha: self.alpha,
            vocab: None,
        })
    }
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(1000);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")
            .context("bad progress bar template")?,
    );
    Ok(bar)
}

fn run(options: &Options) -> Result<()> {
    let mut config = options.trainer_config()?;

    let sentences = corpus::read_sentences(&options.train_file).with_context(|| {
        format!("error reading training file {}", options.train_file.display())
    })?;

    if let Some(path) = &options.read_vocab_file {
        let counts = read_counts(path)
            .with_context(|| format!("error reading vocabulary file {}", path.display()))?;
        config.vocab = Some(counts);
    }

    if let Some(path) = &options.save_vocab_file {
        let builder = match config.vocab.take() {
            Some(counts) => VocabularyBuilder::from_counts(config.min_count, counts),
            None => {
                let mut builder = VocabularyBuilder::new(config.min_count);
                builder.add_sentences(&sentences);
                builder
            }
        };
        let vocab = builder.build()?;
        vocab
            .save(path)
            .with_context(|| format!("error writing vocabulary file {}", path.display()))?;
        config.vocab = Some(vocab.iter().map(|vw| (vw.word.clone(), vw.count)).collect());
    }

    let bar = progress_bar()?;
    let listener = {
        let bar = bar.clone();
        move |stage: Stage, progress: f64| {
            bar.set_message(format!("{stage:?}"));
            bar.set_position((progress.clamp(0.0, 1.0) * 1000.0) as u64);
        }
    };
    let trainer = Trainer::new(config)?.with_listener(listener);
    let vectors = trainer.train(&sentences)?;
    bar.finish_and_clear();

    if options.binary {
        vectors.save_bin(&options.output_file)
    } else {
        vectors.save_text(&options.output_file)
    }
    .with_context(|| format!("error writing {}", options.output_file.display()))?;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
