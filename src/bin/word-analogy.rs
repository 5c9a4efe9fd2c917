use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wordvec::{Error, VectorStore};

/// Solves analogies: A is to B as C is to what?
#[derive(Parser)]
struct Options {
    /// Contains word projections in the BINARY FORMAT.
    #[arg(value_name = "FILE")]
    file_name: PathBuf,

    /// FILE is in the text format instead
    #[arg(long)]
    text: bool,

    /// Number of closest words that will be shown
    #[arg(short = 'n', long, default_value_t = 40)]
    top: usize,

    /// Groups of three words, e.g. `man king woman`
    #[arg(value_name = "WORDS", required = true)]
    words: Vec<String>,
}

fn run(options: &Options) -> Result<()> {
    if options.words.len() % 3 != 0 {
        bail!(
            "{} words were entered.. three words are needed at the input to perform the calculation",
            options.words.len()
        );
    }

    let store = if options.text {
        VectorStore::from_text_file(&options.file_name)
    } else {
        VectorStore::from_bin_file(&options.file_name)
    }
    .with_context(|| format!("error loading {}", options.file_name.display()))?;
    let engine = store.for_search();

    for triple in options.words.chunks(3) {
        let [a, b, c] = [&triple[0], &triple[1], &triple[2]];
        println!();
        println!("{a} : {b} :: {c} : ?");
        match engine.analogy(a, b, c, options.top) {
            Ok(matches) => {
                println!("                                              Word              Distance");
                println!("------------------------------------------------------------------------");
                for m in matches {
                    println!("{:>50}\t\t{:8.6}", m.word, m.score);
                }
            }
            Err(Error::UnknownWord(word)) => {
                println!("Word: {word}  Out of dictionary word!");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
