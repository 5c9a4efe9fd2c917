use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wordvec::{Error, Query, SearchEngine, VectorStore};

/// Prints the words closest to a word, or to the average of several words.
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

    /// Words to look up. Each argument is one query; separate words inside
    /// an argument with spaces to average them.
    #[arg(value_name = "WORDS", required = true)]
    queries: Vec<String>,
}

fn load(file_name: &std::path::Path, text: bool) -> Result<SearchEngine> {
    let store = if text {
        VectorStore::from_text_file(file_name)
    } else {
        VectorStore::from_bin_file(file_name)
    }
    .with_context(|| format!("error loading {}", file_name.display()))?;
    Ok(store.for_search())
}

fn run(options: &Options) -> Result<()> {
    let engine = load(&options.file_name, options.text)?;
    for query in &options.queries {
        let words: Vec<&str> = query.split_whitespace().collect();
        println!();
        match engine.search_excluding(Query::Words(&words), options.top, &words) {
            Ok(matches) => {
                println!("                                              Word       Cosine distance");
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
