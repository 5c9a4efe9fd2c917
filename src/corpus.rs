//! Reading training text.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::info;

use crate::network::MAX_SENTENCE_LENGTH;
use crate::Result;

/// Longest token kept, in bytes. Longer tokens are truncated.
pub const MAX_TOKEN_LENGTH: usize = 99;

/// Reads a whitespace-separated corpus. Each line is a sentence; sentences
/// longer than 1000 tokens are split.
pub fn read_sentences(path: impl AsRef<Path>) -> Result<Vec<Vec<String>>> {
    let path = path.as_ref();
    let sentences = parse_sentences(BufReader::new(File::open(path)?))?;
    info!(
        path = %path.display(),
        sentences = sentences.len(),
        words = sentences.iter().map(Vec::len).sum::<usize>(),
        "read corpus"
    );
    Ok(sentences)
}

/// Like [`read_sentences`], from any byte source.
pub fn parse_sentences(input: impl Read) -> Result<Vec<Vec<String>>> {
    let mut sentences = vec![];
    let mut sentence: Vec<String> = vec![];
    let mut word = Vec::<u8>::new();

    let end_word = |word: &mut Vec<u8>, sentence: &mut Vec<String>| {
        if !word.is_empty() {
            sentence.push(String::from_utf8_lossy(word).into_owned());
            word.clear();
        }
    };

    for ch in input.bytes() {
        match ch? {
            b'\r' => {}
            b' ' | b'\t' => end_word(&mut word, &mut sentence),
            b'\n' => {
                end_word(&mut word, &mut sentence);
                if !sentence.is_empty() {
                    sentences.push(std::mem::take(&mut sentence));
                }
            }
            ch => {
                if word.len() < MAX_TOKEN_LENGTH {
                    word.push(ch); // Truncate too long words
                }
            }
        }
    }
    end_word(&mut word, &mut sentence);
    if !sentence.is_empty() {
        sentences.push(sentence);
    }

    Ok(sentences
        .into_iter()
        .flat_map(|s| {
            if s.len() <= MAX_SENTENCE_LENGTH {
                vec![s]
            } else {
                s.chunks(MAX_SENTENCE_LENGTH).map(<[String]>::to_vec).collect()
            }
        })
        .collect())
}
