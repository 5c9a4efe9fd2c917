//! Word vectors and the word2vec file formats.
//!
//! Binary format, as written by the C word2vec with `-binary 1`:
//!
//! ```text
//! <num_words> <size>\n
//! <word> <size little-endian f32s>\n      (repeated num_words times)
//! ```
//!
//! The newline after each vector is optional when reading. The text format
//! has the same header, then one line per word with the values written as
//! decimal numbers separated by spaces.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::ops::Index;
use std::path::Path;

use tracing::info;

use crate::mmap::{WindowedReader, ONE_GB};
use crate::search::SearchEngine;
use crate::{Error, Result};

/// A vocabulary and one embedding vector per word.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    /// Embedding vector length (number of dimensions).
    size: usize,

    /// The vocabulary.
    vocab: Vec<String>,

    index: HashMap<String, usize>,

    /// `embeddings[k * size..(k+1) * size]` is the vector embedding for word `k`.
    embeddings: Vec<f32>,
}

impl Index<usize> for VectorStore {
    type Output = [f32];

    fn index(&self, i: usize) -> &[f32] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

fn parse_header(line: &str) -> Result<(usize, usize)> {
    let mut fields = line.split_whitespace();
    let mut field = |what: &str| -> Result<usize> {
        fields
            .next()
            .ok_or_else(|| Error::format(format!("expected {what} in header {line:?}")))?
            .parse()
            .map_err(|_| Error::format(format!("invalid {what} in header {line:?}")))
    };
    let num_words = field("word count")?;
    let size = field("vector size")?;
    if fields.next().is_some() {
        return Err(Error::format(format!("unexpected extra fields in header {line:?}")));
    }
    if size == 0 {
        return Err(Error::format("vector size in header is zero"));
    }
    if num_words.checked_mul(size).is_none() {
        return Err(Error::format(format!("header {line:?} describes too many values")));
    }
    Ok((num_words, size))
}

/// Caps how much the text reader preallocates from the header's counts,
/// which nothing has checked yet.
const MAX_PREALLOCATED_WORDS: usize = 1 << 16;

/// Byte order of the floats in a binary vector file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// What word2vec writes on x86 and most other machines.
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    fn decode(self, bits: u32) -> f32 {
        f32::from_bits(match self {
            ByteOrder::Little => u32::from_le(bits),
            ByteOrder::Big => u32::from_be(bits),
        })
    }
}

impl VectorStore {
    /// Fails with `Config` unless `embeddings` holds exactly one `size`-long
    /// vector per word.
    pub fn new(vocab: Vec<String>, size: usize, embeddings: Vec<f32>) -> Result<Self> {
        if size == 0 {
            return Err(Error::config("vector size must be positive"));
        }
        if Some(embeddings.len()) != vocab.len().checked_mul(size) {
            return Err(Error::config(format!(
                "{} values for {} words of size {size}",
                embeddings.len(),
                vocab.len()
            )));
        }
        let mut index = HashMap::with_capacity(vocab.len());
        for (i, word) in vocab.iter().enumerate() {
            // A repeated word resolves to its first row.
            index.entry(word.clone()).or_insert(i);
        }
        Ok(VectorStore {
            size,
            vocab,
            index,
            embeddings,
        })
    }

    /// Loads a file in the C word2vec binary format.
    pub fn from_bin_file(file_name: &Path) -> Result<Self> {
        Self::load_bin(file_name, ONE_GB, ByteOrder::Little)
    }

    /// Like [`from_bin_file`](Self::from_bin_file), for files whose floats
    /// were written in `order`.
    pub fn from_bin_file_with_order(file_name: &Path, order: ByteOrder) -> Result<Self> {
        Self::load_bin(file_name, ONE_GB, order)
    }

    /// Like [`from_bin_file`](Self::from_bin_file), mapping at most
    /// `window_size` bytes of the file at a time.
    pub fn from_bin_file_windowed(file_name: &Path, window_size: u64) -> Result<Self> {
        Self::load_bin(file_name, window_size, ByteOrder::Little)
    }

    fn load_bin(file_name: &Path, window_size: u64, order: ByteOrder) -> Result<Self> {
        if window_size == 0 {
            return Err(Error::config("mapping window size must be positive"));
        }
        let mut f = WindowedReader::open(file_name, window_size)?;

        let mut header = vec![];
        loop {
            match f.next_byte()? {
                None => return Err(Error::format("missing header line")),
                Some(b'\n') => break,
                Some(b) => header.push(b),
            }
        }
        let header = String::from_utf8(header)
            .map_err(|_| Error::format("header line is not valid UTF-8"))?;
        let (num_words, size) = parse_header(&header)?;

        // Every entry takes at least a space and its vector.
        let min_len = (size as u64)
            .checked_mul(4)
            .and_then(|n| n.checked_add(1))
            .and_then(|n| n.checked_mul(num_words as u64));
        if min_len.map_or(true, |n| n > f.remaining()) {
            return Err(Error::format(format!(
                "file is too short for {num_words} vectors of size {size}"
            )));
        }

        let mut vocab: Vec<String> = Vec::with_capacity(num_words);
        let mut m = vec![0.0f32; num_words * size];
        for b in 0..num_words {
            let mut vocab_word = Vec::<u8>::new();
            loop {
                match f.next_byte()? {
                    None => {
                        return Err(Error::format(format!(
                            "unexpected end of file in word {}",
                            b + 1
                        )))
                    }
                    Some(b' ') => break,
                    // Some files have a newline after each vector, some don't.
                    Some(b'\n') => {}
                    Some(c) => vocab_word.push(c),
                }
            }
            vocab.push(
                String::from_utf8(vocab_word)
                    .map_err(|_| Error::format(format!("word {} is not valid UTF-8", b + 1)))?,
            );

            let row = &mut m[b * size..][..size];
            f.read_exact(bytemuck::cast_slice_mut::<f32, u8>(row))
                .map_err(|err| match err.kind() {
                    ErrorKind::UnexpectedEof => {
                        Error::format(format!("unexpected end of file in vector {}", b + 1))
                    }
                    _ => Error::Io(err),
                })?;
            for e in row.iter_mut() {
                *e = order.decode(e.to_bits());
            }
        }
        drop(f);

        info!(path = %file_name.display(), num_words, size, "loaded binary vectors");
        Self::new(vocab, size, m)
    }

    /// Loads a file in the C word2vec text format.
    pub fn from_text_file(file_name: &Path) -> Result<Self> {
        let store = Self::read_text(BufReader::new(File::open(file_name)?))?;
        info!(
            path = %file_name.display(),
            num_words = store.num_words(),
            size = store.size,
            "loaded text vectors"
        );
        Ok(store)
    }

    pub fn read_text(input: impl BufRead) -> Result<Self> {
        let mut lines = input.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::format("missing header line"))??;
        let (num_words, size) = parse_header(&header)?;

        let capacity = num_words.min(MAX_PREALLOCATED_WORDS);
        let mut vocab: Vec<String> = Vec::with_capacity(capacity);
        let mut m: Vec<f32> =
            Vec::with_capacity(capacity.saturating_mul(size).min(MAX_PREALLOCATED_WORDS * 16));
        let mut data_lines = 0;
        for (line_num, line) in lines.enumerate() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue; // blank line
            };
            data_lines += 1;
            if data_lines > num_words {
                continue; // counted for the error below
            }
            let before = m.len();
            for value in fields {
                m.push(value.parse().map_err(|_| {
                    Error::format(format!("invalid number {value:?} on line {}", line_num + 2))
                })?);
            }
            if m.len() - before != size {
                return Err(Error::format(format!(
                    "vector size is {size} according to the header, but line {} has {} values",
                    line_num + 2,
                    m.len() - before
                )));
            }
            vocab.push(word.to_string());
        }
        if data_lines != num_words {
            return Err(Error::format(format!(
                "header announces {num_words} words, but there are {data_lines} vector lines"
            )));
        }
        Self::new(vocab, size, m)
    }

    fn check_words_writable(&self) -> Result<()> {
        match self
            .vocab
            .iter()
            .find(|w| w.is_empty() || w.contains(|c: char| c.is_ascii_whitespace()))
        {
            Some(word) => Err(Error::config(format!("cannot save word {word:?}"))),
            None => Ok(()),
        }
    }

    /// Writes the vectors in the C word2vec binary format.
    pub fn write_bin(&self, mut fo: impl Write) -> Result<()> {
        self.check_words_writable()?;
        writeln!(fo, "{} {}", self.num_words(), self.size)?;
        let mut word_vec: Vec<u32> = Vec::with_capacity(self.size);
        for (a, word) in self.vocab.iter().enumerate() {
            write!(fo, "{word} ")?;
            word_vec.clear();
            word_vec.extend(self[a].iter().map(|f| f.to_bits().to_le()));
            fo.write_all(bytemuck::cast_slice::<u32, u8>(&word_vec))?;
            writeln!(fo)?;
        }
        fo.flush()?;
        Ok(())
    }

    /// Writes the vectors in the C word2vec text format.
    pub fn write_text(&self, mut fo: impl Write) -> Result<()> {
        self.check_words_writable()?;
        writeln!(fo, "{} {}", self.num_words(), self.size)?;
        for (a, word) in self.vocab.iter().enumerate() {
            write!(fo, "{word}")?;
            for f in &self[a] {
                write!(fo, " {f}")?;
            }
            writeln!(fo)?;
        }
        fo.flush()?;
        Ok(())
    }

    pub fn save_bin(&self, output_file: &Path) -> Result<()> {
        self.write_bin(BufWriter::new(File::create(output_file)?))?;
        info!(path = %output_file.display(), "saved binary vectors");
        Ok(())
    }

    pub fn save_text(&self, output_file: &Path) -> Result<()> {
        self.write_text(BufWriter::new(File::create(output_file)?))?;
        info!(path = %output_file.display(), "saved text vectors");
        Ok(())
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    /// Returns the vector size.
    pub fn layer_size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(word)
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }

    pub fn words(&self) -> &[String] {
        &self.vocab
    }

    pub fn vector(&self, word: &str) -> Option<&[f32]> {
        self.lookup_word(word).map(|i| &self[i])
    }

    /// All vectors, concatenated in vocabulary order.
    pub fn embeddings(&self) -> &[f32] {
        &self.embeddings
    }

    /// Builds a [`SearchEngine`] over a normalized copy of these vectors.
    pub fn for_search(&self) -> SearchEngine {
        SearchEngine::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VectorStore {
        VectorStore::new(
            vec!["a".into(), "b".into(), "c".into()],
            2,
            vec![1.0, 2.0, -0.5, 0.25, 3.5, -1e-7],
        )
        .unwrap()
    }

    fn bin_bytes(header: &str, entries: &[(&str, &[f32])], newline: bool) -> Vec<u8> {
        let mut out = header.as_bytes().to_vec();
        for (word, v) in entries {
            out.extend_from_slice(word.as_bytes());
            out.push(b' ');
            for x in *v {
                out.extend_from_slice(&x.to_le_bytes());
            }
            if newline {
                out.push(b'\n');
            }
        }
        out
    }

    #[test]
    fn new_checks_dimensions() {
        let err = VectorStore::new(vec!["a".into()], 3, vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(VectorStore::new(vec![], 0, vec![]).is_err());
    }

    #[test]
    fn binary_layout() {
        let mut out = vec![];
        sample().write_bin(&mut out).unwrap();
        let expected = bin_bytes(
            "3 2\n",
            &[("a", &[1.0, 2.0]), ("b", &[-0.5, 0.25]), ("c", &[3.5, -1e-7])],
            true,
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn loads_three_by_two() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.bin");
        let bytes = bin_bytes(
            "3 2\n",
            &[("a", &[1.0, 0.0]), ("b", &[0.0, 1.0]), ("c", &[0.5, 0.5])],
            false,
        );
        std::fs::write(&path, bytes).unwrap();
        let store = VectorStore::from_bin_file(&path).unwrap();
        assert_eq!(store.layer_size(), 2);
        assert_eq!(store.num_words(), 3);
        assert!(store.contains("b"));
        assert!(!store.contains("d"));
        assert_eq!(store.vector("c"), Some(&[0.5, 0.5][..]));
    }

    #[test]
    fn tiny_windows_split_words_and_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.bin");
        let store = sample();
        store.save_bin(&path).unwrap();
        for window in 1..=32 {
            let loaded = VectorStore::from_bin_file_windowed(&path, window).unwrap();
            assert_eq!(loaded, store, "window size {window}");
        }
    }

    #[test]
    fn text_round_trip() {
        let mut out = vec![];
        sample().write_text(&mut out).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("3 2\na 1 2\n"));
        let loaded = VectorStore::read_text(&out[..]).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn text_tolerates_trailing_spaces_and_blank_lines() {
        let input = "2 2\nx 1 2 \ny 3 4 \n\n";
        let store = VectorStore::read_text(input.as_bytes()).unwrap();
        assert_eq!(&store[1], &[3.0, 4.0]);
    }

    #[test]
    fn text_count_mismatch() {
        let err = VectorStore::read_text("3 2\na 1 2\nb 3 4\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        let err = VectorStore::read_text("1 2\na 1 2\nb 3 4\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn text_value_count_mismatch() {
        let err = VectorStore::read_text("2 2\na 1 2\nb 3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Format(ref msg) if msg.contains("line 3")));
    }

    #[test]
    fn bad_headers() {
        for header in ["", "3\n", "x 2\n", "3 0\n"] {
            let err = VectorStore::read_text(header.as_bytes()).unwrap_err();
            assert!(matches!(err, Error::Format(_)), "{header:?}: {err}");
        }
    }

    #[test]
    fn extra_header_fields() {
        let err = VectorStore::read_text("1 2 junk\na 1 2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");
    }

    #[test]
    fn huge_text_header_is_a_format_error() {
        for input in [
            "4000000000000000000 3\na 1 2 3\n",
            "100000 100000000000\na 1\n",
            "18446744073709551615 18446744073709551615\n",
        ] {
            let err = VectorStore::read_text(input.as_bytes()).unwrap_err();
            assert!(matches!(err, Error::Format(_)), "{input:?}: {err}");
        }
    }

    #[test]
    fn zero_window_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.bin");
        sample().save_bin(&path).unwrap();
        let err = VectorStore::from_bin_file_windowed(&path, 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn loads_big_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.bin");
        let mut bytes = b"2 2\n".to_vec();
        for (word, v) in [("a", [1.5f32, -2.0]), ("b", [0.25, 1e-3])] {
            bytes.extend_from_slice(word.as_bytes());
            bytes.push(b' ');
            for x in v {
                bytes.extend_from_slice(&x.to_be_bytes());
            }
            bytes.push(b'\n');
        }
        std::fs::write(&path, &bytes).unwrap();

        let store = VectorStore::from_bin_file_with_order(&path, ByteOrder::Big).unwrap();
        assert_eq!(store.vector("a"), Some(&[1.5, -2.0][..]));
        assert_eq!(store.vector("b"), Some(&[0.25, 1e-3][..]));

        let little = VectorStore::from_bin_file(&path).unwrap();
        assert_ne!(little, store);
    }

    #[test]
    fn truncated_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.bin");
        let mut bytes = bin_bytes("2 2\n", &[("a", &[1.0, 0.0]), ("b", &[0.0, 1.0])], true);
        bytes.truncate(bytes.len() - 6);
        std::fs::write(&path, &bytes).unwrap();
        let err = VectorStore::from_bin_file(&path).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");

        std::fs::write(&path, b"2 2").unwrap();
        let err = VectorStore::from_bin_file(&path).unwrap_err();
        assert!(matches!(err, Error::Format(_)), "{err}");
    }

    #[test]
    fn refuses_to_save_words_with_spaces() {
        let store = VectorStore::new(vec!["new york".into()], 1, vec![1.0]).unwrap();
        assert!(matches!(store.write_bin(vec![]), Err(Error::Config(_))));
        assert!(matches!(store.write_text(vec![]), Err(Error::Config(_))));
    }
}
