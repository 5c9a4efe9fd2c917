use std::io;

use thiserror::Error;

/// Everything that can go wrong while training, loading, or querying a model.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameters, dimension mismatches, or a vocabulary that filtering left empty.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A model or vocabulary file that doesn't parse.
    #[error("invalid file format: {0}")]
    Format(String),

    /// A query word that isn't in the vocabulary.
    #[error("unknown word {0:?}")]
    UnknownWord(String),

    /// Training was canceled before it finished.
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}
