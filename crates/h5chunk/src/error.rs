//! Error types for the dataset API.

use h5chunk_format::error::FormatError;

use crate::element::ElementKind;

/// Errors surfaced by dataset reads, writes and commits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("configuration error: {0}")]
    Json(#[from] serde_json::Error),

    /// A failure tied to one chunk of a dataset.
    #[error("dataset `{dataset}`, chunk {coord:?}: {source}")]
    Chunk {
        dataset: String,
        coord: Vec<u64>,
        #[source]
        source: FormatError,
    },

    /// A failure tied to a dataset but not to a single chunk.
    #[error("dataset `{name}`: {source}")]
    Dataset {
        name: String,
        #[source]
        source: FormatError,
    },

    #[error("element type mismatch: dataset holds {actual}, requested {expected}")]
    TypeMismatch {
        expected: ElementKind,
        actual: ElementKind,
    },

    #[error("buffer holds {actual} bytes, transfer needs {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("invalid dataset configuration: {0}")]
    InvalidConfig(String),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl Error {
    /// The underlying format error, if any.
    pub fn format_error(&self) -> Option<&FormatError> {
        match self {
            Error::Format(e) => Some(e),
            Error::Chunk { source, .. } | Error::Dataset { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
