use std::io;

/// Failure of one index definition while mapping one file.
///
/// The engine treats every variant the same way as an empty mapping; the
/// distinction only matters for logs.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("I/O error while reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Malformed input: {0}")]
    Malformed(String),
    #[error("Value codec error: {0}")]
    Codec(String),
    #[error("Extraction failed: {0}")]
    Other(String),
}

impl ExtractionError {
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        ExtractionError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;
