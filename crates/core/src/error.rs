use thiserror::Error;

use crate::storage::packet::PacketError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("Key set encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Key set decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Writer error: {0}")]
    Ingest(#[from] keyindex_ingest::IngestError),
    #[error("Value error: {0}")]
    Extraction(#[from] keyindex_api::ExtractionError),
    #[error("Store layout version {found} does not match {expected}")]
    LayoutMismatch { found: i32, expected: i32 },
    #[error("Store is read-only: {0}")]
    ReadOnly(String),
    #[error("Index '{index_id}' stores {stored} values, not {requested}")]
    ValueTypeMismatch {
        index_id: String,
        stored: &'static str,
        requested: &'static str,
    },
    #[error("Indexing did not drain after {0} flush rounds")]
    DidNotDrain(usize),
    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Index manager is disposed")]
    Disposed,
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
