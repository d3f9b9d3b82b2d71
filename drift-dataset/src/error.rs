use std::io;

use thiserror::Error;

use crate::openai::EmbeddingError;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("requested {requested} embeddings but the corpus slice only yields {available}")]
    InsufficientCorpusData { requested: usize, available: usize },
    #[error("dimension mismatch in {origin}: expected {expected}, found {found}")]
    DimensionMismatch {
        origin: String,
        expected: usize,
        found: usize,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("could not load model: {0}")]
    ModelLoadFailure(String),
    #[error("embedding request failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("corrupt record {index} in {origin}: {reason}")]
    CorruptRecord {
        origin: String,
        index: usize,
        reason: String,
    },
    #[error("bad document in {origin} at line {line}: {reason}")]
    BadDocument {
        origin: String,
        line: usize,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("error while handling json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DatasetError>;
