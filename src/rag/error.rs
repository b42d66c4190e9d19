//! Error types for the retrieval and generation pipeline.
//!
//! Load and embedding failures are fatal at startup; generation failures are
//! absorbed by the answer composer and never reach a caller.

use std::fmt;

/// Failures while loading or querying the knowledge base.
#[derive(Debug)]
pub enum RagError {
    /// Index or metadata file missing, unreadable or malformed
    Load(String),

    /// The embedding model could not be loaded or could not encode a query
    Embedding(String),
}

impl fmt::Display for RagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RagError::Load(msg) => write!(f, "Knowledge base load error: {}", msg),
            RagError::Embedding(msg) => write!(f, "Embedding error: {}", msg),
        }
    }
}

impl std::error::Error for RagError {}

/// Failures reported by a generation backend.
#[derive(Debug)]
pub enum GenerationError {
    /// The backend could not be reached at all (connection refused, DNS, ...)
    Unreachable(String),

    /// The backend answered with an error status, timed out or returned garbage
    Backend(String),

    /// The backend answered but the completion was blank
    EmptyCompletion,
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Unreachable(msg) => write!(f, "Generation backend unreachable: {}", msg),
            GenerationError::Backend(msg) => write!(f, "Generation backend error: {}", msg),
            GenerationError::EmptyCompletion => write!(f, "Generation backend returned an empty completion"),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<candle_core::Error> for RagError {
    fn from(err: candle_core::Error) -> Self {
        RagError::Embedding(err.to_string())
    }
}
