//! # Retrieval-Augmented Answering
//!
//! The legal question-answering core:
//! - **passage / index**: the corpus metadata and its flat vector index
//! - **embedder**: query text to vector
//! - **retriever**: top-K passage search over the knowledge base
//! - **prompt**: budgeted, numbered citation prompt
//! - **generation**: completion backends
//! - **composer**: the pipeline with its fallback policy

pub mod composer;
pub mod embedder;
pub mod error;
pub mod generation;
pub mod index;
pub mod passage;
pub mod prompt;
pub mod retriever;

pub use composer::{AnswerComposer, AnswerOutcome, AnswerResult};
pub use embedder::BertEmbedder;
pub use generation::{GenerationMode, GenerationParams};
pub use passage::PassageStore;
pub use retriever::KnowledgeBase;
