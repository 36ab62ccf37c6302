use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding dimension mismatch: index stores {stored} dimensions, embedder produced {produced}")]
    DimensionMismatch { stored: usize, produced: usize },

    #[error("Embedding error: {0}")]
    Embedding(ServiceError),

    #[error("Generation error: {0}")]
    Generation(ServiceError),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether retrying the same operation later may succeed
    #[inline]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::IndexUnavailable(_) => true,
            Self::Embedding(e) | Self::Generation(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Failure reported by an external model service (embedding or generation)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    /// Transient errors are worth retrying; the rest indicate a configuration problem
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

pub mod app;
pub mod commands;
pub mod config;
pub mod database;
pub mod documents;
pub mod embeddings;
pub mod generation;
pub mod index;
pub mod indexer;
pub mod memory;
pub mod orchestrator;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;
