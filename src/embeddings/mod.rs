// Embeddings module
// Transcript chunking plus the Ollama client behind the embedding contract

pub mod chunking;
pub mod ollama;

use async_trait::async_trait;

use crate::ServiceError;

pub use chunking::{ChunkingConfig, CourseChunk, chunk_document, normalize_text};
pub use ollama::OllamaClient;

/// Turns text into fixed-length vectors
///
/// One embedder is used for both ingestion and queries so that stored vectors and query
/// vectors live in the same space.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every text, returning one vector per input in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    fn model_id(&self) -> &str;
}
