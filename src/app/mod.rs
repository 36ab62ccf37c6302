//! Application context
//!
//! [`RagSystem`] wires the vector backend, embedder, generator, tools, memory and
//! orchestrator together. Everything is injected explicitly; there is no global state.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::Result;
use crate::config::Config;
use crate::database::{LanceStore, VectorBackend};
use crate::documents::{Course, CourseDocument};
use crate::embeddings::{Embedder, OllamaClient};
use crate::generation::Generator;
use crate::index::CourseIndex;
use crate::indexer::{Indexer, IngestionReport};
use crate::memory::ConversationMemory;
use crate::orchestrator::{Answer, QueryOrchestrator};
use crate::tools::{CourseOutlineTool, CourseSearchTool, Tool, ToolRegistry};

/// Course catalog summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseAnalytics {
    pub total_courses: usize,
    pub course_titles: Vec<String>,
}

pub struct RagSystem {
    index: Arc<CourseIndex>,
    indexer: Indexer,
    orchestrator: QueryOrchestrator,
}

impl RagSystem {
    /// Open the persistent store under the configured base directory and connect to
    /// Ollama for embeddings and generation
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        let client = Arc::new(OllamaClient::new(&config.ollama)?);
        let store = LanceStore::open(
            &config.vector_database_path(),
            config.ollama.embedding_dimension as usize,
        )
        .await?;

        info!(
            "Opened course index at {} (embedding model {}, chat model {})",
            store.path().display(),
            client.embedding_model(),
            client.chat_model()
        );

        Ok(Self::from_parts(
            Arc::new(store),
            Arc::clone(&client) as Arc<dyn Embedder>,
            client,
            config,
        ))
    }

    /// Assemble a system from explicit parts
    #[inline]
    pub fn from_parts(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Self {
        let index = Arc::new(CourseIndex::new(
            backend,
            embedder,
            config.retrieval.clone(),
        ));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CourseSearchTool::new(
            Arc::clone(&index),
            config.retrieval.max_results,
        )));
        registry.register(Arc::new(CourseOutlineTool::new(Arc::clone(&index))));

        let orchestrator = QueryOrchestrator::new(
            generator,
            Arc::new(registry),
            Arc::new(
                ConversationMemory::new(config.conversation.max_history_turns)
                    .with_max_sessions(config.conversation.max_sessions),
            ),
            config.conversation.clone(),
        );

        let indexer = Indexer::new(Arc::clone(&index), config.chunking.clone())
            .with_batch_size(config.ollama.batch_size as usize);

        Self {
            index,
            indexer,
            orchestrator,
        }
    }

    /// Ingest every course document in `dir`.
    ///
    /// `clear` empties the index first; `force` re-indexes courses already present.
    #[inline]
    pub async fn ingest_directory(
        &self,
        dir: &Path,
        clear: bool,
        force: bool,
    ) -> Result<IngestionReport> {
        if clear {
            self.index.clear().await?;
        }
        self.indexer.ingest_directory(dir, !force).await
    }

    #[inline]
    pub async fn ingest_documents(
        &self,
        documents: Vec<CourseDocument>,
        force: bool,
    ) -> Result<IngestionReport> {
        self.indexer.ingest(documents, !force).await
    }

    #[inline]
    pub async fn answer(&self, question: &str, session_id: Option<String>) -> Result<Answer> {
        self.orchestrator.answer(question, session_id).await
    }

    /// Answer within a conversation saved under `sessions_dir`, then save it again.
    ///
    /// Lets separate processes continue one conversation. Answers with the
    /// `Unavailable` outcome leave the saved history untouched.
    #[inline]
    pub async fn answer_saved(
        &self,
        question: &str,
        session_id: Option<String>,
        sessions_dir: &Path,
    ) -> Result<Answer> {
        let memory = self.orchestrator.memory();
        if let Some(id) = &session_id {
            let found = memory.load_session(sessions_dir, id).await?;
            if !found {
                debug!("Session {} not saved yet, starting it fresh", id);
            }
        }

        let answer = self.orchestrator.answer(question, session_id).await?;
        memory
            .save_session(sessions_dir, &answer.session_id)
            .await?;
        Ok(answer)
    }

    /// Forget a conversation
    #[inline]
    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.orchestrator.memory().clear(session_id).await
    }

    #[inline]
    pub async fn course_analytics(&self) -> Result<CourseAnalytics> {
        let courses = self.index.courses().await?;
        Ok(CourseAnalytics {
            total_courses: courses.len(),
            course_titles: courses.into_iter().map(|c| c.title).collect(),
        })
    }

    #[inline]
    pub async fn courses(&self) -> Result<Vec<Course>> {
        self.index.courses().await
    }

    #[inline]
    pub async fn chunk_count(&self) -> Result<usize> {
        self.index.chunk_count().await
    }

    /// Tools advertised to the model
    #[inline]
    pub fn tool_definitions(&self) -> Vec<Tool> {
        self.orchestrator.registry().definitions()
    }
}
