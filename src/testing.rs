// Shared fixtures for unit tests: deterministic embedder, scripted generator and a
// small two-course corpus

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RetrievalConfig;
use crate::database::{
    ChunkFilter, ChunkRecord, CourseRecord, MemoryStore, Scored, VectorBackend,
};
use crate::documents::{Course, CourseDocument, parse_course_document};
use crate::embeddings::{CourseChunk, Embedder};
use crate::{RagError, Result, ServiceError};
use crate::generation::{ChatMessage, Generation, Generator};
use crate::index::CourseIndex;
use crate::tools::Tool;

pub(crate) const TEST_DIMENSION: usize = 256;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "course", "do", "does", "for", "from", "how",
    "in", "into", "is", "it", "lesson", "of", "on", "or", "the", "their", "they", "this", "to",
    "what", "which", "with",
];

/// Bag-of-words embedder: every distinct content word gets its own axis, assigned on
/// first sight. Words only share an axis once the vocabulary outgrows `dimension`.
#[derive(Debug, Clone)]
pub(crate) struct WordEmbedder {
    dimension: usize,
    vocabulary: Arc<Mutex<HashMap<String, usize>>>,
}

impl WordEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vocabulary: Arc::default(),
        }
    }

    pub(crate) fn vector(&self, text: &str) -> Vec<f32> {
        let mut vocabulary = self.vocabulary.lock().expect("vocabulary lock");
        let mut vector = vec![0.0; self.dimension];
        for token in tokens(text) {
            let next = vocabulary.len();
            let axis = *vocabulary.entry(token).or_insert(next);
            vector[axis % self.dimension] += 1.0;
        }
        vector
    }
}

impl Default for WordEmbedder {
    fn default() -> Self {
        Self::new(TEST_DIMENSION)
    }
}

#[async_trait]
impl Embedder for WordEmbedder {
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|text| self.vector(text)).collect())
    }

    fn model_id(&self) -> &str {
        "word-embedder"
    }
}

/// Embedder that always fails with the given error
#[derive(Debug, Clone)]
pub(crate) struct FailingEmbedder(pub(crate) ServiceError);

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        Err(self.0.clone())
    }

    fn model_id(&self) -> &str {
        "failing-embedder"
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| !word.is_empty() && !STOP_WORDS.contains(&word.as_str()))
        .map(|word| {
            // Crude plural folding so "plants" and "plant" share an axis
            if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
                word[..word.len() - 1].to_string()
            } else {
                word
            }
        })
}

/// Backend whose first few calls report the store as unavailable
pub(crate) struct FlakyBackend {
    inner: MemoryStore,
    failures_left: AtomicU32,
}

impl FlakyBackend {
    pub(crate) fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(TEST_DIMENSION),
            failures_left: AtomicU32::new(failures),
        }
    }

    fn fail(&self) -> Result<()> {
        let left = self.failures_left.load(AtomicOrdering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, AtomicOrdering::SeqCst);
            Err(RagError::IndexUnavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorBackend for FlakyBackend {
    async fn upsert_chunks(&self, records: Vec<ChunkRecord>) -> Result<()> {
        self.fail()?;
        self.inner.upsert_chunks(records).await
    }

    async fn upsert_courses(&self, records: Vec<CourseRecord>) -> Result<()> {
        self.fail()?;
        self.inner.upsert_courses(records).await
    }

    async fn delete_course_chunks(&self, course_id: &str) -> Result<()> {
        self.fail()?;
        self.inner.delete_course_chunks(course_id).await
    }

    async fn search_chunks(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<Scored<CourseChunk>>> {
        self.fail()?;
        self.inner.search_chunks(vector, limit, filter).await
    }

    async fn search_courses(&self, vector: &[f32], limit: usize) -> Result<Vec<Scored<Course>>> {
        self.fail()?;
        self.inner.search_courses(vector, limit).await
    }

    async fn get_course(&self, title: &str) -> Result<Option<Course>> {
        self.fail()?;
        self.inner.get_course(title).await
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        self.fail()?;
        self.inner.list_courses().await
    }

    async fn count_chunks(&self) -> Result<usize> {
        self.fail()?;
        self.inner.count_chunks().await
    }

    async fn clear(&self) -> Result<()> {
        self.fail()?;
        self.inner.clear().await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// A request seen by [`ScriptedGenerator`]
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) tool_names: Vec<String>,
}

/// Generator replaying a fixed script of responses
#[derive(Debug, Default)]
pub(crate) struct ScriptedGenerator {
    script: Mutex<VecDeque<std::result::Result<Generation, ServiceError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub(crate) fn new(script: Vec<std::result::Result<Generation, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Every response arrives after `delay`
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> std::result::Result<Generation, ServiceError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Generation::Answer("script exhausted".to_string())))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

pub(crate) const COURSE_A: &str = "\
Course Title: Course A
Course Link: https://example.com/course-a
Course Instructor: Ada Green

Lesson 1: Photosynthesis
Lesson Link: https://example.com/course-a/1
Plants make energy through photosynthesis. Chlorophyll in their leaves captures sunlight
and turns it into chemical energy stored as glucose.

Lesson 2: Roots
Lesson Link: https://example.com/course-a/2
Roots absorb water and minerals from the soil. They anchor the plant firmly in place.
";

pub(crate) const COURSE_B: &str = "\
Course Title: Course B
Course Link: https://example.com/course-b
Course Instructor: Ben Cole

Lesson 1: Mitochondria
Lesson Link: https://example.com/course-b/1
Mitochondria are organelles found inside animal cells. They produce ATP through cellular
respiration.

Lesson 2: The Krebs Cycle
The Krebs cycle runs inside the mitochondrial matrix. It oxidises acetyl groups and
releases carbon dioxide.
";

pub(crate) fn sample_documents() -> Vec<CourseDocument> {
    [("course_a.txt", COURSE_A), ("course_b.txt", COURSE_B)]
        .into_iter()
        .map(|(source, text)| parse_course_document(text, source).expect("sample document parses"))
        .collect()
}

/// An in-memory index with the sample corpus already ingested
pub(crate) async fn sample_index(config: RetrievalConfig) -> Arc<CourseIndex> {
    let index = CourseIndex::new(
        Arc::new(MemoryStore::new(TEST_DIMENSION)),
        Arc::new(WordEmbedder::default()),
        config,
    );

    let chunking = crate::embeddings::ChunkingConfig::default();
    for document in sample_documents() {
        let chunks = crate::embeddings::chunk_document(&document, &chunking);
        index.upsert_chunks(&chunks).await.expect("chunks index");
        index
            .upsert_courses(&[document.course.clone()])
            .await
            .expect("course indexes");
    }

    Arc::new(index)
}
