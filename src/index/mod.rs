//! Course index
//!
//! Pairs a [`VectorBackend`] with the single [`Embedder`] used for both ingestion and
//! queries. Writes are serialized; reads never wait on a write in progress.


use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::database::{ChunkFilter, ChunkRecord, CourseRecord, VectorBackend};
use crate::documents::Course;
use crate::embeddings::{CourseChunk, Embedder};
use crate::{RagError, Result};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);
const EXCERPT_CHARS: usize = 160;

/// Where a piece of evidence came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub course: String,
    pub lesson_number: Option<u32>,
    pub lesson_title: Option<String>,
    /// Link to the lesson, or to the course for course-level citations
    pub locator: Option<String>,
    pub excerpt: String,
}

impl Citation {
    #[inline]
    pub fn for_chunk(chunk: &CourseChunk) -> Self {
        Self {
            course: chunk.course_id.clone(),
            lesson_number: chunk.lesson_number,
            lesson_title: chunk.lesson_title.clone(),
            locator: chunk.lesson_link.clone(),
            excerpt: excerpt(&chunk.content),
        }
    }

    #[inline]
    pub fn for_course(course: &Course) -> Self {
        Self {
            course: course.title.clone(),
            lesson_number: None,
            lesson_title: None,
            locator: course.link.clone(),
            excerpt: String::new(),
        }
    }

    /// `Course - Lesson N`, or just the course title
    #[inline]
    pub fn label(&self) -> String {
        match self.lesson_number {
            Some(number) => format!("{} - Lesson {}", self.course, number),
            None => self.course.clone(),
        }
    }
}

impl fmt::Display for Citation {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())?;
        if let Some(title) = &self.lesson_title {
            write!(f, ": {}", title)?;
        }
        if let Some(locator) = &self.locator {
            write!(f, " ({})", locator)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: CourseChunk,
    pub score: f32,
    pub citation: Citation,
}

pub struct CourseIndex {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    write_lock: Mutex<()>,
    config: RetrievalConfig,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl CourseIndex {
    #[inline]
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            write_lock: Mutex::new(()),
            config,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Bounded retry for an unavailable backend
    #[inline]
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    #[inline]
    pub fn embedder_model(&self) -> &str {
        self.embedder.model_id()
    }

    /// Embed and store chunks, overwriting any with the same id
    #[inline]
    pub async fn upsert_chunks(&self, chunks: &[CourseChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(CourseChunk::embedding_text).collect();
        let vectors = self.embed(&texts).await?;

        let records: Vec<ChunkRecord> = chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkRecord { chunk, vector })
            .collect();

        let _guard = self.write_lock.lock().await;
        self.retrying("upsert chunks", || {
            self.backend.upsert_chunks(records.clone())
        })
        .await?;

        debug!("Indexed {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// Drop every stored chunk of `course_id`
    #[inline]
    pub async fn delete_course_chunks(&self, course_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.retrying("delete course chunks", || {
            self.backend.delete_course_chunks(course_id)
        })
        .await
    }

    /// Embed course titles and store the catalog entries
    #[inline]
    pub async fn upsert_courses(&self, courses: &[Course]) -> Result<usize> {
        if courses.is_empty() {
            return Ok(0);
        }

        let titles: Vec<String> = courses.iter().map(|c| c.title.clone()).collect();
        let vectors = self.embed(&titles).await?;

        let records: Vec<CourseRecord> = courses
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(course, vector)| CourseRecord { course, vector })
            .collect();

        let _guard = self.write_lock.lock().await;
        self.retrying("upsert courses", || {
            self.backend.upsert_courses(records.clone())
        })
        .await?;

        Ok(courses.len())
    }

    /// The `k` most similar chunks to `text` that pass `filter` and the relevance floor.
    ///
    /// Ordered by descending score, ties broken by ascending sequence. An empty index
    /// yields no hits.
    #[inline]
    pub async fn query(&self, text: &str, k: usize, filter: &ChunkFilter) -> Result<Vec<SearchHit>> {
        if k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let stored = self
            .retrying("count chunks", || self.backend.count_chunks())
            .await?;
        if stored == 0 {
            debug!("Index is empty, returning no results");
            return Ok(Vec::new());
        }

        let vector = self.embed_one(text).await?;

        // Over-fetch so the relevance floor and tie-breaking still leave k results
        let candidates = self
            .retrying("search chunks", || {
                self.backend.search_chunks(&vector, k * 2, filter)
            })
            .await?;

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|scored| scored.score >= self.config.min_relevance)
            .map(|scored| SearchHit {
                citation: Citation::for_chunk(&scored.item),
                chunk: scored.item,
                score: scored.score,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.sequence.cmp(&b.chunk.sequence))
                .then_with(|| a.chunk.course_id.cmp(&b.chunk.course_id))
        });
        hits.truncate(k);

        debug!(
            "Query returned {} hits (filter {:?})",
            hits.len(),
            filter
        );
        Ok(hits)
    }

    /// Resolve a possibly partial course name to a catalog entry.
    ///
    /// A case-insensitive exact title match wins; otherwise the most similar title is
    /// used when it clears the course match threshold.
    #[inline]
    pub async fn resolve_course(&self, name: &str) -> Result<Option<Course>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let courses = self.courses().await?;
        if let Some(course) = courses.iter().find(|c| c.title.eq_ignore_ascii_case(name)) {
            debug!("Course '{}' matched exactly", course.title);
            return Ok(Some(course.clone()));
        }
        if courses.is_empty() {
            return Ok(None);
        }

        let vector = self.embed_one(name).await?;
        let best = self
            .retrying("search courses", || self.backend.search_courses(&vector, 1))
            .await?
            .into_iter()
            .next();

        match best {
            Some(scored) if scored.score >= self.config.course_match_threshold => {
                debug!(
                    "Course '{}' resolved to '{}' (similarity {:.3})",
                    name, scored.item.title, scored.score
                );
                Ok(Some(scored.item))
            }
            Some(scored) => {
                debug!(
                    "Best match for '{}' was '{}' at {:.3}, below threshold {:.3}",
                    name, scored.item.title, scored.score, self.config.course_match_threshold
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    #[inline]
    pub async fn course(&self, title: &str) -> Result<Option<Course>> {
        self.retrying("get course", || self.backend.get_course(title))
            .await
    }

    #[inline]
    pub async fn courses(&self) -> Result<Vec<Course>> {
        self.retrying("list courses", || self.backend.list_courses())
            .await
    }

    #[inline]
    pub async fn chunk_count(&self) -> Result<usize> {
        self.retrying("count chunks", || self.backend.count_chunks())
            .await
    }

    /// Remove all chunks and catalog entries
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.retrying("clear", || self.backend.clear()).await?;
        info!("Cleared course index");
        Ok(())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .embedder
            .embed(texts)
            .await
            .map_err(RagError::Embedding)?;

        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(crate::ServiceError::InvalidResponse(
                format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    vectors.len()
                ),
            )));
        }

        let expected = self.backend.dimension();
        if let Some(vector) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::DimensionMismatch {
                stored: expected,
                produced: vector.len(),
            });
        }

        Ok(vectors)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| {
                RagError::Embedding(crate::ServiceError::InvalidResponse(
                    "no embedding returned".to_string(),
                ))
            })
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, mut run: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match run().await {
                Err(RagError::IndexUnavailable(message)) if attempt < self.retry_attempts => {
                    let delay = self.retry_delay * 2_u32.pow(attempt - 1);
                    warn!(
                        "Index unavailable during {} ({}), attempt {}/{}, retrying in {:?}",
                        operation, message, attempt, self.retry_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn excerpt(content: &str) -> String {
    match content.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", content[..cut].trim_end()),
        None => content.to_string(),
    }
}
