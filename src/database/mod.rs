// Database module
// Vector storage backends for course chunks and the course catalog

pub mod lancedb;
pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::Result;
use crate::documents::Course;
use crate::embeddings::CourseChunk;

pub use self::lancedb::vector_store::LanceStore;
pub use memory::MemoryStore;

/// A chunk and its embedding, keyed by the chunk id
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk: CourseChunk,
    pub vector: Vec<f32>,
}

/// A catalog entry: the course metadata and the embedding of its title, keyed by title
#[derive(Debug, Clone, PartialEq)]
pub struct CourseRecord {
    pub course: Course,
    pub vector: Vec<f32>,
}

/// An item with its cosine similarity to the query vector
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

/// Restricts a chunk search to one course and optionally one lesson
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    pub course_id: Option<String>,
    pub lesson_number: Option<u32>,
}

impl ChunkFilter {
    #[inline]
    pub fn course(course_id: impl Into<String>) -> Self {
        Self {
            course_id: Some(course_id.into()),
            lesson_number: None,
        }
    }

    #[inline]
    pub fn with_lesson(mut self, lesson_number: Option<u32>) -> Self {
        self.lesson_number = lesson_number;
        self
    }

    #[inline]
    pub fn matches(&self, chunk: &CourseChunk) -> bool {
        self.course_id
            .as_ref()
            .is_none_or(|course| *course == chunk.course_id)
            && self
                .lesson_number
                .is_none_or(|lesson| chunk.lesson_number == Some(lesson))
    }

    /// SQL predicate for backends that filter with expressions
    #[inline]
    pub fn to_predicate(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(course) = &self.course_id {
            clauses.push(format!("course_id = '{}'", escape_literal(course)));
        }
        if let Some(lesson) = self.lesson_number {
            clauses.push(format!("lesson_number = {lesson}"));
        }
        (!clauses.is_empty()).then(|| clauses.join(" AND "))
    }
}

/// Best first: descending score, then ascending sequence, then course id
#[inline]
pub fn rank_chunks(hits: &mut [Scored<CourseChunk>]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.sequence.cmp(&b.item.sequence))
            .then_with(|| a.item.course_id.cmp(&b.item.course_id))
    });
}

/// Escape a value for use inside a single-quoted SQL literal
#[inline]
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Storage for chunk embeddings and the course catalog
///
/// Implementations reject vectors whose length differs from the dimension the store
/// was created with.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert or overwrite chunks by id
    async fn upsert_chunks(&self, records: Vec<ChunkRecord>) -> Result<()>;

    /// Insert or overwrite catalog entries by course title
    async fn upsert_courses(&self, records: Vec<CourseRecord>) -> Result<()>;

    /// Remove every chunk belonging to `course_id`
    async fn delete_course_chunks(&self, course_id: &str) -> Result<()>;

    /// Nearest chunks to `vector` by cosine similarity, ordered by [`rank_chunks`].
    ///
    /// Ties at the cut-off are resolved before truncating to `limit`.
    async fn search_chunks(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<Scored<CourseChunk>>>;

    /// Nearest catalog entries to `vector` by cosine similarity, best first
    async fn search_courses(&self, vector: &[f32], limit: usize) -> Result<Vec<Scored<Course>>>;

    async fn get_course(&self, title: &str) -> Result<Option<Course>>;

    /// All catalog entries ordered by title
    async fn list_courses(&self) -> Result<Vec<Course>>;

    async fn count_chunks(&self) -> Result<usize>;

    /// Remove every chunk and catalog entry
    async fn clear(&self) -> Result<()>;

    /// Vector length this store accepts
    fn dimension(&self) -> usize;
}
