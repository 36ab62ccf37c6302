// In-memory vector backend
// Brute-force cosine search, used for tests and ephemeral runs


use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ChunkFilter, ChunkRecord, CourseRecord, Scored, VectorBackend, rank_chunks};
use crate::documents::Course;
use crate::embeddings::CourseChunk;
use crate::{RagError, Result};

#[derive(Debug, Default)]
struct Collections {
    chunks: BTreeMap<String, ChunkRecord>,
    courses: BTreeMap<String, CourseRecord>,
}

#[derive(Debug)]
pub struct MemoryStore {
    dimension: usize,
    collections: RwLock<Collections>,
}

impl MemoryStore {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            collections: RwLock::new(Collections::default()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(RagError::DimensionMismatch {
                stored: self.dimension,
                produced: vector.len(),
            })
        }
    }
}

#[async_trait]
impl VectorBackend for MemoryStore {
    async fn upsert_chunks(&self, records: Vec<ChunkRecord>) -> Result<()> {
        for record in &records {
            self.check_dimension(&record.vector)?;
        }

        let mut collections = self.collections.write().await;
        for record in records {
            collections.chunks.insert(record.chunk.id.clone(), record);
        }
        debug!("Memory store holds {} chunks", collections.chunks.len());
        Ok(())
    }

    async fn upsert_courses(&self, records: Vec<CourseRecord>) -> Result<()> {
        for record in &records {
            self.check_dimension(&record.vector)?;
        }

        let mut collections = self.collections.write().await;
        for record in records {
            collections
                .courses
                .insert(record.course.title.clone(), record);
        }
        Ok(())
    }

    async fn search_chunks(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<Scored<CourseChunk>>> {
        self.check_dimension(vector)?;

        let collections = self.collections.read().await;
        let mut scored: Vec<Scored<CourseChunk>> = collections
            .chunks
            .values()
            .filter(|record| filter.matches(&record.chunk))
            .map(|record| Scored {
                item: record.chunk.clone(),
                score: cosine_similarity(vector, &record.vector),
            })
            .collect();

        rank_chunks(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete_course_chunks(&self, course_id: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        let before = collections.chunks.len();
        collections
            .chunks
            .retain(|_, record| record.chunk.course_id != course_id);
        debug!(
            "Removed {} chunks of '{}'",
            before - collections.chunks.len(),
            course_id
        );
        Ok(())
    }

    async fn search_courses(&self, vector: &[f32], limit: usize) -> Result<Vec<Scored<Course>>> {
        self.check_dimension(vector)?;

        let collections = self.collections.read().await;
        let scored = collections
            .courses
            .values()
            .map(|record| Scored {
                item: record.course.clone(),
                score: cosine_similarity(vector, &record.vector),
            })
            .collect();

        Ok(top_k(scored, limit))
    }

    async fn get_course(&self, title: &str) -> Result<Option<Course>> {
        let collections = self.collections.read().await;
        Ok(collections
            .courses
            .get(title)
            .map(|record| record.course.clone()))
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let collections = self.collections.read().await;
        Ok(collections
            .courses
            .values()
            .map(|record| record.course.clone())
            .collect())
    }

    async fn count_chunks(&self) -> Result<usize> {
        Ok(self.collections.read().await.chunks.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.chunks.clear();
        collections.courses.clear();
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn top_k(mut scored: Vec<Scored<Course>>, limit: usize) -> Vec<Scored<Course>> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.title.cmp(&b.item.title))
    });
    scored.truncate(limit);
    scored
}

/// Cosine similarity, 0 when either vector has no magnitude
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}
