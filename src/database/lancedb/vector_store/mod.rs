
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::RecordBatchIterator;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tracing::{debug, error, info, warn};

use super::{
    CATALOG_TABLE, CHUNK_TABLE, catalog_batch, catalog_schema, chunk_batch, chunk_schema,
    parse_catalog_batch, parse_chunk_batch, schema_dimension,
};
use crate::database::{
    ChunkFilter, ChunkRecord, CourseRecord, Scored, VectorBackend, escape_literal, rank_chunks,
};
use crate::documents::Course;
use crate::embeddings::CourseChunk;
use crate::{RagError, Result};

/// Scores closer than this count as tied when widening a search
const TIE_TOLERANCE: f32 = 1e-5;

/// Persistent vector store backed by LanceDB
///
/// Holds two tables: chunk embeddings (`course_content`) and the course catalog
/// (`course_catalog`), both with vectors of a fixed dimension.
pub struct LanceStore {
    connection: Connection,
    path: PathBuf,
    dimension: usize,
}

impl LanceStore {
    /// Open or create the store at `path`.
    ///
    /// Fails with [`RagError::DimensionMismatch`] when existing tables were written with a
    /// different vector dimension.
    #[inline]
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", path);

        std::fs::create_dir_all(path).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = path.display().to_string();
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            error!("Failed to connect to LanceDB: {}", e);
            classify_error("Failed to connect to LanceDB", &e)
        })?;

        let store = Self {
            connection,
            path: path.to_path_buf(),
            dimension,
        };

        store.ensure_table(CHUNK_TABLE, chunk_schema(dimension)).await?;
        store
            .ensure_table(CATALOG_TABLE, catalog_schema(dimension))
            .await?;

        info!("Vector store initialized at {}", path.display());
        Ok(store)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create `name` when missing, otherwise check its vector dimension
    async fn ensure_table(&self, name: &str, schema: Arc<Schema>) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| classify_error("Failed to list tables", &e))?;

        if table_names.iter().any(|t| t == name) {
            let table = self.table(name).await?;
            let existing = table
                .schema()
                .await
                .map_err(|e| classify_error("Failed to get table schema", &e))?;

            return match schema_dimension(&existing) {
                Some(stored) if stored == self.dimension => {
                    debug!("Table {} exists with {} dimensions", name, stored);
                    Ok(())
                }
                Some(stored) => {
                    warn!(
                        "Table {} stores {} dimensions but {} were requested",
                        name, stored, self.dimension
                    );
                    Err(RagError::DimensionMismatch {
                        stored,
                        produced: self.dimension,
                    })
                }
                None => Err(RagError::Database(format!(
                    "Table {} has no vector column",
                    name
                ))),
            };
        }

        info!(
            "Creating table {} with {} dimensions",
            name, self.dimension
        );
        self.connection
            .create_empty_table(name, schema)
            .execute()
            .await
            .map_err(|e| classify_error("Failed to create table", &e))?;
        Ok(())
    }

    async fn table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| classify_error("Failed to open table", &e))
    }

    async fn merge(&self, name: &str, batch: RecordBatch) -> Result<()> {
        let rows = batch.num_rows();
        let table = self.table(name).await?;

        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| classify_error("Failed to upsert rows", &e))?;

        debug!("Upserted {} rows into {}", rows, name);
        Ok(())
    }

    async fn collect_batches(
        &self,
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| classify_error("Failed to read result stream", &e))?
        {
            batches.push(batch);
        }
        Ok(batches)
    }

    async fn vector_search(
        &self,
        name: &str,
        vector: &[f32],
        limit: usize,
        predicate: Option<String>,
        max_distance: Option<f32>,
    ) -> Result<Vec<RecordBatch>> {
        self.check_dimension(vector)?;

        let table = self.table(name).await?;
        let mut query = table
            .vector_search(vector)
            .map_err(|e| classify_error("Failed to create vector search", &e))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if max_distance.is_some() {
            query = query.distance_range(None, max_distance);
        }

        if let Some(predicate) = predicate {
            query = query.only_if(predicate);
        }

        let results = query
            .execute()
            .await
            .map_err(|e| classify_error("Failed to execute search", &e))?;

        self.collect_batches(results).await
    }

    async fn chunk_hits(
        &self,
        vector: &[f32],
        limit: usize,
        predicate: Option<String>,
        max_distance: Option<f32>,
    ) -> Result<Vec<Scored<CourseChunk>>> {
        let batches = self
            .vector_search(CHUNK_TABLE, vector, limit, predicate, max_distance)
            .await?;

        let mut hits = Vec::new();
        for batch in &batches {
            hits.extend(parse_chunk_batch(batch)?);
        }
        rank_chunks(&mut hits);
        Ok(hits)
    }

    async fn scan_catalog(&self, predicate: Option<String>) -> Result<Vec<Course>> {
        let table = self.table(CATALOG_TABLE).await?;
        let mut query = table.query();
        if let Some(predicate) = predicate {
            query = query.only_if(predicate);
        }

        let results = query
            .execute()
            .await
            .map_err(|e| classify_error("Failed to scan catalog", &e))?;

        let mut courses = Vec::new();
        for batch in self.collect_batches(results).await? {
            courses.extend(parse_catalog_batch(&batch)?.into_iter().map(|s| s.item));
        }
        courses.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(courses)
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
impl VectorBackend for LanceStore {
    async fn upsert_chunks(&self, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            debug!("No chunks to store");
            return Ok(());
        }
        let batch = chunk_batch(&records, self.dimension)?;
        self.merge(CHUNK_TABLE, batch).await
    }

    async fn upsert_courses(&self, records: Vec<CourseRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let batch = catalog_batch(&records, self.dimension)?;
        self.merge(CATALOG_TABLE, batch).await
    }

    async fn search_chunks(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<Scored<CourseChunk>>> {
        debug!("Searching chunks with limit {} and filter {:?}", limit, filter);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let predicate = filter.to_predicate();
        // One extra row shows whether a tie runs past the cut-off
        let mut hits = self
            .chunk_hits(vector, limit + 1, predicate.clone(), None)
            .await?;

        let cutoff = hits.get(limit - 1).map(|hit| hit.score);
        let straddles = match (cutoff, hits.get(limit)) {
            (Some(cutoff), Some(next)) => cutoff - next.score <= TIE_TOLERANCE,
            _ => false,
        };

        if let Some(cutoff) = cutoff.filter(|_| straddles) {
            // LanceDB orders equal distances arbitrarily, so fetch the whole tied group
            let table = self.table(CHUNK_TABLE).await?;
            let candidates = table
                .count_rows(predicate.clone())
                .await
                .map_err(|e| classify_error("Failed to count rows", &e))?;
            debug!(
                "Scores tie at {:.4}, widening search to {} candidates",
                cutoff, candidates
            );
            hits = self
                .chunk_hits(
                    vector,
                    candidates,
                    predicate,
                    Some(1.0 - cutoff + TIE_TOLERANCE),
                )
                .await?;
        }

        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_course_chunks(&self, course_id: &str) -> Result<()> {
        let table = self.table(CHUNK_TABLE).await?;
        let predicate = format!("course_id = '{}'", escape_literal(course_id));
        table
            .delete(&predicate)
            .await
            .map_err(|e| classify_error("Failed to delete course chunks", &e))?;

        debug!("Deleted chunks for course: {}", course_id);
        Ok(())
    }

    async fn search_courses(&self, vector: &[f32], limit: usize) -> Result<Vec<Scored<Course>>> {
        let batches = self
            .vector_search(CATALOG_TABLE, vector, limit, None, None)
            .await?;

        let mut hits = Vec::new();
        for batch in &batches {
            hits.extend(parse_catalog_batch(batch)?);
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(hits)
    }

    async fn get_course(&self, title: &str) -> Result<Option<Course>> {
        let predicate = format!("id = '{}'", escape_literal(title));
        Ok(self.scan_catalog(Some(predicate)).await?.into_iter().next())
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        self.scan_catalog(None).await
    }

    async fn count_chunks(&self) -> Result<usize> {
        let table = self.table(CHUNK_TABLE).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| classify_error("Failed to count rows", &e))
    }

    async fn clear(&self) -> Result<()> {
        info!("Clearing vector store at {}", self.path.display());

        for name in [CHUNK_TABLE, CATALOG_TABLE] {
            self.connection
                .drop_table(name)
                .await
                .map_err(|e| classify_error("Failed to drop table", &e))?;
        }

        self.ensure_table(CHUNK_TABLE, chunk_schema(self.dimension))
            .await?;
        self.ensure_table(CATALOG_TABLE, catalog_schema(self.dimension))
            .await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Storage and transport failures may clear up on retry; everything else is a hard error
fn classify_error(context: &str, error: &lancedb::Error) -> RagError {
    let message = format!("{}: {}", context, error);
    let lowered = error.to_string().to_lowercase();

    if lowered.contains("io error")
        || lowered.contains("object store")
        || lowered.contains("timed out")
        || lowered.contains("connection")
        || lowered.contains("unavailable")
    {
        RagError::IndexUnavailable(message)
    } else {
        RagError::Database(message)
    }
}
