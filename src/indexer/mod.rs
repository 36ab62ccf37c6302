// Indexer module
// Turns loaded course documents into indexed chunks and catalog entries

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::Result;
use crate::documents::{CourseDocument, IngestionWarning, load_course_directory};
use crate::embeddings::{ChunkingConfig, CourseChunk, chunk_document};
use crate::index::CourseIndex;

const DEFAULT_BATCH_SIZE: usize = 64;

/// Outcome of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub courses_indexed: usize,
    pub courses_skipped: usize,
    pub chunks_indexed: usize,
    pub warnings: Vec<IngestionWarning>,
}

impl IngestionReport {
    #[inline]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Loads course documents into a [`CourseIndex`]
pub struct Indexer {
    index: Arc<CourseIndex>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Indexer {
    #[inline]
    pub fn new(index: Arc<CourseIndex>, chunking: ChunkingConfig) -> Self {
        Self {
            index,
            chunking,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Number of chunks embedded and written per index call
    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Load every course document in `dir` and index it
    #[inline]
    pub async fn ingest_directory(&self, dir: &Path, skip_existing: bool) -> Result<IngestionReport> {
        let (documents, load_warnings) = load_course_directory(dir)?;
        let mut report = self.ingest(documents, skip_existing).await?;
        report.warnings.splice(0..0, load_warnings);
        Ok(report)
    }

    /// Index `documents`, skipping courses already in the catalog when `skip_existing`.
    ///
    /// A document that fails to index becomes a warning; the run continues with the rest.
    /// Only the first document of a course title is indexed in one run, later ones are
    /// reported as warnings.
    #[inline]
    pub async fn ingest(
        &self,
        documents: Vec<CourseDocument>,
        skip_existing: bool,
    ) -> Result<IngestionReport> {
        let mut report = IngestionReport::default();

        let mut pending: Vec<(CourseDocument, Vec<CourseChunk>)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for document in documents {
            if !seen.insert(document.course.id().to_string()) {
                warn!(
                    "{} repeats course '{}', ignoring it",
                    document.source, document.course.title
                );
                report.warnings.push(IngestionWarning::new(
                    &document.source,
                    format!(
                        "course '{}' was already loaded from another document in this run",
                        document.course.title
                    ),
                ));
                continue;
            }

            if skip_existing {
                match self.index.course(&document.course.title).await {
                    Ok(Some(_)) => {
                        debug!("Course '{}' already indexed, skipping", document.course.title);
                        report.courses_skipped += 1;
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Could not check {} against the catalog: {}", document.source, e);
                        report
                            .warnings
                            .push(IngestionWarning::new(&document.source, e.to_string()));
                        continue;
                    }
                }
            }

            let chunks = chunk_document(&document, &self.chunking);
            if chunks.is_empty() {
                warn!("{} produced no chunks", document.source);
                report
                    .warnings
                    .push(IngestionWarning::new(&document.source, "produced no chunks"));
                continue;
            }
            pending.push((document, chunks));
        }

        let total: usize = pending.iter().map(|(_, chunks)| chunks.len()).sum();
        let bar = progress_bar(total as u64);

        for (document, chunks) in pending {
            bar.set_message(document.course.title.clone());
            match self.index_document(&document, &chunks, &bar).await {
                Ok(indexed) => {
                    report.courses_indexed += 1;
                    report.chunks_indexed += indexed;
                    info!(
                        "Indexed course '{}' ({} chunks)",
                        document.course.title, indexed
                    );
                }
                Err(e) => {
                    warn!("Failed to index {}: {}", document.source, e);
                    report
                        .warnings
                        .push(IngestionWarning::new(&document.source, e.to_string()));
                }
            }
        }
        bar.finish_and_clear();

        info!(
            "Ingestion finished: {} courses indexed, {} skipped, {} chunks, {} warnings",
            report.courses_indexed,
            report.courses_skipped,
            report.chunks_indexed,
            report.warnings.len()
        );
        Ok(report)
    }

    async fn index_document(
        &self,
        document: &CourseDocument,
        chunks: &[CourseChunk],
        bar: &ProgressBar,
    ) -> Result<usize> {
        // Chunks left over from a longer earlier version would otherwise survive
        self.index
            .delete_course_chunks(document.course.id())
            .await?;

        let mut indexed = 0;
        for batch in chunks.chunks(self.batch_size) {
            indexed += self.index.upsert_chunks(batch).await?;
            bar.inc(batch.len() as u64);
        }

        // The catalog entry marks the course as indexed, so it goes in last
        self.index
            .upsert_courses(std::slice::from_ref(&document.course))
            .await?;
        Ok(indexed)
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Indexing {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(total).with_style(style)
}
