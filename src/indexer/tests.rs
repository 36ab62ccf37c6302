use std::fs;

use tempfile::TempDir;

use super::*;
use crate::ServiceError;
use crate::config::RetrievalConfig;
use crate::database::MemoryStore;
use crate::documents::{Course, LessonBlock};
use crate::documents::parse_course_document;
use crate::testing::{
    FailingEmbedder, FlakyBackend, TEST_DIMENSION, WordEmbedder, sample_documents,
};

fn indexer() -> (Indexer, Arc<CourseIndex>) {
    let index = Arc::new(CourseIndex::new(
        Arc::new(MemoryStore::new(TEST_DIMENSION)),
        Arc::new(WordEmbedder::default()),
        RetrievalConfig::default(),
    ));
    (
        Indexer::new(Arc::clone(&index), ChunkingConfig::default()).with_batch_size(1),
        index,
    )
}

#[tokio::test]
async fn ingests_chunks_and_catalog() {
    let (indexer, index) = indexer();

    let report = indexer
        .ingest(sample_documents(), true)
        .await
        .expect("ingest should succeed");

    assert_eq!(report.courses_indexed, 2);
    assert_eq!(report.courses_skipped, 0);
    assert_eq!(report.chunks_indexed, 4);
    assert!(!report.has_warnings());
    assert_eq!(index.chunk_count().await.expect("count"), 4);

    let titles: Vec<String> = index
        .courses()
        .await
        .expect("courses")
        .into_iter()
        .map(|c| c.title)
        .collect();
    assert_eq!(titles, vec!["Course A", "Course B"]);
}

#[tokio::test]
async fn existing_courses_are_skipped_unless_forced() {
    let (indexer, index) = indexer();
    indexer
        .ingest(sample_documents(), true)
        .await
        .expect("first ingest");

    let skipped = indexer
        .ingest(sample_documents(), true)
        .await
        .expect("second ingest");
    assert_eq!(skipped.courses_skipped, 2);
    assert_eq!(skipped.courses_indexed, 0);
    assert_eq!(skipped.chunks_indexed, 0);

    let forced = indexer
        .ingest(sample_documents(), false)
        .await
        .expect("forced ingest");
    assert_eq!(forced.courses_indexed, 2);
    assert_eq!(forced.chunks_indexed, 4);
    // Stable chunk ids make re-ingestion overwrite rather than duplicate
    assert_eq!(index.chunk_count().await.expect("count"), 4);
}

#[tokio::test]
async fn contentless_documents_become_warnings() {
    let (indexer, index) = indexer();
    let mut documents = sample_documents();
    documents.push(CourseDocument {
        course: Course {
            title: "Hollow".to_string(),
            link: None,
            instructor: None,
            lessons: Vec::new(),
        },
        blocks: vec![LessonBlock {
            lesson_number: Some(1),
            text: "   ".to_string(),
        }],
        source: "hollow.txt".to_string(),
    });

    let report = indexer.ingest(documents, true).await.expect("ingest");

    assert_eq!(report.courses_indexed, 2);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].source, "hollow.txt");
    assert!(index.course("Hollow").await.expect("lookup").is_none());
}

#[tokio::test]
async fn embedding_failures_do_not_abort_the_run() {
    let index = Arc::new(CourseIndex::new(
        Arc::new(MemoryStore::new(TEST_DIMENSION)),
        Arc::new(FailingEmbedder(ServiceError::Unavailable(
            "connection refused".to_string(),
        ))),
        RetrievalConfig::default(),
    ));
    let indexer = Indexer::new(Arc::clone(&index), ChunkingConfig::default());

    let report = indexer
        .ingest(sample_documents(), true)
        .await
        .expect("ingest reports failures as warnings");

    assert_eq!(report.courses_indexed, 0);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings[0].message.contains("connection refused"));
    assert!(index.courses().await.expect("courses").is_empty());
}

#[tokio::test]
async fn directory_ingest_merges_loader_warnings() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("a.txt"), crate::testing::COURSE_A).expect("write a");
    fs::write(dir.path().join("notes.docx"), "binary").expect("write docx");

    let (indexer, _) = indexer();
    let report = indexer
        .ingest_directory(dir.path(), true)
        .await
        .expect("ingest directory");

    assert_eq!(report.courses_indexed, 1);
    assert_eq!(report.chunks_indexed, 2);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].source.ends_with("notes.docx"));
}

fn long_course(sentences: usize) -> String {
    let body = (0..sentences)
        .map(|n| format!("Sentence number {n} talks about seeds and soil in some detail."))
        .collect::<Vec<_>>()
        .join(" ");
    format!("Course Title: Gardening\n\nLesson 1: Soil\n{body}\n")
}

#[tokio::test]
async fn repeated_course_titles_become_warnings() {
    let (indexer, index) = indexer();
    let documents = vec![
        parse_course_document(&long_course(30), "first.txt").expect("first parses"),
        parse_course_document(&long_course(2), "second.txt").expect("second parses"),
    ];

    let report = indexer.ingest(documents, true).await.expect("ingest");

    assert_eq!(report.courses_indexed, 1);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].source, "second.txt");
    assert!(report.warnings[0].message.contains("Gardening"));
    assert_eq!(
        index.chunk_count().await.expect("count"),
        report.chunks_indexed
    );
    assert!(report.chunks_indexed > 1);
}

#[tokio::test]
async fn forced_reingest_drops_stale_chunks() {
    let (indexer, index) = indexer();

    let long = parse_course_document(&long_course(30), "garden.txt").expect("parses");
    let first = indexer.ingest(vec![long], true).await.expect("first ingest");
    assert!(first.chunks_indexed > 1);

    let short = parse_course_document(&long_course(2), "garden.txt").expect("parses");
    let second = indexer.ingest(vec![short], false).await.expect("forced ingest");

    assert_eq!(second.chunks_indexed, 1);
    assert_eq!(index.chunk_count().await.expect("count"), 1);
}

#[tokio::test]
async fn unavailable_catalog_check_does_not_abort_the_run() {
    let index = Arc::new(
        CourseIndex::new(
            Arc::new(FlakyBackend::new(u32::MAX)),
            Arc::new(WordEmbedder::default()),
            RetrievalConfig::default(),
        )
        .with_retry(2, std::time::Duration::from_millis(1)),
    );
    let indexer = Indexer::new(index, ChunkingConfig::default());

    let report = indexer
        .ingest(sample_documents(), true)
        .await
        .expect("failures are reported, not returned");

    assert_eq!(report.courses_indexed, 0);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings[0].message.contains("store offline"));
}
