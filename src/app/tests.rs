use std::fs;

use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::database::MemoryStore;
use crate::generation::{Generation, ToolCall};
use crate::orchestrator::AnswerOutcome;
use crate::testing::{COURSE_A, COURSE_B, WordEmbedder, ScriptedGenerator, TEST_DIMENSION};

fn corpus() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("course_a.txt"), COURSE_A).expect("write course a");
    fs::write(dir.path().join("course_b.txt"), COURSE_B).expect("write course b");
    dir
}

fn system(script: Vec<std::result::Result<Generation, crate::ServiceError>>) -> RagSystem {
    let config = Config::with_base_dir("unused");
    RagSystem::from_parts(
        Arc::new(MemoryStore::new(TEST_DIMENSION)),
        Arc::new(WordEmbedder::default()),
        Arc::new(ScriptedGenerator::new(script)),
        &config,
    )
}

#[tokio::test]
async fn plants_question_is_answered_from_course_a() {
    let corpus = corpus();
    let system = system(vec![
        Ok(Generation::ToolCalls(vec![ToolCall::new(
            "search_course_content",
            json!({ "query": "How do plants make energy?" }),
        )])),
        Ok(Generation::Answer(
            "Plants make energy through photosynthesis.".to_string(),
        )),
    ]);

    let report = system
        .ingest_directory(corpus.path(), false, false)
        .await
        .expect("ingest");
    assert_eq!(report.courses_indexed, 2);

    let answer = system
        .answer("How do plants make energy?", None)
        .await
        .expect("answer");

    assert_eq!(answer.outcome, AnswerOutcome::Complete);
    assert_eq!(answer.tool_rounds, 1);
    assert_eq!(answer.citations[0].course, "Course A");
    assert_eq!(answer.citations[0].lesson_number, Some(1));
    assert!(answer.citations.iter().all(|c| c.course == "Course A"));
}

#[tokio::test]
async fn clear_and_force_control_reingestion() {
    let corpus = corpus();
    let system = system(Vec::new());

    system
        .ingest_directory(corpus.path(), false, false)
        .await
        .expect("first ingest");

    let skipped = system
        .ingest_directory(corpus.path(), false, false)
        .await
        .expect("second ingest");
    assert_eq!(skipped.courses_skipped, 2);

    let forced = system
        .ingest_directory(corpus.path(), false, true)
        .await
        .expect("forced ingest");
    assert_eq!(forced.courses_indexed, 2);

    fs::remove_file(corpus.path().join("course_b.txt")).expect("remove course b");
    let cleared = system
        .ingest_directory(corpus.path(), true, false)
        .await
        .expect("cleared ingest");
    assert_eq!(cleared.courses_indexed, 1);

    let analytics = system.course_analytics().await.expect("analytics");
    assert_eq!(analytics.total_courses, 1);
    assert_eq!(analytics.course_titles, vec!["Course A"]);
    assert_eq!(system.chunk_count().await.expect("count"), 2);
}

#[tokio::test]
async fn sessions_can_be_cleared() {
    let system = system(vec![Ok(Generation::Answer("Hello.".to_string()))]);

    let answer = system.answer("Hi", None).await.expect("answer");
    assert!(system.clear_session(&answer.session_id).await);
    assert!(!system.clear_session(&answer.session_id).await);
}

#[test]
fn both_tools_are_advertised() {
    let names: Vec<String> = system(Vec::new())
        .tool_definitions()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["get_course_outline", "search_course_content"]);
}

#[tokio::test]
async fn saved_sessions_carry_history_between_systems() {
    let base = TempDir::new().expect("temp dir");
    let sessions = base.path().join("sessions");

    let first = system(vec![Ok(Generation::Answer("Paris.".to_string()))]);
    let answer = first
        .answer_saved("What is the capital of France?", None, &sessions)
        .await
        .expect("first answer");

    let generator = Arc::new(ScriptedGenerator::new(vec![Ok(Generation::Answer(
        "About two million people.".to_string(),
    ))]));
    let second = RagSystem::from_parts(
        Arc::new(MemoryStore::new(TEST_DIMENSION)),
        Arc::new(WordEmbedder::default()),
        Arc::clone(&generator) as Arc<dyn crate::generation::Generator>,
        &Config::with_base_dir(base.path()),
    );
    let followup = second
        .answer_saved(
            "How many people live there?",
            Some(answer.session_id.clone()),
            &sessions,
        )
        .await
        .expect("followup answer");

    assert_eq!(followup.session_id, answer.session_id);
    let requests = generator.requests();
    let contents: Vec<&str> = requests[0]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert!(contents.contains(&"What is the capital of France?"));
    assert!(contents.contains(&"Paris."));
    assert!(sessions.join(format!("{}.json", answer.session_id)).exists());
}
