use serde_json::json;

use super::*;
use crate::config::RetrievalConfig;
use crate::testing::sample_index;

async fn registry() -> ToolRegistry {
    let index = sample_index(RetrievalConfig::default()).await;
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CourseSearchTool::new(Arc::clone(&index), 5)));
    registry.register(Arc::new(CourseOutlineTool::new(index)));
    registry
}

#[tokio::test]
async fn definitions_are_ordered_by_name() {
    let registry = registry().await;
    let names: Vec<String> = registry.definitions().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["get_course_outline", "search_course_content"]);
    assert_eq!(registry.len(), 2);
    assert!(registry.contains("search_course_content"));
}

#[tokio::test]
async fn unknown_tool_is_not_found_and_recorded() {
    let registry = registry().await;
    let mut log = InvocationLog::new();

    let error = registry
        .invoke(&ToolCall::new("delete_everything", json!({})), &mut log)
        .await
        .expect_err("unknown tool must fail");

    assert!(matches!(error, ToolError::NotFound { ref name } if name == "delete_everything"));
    assert_eq!(log.records().len(), 1);
    assert!(log.records()[0].is_error);
}

#[tokio::test]
async fn invocations_accumulate_deduplicated_citations() {
    let registry = registry().await;
    let mut log = InvocationLog::new();
    let call = ToolCall::new(
        "search_course_content",
        json!({ "query": "How do plants make energy?" }),
    );

    registry.invoke(&call, &mut log).await.expect("first search");
    registry.invoke(&call, &mut log).await.expect("second search");
    registry
        .invoke(
            &ToolCall::new("get_course_outline", json!({ "course_name": "Course B" })),
            &mut log,
        )
        .await
        .expect("outline");

    assert_eq!(log.records().len(), 3);
    let citations = log.citations();
    assert_eq!(citations[0].course, "Course A");
    assert_eq!(citations.last().map(|c| c.course.as_str()), Some("Course B"));
    let first_search = &log.records()[0].citations;
    assert_eq!(citations.len(), first_search.len() + 1);
    assert_eq!(log.evidence().len(), 3);
}

#[tokio::test]
async fn failed_invocations_contribute_no_citations() {
    let registry = registry().await;
    let mut log = InvocationLog::new();

    let output = registry
        .invoke(
            &ToolCall::new(
                "search_course_content",
                json!({ "query": "roots", "course_name": "Medieval Poetry" }),
            ),
            &mut log,
        )
        .await
        .expect("handler returns error output");
    assert!(output.is_error);

    let invalid = registry
        .invoke(
            &ToolCall::new("get_course_outline", json!({ "course": "A" })),
            &mut log,
        )
        .await;
    assert!(matches!(invalid, Err(ToolError::InvalidArguments { .. })));

    assert_eq!(log.records().len(), 2);
    assert!(log.records().iter().all(|r| r.is_error));
    assert!(log.citations().is_empty());
    assert!(log.evidence().is_empty());
}

#[test]
fn parse_arguments_reports_tool_name() {
    #[derive(Debug, Deserialize)]
    struct Params {
        #[expect(dead_code, reason = "only deserialization is exercised")]
        count: u32,
    }

    let mut arguments = ToolArguments::new();
    arguments.insert("count".to_string(), json!("three"));
    let error = parse_arguments::<Params>("counter", &arguments).expect_err("wrong type");
    assert!(error.to_string().starts_with("Invalid arguments for counter"));
}
