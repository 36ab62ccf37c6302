
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{Tool, ToolArguments, ToolError, ToolHandler, ToolOutput, parse_arguments};
use crate::database::ChunkFilter;
use crate::index::{CourseIndex, SearchHit};

pub const SEARCH_TOOL_NAME: &str = "search_course_content";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchParams {
    query: String,
    #[serde(default)]
    course_name: Option<String>,
    #[serde(default)]
    lesson_number: Option<u32>,
}

/// Semantic search over course content with optional course and lesson filters
pub struct CourseSearchTool {
    index: Arc<CourseIndex>,
    max_results: usize,
}

impl CourseSearchTool {
    #[inline]
    pub fn new(index: Arc<CourseIndex>, max_results: usize) -> Self {
        Self { index, max_results }
    }

    async fn search(&self, params: SearchParams) -> Result<ToolOutput, ToolError> {
        let mut filter = ChunkFilter::default();
        let mut course_title = None;

        if let Some(name) = params.course_name.as_deref() {
            let resolved = self
                .index
                .resolve_course(name)
                .await
                .map_err(|e| ToolError::execution(SEARCH_TOOL_NAME, e))?;
            let Some(course) = resolved else {
                return Ok(ToolOutput::error(format!(
                    "No course found matching '{}'",
                    name
                )));
            };
            filter.course_id = Some(course.title.clone());
            course_title = Some(course.title);
        }
        filter.lesson_number = params.lesson_number;

        debug!(
            "Searching course content: query='{}', filter={:?}",
            params.query, filter
        );

        let hits = self
            .index
            .query(&params.query, self.max_results, &filter)
            .await
            .map_err(|e| ToolError::execution(SEARCH_TOOL_NAME, e))?;

        if hits.is_empty() {
            return Ok(ToolOutput::success(
                empty_message(course_title.as_deref(), params.lesson_number),
                Vec::new(),
            ));
        }

        let citations = hits.iter().map(|hit| hit.citation.clone()).collect();
        Ok(ToolOutput::success(format_hits(&hits), citations))
    }
}

#[async_trait]
impl ToolHandler for CourseSearchTool {
    #[inline]
    fn definition(&self) -> Tool {
        Tool {
            name: SEARCH_TOOL_NAME.to_string(),
            description: "Search course materials with smart course name matching and lesson filtering"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to search for in the course content"
                    },
                    "course_name": {
                        "type": "string",
                        "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                    },
                    "lesson_number": {
                        "type": "integer",
                        "description": "Specific lesson number to search within (e.g. 1, 2, 3)"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    #[inline]
    async fn handle(&self, arguments: &ToolArguments) -> Result<ToolOutput, ToolError> {
        let params: SearchParams = parse_arguments(SEARCH_TOOL_NAME, arguments)?;
        if params.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: SEARCH_TOOL_NAME.to_string(),
                message: "query must not be empty".to_string(),
            });
        }
        self.search(params).await
    }
}

fn empty_message(course: Option<&str>, lesson: Option<u32>) -> String {
    let course = course
        .map(|course| format!(" in course '{}'", course))
        .unwrap_or_default();
    let lesson = lesson
        .map(|lesson| format!(" (lesson {})", lesson))
        .unwrap_or_default();
    format!("No relevant content found{}{}.", course, lesson)
}

fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("[{}]\n{}", hit.citation.label(), hit.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
