
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Tool, ToolArguments, ToolError, ToolHandler, ToolOutput, parse_arguments};
use crate::documents::Course;
use crate::index::{Citation, CourseIndex};

pub const OUTLINE_TOOL_NAME: &str = "get_course_outline";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OutlineParams {
    course_name: String,
}

/// Title, link, instructor and lesson list of one course
pub struct CourseOutlineTool {
    index: Arc<CourseIndex>,
}

impl CourseOutlineTool {
    #[inline]
    pub fn new(index: Arc<CourseIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ToolHandler for CourseOutlineTool {
    #[inline]
    fn definition(&self) -> Tool {
        Tool {
            name: OUTLINE_TOOL_NAME.to_string(),
            description: "Get the outline of a course: its title, link, instructor and numbered list of lessons"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "course_name": {
                        "type": "string",
                        "description": "Course title (partial matches work)"
                    }
                },
                "required": ["course_name"],
                "additionalProperties": false
            }),
        }
    }

    #[inline]
    async fn handle(&self, arguments: &ToolArguments) -> Result<ToolOutput, ToolError> {
        let params: OutlineParams = parse_arguments(OUTLINE_TOOL_NAME, arguments)?;

        let course = self
            .index
            .resolve_course(&params.course_name)
            .await
            .map_err(|e| ToolError::execution(OUTLINE_TOOL_NAME, e))?;

        Ok(match course {
            Some(course) => {
                ToolOutput::success(format_outline(&course), vec![Citation::for_course(&course)])
            }
            None => ToolOutput::error(format!(
                "No course found matching '{}'",
                params.course_name
            )),
        })
    }
}

fn format_outline(course: &Course) -> String {
    let mut out = format!("Course: {}\n", course.title);
    if let Some(link) = &course.link {
        let _ = writeln!(out, "Link: {}", link);
    }
    if let Some(instructor) = &course.instructor {
        let _ = writeln!(out, "Instructor: {}", instructor);
    }

    if course.lessons.is_empty() {
        out.push_str("No lessons recorded.");
    } else {
        let _ = write!(out, "Lessons ({}):", course.lessons.len());
        for lesson in &course.lessons {
            let _ = write!(out, "\n  Lesson {}: {}", lesson.number, lesson.title);
        }
    }
    out
}
