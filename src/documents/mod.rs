//! Course documents
//!
//! Parses course transcript files into a [`CourseDocument`]: course metadata plus
//! ordered, lesson-tagged text blocks ready for chunking.
//!
//! The expected layout is a few header lines followed by lesson markers:
//!
//! ```text
//! Course Title: Building Towards Computer Use
//! Course Link: https://example.com/course
//! Course Instructor: Jane Doe
//!
//! Lesson 0: Introduction
//! Lesson Link: https://example.com/course/lesson-0
//! Transcript text...
//! ```


use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Result;

static LESSON_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Lesson\s+(\d+)\s*:\s*(.*)$").expect("lesson marker pattern is valid")
});

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md"];

/// A course and its ordered lessons
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    pub link: Option<String>,
    pub instructor: Option<String>,
    pub lessons: Vec<Lesson>,
}

impl Course {
    /// Courses are identified by their title
    #[inline]
    pub fn id(&self) -> &str {
        &self.title
    }

    #[inline]
    pub fn lesson(&self, number: u32) -> Option<&Lesson> {
        self.lessons.iter().find(|lesson| lesson.number == number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub number: u32,
    pub title: String,
    pub link: Option<String>,
}

/// Text belonging to one lesson, or to the course itself when `lesson_number` is `None`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonBlock {
    pub lesson_number: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseDocument {
    pub course: Course,
    pub blocks: Vec<LessonBlock>,
    /// Where the document was read from, used in warnings
    pub source: String,
}

impl CourseDocument {
    /// Whether any block carries non-whitespace text
    #[inline]
    pub fn has_content(&self) -> bool {
        self.blocks.iter().any(|b| !b.text.trim().is_empty())
    }
}

/// Non-fatal problem found while loading or indexing a single document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionWarning {
    pub source: String,
    pub message: String,
}

impl IngestionWarning {
    #[inline]
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for IngestionWarning {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Parse a course document from its text.
///
/// Returns a warning instead of a document when no course title can be found or the
/// document carries no text at all.
#[inline]
pub fn parse_course_document(
    text: &str,
    source: &str,
) -> std::result::Result<CourseDocument, IngestionWarning> {
    let mut lines = text.lines().map(str::trim_end).peekable();

    let mut title = None;
    let mut link = None;
    let mut instructor = None;

    // Header: metadata lines until the first lesson marker or body line
    while let Some(line) = lines.peek() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            lines.next();
            continue;
        }
        if let Some(value) = header_value(trimmed, "Course Title:") {
            title = non_empty(value);
        } else if let Some(value) = header_value(trimmed, "Course Link:") {
            link = non_empty(value);
        } else if let Some(value) = header_value(trimmed, "Course Instructor:") {
            instructor = non_empty(value);
        } else if title.is_none() && !is_lesson_marker(trimmed) {
            // Files without a title header use their first line as the title
            title = Some(trimmed.to_string());
        } else {
            break;
        }
        lines.next();
    }

    let Some(title) = title else {
        return Err(IngestionWarning::new(source, "no course title found"));
    };

    let mut lessons: Vec<Lesson> = Vec::new();
    let mut blocks: Vec<LessonBlock> = Vec::new();
    let mut current = LessonBlock {
        lesson_number: None,
        text: String::new(),
    };

    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if let Some((number, lesson_title)) = parse_lesson_marker(trimmed) {
            push_block(&mut blocks, current);

            let mut lesson_link = None;
            while let Some(next) = lines.peek() {
                let next = next.trim();
                if next.is_empty() {
                    lines.next();
                    continue;
                }
                if let Some(value) = header_value(next, "Lesson Link:") {
                    lesson_link = non_empty(value);
                    lines.next();
                }
                break;
            }

            if lessons.iter().any(|l| l.number == number) {
                warn!(
                    "{}: lesson {} appears more than once, merging its text",
                    source, number
                );
            } else {
                lessons.push(Lesson {
                    number,
                    title: lesson_title,
                    link: lesson_link,
                });
            }

            current = LessonBlock {
                lesson_number: Some(number),
                text: String::new(),
            };
            continue;
        }

        if !current.text.is_empty() {
            current.text.push('\n');
        }
        current.text.push_str(line);
    }
    push_block(&mut blocks, current);

    let document = CourseDocument {
        course: Course {
            title,
            link,
            instructor,
            lessons,
        },
        blocks,
        source: source.to_string(),
    };

    if !document.has_content() {
        return Err(IngestionWarning::new(source, "document has no content"));
    }

    debug!(
        "Parsed course '{}' from {} ({} lessons, {} blocks)",
        document.course.title,
        source,
        document.course.lessons.len(),
        document.blocks.len()
    );

    Ok(document)
}

/// Load every supported course document in `dir`, in file-name order.
///
/// Unreadable or malformed files are reported as warnings and skipped.
#[inline]
pub fn load_course_directory(dir: &Path) -> Result<(Vec<CourseDocument>, Vec<IngestionWarning>)> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut documents = Vec::new();
    let mut warnings = Vec::new();

    for path in paths {
        let source = path.display().to_string();

        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(ext))
            });
        if !supported {
            warn!("Skipping unsupported file {}", source);
            warnings.push(IngestionWarning::new(source, "unsupported file type"));
            continue;
        }

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read {}: {}", source, e);
                warnings.push(IngestionWarning::new(source, format!("unreadable: {e}")));
                continue;
            }
        };

        match parse_course_document(&text, &source) {
            Ok(document) => documents.push(document),
            Err(warning) => {
                warn!("Skipping {}", warning);
                warnings.push(warning);
            }
        }
    }

    info!(
        "Loaded {} course documents from {} ({} warnings)",
        documents.len(),
        dir.display(),
        warnings.len()
    );

    Ok((documents, warnings))
}

fn header_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| line.get(prefix.len()..))
        .map(str::trim)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn is_lesson_marker(line: &str) -> bool {
    parse_lesson_marker(line).is_some()
}

fn parse_lesson_marker(line: &str) -> Option<(u32, String)> {
    let captures = LESSON_MARKER.captures(line).ok()??;
    let number = captures.get(1)?.as_str().parse().ok()?;
    let title = captures
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some((number, title))
}

fn push_block(blocks: &mut Vec<LessonBlock>, block: LessonBlock) {
    if block.text.trim().is_empty() {
        return;
    }
    // A repeated lesson marker continues the earlier block for that lesson
    if let Some(existing) = blocks
        .iter_mut()
        .find(|b| b.lesson_number.is_some() && b.lesson_number == block.lesson_number)
    {
        existing.text.push('\n');
        existing.text.push_str(&block.text);
    } else {
        blocks.push(block);
    }
}
