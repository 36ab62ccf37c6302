
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::documents::{CourseDocument, LessonBlock};

/// Sentence boundary: terminal punctuation, whitespace, then an uppercase, digit or quote
/// start. Short capitalised abbreviations like `Dr.` and `Mrs.` do not end a sentence.
static SENTENCE_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?<!\b[A-Z][a-z]\.)(?<!\b[A-Z][a-z]{2}\.)(?<=[.!?])\s+(?=[A-Z0-9"'(\[])"#)
        .expect("sentence boundary pattern is valid")
});

/// A chunk of course text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseChunk {
    /// Stable id derived from the course id and sequence
    pub id: String,
    /// The owning course (its title)
    pub course_id: String,
    /// `None` for course-level text that precedes the first lesson
    pub lesson_number: Option<u32>,
    pub lesson_title: Option<String>,
    pub lesson_link: Option<String>,
    /// Position of this chunk within the course, starting at 0
    pub sequence: u32,
    pub content: String,
    /// Byte range of `content` within the lesson's normalized text
    pub start_offset: usize,
    pub end_offset: usize,
}

impl CourseChunk {
    /// Text handed to the embedder, carrying course and lesson context
    #[inline]
    pub fn embedding_text(&self) -> String {
        match (self.lesson_number, &self.lesson_title) {
            (Some(number), Some(title)) if !title.is_empty() => format!(
                "Course: {}\nLesson {}: {}\n\n{}",
                self.course_id, number, title, self.content
            ),
            (Some(number), _) => format!(
                "Course: {}\nLesson {}\n\n{}",
                self.course_id, number, self.content
            ),
            (None, _) => format!("Course: {}\n\n{}", self.course_id, self.content),
        }
    }
}

/// Configuration for transcript chunking, sizes in bytes of normalized text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Hard upper bound for a chunk
    pub max_chunk_size: usize,
    /// Chunks shorter than this are only produced at the end of a lesson
    pub min_chunk_size: usize,
    /// Trailing bytes of a chunk repeated at the start of the next one
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_size: 800,
            min_chunk_size: 200,
            overlap_size: 100,
        }
    }
}

/// Derive the stable chunk id for a course position
#[inline]
pub fn chunk_id(course_id: &str, sequence: u32) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{course_id}#{sequence}").as_bytes(),
    )
    .to_string()
}

/// Collapse whitespace runs into single spaces and trim the ends
#[inline]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Chunk every block of a course document, numbering chunks across lessons
#[inline]
pub fn chunk_document(document: &CourseDocument, config: &ChunkingConfig) -> Vec<CourseChunk> {
    let mut chunks = Vec::new();
    let mut sequence = 0_u32;

    for block in &document.blocks {
        let block_chunks = chunk_block(document, block, config, &mut sequence);
        chunks.extend(block_chunks);
    }

    debug!(
        "Chunked course '{}' into {} chunks (avg {} bytes)",
        document.course.title,
        chunks.len(),
        chunks.iter().map(|c| c.content.len()).sum::<usize>() / chunks.len().max(1)
    );

    chunks
}

fn chunk_block(
    document: &CourseDocument,
    block: &LessonBlock,
    config: &ChunkingConfig,
    sequence: &mut u32,
) -> Vec<CourseChunk> {
    let normalized = normalize_text(&block.text);
    let lesson = block
        .lesson_number
        .and_then(|number| document.course.lesson(number));
    let course_id = document.course.id();

    split_ranges(&normalized, config)
        .into_iter()
        .map(|(start, end)| {
            let chunk = CourseChunk {
                id: chunk_id(course_id, *sequence),
                course_id: course_id.to_string(),
                lesson_number: block.lesson_number,
                lesson_title: lesson.map(|l| l.title.clone()),
                lesson_link: lesson.and_then(|l| l.link.clone()),
                sequence: *sequence,
                content: normalized[start..end].to_string(),
                start_offset: start,
                end_offset: end,
            };
            *sequence += 1;
            chunk
        })
        .collect()
}

/// Split normalized text into overlapping chunk ranges.
///
/// Every returned range starts and ends on a char boundary, is at most
/// `max_chunk_size` bytes, and only the last one may be shorter than `min_chunk_size`.
/// A single char wider than `max_chunk_size` becomes a chunk of its own.
fn split_ranges(text: &str, config: &ChunkingConfig) -> Vec<(usize, usize)> {
    let len = text.len();
    if len == 0 {
        return Vec::new();
    }

    let max = config.max_chunk_size.max(1);
    let min = config.min_chunk_size.min(max);
    let sentence_ends = sentence_ends(text);

    let mut ranges = Vec::new();
    let mut start = 0;
    let mut previous_end = 0;

    loop {
        let end = if len - start <= max {
            len
        } else {
            let limit = match floor_char_boundary(text, start + max) {
                limit if limit > start => limit,
                _ => ceil_char_boundary(text, start + 1),
            };
            // Must move past the previous chunk, otherwise the overlap would repeat forever
            let lower = start.max(previous_end);

            let sentence_end = sentence_ends
                .iter()
                .copied()
                .filter(|&e| e > lower && e <= limit)
                .max()
                .filter(|&e| e - start >= min);

            sentence_end
                .or_else(|| word_end(text, lower, limit).filter(|&e| e - start >= min))
                .unwrap_or(limit)
        };

        ranges.push((start, end));
        if end >= len {
            break;
        }

        previous_end = end;
        start = next_start(text, start, end, config.overlap_size);
    }

    ranges
}

/// Byte offsets where sentences end, always including the end of the text
fn sentence_ends(text: &str) -> Vec<usize> {
    let mut ends: Vec<usize> = SENTENCE_BOUNDARY
        .find_iter(text)
        .filter_map(|m| m.ok())
        .map(|m| m.start())
        .collect();
    ends.push(text.len());
    ends
}

/// The largest word end in `(lower, limit]`
fn word_end(text: &str, lower: usize, limit: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    (lower + 1..=limit)
        .rev()
        .find(|&p| p == bytes.len() || bytes[p] == b' ')
}

/// Where the chunk after `[start, end)` begins: `overlap` bytes back, snapped forward
/// to the start of a word
fn next_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    let bytes = text.as_bytes();
    let skip_space = |p: usize| if bytes.get(p) == Some(&b' ') { p + 1 } else { p };

    let mut next = end.saturating_sub(overlap);
    if next > 0 && bytes[next - 1] != b' ' {
        next = bytes[next..end]
            .iter()
            .position(|&b| b == b' ')
            .map_or(end, |offset| next + offset + 1);
    }
    next = skip_space(next);

    if next <= start || next >= end {
        skip_space(end)
    } else {
        next
    }
}

fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
