// LanceDB vector database module
// Arrow schemas and record batch conversion for the chunk and catalog tables


pub mod vector_store;

use std::sync::Arc;

use arrow::array::{Array, FixedSizeListArray, Float32Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Utc;

use super::{ChunkRecord, CourseRecord, Scored};
use crate::documents::{Course, Lesson};
use crate::embeddings::CourseChunk;
use crate::{RagError, Result};

pub const CHUNK_TABLE: &str = "course_content";
pub const CATALOG_TABLE: &str = "course_catalog";

const DISTANCE_COLUMN: &str = "_distance";

fn vector_field(dimension: usize) -> Field {
    Field::new(
        "vector",
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, true)),
            dimension as i32,
        ),
        false,
    )
}

/// Schema of the chunk table
#[inline]
pub fn chunk_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        vector_field(dimension),
        Field::new("course_id", DataType::Utf8, false),
        Field::new("lesson_number", DataType::UInt32, true),
        Field::new("lesson_title", DataType::Utf8, true),
        Field::new("lesson_link", DataType::Utf8, true),
        Field::new("sequence", DataType::UInt32, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("start_offset", DataType::UInt64, false),
        Field::new("end_offset", DataType::UInt64, false),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

/// Schema of the course catalog table; lessons are stored as JSON
#[inline]
pub fn catalog_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        vector_field(dimension),
        Field::new("link", DataType::Utf8, true),
        Field::new("instructor", DataType::Utf8, true),
        Field::new("lessons", DataType::Utf8, false),
        Field::new("lesson_count", DataType::UInt32, false),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

/// Vector dimension declared by a table schema
#[inline]
pub fn schema_dimension(schema: &Schema) -> Option<usize> {
    schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
            _ => None,
        })
}

fn vector_array(vectors: &[&[f32]], dimension: usize) -> Result<FixedSizeListArray> {
    let mut flat_values = Vec::with_capacity(vectors.len() * dimension);
    for vector in vectors {
        if vector.len() != dimension {
            return Err(RagError::DimensionMismatch {
                stored: dimension,
                produced: vector.len(),
            });
        }
        flat_values.extend_from_slice(vector);
    }

    let field = Arc::new(Field::new("item", DataType::Float32, true));
    FixedSizeListArray::try_new(
        field,
        dimension as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))
}

/// Build a record batch for the chunk table
#[inline]
pub fn chunk_batch(records: &[ChunkRecord], dimension: usize) -> Result<RecordBatch> {
    let created_at = Utc::now().to_rfc3339();
    let vectors: Vec<&[f32]> = records.iter().map(|r| r.vector.as_slice()).collect();

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.chunk.id.as_str()),
        )),
        Arc::new(vector_array(&vectors, dimension)?),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.chunk.course_id.as_str()),
        )),
        Arc::new(UInt32Array::from_iter(
            records.iter().map(|r| r.chunk.lesson_number),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.chunk.lesson_title.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.chunk.lesson_link.as_deref()),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.chunk.sequence),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.chunk.content.as_str()),
        )),
        Arc::new(UInt64Array::from_iter_values(
            records.iter().map(|r| r.chunk.start_offset as u64),
        )),
        Arc::new(UInt64Array::from_iter_values(
            records.iter().map(|r| r.chunk.end_offset as u64),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|_| created_at.as_str()),
        )),
    ];

    RecordBatch::try_new(chunk_schema(dimension), arrays)
        .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
}

/// Build a record batch for the catalog table
#[inline]
pub fn catalog_batch(records: &[CourseRecord], dimension: usize) -> Result<RecordBatch> {
    let created_at = Utc::now().to_rfc3339();
    let vectors: Vec<&[f32]> = records.iter().map(|r| r.vector.as_slice()).collect();
    let lessons = records
        .iter()
        .map(|r| serde_json::to_string(&r.course.lessons))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| RagError::Database(format!("Failed to encode lessons: {}", e)))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.course.title.as_str()),
        )),
        Arc::new(vector_array(&vectors, dimension)?),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.course.link.as_deref()),
        )),
        Arc::new(StringArray::from_iter(
            records.iter().map(|r| r.course.instructor.as_deref()),
        )),
        Arc::new(StringArray::from_iter_values(lessons.iter().map(String::as_str))),
        Arc::new(UInt32Array::from_iter_values(
            records
                .iter()
                .map(|r| u32::try_from(r.course.lessons.len()).unwrap_or(u32::MAX)),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|_| created_at.as_str()),
        )),
    ];

    RecordBatch::try_new(catalog_schema(dimension), arrays)
        .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn optional_string(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_string())
}

/// Similarity for each row of a search batch; rows without a distance score 0
fn similarities(batch: &RecordBatch) -> Vec<f32> {
    let distances = batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    (0..batch.num_rows())
        .map(|row| {
            distances.map_or(0.0, |d| {
                if d.is_null(row) {
                    0.0
                } else {
                    // Cosine distance is 1 - similarity
                    1.0 - d.value(row)
                }
            })
        })
        .collect()
}

/// Parse chunk rows, with their similarity when the batch came from a vector search
#[inline]
pub fn parse_chunk_batch(batch: &RecordBatch) -> Result<Vec<Scored<CourseChunk>>> {
    let ids = column::<StringArray>(batch, "id")?;
    let course_ids = column::<StringArray>(batch, "course_id")?;
    let lesson_numbers = column::<UInt32Array>(batch, "lesson_number")?;
    let lesson_titles = column::<StringArray>(batch, "lesson_title")?;
    let lesson_links = column::<StringArray>(batch, "lesson_link")?;
    let sequences = column::<UInt32Array>(batch, "sequence")?;
    let contents = column::<StringArray>(batch, "content")?;
    let start_offsets = column::<UInt64Array>(batch, "start_offset")?;
    let end_offsets = column::<UInt64Array>(batch, "end_offset")?;

    let scores = similarities(batch);

    Ok((0..batch.num_rows())
        .map(|row| Scored {
            item: CourseChunk {
                id: ids.value(row).to_string(),
                course_id: course_ids.value(row).to_string(),
                lesson_number: (!lesson_numbers.is_null(row)).then(|| lesson_numbers.value(row)),
                lesson_title: optional_string(lesson_titles, row),
                lesson_link: optional_string(lesson_links, row),
                sequence: sequences.value(row),
                content: contents.value(row).to_string(),
                start_offset: start_offsets.value(row) as usize,
                end_offset: end_offsets.value(row) as usize,
            },
            score: scores[row],
        })
        .collect())
}

/// Parse catalog rows, with their similarity when the batch came from a vector search
#[inline]
pub fn parse_catalog_batch(batch: &RecordBatch) -> Result<Vec<Scored<Course>>> {
    let titles = column::<StringArray>(batch, "id")?;
    let links = column::<StringArray>(batch, "link")?;
    let instructors = column::<StringArray>(batch, "instructor")?;
    let lessons = column::<StringArray>(batch, "lessons")?;

    let scores = similarities(batch);

    (0..batch.num_rows())
        .map(|row| {
            let parsed: Vec<Lesson> = serde_json::from_str(lessons.value(row)).map_err(|e| {
                RagError::Database(format!(
                    "Invalid lessons for course '{}': {}",
                    titles.value(row),
                    e
                ))
            })?;

            Ok(Scored {
                item: Course {
                    title: titles.value(row).to_string(),
                    link: optional_string(links, row),
                    instructor: optional_string(instructors, row),
                    lessons: parsed,
                },
                score: scores[row],
            })
        })
        .collect()
}
