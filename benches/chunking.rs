use course_rag::documents::parse_course_document;
use course_rag::embeddings::{ChunkingConfig, chunk_document};
use criterion::{Criterion, criterion_group, criterion_main};
use std::fmt::Write as _;
use std::hint::black_box;

fn synthetic_transcript(lessons: u32, sentences_per_lesson: u32) -> String {
    let mut text = String::from(
        "Course Title: Benchmarking Transcripts\n\
         Course Link: https://example.com/bench\n\
         Course Instructor: Dr. Bench\n\n",
    );
    for lesson in 0..lessons {
        let _ = writeln!(text, "Lesson {}: Topic {}", lesson, lesson);
        let _ = writeln!(text, "Lesson Link: https://example.com/bench/{}", lesson);
        for sentence in 0..sentences_per_lesson {
            let _ = write!(
                text,
                "In step {} of lesson {} we review how retrieval works, e.g. with Dr. Smith's examples. ",
                sentence, lesson
            );
            if sentence % 7 == 6 {
                text.push('\n');
            }
        }
        text.push('\n');
    }
    text
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let transcript = synthetic_transcript(12, 120);
    let document =
        parse_course_document(&transcript, "bench.txt").expect("synthetic transcript parses");
    let config = ChunkingConfig::default();

    c.bench_function("chunking", |b| {
        b.iter(|| chunk_document(black_box(&document), black_box(&config)))
    });
    c.bench_function("parse_and_chunk", |b| {
        b.iter(|| {
            parse_course_document(black_box(&transcript), "bench.txt")
                .map(|document| chunk_document(&document, &config))
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
