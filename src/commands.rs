use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use tracing::{info, warn};

use crate::app::RagSystem;
use crate::config::Config;
use crate::embeddings::OllamaClient;
use crate::indexer::IngestionReport;
use crate::orchestrator::{Answer, AnswerOutcome};

async fn open_system() -> Result<(Config, RagSystem)> {
    let config = Config::load_default().context("Failed to load configuration")?;
    let system = RagSystem::open(&config)
        .await
        .context("Failed to open course index")?;
    Ok((config, system))
}

/// Load a directory of course documents into the index
#[inline]
pub async fn ingest(dir: &Path, clear: bool, force: bool) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let (_, system) = open_system().await?;
    info!("Ingesting course documents from {}", dir.display());

    let report = system
        .ingest_directory(dir, clear, force)
        .await
        .with_context(|| format!("Failed to ingest {}", dir.display()))?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &IngestionReport) {
    println!(
        "{} {} courses indexed ({} chunks), {} skipped",
        style("✓").green(),
        report.courses_indexed,
        report.chunks_indexed,
        report.courses_skipped
    );
    if report.courses_skipped > 0 {
        println!("  Use --force to re-index courses that are already present.");
    }
    if report.has_warnings() {
        println!("{}", style(format!("{} warnings:", report.warnings.len())).yellow());
        for warning in &report.warnings {
            println!("  ⚠ {}", warning);
        }
    }
}

/// Answer a single question; the conversation is saved so `--session` can continue it
#[inline]
pub async fn ask(question: &str, session: Option<String>) -> Result<()> {
    let (config, system) = open_system().await?;
    let answer = system
        .answer_saved(question, session, &config.sessions_path())
        .await
        .context("Failed to answer question")?;

    print_answer(&answer);
    println!();
    println!(
        "Session: {} (pass --session to continue)",
        style(&answer.session_id).dim()
    );
    Ok(())
}

/// Interactive conversation; one session for the whole loop
#[inline]
pub async fn chat() -> Result<()> {
    let (_, system) = open_system().await?;
    let mut session_id: Option<String> = None;

    eprintln!("{}", style("Course assistant").bold().cyan());
    eprintln!("Ask about the indexed courses. Type 'clear' to start over, 'exit' to quit.");

    loop {
        eprintln!();
        let question: String = Input::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()?;

        match question.trim() {
            "" => continue,
            "exit" | "quit" => break,
            "clear" => {
                if let Some(id) = session_id.take() {
                    system.clear_session(&id).await;
                }
                eprintln!("{}", style("Conversation cleared.").dim());
                continue;
            }
            _ => {}
        }

        match system.answer(&question, session_id.clone()).await {
            Ok(answer) => {
                session_id = Some(answer.session_id.clone());
                print_answer(&answer);
            }
            Err(e) => {
                warn!("Query failed: {}", e);
                eprintln!("{} {:#}", style("Error:").red(), e);
            }
        }
    }

    Ok(())
}

fn print_answer(answer: &Answer) {
    println!();
    println!("{}", answer.answer);

    match answer.outcome {
        AnswerOutcome::Complete => {}
        AnswerOutcome::RoundLimitReached => {
            println!("{}", style("(search limit reached, answer may be incomplete)").yellow());
        }
        AnswerOutcome::TimedOut => {
            println!("{}", style("(timed out, answer may be incomplete)").yellow());
        }
        AnswerOutcome::Degraded => {
            println!("{}", style("(some tool requests failed)").yellow());
        }
        AnswerOutcome::Unavailable => {
            println!("{}", style("(model service unavailable)").red());
        }
    }

    if !answer.citations.is_empty() {
        println!();
        println!("{}", style("Sources:").bold());
        for citation in &answer.citations {
            println!("  - {}", citation);
        }
    }
}

/// List indexed courses
#[inline]
pub async fn list_courses() -> Result<()> {
    let (_, system) = open_system().await?;
    let courses = system.courses().await.context("Failed to list courses")?;

    if courses.is_empty() {
        println!("No courses indexed yet.");
        println!("Use 'course-rag ingest <dir>' to load course documents.");
        return Ok(());
    }

    println!("Indexed courses ({}):", courses.len());
    for course in courses {
        print!("  {} ({} lessons)", style(&course.title).cyan(), course.lessons.len());
        if let Some(instructor) = &course.instructor {
            print!(" - {}", instructor);
        }
        println!();
    }
    Ok(())
}

/// Report Ollama connectivity and index contents
#[inline]
pub async fn show_status() -> Result<()> {
    let config = Config::load_default().unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {:#}", e);
        Config::with_base_dir(Config::default_dir().unwrap_or_else(|_| ".course-rag".into()))
    });

    println!("📊 Course RAG Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.ping() {
            Ok(()) => {
                println!(
                    "   ✅ Ollama: Connected ({}:{})",
                    config.ollama.host, config.ollama.port
                );
                match client.validate_models() {
                    Ok(()) => println!("   ✅ Models available"),
                    Err(e) => println!("   ⚠️  {:#}", e),
                }
            }
            Err(e) => println!("   ❌ Ollama: Unreachable - {:#}", e),
        },
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }
    println!("   📋 Embedding Model: {}", config.ollama.embedding_model);
    println!("   💬 Chat Model: {}", config.ollama.chat_model);

    println!();
    println!("🔍 Course Index:");
    match RagSystem::open(&config).await {
        Ok(system) => {
            println!(
                "   ✅ LanceDB: {}",
                config.vector_database_path().display()
            );
            match system.chunk_count().await {
                Ok(count) => println!("   📊 Chunks: {}", count),
                Err(e) => println!("   ⚠️  Chunks: unknown - {}", e),
            }
            match system.course_analytics().await {
                Ok(analytics) => {
                    println!("   📚 Courses: {}", analytics.total_courses);
                    for title in analytics.course_titles {
                        println!("      - {}", title);
                    }
                }
                Err(e) => println!("   ⚠️  Courses: unknown - {}", e),
            }
        }
        Err(e) => println!("   ❌ LanceDB: Failed to open - {}", e),
    }

    Ok(())
}
