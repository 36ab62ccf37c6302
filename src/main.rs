use std::path::PathBuf;

use clap::{Parser, Subcommand};
use course_rag::commands::{ask, chat, ingest, list_courses, show_status};
use course_rag::config::{run_interactive_config, show_config};

#[derive(Debug, Parser)]
#[command(name = "course-rag")]
#[command(about = "Answer questions about course transcripts with retrieval-augmented generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Configure Ollama connection and settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Load a directory of course documents into the index
    Ingest {
        /// Directory containing .txt or .md course documents
        dir: PathBuf,
        /// Remove all indexed content before loading
        #[arg(long)]
        clear: bool,
        /// Re-index courses that are already present
        #[arg(long)]
        force: bool,
    },
    /// Ask a single question
    Ask {
        question: String,
        /// Continue an existing conversation
        #[arg(long)]
        session: Option<String>,
    },
    /// Start an interactive conversation
    Chat,
    /// List indexed courses
    Courses,
    /// Show Ollama connectivity and index status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Ingest { dir, clear, force } => {
            ingest(&dir, clear, force).await?;
        }
        Commands::Ask { question, session } => {
            ask(&question, session).await?;
        }
        Commands::Chat => {
            chat().await?;
        }
        Commands::Courses => {
            list_courses().await?;
        }
        Commands::Status => {
            show_status().await?;
        }
    }

    Ok(())
}
