use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use medassist_core::config::ConfigLoader;
use medassist_core::errors::{AgentError, ErrorKind, ErrorPayload};
use medassist_core::{AskRequest, UploadRequest};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mod app;

use app::App;

#[derive(Parser, Debug)]
#[clap(name = "medassist", author, version = "0.1.0", about = "Clinic assistant knowledge and dialogue tool")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "medassist.yaml", help = "Path to the YAML configuration file")]
    config: PathBuf,

    #[clap(long, short, help = "Log level (overrides logging.level from the config)")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk, embed and index a text document into an agent's knowledge base
    Ingest {
        agent: Uuid,
        file: PathBuf,
        #[clap(long, help = "MIME type recorded for the file (guessed from the extension if absent)")]
        mime_type: Option<String>,
    },
    /// Ask an agent a question on behalf of a user
    Ask {
        agent: Uuid,
        user: String,
        message: String,
        #[clap(long, help = "Answer without searching the knowledge base")]
        no_knowledge: bool,
        #[clap(long, help = "Maximum number of knowledge snippets")]
        limit: Option<usize>,
        #[clap(long, help = "Minimum similarity score for a snippet")]
        threshold: Option<f32>,
        #[clap(long, help = "Number of past dialog turns to replay")]
        history: Option<usize>,
    },
    /// Show the dialog history of a user with an agent
    History {
        agent: Uuid,
        user: String,
        #[clap(long)]
        limit: Option<usize>,
    },
    /// Delete dialog history for one user, or for every user of the agent
    ClearHistory {
        agent: Uuid,
        #[clap(long)]
        user: Option<String>,
    },
    /// List the knowledge files of an agent
    Files { agent: Uuid },
    /// Remove one knowledge file and its vectors
    DeleteFile { agent: Uuid, file_id: Uuid },
    /// Drop the agent's whole knowledge collection
    PurgeKnowledge { agent: Uuid },
    /// Knowledge and dialog statistics for an agent
    Stats { agent: Uuid },
    /// Check that the agent has a knowledge collection
    Check { agent: Uuid },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let payload = match e.downcast_ref::<AgentError>() {
                Some(agent_error) => agent_error.to_payload(),
                None => ErrorPayload {
                    kind: ErrorKind::Internal,
                    message: e.to_string(),
                },
            };
            eprintln!("{}", json!({ "error": payload }));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::from_file(&cli.config).await?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    env_logger::Builder::new()
        .filter_level(level.parse().unwrap_or(LevelFilter::Info))
        .init();

    let app = App::build(&config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let output = match cli.command {
        Commands::Ingest { agent, file, mime_type } => {
            let content = read_document(&file).await?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            let request = UploadRequest {
                agent_id: agent,
                file_name,
                size: content.len() as u64,
                mime_type: mime_type.unwrap_or_else(|| guess_mime_type(&file).to_string()),
                content,
            };
            json!(app.knowledge.upload_document(request, &cancel).await?)
        }
        Commands::Ask {
            agent,
            user,
            message,
            no_knowledge,
            limit,
            threshold,
            history,
        } => {
            let request = AskRequest {
                use_knowledge: !no_knowledge,
                knowledge_limit: limit,
                score_threshold: threshold,
                history_limit: history,
                ..AskRequest::new(agent, user, message)
            };
            json!(app.assistant.ask(request, &cancel).await?)
        }
        Commands::History { agent, user, limit } => {
            json!(app.assistant.dialog_history(agent, &user, limit).await?)
        }
        Commands::ClearHistory { agent, user } => {
            let deleted = app.assistant.delete_dialog_history(agent, user.as_deref()).await?;
            json!({ "deleted": deleted })
        }
        Commands::Files { agent } => json!(app.knowledge.list_files(agent).await?),
        Commands::DeleteFile { agent, file_id } => {
            app.knowledge.delete_knowledge_file(agent, file_id, &cancel).await?;
            json!({ "deleted": file_id })
        }
        Commands::PurgeKnowledge { agent } => {
            let files = app.knowledge.delete_all_agent_knowledge(agent, &cancel).await?;
            json!({ "deleted_files": files })
        }
        Commands::Stats { agent } => {
            let knowledge = app.knowledge.knowledge_stats(agent, &cancel).await?;
            let dialogs = app.assistant.dialog_stats(agent).await?;
            json!({ "knowledge": knowledge, "dialogs": dialogs })
        }
        Commands::Check { agent } => {
            let valid = app.knowledge.validate_agent_knowledge(agent, &cancel).await?;
            json!({ "agent_id": agent, "has_knowledge": valid })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Reads an ingest source. Bytes that are not UTF-8 are the caller's input error.
async fn read_document(path: &Path) -> Result<String, AgentError> {
    let bytes = tokio::fs::read(path).await?;
    String::from_utf8(bytes).map_err(|e| {
        AgentError::InvalidInput(format!(
            "{} is not valid UTF-8 (invalid byte at offset {})",
            path.display(),
            e.utf8_error().valid_up_to()
        ))
    })
}

fn guess_mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") | Some("markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        _ => "text/plain",
    }
}
