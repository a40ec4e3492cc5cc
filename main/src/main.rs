use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand, ValueEnum};
use common::{
    error::AppError,
    storage::types::{
        ingest_job::IngestJob,
        session::Language,
        upload::UploadRecord,
    },
    utils::config::get_config,
};
use main::bootstrap::{self, AppComponents};
use retrieval_pipeline::orchestrator::QueryRequest;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// A single fixed principal for CLI-driven operations. The CLI is an
/// operator tool, not a multi-tenant surface — every ingest/query/rebuild
/// issued through it shares one owner scope.
const CLI_OWNER: &str = "cli-operator";

#[derive(Parser)]
#[command(name = "consult", about = "Operator CLI for the study-abroad consult service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a single file synchronously.
    Ingest { path: PathBuf },
    /// Ask a question against the indexed corpus.
    Query {
        text: String,
        #[arg(long, value_enum, default_value_t = LanguageArg::En)]
        language: LanguageArg,
        #[arg(long)]
        session: Option<String>,
    },
    /// Ingest every path listed (one per line) in a manifest file.
    BulkIngest { manifest: PathBuf },
    /// Rebuild the in-memory hybrid index from durable storage.
    RebuildIndex,
}

#[derive(Clone, Copy, ValueEnum)]
enum LanguageArg {
    En,
    Zh,
}

impl From<LanguageArg> for Language {
    fn from(value: LanguageArg) -> Self {
        match value {
            LanguageArg::En => Language::En,
            LanguageArg::Zh => Language::Zh,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    let config = match get_config() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load configuration: {err}");
            return ExitCode::from(1);
        }
    };

    let components = match bootstrap::build(config).await {
        Ok(components) => components,
        Err(err) => {
            error!("failed to initialize service components: {err}");
            return ExitCode::from(1);
        }
    };

    match run(components, cli.command).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            error!("command failed: {err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(components: AppComponents, command: Command) -> Result<(), AppError> {
    match command {
        Command::Ingest { path } => ingest_path(&components, &path).await,
        Command::Query { text, language, session } => {
            query(&components, text, language.into(), session).await
        }
        Command::BulkIngest { manifest } => bulk_ingest(&components, &manifest).await,
        Command::RebuildIndex => {
            let index = components.index_registry.get_or_create(CLI_OWNER).await;
            index.rebuild(CLI_OWNER, &components.db).await?;
            let health = index.health().await;
            println!(
                "rebuilt index: {} documents, {} chunks",
                health.document_count, health.chunk_count
            );
            Ok(())
        }
    }
}

async fn ingest_path(components: &AppComponents, path: &PathBuf) -> Result<(), AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::Validation(format!("cannot read {}: {e}", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let mime = mime_guess::from_path(path).first();

    let upload = UploadRecord::store(
        &bytes,
        &file_name,
        mime.as_ref().map(|m| m.as_ref()),
        CLI_OWNER,
        &components.db,
        &components.storage,
    )
    .await?;

    let job = IngestJob::enqueue(
        upload.id.clone(),
        CLI_OWNER.to_string(),
        CLI_OWNER.to_string(),
        &components.db,
    )
    .await?;
    components.ingestion_pipeline.process_job(job).await?;

    println!("ingested {file_name}");
    Ok(())
}

async fn bulk_ingest(components: &AppComponents, manifest: &PathBuf) -> Result<(), AppError> {
    let contents = tokio::fs::read_to_string(manifest)
        .await
        .map_err(|e| AppError::Validation(format!("cannot read {}: {e}", manifest.display())))?;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        ingest_path(components, &PathBuf::from(line)).await?;
    }
    Ok(())
}

async fn query(
    components: &AppComponents,
    text: String,
    language: Language,
    session_id: Option<String>,
) -> Result<(), AppError> {
    let request = QueryRequest {
        owner_id: CLI_OWNER.to_string(),
        session_id,
        language,
        question: text,
        attachments: Vec::new(),
        use_rag: true,
        explain_like_new: false,
        slot_updates: Default::default(),
        reset_slots: Vec::new(),
        model: None,
        top_k: None,
        k_cite: None,
    };

    let response = components.orchestrator.answer(request).await?;

    println!("{}", response.answer);
    for citation in &response.citations {
        println!("  - [{}] {}", citation.source_name, citation.snippet);
    }
    if !response.missing_slots.is_empty() {
        println!("missing slots: {}", response.missing_slots.join(", "));
    }
    Ok(())
}

fn exit_code_for(err: &AppError) -> u8 {
    match err {
        AppError::Validation(_) => 2,
        AppError::Provider { .. } | AppError::OpenAI(_) => 3,
        AppError::RateLimited(_) => 4,
        _ => 1,
    }
}
