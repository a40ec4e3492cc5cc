use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::storage::types::upload::UploadError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion processing error: {0}")]
    Processing(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("Provider error (retryable={retryable}): {message}")]
    Provider { message: String, retryable: bool },
    #[error("Circuit breaker open for {service}")]
    CircuitOpen { service: String },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Internal service error: {0}")]
    InternalError(String),
}
