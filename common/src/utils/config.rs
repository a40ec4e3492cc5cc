use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PdfIngestMode {
    /// Extract the text layer directly via `pdf-extract`.
    TextLayer,
    /// Hand the page images to the chat model before falling back to the
    /// text layer.
    LlmFirst,
}

fn default_pdf_ingest_mode() -> PdfIngestMode {
    PdfIngestMode::LlmFirst
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_pdf_ingest_mode")]
    pub pdf_ingest_mode: PdfIngestMode,

    /// Fusion weight between BM25 and dense-cosine scores in the hybrid
    /// index, `0.0` = pure lexical, `1.0` = pure dense.
    #[serde(default = "default_index_alpha")]
    pub index_alpha: f32,
    #[serde(default = "default_top_k")]
    pub top_k_default: usize,
    #[serde(default = "default_k_cite")]
    pub k_cite_default: usize,

    #[serde(default = "default_upload_retention_days")]
    pub upload_retention_days: i64,

    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,

    #[serde(default = "default_rerank_max_attempts")]
    pub rerank_max_attempts: u32,
    #[serde(default = "default_rerank_timeout_ms")]
    pub rerank_timeout_ms: u64,
    #[serde(default = "default_rerank_circuit_threshold")]
    pub rerank_circuit_threshold: u32,
    #[serde(default = "default_rerank_circuit_reset_s")]
    pub rerank_circuit_reset_s: u64,

    #[serde(default = "default_provider_base_url")]
    pub provider_base_url: String,
    #[serde(default)]
    pub provider_api_key: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default)]
    pub auth_allow_anonymous: bool,
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expires_seconds")]
    pub jwt_expires_seconds: u64,

    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_upload_max_bytes")]
    pub upload_max_bytes: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_index_alpha() -> f32 {
    0.6
}

fn default_top_k() -> usize {
    8
}

fn default_k_cite() -> usize {
    4
}

fn default_upload_retention_days() -> i64 {
    30
}

fn default_rate_limit() -> u32 {
    60
}

fn default_rate_window() -> u64 {
    60
}

fn default_rerank_max_attempts() -> u32 {
    3
}

fn default_rerank_timeout_ms() -> u64 {
    2_000
}

fn default_rerank_circuit_threshold() -> u32 {
    5
}

fn default_rerank_circuit_reset_s() -> u64 {
    30
}

fn default_provider_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embed_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_rerank_model() -> String {
    "bge-reranker-base".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_jwt_expires_seconds() -> u64 {
    3_600
}

fn default_chunk_max_chars() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    120
}

fn default_upload_max_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: "consult".to_string(),
            surrealdb_database: "consult".to_string(),
            data_dir: default_data_dir(),
            http_port: 8080,
            openai_base_url: default_base_url(),
            storage: default_storage_kind(),
            pdf_ingest_mode: default_pdf_ingest_mode(),
            index_alpha: default_index_alpha(),
            top_k_default: default_top_k(),
            k_cite_default: default_k_cite(),
            upload_retention_days: default_upload_retention_days(),
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window(),
            rerank_max_attempts: default_rerank_max_attempts(),
            rerank_timeout_ms: default_rerank_timeout_ms(),
            rerank_circuit_threshold: default_rerank_circuit_threshold(),
            rerank_circuit_reset_s: default_rerank_circuit_reset_s(),
            provider_base_url: default_provider_base_url(),
            provider_api_key: String::new(),
            embed_model: default_embed_model(),
            rerank_model: default_rerank_model(),
            chat_model: default_chat_model(),
            auth_allow_anonymous: true,
            jwt_secret: String::new(),
            jwt_expires_seconds: default_jwt_expires_seconds(),
            chunk_max_chars: default_chunk_max_chars(),
            chunk_overlap: default_chunk_overlap(),
            upload_max_bytes: default_upload_max_bytes(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
