use async_openai::types::CreateEmbeddingRequestArgs;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Produces embedding vectors for chunk and query text. `Remote` calls the
/// configured embedding model; `Offline` hashes the input into a
/// deterministic vector so ingestion and retrieval can run without network
/// access (integration tests, local dev without an API key).
#[derive(Clone)]
pub enum EmbeddingProvider {
    Remote {
        client: async_openai::Client<async_openai::config::OpenAIConfig>,
        model: String,
        dimension: usize,
    },
    Offline {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        openai_client: Option<async_openai::Client<async_openai::config::OpenAIConfig>>,
    ) -> Self {
        match openai_client {
            Some(client) => Self::Remote {
                client,
                model: config.embed_model.clone(),
                dimension: 1536,
            },
            None => Self::new_hashed(1536),
        }
    }

    pub fn new_hashed(dimension: usize) -> Self {
        Self::Offline { dimension }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::Remote { dimension, .. } => *dimension,
            Self::Offline { dimension } => *dimension,
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self {
            Self::Remote { .. } => "remote",
            Self::Offline { .. } => "offline",
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match self {
            Self::Remote {
                client,
                model,
                dimension,
            } => generate_embedding_with_params(client, text, model, *dimension as u32).await,
            Self::Offline { dimension } => Ok(hashed_embedding(text, *dimension)),
        }
    }
}

/// Deterministic, dependency-free stand-in for a real embedding: hashes
/// overlapping trigrams into buckets of a fixed-width vector, then
/// L2-normalizes so cosine similarity behaves sensibly in the hybrid index.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimension];
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    if chars.is_empty() {
        return vector;
    }

    let window = 3usize.min(chars.len());
    for gram in chars.windows(window) {
        let mut hasher = DefaultHasher::new();
        gram.hash(&mut hasher);
        let bucket = (hasher.finish() as usize) % dimension;
        vector[bucket] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// Generates an embedding vector using a specific model and dimension via
/// the configured OpenAI-compatible embedding endpoint.
pub async fn generate_embedding_with_params(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input([input])
        .dimensions(dimensions)
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received from API".into()))?
        .embedding
        .clone();

    debug!(
        "Embedding was created with {:?} dimensions",
        embedding.len()
    );

    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_provider_is_deterministic() {
        let provider = EmbeddingProvider::new_hashed(32);
        let a = provider.embed("study abroad in Japan").await.unwrap();
        let b = provider.embed("study abroad in Japan").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn offline_provider_distinguishes_different_text() {
        let provider = EmbeddingProvider::new_hashed(32);
        let a = provider.embed("tuition deadlines").await.unwrap();
        let b = provider.embed("visa application").await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn backend_label_reflects_variant() {
        assert_eq!(EmbeddingProvider::new_hashed(8).backend_label(), "offline");
    }
}
