//! In-memory hybrid (BM25 + dense cosine) index over a single owner's chunks.
//!
//! Readers observe an immutable `Generation`; `rebuild` constructs a new one
//! and atomically swaps the pointer. Exactly one rebuild runs at a time per
//! owner (`rebuild_lock`); no lock is held while awaiting the embedder,
//! since chunk embeddings are already computed and stored by the ingestion
//! pipeline (see `common::storage::types::chunk::Chunk`) — only the query
//! embedding is computed live, outside the generation lock.

mod bm25;
mod tokenize;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::chunk::{Chunk, ChunkMetadata}},
    utils::embedding::EmbeddingProvider,
};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::scoring::min_max_normalize;
use bm25::Bm25Index;

const MAX_HEALTH_ERRORS: usize = 20;

/// A single retrieved chunk, scoped to one query.
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub meta: RetrievedMeta,
}

#[derive(Debug, Clone)]
pub struct RetrievedMeta {
    pub document_id: String,
    pub ordinal: u32,
    pub char_start: usize,
    pub char_end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct QueryDiagnostics {
    /// Set when the embedder failed and the query fell back to pure lexical scoring.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub results: Vec<Retrieved>,
    pub diagnostics: QueryDiagnostics,
}

#[derive(Debug, Clone)]
pub struct IndexHealth {
    pub document_count: usize,
    pub chunk_count: usize,
    pub last_build_at: Option<DateTime<Utc>>,
    pub errors: VecDeque<String>,
}

impl Default for IndexHealth {
    fn default() -> Self {
        Self {
            document_count: 0,
            chunk_count: 0,
            last_build_at: None,
            errors: VecDeque::new(),
        }
    }
}

struct ChunkMeta {
    chunk_id: String,
    document_id: String,
    ordinal: u32,
    text: String,
    char_start: usize,
    char_end: usize,
}

/// One immutable snapshot of the hybrid index, atomically swapped on rebuild.
struct Generation {
    bm25: Bm25Index,
    embeddings: Vec<Vec<f32>>,
    ids: Vec<String>,
    metas: Vec<ChunkMeta>,
}

impl Generation {
    fn empty() -> Self {
        Self {
            bm25: Bm25Index::build(&[]),
            embeddings: Vec::new(),
            ids: Vec::new(),
            metas: Vec::new(),
        }
    }
}

/// The hybrid index for a single owner's corpus.
pub struct HybridIndex {
    generation: RwLock<Arc<Generation>>,
    rebuild_lock: Mutex<()>,
    health: Mutex<IndexHealth>,
}

impl Default for HybridIndex {
    fn default() -> Self {
        Self {
            generation: RwLock::new(Arc::new(Generation::empty())),
            rebuild_lock: Mutex::new(()),
            health: Mutex::new(IndexHealth::default()),
        }
    }
}

impl HybridIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn health(&self) -> IndexHealth {
        self.health.lock().await.clone()
    }

    /// Rebuilds this index from the durable chunk store. Drains
    /// `Chunk::list_by_owner`, tokenizes each chunk's text, recomputes BM25
    /// statistics, and reuses each chunk's already-stored embedding for the
    /// dense half. On failure the previous generation is left untouched and
    /// the error is recorded in `health.errors`.
    pub async fn rebuild(&self, owner_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let _guard = self.rebuild_lock.lock().await;

        match Chunk::list_by_owner(owner_id, db).await {
            Ok(chunks) => {
                let document_count = chunks
                    .iter()
                    .map(|c| c.document_id.as_str())
                    .collect::<HashSet<_>>()
                    .len();
                let chunk_count = chunks.len();

                let tokenized: Vec<Vec<String>> = chunks
                    .iter()
                    .map(|c| tokenize::tokenize(&c.text))
                    .collect();
                let bm25 = Bm25Index::build(&tokenized);

                let mut ids = Vec::with_capacity(chunks.len());
                let mut embeddings = Vec::with_capacity(chunks.len());
                let mut metas = Vec::with_capacity(chunks.len());

                for chunk in chunks {
                    ids.push(chunk.id.clone());
                    embeddings.push(normalize_l2(chunk.embedding));
                    metas.push(ChunkMeta {
                        chunk_id: chunk.id,
                        document_id: chunk.document_id,
                        ordinal: chunk.ordinal,
                        text: chunk.text,
                        char_start: chunk.char_start,
                        char_end: chunk.char_end,
                    });
                }

                let generation = Generation {
                    bm25,
                    embeddings,
                    ids,
                    metas,
                };

                *self.generation.write().await = Arc::new(generation);

                let mut health = self.health.lock().await;
                health.document_count = document_count;
                health.chunk_count = chunk_count;
                health.last_build_at = Some(Utc::now());
                Ok(())
            }
            Err(err) => {
                warn!(owner_id, error = %err, "hybrid index rebuild failed; keeping prior generation");
                let mut health = self.health.lock().await;
                health.errors.push_back(err.to_string());
                while health.errors.len() > MAX_HEALTH_ERRORS {
                    health.errors.pop_front();
                }
                Err(err)
            }
        }
    }

    /// Answers a hybrid top-k query per spec: min-max normalize lexical and
    /// dense scores over the union of each half's top `2*top_k` candidates,
    /// fuse with `alpha`, break ties by lexical score then chunk_id.
    pub async fn query(
        &self,
        embedder: &EmbeddingProvider,
        query: &str,
        top_k: usize,
        alpha: f32,
    ) -> QueryOutcome {
        let generation = self.generation.read().await.clone();

        if generation.ids.is_empty() {
            return QueryOutcome {
                results: Vec::new(),
                diagnostics: QueryDiagnostics::default(),
            };
        }

        let query_terms = tokenize::tokenize(query);
        let lexical_scores = generation.bm25.score_all(&query_terms);

        let (dense_scores, degraded) = match embedder.embed(query).await {
            Ok(query_embedding) => {
                let normalized = normalize_l2(query_embedding);
                let scores = generation
                    .embeddings
                    .iter()
                    .map(|e| cosine(&normalized, e))
                    .collect::<Vec<f32>>();
                (Some(scores), false)
            }
            Err(err) => {
                warn!(error = %err, "query embedding failed; falling back to lexical-only retrieval");
                (None, true)
            }
        };

        let n = generation.ids.len();
        let candidate_span = (2 * top_k).min(n);

        let lexical_rank = top_indices(&lexical_scores, candidate_span);
        let dense_rank = dense_scores
            .as_ref()
            .map(|scores| top_indices(scores, candidate_span))
            .unwrap_or_default();

        let mut candidates: Vec<usize> = lexical_rank
            .iter()
            .chain(dense_rank.iter())
            .copied()
            .collect::<HashSet<usize>>()
            .into_iter()
            .collect();
        candidates.sort_unstable();

        let candidate_lexical: Vec<f32> = candidates.iter().map(|&i| lexical_scores[i]).collect();
        let normalized_lexical = min_max_normalize(&candidate_lexical);

        let normalized_dense = if let Some(scores) = &dense_scores {
            let candidate_dense: Vec<f32> = candidates.iter().map(|&i| scores[i]).collect();
            min_max_normalize(&candidate_dense)
        } else {
            vec![0.0; candidates.len()]
        };

        let effective_alpha = if dense_scores.is_some() { alpha } else { 0.0 };

        let mut scored: Vec<(usize, f32, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(pos, &idx)| {
                let l = normalized_lexical[pos];
                let d = normalized_dense[pos];
                let fused = effective_alpha * d + (1.0 - effective_alpha) * l;
                (idx, fused, lexical_scores[idx])
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| generation.ids[a.0].cmp(&generation.ids[b.0]))
        });

        let results = scored
            .into_iter()
            .take(top_k)
            .map(|(idx, fused, _)| {
                let meta = &generation.metas[idx];
                Retrieved {
                    chunk_id: meta.chunk_id.clone(),
                    text: meta.text.clone(),
                    score: fused,
                    meta: RetrievedMeta {
                        document_id: meta.document_id.clone(),
                        ordinal: meta.ordinal,
                        char_start: meta.char_start,
                        char_end: meta.char_end,
                    },
                }
            })
            .collect();

        QueryOutcome {
            results,
            diagnostics: QueryDiagnostics { degraded },
        }
    }
}

/// One [`HybridIndex`] per owner, since every `Chunk`/`Document` is already
/// scoped by `owner_id` and a single global corpus would blend tenants'
/// documents together.
#[derive(Default)]
pub struct HybridIndexRegistry {
    indexes: RwLock<HashMap<String, Arc<HybridIndex>>>,
}

impl HybridIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, owner_id: &str) -> Arc<HybridIndex> {
        if let Some(index) = self.indexes.read().await.get(owner_id) {
            return index.clone();
        }
        let mut indexes = self.indexes.write().await;
        indexes
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(HybridIndex::new()))
            .clone()
    }

    /// Rebuilds (and lazily creates) the index for one owner.
    pub async fn rebuild(&self, owner_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let index = self.get_or_create(owner_id).await;
        index.rebuild(owner_id, db).await
    }
}

fn top_indices(scores: &[f32], limit: usize) -> Vec<usize> {
    let mut indexed: Vec<usize> = (0..scores.len()).collect();
    indexed.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indexed.truncate(limit);
    indexed
}

fn normalize_l2(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup_db() -> SurrealDbClient {
        let namespace = "index_test";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory db");
        db.ensure_initialized().await.expect("apply schema");
        db
    }

    async fn seed_chunk(
        db: &SurrealDbClient,
        owner_id: &str,
        document_id: &str,
        ordinal: u32,
        text: &str,
        embedding: Vec<f32>,
    ) {
        let chunk = Chunk::new(
            document_id.to_string(),
            owner_id.to_string(),
            ordinal,
            text.to_string(),
            0,
            text.chars().count(),
            embedding,
            ChunkMetadata::default(),
        );
        db.store_item(chunk).await.expect("store chunk");
    }

    #[tokio::test]
    async fn empty_corpus_query_returns_empty_without_error() {
        let db = setup_db().await;
        let index = HybridIndex::new();
        index.rebuild("owner-empty", &db).await.expect("rebuild");

        let embedder = EmbeddingProvider::new_hashed(16);
        let outcome = index.query(&embedder, "visa", 5, 0.6).await;
        assert!(outcome.results.is_empty());
        assert!(!outcome.diagnostics.degraded);
    }

    #[tokio::test]
    async fn rebuild_then_query_surfaces_lexically_matching_chunk() {
        let db = setup_db().await;
        let owner_id = "owner-1";

        seed_chunk(
            &db,
            owner_id,
            "doc-1",
            0,
            "Students need an F-1 visa before departure",
            vec![0.9, 0.1, 0.0],
        )
        .await;
        seed_chunk(
            &db,
            owner_id,
            "doc-1",
            1,
            "Tuition payment plans are available each semester",
            vec![0.1, 0.9, 0.0],
        )
        .await;

        let index = HybridIndex::new();
        index.rebuild(owner_id, &db).await.expect("rebuild");

        let health = index.health().await;
        assert_eq!(health.chunk_count, 2);
        assert_eq!(health.document_count, 1);
        assert!(health.last_build_at.is_some());

        let embedder = EmbeddingProvider::new_hashed(16);
        let outcome = index.query(&embedder, "visa", 5, 0.6).await;
        assert!(!outcome.results.is_empty());
        assert!(outcome.results[0].text.contains("visa"));
    }

    #[tokio::test]
    async fn registry_scopes_indexes_per_owner() {
        let db = setup_db().await;
        seed_chunk(&db, "owner-a", "doc-1", 0, "visa rules", vec![0.1, 0.2]).await;

        let registry = HybridIndexRegistry::new();
        registry.rebuild("owner-a", &db).await.expect("rebuild owner-a");
        registry.rebuild("owner-b", &db).await.expect("rebuild owner-b");

        let a = registry.get_or_create("owner-a").await;
        let b = registry.get_or_create("owner-b").await;
        assert_eq!(a.health().await.chunk_count, 1);
        assert_eq!(b.health().await.chunk_count, 0);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn rebuild_on_nonexistent_owner_yields_empty_generation() {
        let db = setup_db().await;
        let index = HybridIndex::new();
        index
            .rebuild("owner-with-no-chunks", &db)
            .await
            .expect("rebuild should succeed with zero chunks");

        let health = index.health().await;
        assert_eq!(health.chunk_count, 0);
    }
}
