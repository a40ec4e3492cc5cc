use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Provenance carried alongside a chunk's text: where in the source
/// document it came from, when that's recoverable. A PDF chunk knows its
/// page; an audio chunk knows its segment start time; plain text and image
/// chunks carry an all-`None` default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub page: Option<u32>,
    pub section: Option<String>,
    pub paragraph: Option<u32>,
    pub language: Option<String>,
    pub timestamp_ms: Option<i64>,
}

stored_object!(Chunk, "chunk", {
    document_id: String,
    owner_id: String,
    ordinal: u32,
    text: String,
    char_start: usize,
    char_end: usize,
    embedding: Vec<f32>,
    metadata: ChunkMetadata
});

impl Chunk {
    /// Chunk ids are deterministic (`{document_id}::{ordinal:04}`) so a
    /// rebuild re-chunking the same document reuses the same ids instead of
    /// minting fresh ones.
    pub fn chunk_id(document_id: &str, ordinal: u32) -> String {
        format!("{document_id}::{ordinal:04}")
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        owner_id: String,
        ordinal: u32,
        text: String,
        char_start: usize,
        char_end: usize,
        embedding: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Self {
        let now = chrono::Utc::now();
        let id = Self::chunk_id(&document_id, ordinal);
        Self {
            id,
            created_at: now,
            updated_at: now,
            document_id,
            owner_id,
            ordinal,
            text,
            char_start,
            char_end,
            embedding,
            metadata,
        }
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE document_id = $document_id")
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?;
        Ok(())
    }

    pub async fn list_by_owner(owner_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE owner_id = $owner_id ORDER BY document_id, ordinal")
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;
        Ok(chunks)
    }

    pub async fn store_all(chunks: &[Self], db: &SurrealDbClient) -> Result<(), AppError> {
        for chunk in chunks {
            db.store_item(chunk.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic_and_zero_padded() {
        assert_eq!(Chunk::chunk_id("doc-1", 3), "doc-1::0003");
    }

    #[tokio::test]
    async fn metadata_survives_a_store_and_fetch_round_trip() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.ensure_initialized().await.unwrap();

        let metadata = ChunkMetadata {
            page: Some(3),
            timestamp_ms: Some(1_500),
            ..ChunkMetadata::default()
        };
        let chunk = Chunk::new(
            "doc-a".into(), "owner-1".into(), 0, "text".into(), 0, 4, vec![], metadata.clone(),
        );
        db.store_item(chunk.clone()).await.unwrap();

        let listed = Chunk::list_by_owner("owner-1", &db).await.unwrap();
        assert_eq!(listed[0].metadata, metadata);
    }

    #[tokio::test]
    async fn store_all_then_list_by_owner_orders_by_document_and_ordinal() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.ensure_initialized().await.unwrap();

        let chunks = vec![
            Chunk::new(
                "doc-a".into(),
                "owner-1".into(),
                1,
                "second".into(),
                10,
                16,
                vec![0.1, 0.2],
                ChunkMetadata::default(),
            ),
            Chunk::new(
                "doc-a".into(),
                "owner-1".into(),
                0,
                "first".into(),
                0,
                5,
                vec![0.3, 0.4],
                ChunkMetadata::default(),
            ),
        ];
        Chunk::store_all(&chunks, &db).await.unwrap();

        let listed = Chunk::list_by_owner("owner-1", &db).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].ordinal, 0);
        assert_eq!(listed[1].ordinal, 1);
    }

    #[tokio::test]
    async fn delete_by_document_id_removes_only_matching_chunks() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.ensure_initialized().await.unwrap();

        let keep = Chunk::new(
            "doc-keep".into(), "o".into(), 0, "a".into(), 0, 1, vec![], ChunkMetadata::default(),
        );
        let drop = Chunk::new(
            "doc-drop".into(), "o".into(), 0, "b".into(), 0, 1, vec![], ChunkMetadata::default(),
        );
        Chunk::store_all(&[keep.clone(), drop], &db).await.unwrap();

        Chunk::delete_by_document_id("doc-drop", &db).await.unwrap();

        let remaining = Chunk::list_by_owner("o", &db).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep.id);
    }
}
