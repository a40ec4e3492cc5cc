use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Extracted,
    Chunked,
    Indexed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentLanguage {
    En,
    Zh,
    Mixed,
}

stored_object!(Document, "document", {
    owner_id: String,
    doc_id: String,
    upload_id: String,
    title: String,
    source_mime: String,
    language: DocumentLanguage,
    status: DocumentStatus,
    char_count: usize,
    url: Option<String>,
    domain: Option<String>,
    freshness: Option<DateTime<Utc>>,
    checksum: String,
    version: u32,
    tags: Vec<String>
});

impl Document {
    /// Derives the stable `doc_id` a re-ingest of the same owner/file_name
    /// pair resolves back to. Distinct from `checksum`, which reflects the
    /// actual bytes of whatever was last ingested under that name.
    pub fn derive_doc_id(owner_id: &str, file_name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(owner_id.as_bytes());
        hasher.update(b"::");
        hasher.update(file_name.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn new(owner_id: String, upload_id: String, title: String, source_mime: String, checksum: String) -> Self {
        let now = chrono::Utc::now();
        let doc_id = Self::derive_doc_id(&owner_id, &title);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            doc_id,
            upload_id,
            title,
            source_mime,
            language: DocumentLanguage::En,
            status: DocumentStatus::Pending,
            char_count: 0,
            url: None,
            domain: None,
            freshness: None,
            checksum,
            version: 1,
            tags: Vec::new(),
        }
    }

    /// Creates a document on first ingest of a `(owner_id, file_name)` pair,
    /// or re-ingests into the same row otherwise: `version` increments by
    /// exactly one and `upload_id`/`checksum`/`status`/`char_count` are
    /// reset to reflect the new upload, rather than inserting a second row
    /// for the same `doc_id`.
    pub async fn upsert(
        owner_id: String,
        upload_id: String,
        file_name: &str,
        source_mime: String,
        checksum: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let doc_id = Self::derive_doc_id(&owner_id, file_name);
        let now = Utc::now();

        if let Some(existing) = db.get_item::<Self>(&doc_id).await? {
            let next_version = existing.version + 1;
            let _updated: Option<Self> = db
                .update((Self::table_name(), doc_id.as_str()))
                .patch(PatchOp::replace("/upload_id", upload_id.clone()))
                .patch(PatchOp::replace("/source_mime", source_mime.clone()))
                .patch(PatchOp::replace("/checksum", checksum.clone()))
                .patch(PatchOp::replace("/version", next_version))
                .patch(PatchOp::replace("/status", DocumentStatus::Pending))
                .patch(PatchOp::replace("/char_count", 0usize))
                .patch(PatchOp::replace("/updated_at", surrealdb::Datetime::from(now)))
                .await?;
            return Ok(Self {
                upload_id,
                source_mime,
                checksum,
                version: next_version,
                status: DocumentStatus::Pending,
                char_count: 0,
                updated_at: now,
                ..existing
            });
        }

        let document = Self {
            id: doc_id.clone(),
            created_at: now,
            updated_at: now,
            owner_id,
            doc_id,
            upload_id,
            title: file_name.to_string(),
            source_mime,
            language: DocumentLanguage::En,
            status: DocumentStatus::Pending,
            char_count: 0,
            url: None,
            domain: None,
            freshness: None,
            checksum,
            version: 1,
            tags: Vec::new(),
        };
        db.store_item(document.clone()).await?;
        Ok(document)
    }

    pub async fn set_status(
        id: &str,
        status: DocumentStatus,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", status))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(chrono::Utc::now()),
            ))
            .await?;
        Ok(())
    }

    pub async fn finalize_extraction(
        id: &str,
        language: DocumentLanguage,
        char_count: usize,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/status", DocumentStatus::Extracted))
            .patch(PatchOp::replace("/language", language))
            .patch(PatchOp::replace("/char_count", char_count))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(chrono::Utc::now()),
            ))
            .await?;
        Ok(())
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {id} not found")))
    }

    pub async fn list_by_owner(owner_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let docs: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE owner_id = $owner_id ORDER BY created_at DESC")
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;
        Ok(docs)
    }
}
