use mime_guess::from_path;
use object_store::Error as ObjectStoreError;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, store, store::StorageManager},
    stored_object,
};

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload not found for id: {0}")]
    NotFound(String),

    #[error("IO error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("SurrealDB error: {0}")]
    SurrealError(#[from] surrealdb::Error),

    #[error("File name missing in multipart field")]
    MissingFileName,

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
}

stored_object!(UploadRecord, "upload", {
    sha256: String,
    path: String,
    file_name: String,
    mime_type: String,
    byte_size: u64,
    owner_id: String
});

impl UploadRecord {
    /// Guesses the MIME type based on the file extension, falling back to the
    /// byte-sniffed value supplied by the caller.
    fn guess_mime_type(path: &Path, declared: Option<&str>) -> String {
        if let Some(declared) = declared {
            if !declared.is_empty() && declared != mime::APPLICATION_OCTET_STREAM.as_ref() {
                return declared.to_string();
            }
        }
        from_path(path)
            .first_or(mime::APPLICATION_OCTET_STREAM)
            .to_string()
    }

    fn hash(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Replaces any character outside `[A-Za-z0-9._]` with `_`, preventing
    /// directory traversal via the object store's flat namespace.
    fn sanitize_file_name(file_name: &str) -> String {
        file_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    async fn get_by_sha(
        sha256: &str,
        owner_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<UploadRecord, UploadError> {
        let query = "SELECT * FROM upload WHERE sha256 = $sha256 AND owner_id = $owner_id";
        let response: Vec<UploadRecord> = db_client
            .client
            .query(query)
            .bind(("sha256", sha256.to_string()))
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;

        response
            .into_iter()
            .next()
            .ok_or_else(|| UploadError::NotFound(sha256.to_string()))
    }

    pub async fn get_by_id(
        id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<UploadRecord, UploadError> {
        match db_client.get_item::<UploadRecord>(id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(UploadError::NotFound(id.to_string())),
            Err(e) => Err(UploadError::SurrealError(e)),
        }
    }

    /// Persists raw upload bytes: dedupes by sha256 per owner, writes the
    /// object, and stores the metadata row. Matches the ingest flow's
    /// `upload_id` + `sha256` + `mime_type` contract.
    pub async fn store(
        bytes: &[u8],
        declared_file_name: &str,
        declared_mime: Option<&str>,
        owner_id: &str,
        db_client: &SurrealDbClient,
        storage: &StorageManager,
    ) -> Result<Self, UploadError> {
        let sha256 = Self::hash(bytes);

        match Self::get_by_sha(&sha256, owner_id, db_client).await {
            Ok(existing) => {
                info!(%sha256, "upload already exists, returning existing record");
                return Ok(existing);
            }
            Err(UploadError::NotFound(_)) => (),
            Err(e) => return Err(e),
        }

        let uuid = Uuid::new_v4();
        let sanitized_name = Self::sanitize_file_name(declared_file_name);
        let location = format!("{}/{}/{}", owner_id, uuid, sanitized_name);
        storage.put(&location, bytes.to_vec().into()).await?;

        let mime_type = Self::guess_mime_type(Path::new(declared_file_name), declared_mime);
        let now = chrono::Utc::now();
        let record = UploadRecord {
            id: uuid.to_string(),
            owner_id: owner_id.to_string(),
            sha256,
            file_name: declared_file_name.to_string(),
            path: location,
            mime_type,
            byte_size: bytes.len() as u64,
            created_at: now,
            updated_at: now,
        };

        db_client.store_item(record.clone()).await?;
        Ok(record)
    }

    pub async fn get_content(&self, storage: &StorageManager) -> Result<bytes::Bytes, AppError> {
        storage
            .get(&self.path)
            .await
            .map_err(|e| AppError::from(anyhow::anyhow!(e)))
    }

    pub async fn delete_by_id(
        id: &str,
        db_client: &SurrealDbClient,
        storage: &StorageManager,
    ) -> Result<(), AppError> {
        let Some(record) = db_client.get_item::<UploadRecord>(id).await? else {
            return Ok(());
        };

        let (parent_prefix, _file_name) = store::split_object_path(&record.path)
            .map_err(|e| AppError::from(anyhow::anyhow!(e)))?;
        storage
            .delete_prefix(&parent_prefix)
            .await
            .map_err(|e| AppError::from(anyhow::anyhow!(e)))?;

        db_client.delete_item::<UploadRecord>(id).await?;
        Ok(())
    }

    /// Uploads older than `retention_days` and not referenced by a `Document`
    /// are eligible for the retention sweep (spec's `UPLOAD_RETENTION_DAYS`).
    pub fn is_expired(&self, retention_days: i64, now: chrono::DateTime<chrono::Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_days() >= retention_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::testing::TestStorageManager;

    #[tokio::test]
    async fn store_and_retrieve_roundtrip() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized().await.unwrap();
        let storage = TestStorageManager::new_memory().await.unwrap();

        let content = b"hello bilingual world";
        let record = UploadRecord::store(
            content,
            "notes.txt",
            Some("text/plain"),
            "user-1",
            &db,
            storage.storage(),
        )
        .await
        .expect("store upload");

        assert_eq!(record.file_name, "notes.txt");
        assert_eq!(record.mime_type, "text/plain");
        assert_eq!(record.byte_size, content.len() as u64);

        let fetched = record
            .get_content(storage.storage())
            .await
            .expect("fetch content");
        assert_eq!(fetched.as_ref(), content);

        let by_id = UploadRecord::get_by_id(&record.id, &db)
            .await
            .expect("get by id");
        assert_eq!(by_id.sha256, record.sha256);
    }

    #[tokio::test]
    async fn duplicate_upload_returns_existing_record() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized().await.unwrap();
        let storage = TestStorageManager::new_memory().await.unwrap();

        let content = b"duplicate content";
        let first = UploadRecord::store(content, "a.txt", None, "user-1", &db, storage.storage())
            .await
            .unwrap();
        let second = UploadRecord::store(content, "b.txt", None, "user-1", &db, storage.storage())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.file_name, "a.txt");
    }

    #[test]
    fn sanitize_file_name_strips_path_traversal() {
        assert_eq!(
            UploadRecord::sanitize_file_name("../../etc/passwd"),
            "______etc_passwd"
        );
    }

    #[test]
    fn is_expired_respects_retention_window() {
        let now = chrono::Utc::now();
        let record = UploadRecord {
            id: "id".into(),
            created_at: now - chrono::Duration::days(31),
            updated_at: now,
            sha256: "s".into(),
            path: "p".into(),
            file_name: "f".into(),
            mime_type: "text/plain".into(),
            byte_size: 0,
            owner_id: "o".into(),
        };
        assert!(record.is_expired(30, now));
        assert!(!record.is_expired(60, now));
    }
}
