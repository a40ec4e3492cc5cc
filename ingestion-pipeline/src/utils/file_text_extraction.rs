use anyhow::anyhow;
use common::{
    error::AppError,
    storage::{store::StorageManager, types::upload::UploadRecord},
    utils::config::AppConfig,
};
use std::{
    env,
    io::{Error as IoError, ErrorKind},
    path::{Path, PathBuf},
};
use uuid::Uuid;

use super::{
    audio_transcription::transcribe_audio_file, extracted_content::ExtractedContent,
    image_parsing::extract_text_from_image, pdf_ingestion::extract_pdf_content,
};

struct TempPathGuard {
    path: PathBuf,
}

impl TempPathGuard {
    fn as_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPathGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn materialize_temp_file(
    bytes: &[u8],
    extension: Option<&str>,
) -> Result<TempPathGuard, AppError> {
    let mut path = env::temp_dir();
    let mut file_name = format!("consult-ingest-{}", Uuid::new_v4());

    if let Some(ext) = extension {
        if !ext.is_empty() {
            file_name.push('.');
            file_name.push_str(ext);
        }
    }

    path.push(file_name);

    tokio::fs::write(&path, bytes).await?;

    Ok(TempPathGuard { path })
}

async fn resolve_existing_local_path(storage: &StorageManager, location: &str) -> Option<PathBuf> {
    let path = storage.resolve_local_path(location)?;
    match tokio::fs::metadata(&path).await {
        Ok(_) => Some(path),
        Err(_) => None,
    }
}

fn infer_extension(upload: &UploadRecord) -> Option<String> {
    Path::new(&upload.path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_string())
}

/// Dispatches an uploaded file to the right extraction path by MIME type
/// Text is decoded as UTF-8; PDFs go through the fast text-layer path
/// with a vision-model Markdown fallback; images and audio call out to an
/// external OCR/STT model.
pub async fn extract_text_from_file(
    upload: &UploadRecord,
    openai_client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    config: &AppConfig,
    storage: &StorageManager,
) -> Result<ExtractedContent, AppError> {
    let file_bytes = storage
        .get(&upload.path)
        .await
        .map_err(|e| AppError::from(anyhow!(e)))?;
    let local_path = resolve_existing_local_path(storage, &upload.path).await;

    match upload.mime_type.as_str() {
        "text/plain" | "text/markdown" | "application/octet-stream" | "text/x-rust" => {
            let content = String::from_utf8(file_bytes.to_vec())
                .map_err(|err| AppError::Io(IoError::new(ErrorKind::InvalidData, err)))?;
            Ok(ExtractedContent::plain(content))
        }
        "application/pdf" => {
            if let Some(path) = local_path.as_ref() {
                return extract_pdf_content(path, config, openai_client, &config.pdf_ingest_mode)
                    .await;
            }

            let temp_guard = materialize_temp_file(file_bytes.as_ref(), Some("pdf")).await?;
            let result = extract_pdf_content(
                temp_guard.as_path(),
                config,
                openai_client,
                &config.pdf_ingest_mode,
            )
            .await;
            drop(temp_guard);
            result
        }
        "image/png" | "image/jpeg" | "image/webp" => {
            extract_text_from_image(file_bytes.as_ref(), config, openai_client)
                .await
                .map(ExtractedContent::plain)
        }
        "audio/mpeg" | "audio/mp3" | "audio/wav" | "audio/x-wav" | "audio/webm" | "audio/mp4"
        | "audio/ogg" | "audio/flac" => {
            if let Some(path) = local_path.as_ref() {
                let path_str = path.to_str().ok_or_else(|| {
                    AppError::Processing(format!(
                        "Encountered a non-UTF8 path while reading audio {}",
                        upload.id
                    ))
                })?;
                return transcribe_audio_file(path_str, openai_client).await;
            }

            let extension = infer_extension(upload);
            let temp_guard =
                materialize_temp_file(file_bytes.as_ref(), extension.as_deref()).await?;
            let path_str = temp_guard.as_path().to_str().ok_or_else(|| {
                AppError::Processing(format!(
                    "Encountered a non-UTF8 path while reading audio {}",
                    upload.id
                ))
            })?;
            let result = transcribe_audio_file(path_str, openai_client).await;
            drop(temp_guard);
            result
        }
        _ => Err(AppError::NotFound(upload.mime_type.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::{config::OpenAIConfig, Client};
    use bytes::Bytes;
    use common::utils::config::StorageKind;

    #[tokio::test]
    async fn extracts_text_using_memory_storage_backend() {
        let mut config = AppConfig::default();
        config.storage = StorageKind::Memory;

        let storage = StorageManager::new(&config)
            .await
            .expect("create storage manager");

        let location = "user/test/file.txt";
        let contents = b"hello from memory storage";

        storage
            .put(location, Bytes::from(contents.as_slice().to_vec()))
            .await
            .expect("write object");

        let now = chrono::Utc::now();
        let upload = UploadRecord {
            id: "file".into(),
            created_at: now,
            updated_at: now,
            sha256: "sha256".into(),
            path: location.to_string(),
            file_name: "file.txt".into(),
            mime_type: "text/plain".into(),
            byte_size: contents.len() as u64,
            owner_id: "user".into(),
        };

        let openai_client = Client::with_config(OpenAIConfig::default());

        let extracted = extract_text_from_file(&upload, &openai_client, &config, &storage)
            .await
            .expect("extract text");

        assert_eq!(extracted.text, String::from_utf8_lossy(contents));
        assert!(extracted.markers.is_empty());
    }
}
