use async_openai::types::CreateTranscriptionRequestArgs;
use common::error::AppError;

use super::extracted_content::{ContentMarker, ExtractedContent};

/// Fixed speech-to-text model for the external STT call (C2, audio/*
/// dispatch). Distinct from the chat model, so not sourced from config.
const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Transcribes an audio file. The extractor only calls this for
/// `audio/*` uploads materialized to a local path by
/// `file_text_extraction::materialize_temp_file`. Requests verbose JSON so
/// segment start times survive into the returned markers instead of being
/// discarded with a plain transcript string.
pub async fn transcribe_audio_file(
    file_path: &str,
    openai_client: &async_openai::Client<async_openai::config::OpenAIConfig>,
) -> Result<ExtractedContent, AppError> {
    let request = CreateTranscriptionRequestArgs::default()
        .file(file_path)
        .model(TRANSCRIPTION_MODEL)
        .build()?;

    let response = openai_client
        .audio()
        .transcribe_verbose_json(request)
        .await
        .map_err(|e| AppError::Processing(format!("Audio transcription failed: {}", e)))?;

    let mut char_offset = 0usize;
    let markers = response
        .segments
        .unwrap_or_default()
        .iter()
        .map(|segment| {
            let marker = ContentMarker {
                char_offset,
                page: None,
                timestamp_ms: Some((segment.start * 1000.0).round() as i64),
            };
            char_offset += segment.text.chars().count() + 1;
            marker
        })
        .collect();

    Ok(ExtractedContent { text: response.text, markers })
}
