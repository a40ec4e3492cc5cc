use super::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestValidationError {
    PayloadTooLarge(String),
    UnsupportedMimeType(String),
}

const SUPPORTED_MIME_PREFIXES: &[&str] = &["text/", "image/", "audio/"];
const SUPPORTED_MIME_EXACT: &[&str] = &["application/pdf"];

/// Validates an upload against the configured size ceiling and the
/// extractor's supported MIME families before a job is enqueued.
pub fn validate_upload(
    config: &AppConfig,
    byte_size: usize,
    mime_type: &str,
) -> Result<(), IngestValidationError> {
    if byte_size > config.upload_max_bytes {
        return Err(IngestValidationError::PayloadTooLarge(format!(
            "upload is {byte_size} bytes, maximum allowed is {}",
            config.upload_max_bytes
        )));
    }

    let supported = SUPPORTED_MIME_EXACT.contains(&mime_type)
        || SUPPORTED_MIME_PREFIXES
            .iter()
            .any(|prefix| mime_type.starts_with(prefix));

    if !supported {
        return Err(IngestValidationError::UnsupportedMimeType(format!(
            "unsupported mime type: {mime_type}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_upload() {
        let config = AppConfig {
            upload_max_bytes: 10,
            ..Default::default()
        };
        let result = validate_upload(&config, 11, "text/plain");
        assert!(matches!(
            result,
            Err(IngestValidationError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn rejects_unsupported_mime_type() {
        let config = AppConfig::default();
        let result = validate_upload(&config, 10, "application/zip");
        assert!(matches!(
            result,
            Err(IngestValidationError::UnsupportedMimeType(_))
        ));
    }

    #[test]
    fn accepts_pdf_and_text_and_image_and_audio() {
        let config = AppConfig::default();
        for mime in ["application/pdf", "text/plain", "image/png", "audio/mpeg"] {
            assert!(validate_upload(&config, 10, mime).is_ok());
        }
    }
}
