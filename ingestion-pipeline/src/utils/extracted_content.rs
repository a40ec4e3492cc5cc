/// A point in extracted text where provenance changes: a new PDF page or a
/// new audio segment begins.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentMarker {
    pub char_offset: usize,
    pub page: Option<u32>,
    pub timestamp_ms: Option<i64>,
}

/// Text pulled from an upload, annotated with markers tying ranges of it
/// back to where they came from. Plain text and image extraction produce no
/// markers; PDF vision extraction marks page boundaries and audio
/// transcription marks segment start times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    pub text: String,
    pub markers: Vec<ContentMarker>,
}

impl ExtractedContent {
    pub fn plain(text: String) -> Self {
        Self { text, markers: Vec::new() }
    }

    /// The marker covering `char_offset`: the last one whose own offset is
    /// at or before it. `None` when there are no markers at all.
    pub fn marker_at(&self, char_offset: usize) -> Option<&ContentMarker> {
        self.markers
            .iter()
            .filter(|m| m.char_offset <= char_offset)
            .max_by_key(|m| m.char_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_carries_no_markers() {
        let content = ExtractedContent::plain("hello".into());
        assert!(content.markers.is_empty());
        assert!(content.marker_at(0).is_none());
    }

    #[test]
    fn marker_at_picks_the_latest_marker_not_past_the_offset() {
        let content = ExtractedContent {
            text: "abcdef".into(),
            markers: vec![
                ContentMarker { char_offset: 0, page: Some(1), timestamp_ms: None },
                ContentMarker { char_offset: 3, page: Some(2), timestamp_ms: None },
            ],
        };
        assert_eq!(content.marker_at(0).unwrap().page, Some(1));
        assert_eq!(content.marker_at(2).unwrap().page, Some(1));
        assert_eq!(content.marker_at(3).unwrap().page, Some(2));
        assert_eq!(content.marker_at(100).unwrap().page, Some(2));
    }
}
