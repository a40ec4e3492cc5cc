use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stored_object;

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single citation attached to an assistant message, mapping back to the
/// chunk that grounded a portion of the answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f32,
    /// Sentence around the matched span, bounded to ~280 chars.
    pub snippet: String,
    pub source_name: String,
    pub url: Option<String>,
    pub start_char: Option<usize>,
    pub end_char: Option<usize>,
    pub last_verified_at: chrono::DateTime<chrono::Utc>,
    /// Intra-`snippet` `[start, end)` spans to highlight, longest-match and
    /// non-overlapping.
    pub highlights: Vec<(usize, usize)>,
}

stored_object!(Message, "message", {
    session_id: String,
    role: MessageRole,
    content: String,
    citations: Vec<Citation>,
    low_confidence: bool
});

impl Message {
    pub fn new(
        session_id: String,
        role: MessageRole,
        content: String,
        citations: Option<Vec<Citation>>,
    ) -> Self {
        Self::with_confidence(session_id, role, content, citations, false)
    }

    /// Assistant turns record `low_confidence` so the next turn's
    /// `review_suggested` check can look it up without recomputing it.
    pub fn with_confidence(
        session_id: String,
        role: MessageRole,
        content: String,
        citations: Option<Vec<Citation>>,
        low_confidence: bool,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            role,
            content,
            citations: citations.unwrap_or_default(),
            low_confidence,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::System => write!(f, "System"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

pub fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::SurrealDbClient;

    #[tokio::test]
    async fn message_creation_and_persistence() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized().await.unwrap();

        let message = Message::new(
            "session-1".to_string(),
            MessageRole::User,
            "What are the intake deadlines?".to_string(),
            None,
        );
        db.store_item(message.clone()).await.unwrap();

        let retrieved: Option<Message> = db.get_item(&message.id).await.unwrap();
        let retrieved = retrieved.unwrap();
        assert_eq!(retrieved.session_id, "session-1");
        assert_eq!(retrieved.role, MessageRole::User);
        assert!(retrieved.citations.is_empty());
    }

    #[test]
    fn format_history_joins_role_and_content() {
        let messages = vec![
            Message::new(
                "s".into(),
                MessageRole::User,
                "Hello".into(),
                None,
            ),
            Message::new(
                "s".into(),
                MessageRole::Assistant,
                "Hi there!".into(),
                None,
            ),
        ];

        assert_eq!(format_history(&messages), "User: Hello\nAssistant: Hi there!");
    }

    #[test]
    fn message_role_display_matches_variant() {
        assert_eq!(format!("{}", MessageRole::User), "User");
        assert_eq!(format!("{}", MessageRole::Assistant), "Assistant");
        assert_eq!(format!("{}", MessageRole::System), "System");
    }
}
