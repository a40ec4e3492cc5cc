use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, storage::types::StoredObject};

/// Singleton settings row. `/v1/admin/retrieval-tuning` patches this
/// directly so retrieval knobs take effect without a restart.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrievalSettings {
    pub id: String,
    pub alpha: f32,
    pub top_k: usize,
    pub k_cite: usize,
    pub citation_coverage_threshold: f32,
    pub per_language_coverage_threshold: Option<std::collections::BTreeMap<String, f32>>,
    pub rerank_max_attempts: u32,
    pub rerank_timeout_ms: u64,
    pub rerank_circuit_threshold: u32,
    pub rerank_circuit_reset_s: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            id: "current".to_string(),
            alpha: 0.6,
            top_k: 8,
            k_cite: 4,
            citation_coverage_threshold: 0.6,
            per_language_coverage_threshold: None,
            rerank_max_attempts: 3,
            rerank_timeout_ms: 2_000,
            rerank_circuit_threshold: 5,
            rerank_circuit_reset_s: 30,
        }
    }
}

impl StoredObject for RetrievalSettings {
    fn table_name() -> &'static str {
        "retrieval_settings"
    }

    fn get_id(&self) -> &str {
        &self.id
    }
}

impl RetrievalSettings {
    pub async fn get_current(db: &SurrealDbClient) -> Result<Self, AppError> {
        match db.get_item::<Self>("current").await? {
            Some(settings) => Ok(settings),
            None => {
                let defaults = Self::default();
                db.store_item(defaults.clone()).await?;
                Ok(defaults)
            }
        }
    }

    pub async fn patch(db: &SurrealDbClient, changes: Self) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .client
            .query("UPDATE type::thing('retrieval_settings', 'current') MERGE $changes RETURN AFTER")
            .bind(("changes", changes))
            .await?
            .take(0)?;

        updated.ok_or_else(|| {
            AppError::Validation("failed to update retrieval settings".to_string())
        })
    }

    /// Resolves the coverage threshold for a given language, falling back to
    /// the global threshold when no per-language override is configured
    /// (see DESIGN.md open-question decision #1).
    pub fn coverage_threshold_for(&self, language: &str) -> f32 {
        self.per_language_coverage_threshold
            .as_ref()
            .and_then(|overrides| overrides.get(language))
            .copied()
            .unwrap_or(self.citation_coverage_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_current_seeds_defaults_on_first_read() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.ensure_initialized().await.unwrap();

        let settings = RetrievalSettings::get_current(&db).await.unwrap();
        assert_eq!(settings.alpha, 0.6);
        assert_eq!(settings.top_k, 8);
    }

    #[tokio::test]
    async fn patch_merges_fields() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.ensure_initialized().await.unwrap();
        RetrievalSettings::get_current(&db).await.unwrap();

        let mut changes = RetrievalSettings::default();
        changes.alpha = 0.8;
        let updated = RetrievalSettings::patch(&db, changes).await.unwrap();
        assert_eq!(updated.alpha, 0.8);
    }

    #[test]
    fn coverage_threshold_falls_back_to_global() {
        let settings = RetrievalSettings {
            citation_coverage_threshold: 0.6,
            per_language_coverage_threshold: None,
            ..RetrievalSettings::default()
        };
        assert_eq!(settings.coverage_threshold_for("zh"), 0.6);
    }

    #[test]
    fn coverage_threshold_uses_per_language_override_when_present() {
        let mut overrides = std::collections::BTreeMap::new();
        overrides.insert("zh".to_string(), 0.7);
        let settings = RetrievalSettings {
            citation_coverage_threshold: 0.6,
            per_language_coverage_threshold: Some(overrides),
            ..RetrievalSettings::default()
        };
        assert_eq!(settings.coverage_threshold_for("zh"), 0.7);
        assert_eq!(settings.coverage_threshold_for("en"), 0.6);
    }
}
