use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::message::Message;
use super::slot_schema::{validate_slots, SlotSchema};

/// Typed value held in a session slot. Validation against a `SlotSchema`
/// entry happens at `upsert` time, not at deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    String(String),
    Int(i64),
    Float(f64),
    Enum(String),
    Date(chrono::NaiveDate),
}

impl SlotValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SlotValue::String(_) => "string",
            SlotValue::Int(_) => "int",
            SlotValue::Float(_) => "float",
            SlotValue::Enum(_) => "enum",
            SlotValue::Date(_) => "date",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    En,
    Zh,
}

stored_object!(SessionState, "session", {
    owner_id: String,
    title: String,
    language: Language,
    slots: BTreeMap<String, SlotValue>,
    slot_errors: Vec<String>,
    pinned: bool,
    archived: bool
});

impl SessionState {
    pub fn new(owner_id: String, language: Language) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            title: String::new(),
            language,
            slots: BTreeMap::new(),
            slot_errors: Vec::new(),
            pinned: false,
            archived: false,
        }
    }

    pub async fn get_owned(
        session_id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let session: SessionState = db
            .get_item(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("session not found".to_string()))?;

        if session.owner_id != owner_id {
            return Err(AppError::Auth(
                "caller does not own this session".to_string(),
            ));
        }
        Ok(session)
    }

    pub async fn get_with_messages(
        session_id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(Self, Vec<Message>), AppError> {
        let session = Self::get_owned(session_id, owner_id, db).await?;

        let messages: Vec<Message> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE session_id = $session_id ORDER BY created_at")
            .bind(("table_name", Message::table_name()))
            .bind(("session_id", session_id.to_string()))
            .await?
            .take(0)?;

        Ok((session, messages))
    }

    /// Resolves the caller's session: allocates a new one if `session_id` is
    /// absent or doesn't resolve to one this `owner_id` owns, otherwise
    /// merges `slot_updates` into the existing session (`reset_slots` names
    /// cleared first, same ordering as [`Self::upsert_slots`]). Each update
    /// is validated against the slot catalog first; a rejected value is
    /// dropped from the merge and reported in `slot_errors`, leaving
    /// whatever the slot previously held in place.
    pub async fn upsert(
        owner_id: &str,
        session_id: Option<&str>,
        language: Language,
        slot_updates: BTreeMap<String, SlotValue>,
        reset_slots: &[String],
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let catalog = SlotSchema::catalog(db).await?;
        let (accepted, slot_errors) = validate_slots(&catalog, slot_updates);

        let existing = match session_id {
            Some(id) => Self::get_owned(id, owner_id, db).await.ok(),
            None => None,
        };

        match existing {
            Some(mut session) => {
                for name in reset_slots {
                    session.slots.remove(name);
                }
                session.slots.extend(accepted);
                session.slot_errors = slot_errors;
                session.language = language;
                session.updated_at = Utc::now();

                let _updated: Option<Self> = db
                    .update((Self::table_name(), session.id.clone()))
                    .patch(PatchOp::replace("/slots", session.slots.clone()))
                    .patch(PatchOp::replace("/slot_errors", session.slot_errors.clone()))
                    .patch(PatchOp::replace("/language", session.language.clone()))
                    .patch(PatchOp::replace(
                        "/updated_at",
                        surrealdb::Datetime::from(session.updated_at),
                    ))
                    .await?;

                Ok(session)
            }
            None => {
                let mut session = Self::new(owner_id.to_string(), language);
                session.slots = accepted;
                session.slot_errors = slot_errors;
                db.store_item(session.clone()).await?;
                Ok(session)
            }
        }
    }

    /// Applies a slot update: `reset_slots` names are cleared first, then
    /// the subset of `slot_updates` that validates against the slot catalog
    /// is applied, so a name present in both ends up set rather than blanked
    /// (see DESIGN.md open-question decision #2). Values that fail
    /// validation are reported in `slot_errors` and never merged.
    pub async fn upsert_slots(
        session_id: &str,
        owner_id: &str,
        reset_slots: &[String],
        slot_updates: BTreeMap<String, SlotValue>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let catalog = SlotSchema::catalog(db).await?;
        let (accepted, slot_errors) = validate_slots(&catalog, slot_updates);

        let mut session = Self::get_owned(session_id, owner_id, db).await?;

        for name in reset_slots {
            session.slots.remove(name);
        }
        session.slots.extend(accepted);
        session.slot_errors = slot_errors;
        session.updated_at = Utc::now();

        let _updated: Option<Self> = db
            .update((Self::table_name(), session_id))
            .patch(PatchOp::replace("/slots", session.slots.clone()))
            .patch(PatchOp::replace("/slot_errors", session.slot_errors.clone()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(session.updated_at),
            ))
            .await?;

        Ok(session)
    }

    pub async fn patch_title(
        id: &str,
        owner_id: &str,
        new_title: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let session = Self::get_owned(id, owner_id, db).await?;
        let _ = session;

        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/title", new_title.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;

        Ok(())
    }

    pub async fn set_archived(
        id: &str,
        owner_id: &str,
        archived: bool,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        Self::get_owned(id, owner_id, db).await?;
        let _updated: Option<Self> = db
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/archived", archived))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SlotFieldType {
    String,
    Int,
    Float,
    Enum,
    Date,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::message::MessageRole;

    async fn test_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db");
        db.ensure_initialized().await.unwrap();
        db
    }

    fn schema(name: &str, field_type: SlotFieldType, enum_values: Option<Vec<String>>) -> SlotSchema {
        let now = Utc::now();
        SlotSchema {
            id: name.to_string(),
            created_at: now,
            updated_at: now,
            name: name.to_string(),
            field_type,
            enum_values,
            required: false,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_session() {
        let db = test_db().await;
        let session = SessionState::new("user-1".to_string(), Language::En);
        db.store_item(session.clone()).await.unwrap();

        let fetched = SessionState::get_owned(&session.id, "user-1", &db)
            .await
            .unwrap();
        assert_eq!(fetched.id, session.id);
        assert!(fetched.slots.is_empty());
    }

    #[tokio::test]
    async fn unauthorized_owner_is_rejected() {
        let db = test_db().await;
        let session = SessionState::new("owner".to_string(), Language::Zh);
        db.store_item(session.clone()).await.unwrap();

        let result = SessionState::get_owned(&session.id, "intruder", &db).await;
        assert!(matches!(result, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn upsert_allocates_a_new_session_when_id_is_missing() {
        let db = test_db().await;
        let session = SessionState::upsert("user-1", None, Language::En, BTreeMap::new(), &[], &db)
            .await
            .unwrap();

        assert_eq!(session.owner_id, "user-1");
        let fetched = SessionState::get_owned(&session.id, "user-1", &db).await.unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test]
    async fn upsert_allocates_a_new_session_when_id_is_unknown() {
        let db = test_db().await;
        let session = SessionState::upsert(
            "user-1",
            Some("nonexistent-session"),
            Language::En,
            BTreeMap::new(),
            &[],
            &db,
        )
        .await
        .unwrap();

        assert_ne!(session.id, "nonexistent-session");
    }

    #[tokio::test]
    async fn upsert_merges_slots_into_an_existing_session() {
        let db = test_db().await;
        db.store_item(schema(
            "budget_tier",
            SlotFieldType::Enum,
            Some(vec!["mid".into()]),
        ))
        .await
        .unwrap();
        let session = SessionState::new("user-1".to_string(), Language::En);
        db.store_item(session.clone()).await.unwrap();

        let mut updates = BTreeMap::new();
        updates.insert("budget_tier".into(), SlotValue::Enum("mid".into()));
        let updated = SessionState::upsert(
            "user-1",
            Some(&session.id),
            Language::En,
            updates,
            &[],
            &db,
        )
        .await
        .unwrap();

        assert_eq!(updated.id, session.id);
        assert_eq!(
            updated.slots.get("budget_tier"),
            Some(&SlotValue::Enum("mid".into()))
        );
    }

    #[tokio::test]
    async fn reset_then_set_keeps_a_name_present_in_both() {
        let db = test_db().await;
        db.store_item(schema("destination_country", SlotFieldType::String, None))
            .await
            .unwrap();
        let mut session = SessionState::new("user-1".to_string(), Language::En);
        session
            .slots
            .insert("destination_country".into(), SlotValue::String("JP".into()));
        db.store_item(session.clone()).await.unwrap();

        let mut updates = BTreeMap::new();
        updates.insert(
            "destination_country".into(),
            SlotValue::String("KR".into()),
        );
        let result = SessionState::upsert_slots(
            &session.id,
            "user-1",
            &["destination_country".to_string()],
            updates,
            &db,
        )
        .await
        .unwrap();

        assert_eq!(
            result.slots.get("destination_country"),
            Some(&SlotValue::String("KR".into()))
        );
    }

    #[tokio::test]
    async fn upsert_rejects_an_invalid_slot_value_and_records_the_error() {
        let db = test_db().await;
        db.store_item(schema(
            "budget_tier",
            SlotFieldType::Enum,
            Some(vec!["low".into(), "medium".into(), "high".into()]),
        ))
        .await
        .unwrap();
        let mut session = SessionState::new("user-1".to_string(), Language::En);
        session
            .slots
            .insert("budget_tier".into(), SlotValue::Enum("medium".into()));
        db.store_item(session.clone()).await.unwrap();

        let mut updates = BTreeMap::new();
        updates.insert("budget_tier".into(), SlotValue::Enum("bogus".into()));
        let updated = SessionState::upsert(
            "user-1",
            Some(&session.id),
            Language::En,
            updates,
            &[],
            &db,
        )
        .await
        .unwrap();

        assert_eq!(
            updated.slots.get("budget_tier"),
            Some(&SlotValue::Enum("medium".into()))
        );
        assert_eq!(updated.slot_errors.len(), 1);
        assert!(updated.slot_errors[0].starts_with("budget_tier:"));
    }

    #[tokio::test]
    async fn session_with_messages_orders_by_created_at() {
        let db = test_db().await;
        let session = SessionState::new("user-1".to_string(), Language::En);
        db.store_item(session.clone()).await.unwrap();

        let m1 = Message::new(session.id.clone(), MessageRole::User, "hi".into(), None);
        let m2 = Message::new(
            session.id.clone(),
            MessageRole::Assistant,
            "hello".into(),
            None,
        );
        db.store_item(m1).await.unwrap();
        db.store_item(m2).await.unwrap();

        let (fetched, messages) = SessionState::get_with_messages(&session.id, "user-1", &db)
            .await
            .unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(messages.len(), 2);
    }
}
