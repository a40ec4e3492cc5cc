use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use common::storage::types::{
    message::{Citation, Message, MessageRole},
    session::{Language, SessionState, SlotValue},
    slot_schema::SlotSchema,
};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, auth::Principal, error::ApiError};

#[derive(Debug, Serialize)]
pub struct SlotSchemaBody {
    pub name: String,
    pub field_type: String,
    pub enum_values: Option<Vec<String>>,
    pub required: bool,
}

/// `GET /v1/slots`: the fixed slot catalog, not a session's current values
/// (those are part of the session body below).
pub async fn list_slots(
    State(state): State<ApiState>,
) -> Result<Json<Vec<SlotSchemaBody>>, ApiError> {
    let catalog = SlotSchema::catalog(&state.db).await?;
    Ok(Json(
        catalog
            .into_iter()
            .map(|s| SlotSchemaBody {
                name: s.name,
                field_type: format!("{:?}", s.field_type).to_lowercase(),
                enum_values: s.enum_values,
                required: s.required,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub role: MessageRole,
    pub content: String,
    pub citations: Vec<Citation>,
    pub low_confidence: bool,
}

impl From<Message> for MessageBody {
    fn from(m: Message) -> Self {
        Self { role: m.role, content: m.content, citations: m.citations, low_confidence: m.low_confidence }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionBody {
    pub session_id: String,
    pub title: String,
    pub language: Language,
    pub slots: BTreeMap<String, SlotValue>,
    pub slot_errors: Vec<String>,
    pub archived: bool,
    pub messages: Vec<MessageBody>,
}

/// `GET /v1/session/{session_id}`.
pub async fn get_session(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionBody>, ApiError> {
    let (session, messages) =
        SessionState::get_with_messages(&session_id, &principal.0, &state.db).await?;

    Ok(Json(SessionBody {
        session_id: session.id,
        title: session.title,
        language: session.language,
        slots: session.slots,
        slot_errors: session.slot_errors,
        archived: session.archived,
        messages: messages.into_iter().map(MessageBody::from).collect(),
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct PatchSessionBody {
    pub title: Option<String>,
    pub archived: Option<bool>,
    #[serde(default)]
    pub slot_updates: BTreeMap<String, SlotValue>,
    #[serde(default)]
    pub reset_slots: Vec<String>,
}

/// `PATCH /v1/session/{session_id}`: applies whichever fields are present.
/// A caller wanting only a title rename sends just `title`; slot edits go
/// through `slot_updates`/`reset_slots`, the same pair `/v1/query` accepts.
pub async fn patch_session(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
    Json(body): Json<PatchSessionBody>,
) -> Result<Json<SessionBody>, ApiError> {
    if let Some(title) = &body.title {
        SessionState::patch_title(&session_id, &principal.0, title, &state.db).await?;
    }
    if let Some(archived) = body.archived {
        SessionState::set_archived(&session_id, &principal.0, archived, &state.db).await?;
    }
    if !body.slot_updates.is_empty() || !body.reset_slots.is_empty() {
        SessionState::upsert_slots(
            &session_id,
            &principal.0,
            &body.reset_slots,
            body.slot_updates,
            &state.db,
        )
        .await?;
    }

    let (session, messages) =
        SessionState::get_with_messages(&session_id, &principal.0, &state.db).await?;

    Ok(Json(SessionBody {
        session_id: session.id,
        title: session.title,
        language: session.language,
        slots: session.slots,
        slot_errors: session.slot_errors,
        archived: session.archived,
        messages: messages.into_iter().map(MessageBody::from).collect(),
    }))
}

/// `DELETE /v1/session/{session_id}`. Ownership is checked the same way
/// every other session route checks it, then the row is removed outright
/// (the catalog has no soft-delete state distinct from `archived`).
pub async fn delete_session(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<String>,
) -> Result<axum::http::StatusCode, ApiError> {
    SessionState::get_owned(&session_id, &principal.0, &state.db).await?;
    let _: Option<SessionState> = state.db.delete_item(&session_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
