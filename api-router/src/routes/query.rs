use std::{collections::BTreeMap, convert::Infallible, time::Duration};

use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension, Json,
};
use common::storage::types::{
    message::Citation,
    session::{Language, SlotValue},
};
use futures::{Stream, StreamExt};
use retrieval_pipeline::{
    orchestrator::{Attachment, QueryRequest},
    streaming::StreamEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{api_state::ApiState, auth::Principal, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AttachmentBody {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequestBody {
    pub session_id: Option<String>,
    pub language: Language,
    pub question: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentBody>,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
    #[serde(default)]
    pub explain_like_new: bool,
    #[serde(default)]
    pub slot_updates: BTreeMap<String, SlotValue>,
    #[serde(default)]
    pub reset_slots: Vec<String>,
    pub model: Option<String>,
    pub top_k: Option<usize>,
    pub k_cite: Option<usize>,
}

fn default_use_rag() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct QueryQueryParams {
    #[serde(default)]
    pub stream: bool,
}

impl QueryRequestBody {
    fn into_orchestrator_request(self, owner_id: String) -> QueryRequest {
        QueryRequest {
            owner_id,
            session_id: self.session_id,
            language: self.language,
            question: self.question,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| Attachment { text: a.text })
                .collect(),
            use_rag: self.use_rag,
            explain_like_new: self.explain_like_new,
            slot_updates: self.slot_updates,
            reset_slots: self.reset_slots,
            model: self.model,
            top_k: self.top_k,
            k_cite: self.k_cite,
        }
    }
}

#[derive(Debug, Serialize)]
struct QueryResponseBody {
    session_id: String,
    answer: String,
    citations: Vec<Citation>,
    missing_slots: Vec<String>,
    slot_errors: Vec<String>,
    diagnostics: serde_json::Value,
}

/// `POST /v1/query[?stream=true]`. Streaming requires `Accept:
/// text/event-stream`, matching the external-interface contract that SSE is
/// only upgraded to when the client declares it can consume it.
pub async fn query(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<QueryQueryParams>,
    headers: axum::http::HeaderMap,
    Json(body): Json<QueryRequestBody>,
) -> Result<axum::response::Response, ApiError> {
    if !state.query_limiter.allow(&principal.0).await {
        let retry_after_secs = state.query_limiter.retry_after_secs(&principal.0).await;
        return Err(ApiError::RateLimited {
            message: format!("rate limit exceeded for {}", principal.0),
            retry_after_secs,
        });
    }

    let wants_sse = params.stream
        && headers
            .get(axum::http::header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/event-stream"));

    if wants_sse {
        return Ok(stream_query(state, principal, body).await.into_response());
    }

    let request = body.into_orchestrator_request(principal.0);
    let response = state.orchestrator.answer(request).await?;

    Ok(Json(QueryResponseBody {
        session_id: response.session_id,
        answer: response.answer,
        citations: response.citations,
        missing_slots: response.missing_slots,
        slot_errors: response.slot_errors,
        diagnostics: serde_json::to_value(&response.diagnostics).unwrap_or(json!({})),
    })
    .into_response())
}

async fn stream_query(
    state: ApiState,
    principal: Principal,
    body: QueryRequestBody,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let request = body.into_orchestrator_request(principal.0);
    let events = state.streaming.start(request);

    let sse_events = events.map(|event| {
        let event = match event {
            StreamEvent::Citations(citations) => {
                Event::default().event("citations").json_data(citations)
            }
            StreamEvent::Chunk(delta) => {
                Event::default().event("chunk").json_data(json!({ "delta": delta }))
            }
            StreamEvent::Completed(response) => Event::default().event("completed").json_data(
                json!({
                    "session_id": response.session_id,
                    "answer": response.answer,
                    "citations": response.citations,
                    "missing_slots": response.missing_slots,
                    "slot_errors": response.slot_errors,
                    "diagnostics": response.diagnostics,
                }),
            ),
            StreamEvent::Error(message) => {
                Event::default().event("error").json_data(json!({ "message": message }))
            }
        };
        Ok(event.unwrap_or_else(|_| Event::default().event("error").data("serialization failed")))
    });

    Sse::new(sse_events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
