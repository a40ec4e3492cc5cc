//! Query orchestrator: the ten-phase `answer` pipeline tying together
//! the session store, hybrid index, reranker, and chat-completion provider.
//!
//! Phases are timed individually (`PhaseTimings`), a plain `record(name, ms)`
//! / `into_vec()` recorder rather than a full `StageKind`/`PipelineStage`/
//! `StrategyDriver` trait trio, since this service has one fixed phase
//! sequence rather than pluggable multi-strategy retrieval.

use std::{sync::Arc, time::Instant};

use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::Document,
            message::{Citation, Message, MessageRole},
            retrieval_settings::RetrievalSettings,
            session::{Language, SessionState, SlotValue},
            slot_schema::SlotSchema,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use std::collections::BTreeMap;
use tracing::warn;

use crate::{
    index::HybridIndexRegistry,
    metrics::MetricsRegistry,
    reranking::{RerankCandidate, RerankerClient},
    streaming::StreamEvent,
};

const MAX_ATTACHMENT_SUMMARY_CHARS: usize = 1_500;
const SNIPPET_MAX_CHARS: usize = 280;
const LOW_CONFIDENCE_SCORE_THRESHOLD: f32 = 0.2;

/// Short OCR/STT text attached to a question, summarized before being
/// folded into the retrieval question (phase 2).
pub struct Attachment {
    pub text: String,
}

pub struct QueryRequest {
    pub owner_id: String,
    pub session_id: Option<String>,
    pub language: Language,
    pub question: String,
    pub attachments: Vec<Attachment>,
    pub use_rag: bool,
    pub explain_like_new: bool,
    pub slot_updates: BTreeMap<String, SlotValue>,
    pub reset_slots: Vec<String>,
    pub model: Option<String>,
    /// Per-request overrides of the live-tunable `RetrievalSettings`
    /// defaults, honored for this call only (never persisted).
    pub top_k: Option<usize>,
    pub k_cite: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub retrieval_ms: u128,
    pub rerank_ms: u128,
    pub generation_ms: u128,
    pub end_to_end_ms: u128,
    pub citation_coverage: f32,
    pub low_confidence: bool,
    pub review_suggested: bool,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub session_id: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub missing_slots: Vec<String>,
    pub slot_errors: Vec<String>,
    pub diagnostics: Diagnostics,
}

#[derive(Default)]
struct PhaseTimings {
    samples: Vec<(&'static str, u128)>,
}

impl PhaseTimings {
    fn record(&mut self, name: &'static str, started: Instant) -> u128 {
        let ms = started.elapsed().as_millis();
        self.samples.push((name, ms));
        ms
    }
}

pub struct QueryOrchestrator {
    db: Arc<SurrealDbClient>,
    index_registry: Arc<HybridIndexRegistry>,
    reranker: Arc<RerankerClient>,
    metrics: Arc<MetricsRegistry>,
    embedder: Arc<EmbeddingProvider>,
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    chat_model: String,
}

impl QueryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<SurrealDbClient>,
        index_registry: Arc<HybridIndexRegistry>,
        reranker: Arc<RerankerClient>,
        metrics: Arc<MetricsRegistry>,
        embedder: Arc<EmbeddingProvider>,
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        chat_model: String,
    ) -> Self {
        Self { db, index_registry, reranker, metrics, embedder, openai_client, chat_model }
    }

    pub async fn answer(&self, request: QueryRequest) -> Result<QueryResponse, AppError> {
        let started = Instant::now();
        let mut timings = PhaseTimings::default();

        // Phase 1: resolve session.
        let session = SessionState::upsert(
            &request.owner_id,
            request.session_id.as_deref(),
            request.language.clone(),
            request.slot_updates.clone(),
            &request.reset_slots,
            &self.db,
        )
        .await?;
        let missing_slots = self.missing_slots(&session).await?;

        // Phase 2: compose retrieval question.
        let retrieval_question =
            compose_retrieval_question(&request.question, &request.attachments);

        let mut settings = RetrievalSettings::get_current(&self.db).await?;
        if let Some(top_k) = request.top_k {
            settings.top_k = top_k;
        }
        if let Some(k_cite) = request.k_cite {
            settings.k_cite = k_cite;
        }

        // Phase 3: retrieve.
        if request.use_rag {
            let retrieve_started = Instant::now();
            let index = self.index_registry.get_or_create(&request.owner_id).await;
            let outcome = index
                .query(&self.embedder, &retrieval_question, settings.top_k, settings.alpha)
                .await;
            timings.record("retrieval_ms", retrieve_started);

            if outcome.results.is_empty() {
                self.metrics.increment_counter("empty_retrieval", 1).await;
                let body = no_match_body(&session.language);
                let assistant =
                    Message::with_confidence(session.id.clone(), MessageRole::Assistant, body.clone(), None, true);
                self.persist_turn(&session.id, &request.question, assistant.clone()).await?;

                return Ok(QueryResponse {
                    session_id: session.id,
                    answer: body,
                    citations: Vec::new(),
                    missing_slots,
                    slot_errors: session.slot_errors,
                    diagnostics: Diagnostics {
                        retrieval_ms: timings.samples.last().map(|(_, ms)| *ms).unwrap_or(0),
                        low_confidence: true,
                        end_to_end_ms: started.elapsed().as_millis(),
                        ..Default::default()
                    },
                });
            }

            // Phase 4: rerank, truncate, select citation candidates.
            let rerank_started = Instant::now();
            let candidates: Vec<RerankCandidate> = outcome
                .results
                .iter()
                .map(|r| RerankCandidate { chunk_id: r.chunk_id.clone(), text: r.text.clone() })
                .collect();
            let language_label = match &session.language {
                Language::En => "en",
                Language::Zh => "zh",
            };
            let reranked = self.reranker.rerank(&retrieval_question, candidates, language_label).await;
            timings.record("rerank_ms", rerank_started);

            let truncated: Vec<&RerankCandidate> = reranked.iter().take(settings.top_k).collect();
            let citation_candidates: Vec<&RerankCandidate> =
                truncated.iter().take(settings.k_cite).copied().collect();

            // Map reranked candidates back to their retrieval metadata.
            let by_id: std::collections::HashMap<&str, &crate::index::Retrieved> =
                outcome.results.iter().map(|r| (r.chunk_id.as_str(), r)).collect();

            // Phase 5: build citations & context.
            let mut citations = Vec::with_capacity(citation_candidates.len());
            let mut context_sections = Vec::with_capacity(citation_candidates.len());
            for (n, candidate) in citation_candidates.iter().enumerate() {
                let Some(retrieved) = by_id.get(candidate.chunk_id.as_str()) else { continue };
                let doc = Document::get_by_id(&retrieved.meta.document_id, &self.db).await.ok();
                let source_name = doc.as_ref().map(|d| d.title.clone()).unwrap_or_default();
                let snippet = build_snippet(&retrieved.text, SNIPPET_MAX_CHARS);
                let highlights = find_highlights(&snippet, &retrieval_question);

                citations.push(Citation {
                    chunk_id: retrieved.chunk_id.clone(),
                    document_id: retrieved.meta.document_id.clone(),
                    score: retrieved.score,
                    snippet: snippet.clone(),
                    source_name,
                    url: None,
                    start_char: Some(retrieved.meta.char_start),
                    end_char: Some(retrieved.meta.char_end),
                    last_verified_at: doc.map(|d| d.updated_at).unwrap_or_else(chrono::Utc::now),
                    highlights,
                });
                context_sections.push(format!("[{}] {}", n + 1, snippet));
            }

            let top_score = outcome.results.first().map(|r| r.score).unwrap_or(0.0);

            // Phase 6: compose prompt.
            let (system_message, user_message) = compose_prompt(
                &session,
                &missing_slots,
                &context_sections,
                &request.question,
                request.explain_like_new,
            );

            // Phase 7: generate.
            let generation_started = Instant::now();
            let raw_answer = self
                .generate(&request, &system_message, &user_message)
                .await
                .unwrap_or_else(|err| {
                    warn!(error = %err, "chat completion failed, returning degraded answer");
                    degraded_answer_body(&session.language)
                });
            timings.record("generation_ms", generation_started);

            // Phase 8: citation mapping.
            let (final_answer, used_citations) = map_citations(&raw_answer, &citations);

            // Phase 9: diagnostics.
            let citation_coverage = if settings.k_cite == 0 {
                0.0
            } else {
                used_citations.len() as f32 / settings.k_cite as f32
            };
            let coverage_threshold = settings.coverage_threshold_for(language_label);
            let mut low_confidence =
                citation_coverage < coverage_threshold || top_score < LOW_CONFIDENCE_SCORE_THRESHOLD;
            if raw_answer == degraded_answer_body(&session.language) {
                low_confidence = true;
            }

            let review_suggested = if low_confidence {
                self.previous_turn_was_low_confidence(&session.id, &request.owner_id).await?
            } else {
                false
            };

            // Phase 10: persist.
            let assistant = Message::with_confidence(
                session.id.clone(),
                MessageRole::Assistant,
                final_answer.clone(),
                Some(used_citations.clone()),
                low_confidence,
            );
            self.persist_turn(&session.id, &request.question, assistant).await?;
            self.metrics.record_phase("end_to_end_ms", started.elapsed().as_millis() as f64).await;

            return Ok(QueryResponse {
                session_id: session.id,
                answer: final_answer,
                citations: used_citations,
                missing_slots,
                slot_errors: session.slot_errors,
                diagnostics: Diagnostics {
                    retrieval_ms: phase_ms(&timings, "retrieval_ms"),
                    rerank_ms: phase_ms(&timings, "rerank_ms"),
                    generation_ms: phase_ms(&timings, "generation_ms"),
                    end_to_end_ms: started.elapsed().as_millis(),
                    citation_coverage,
                    low_confidence,
                    review_suggested,
                },
            });
        }

        // use_rag = false: answer without retrieval context.
        let generation_started = Instant::now();
        let (system_message, user_message) = compose_prompt(
            &session,
            &missing_slots,
            &[],
            &request.question,
            request.explain_like_new,
        );
        let raw_answer = self
            .generate(&request, &system_message, &user_message)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "chat completion failed, returning degraded answer");
                degraded_answer_body(&session.language)
            });
        timings.record("generation_ms", generation_started);

        let assistant = Message::with_confidence(
            session.id.clone(),
            MessageRole::Assistant,
            raw_answer.clone(),
            None,
            false,
        );
        self.persist_turn(&session.id, &request.question, assistant).await?;

        Ok(QueryResponse {
            session_id: session.id,
            answer: raw_answer,
            citations: Vec::new(),
            missing_slots,
            slot_errors: session.slot_errors,
            diagnostics: Diagnostics {
                generation_ms: phase_ms(&timings, "generation_ms"),
                end_to_end_ms: started.elapsed().as_millis(),
                ..Default::default()
            },
        })
    }

    async fn missing_slots(&self, session: &SessionState) -> Result<Vec<String>, AppError> {
        let catalog = SlotSchema::catalog(&self.db).await?;
        Ok(catalog
            .into_iter()
            .filter(|schema| schema.required && !session.slots.contains_key(&schema.name))
            .map(|schema| schema.name)
            .collect())
    }

    async fn previous_turn_was_low_confidence(
        &self,
        session_id: &str,
        owner_id: &str,
    ) -> Result<bool, AppError> {
        let messages = match SessionState::get_with_messages(session_id, owner_id, &self.db).await {
            Ok((_, messages)) => messages,
            Err(_) => return Ok(false),
        };
        Ok(messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.low_confidence)
            .unwrap_or(false))
    }

    async fn persist_turn(
        &self,
        session_id: &str,
        question: &str,
        assistant: Message,
    ) -> Result<(), AppError> {
        let user_message = Message::new(session_id.to_string(), MessageRole::User, question.to_string(), None);
        self.db.store_item(user_message).await?;
        self.db.store_item(assistant).await?;
        Ok(())
    }

    async fn generate(
        &self,
        request: &QueryRequest,
        system_message: &str,
        user_message: &str,
    ) -> Result<String, AppError> {
        let model = request.model.clone().unwrap_or_else(|| self.chat_model.clone());
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_message.to_string())
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_message.to_string())
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.openai_client.chat().create(chat_request).await?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LLMParsing("chat completion returned no content".to_string()))?;
        Ok(content)
    }

    /// Streaming counterpart of `answer`. Phases 1-6 run the same as
    /// `answer`; phase 7 forwards deltas as they arrive over `tx` instead of
    /// waiting for the full text; phases 8-10 run once the upstream stream
    /// ends or `cancel` fires. Setup failures (session resolution, prompt
    /// building) are forwarded as a single `StreamEvent::Error` — a
    /// degraded generation is never an error, matching `answer`.
    pub async fn answer_streaming(
        &self,
        request: QueryRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        if let Err(err) = self.run_streaming(request, &tx, &cancel).await {
            let _ = tx.send(StreamEvent::Error(err.to_string())).await;
        }
    }

    async fn run_streaming(
        &self,
        request: QueryRequest,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let started = Instant::now();
        let mut timings = PhaseTimings::default();

        let session = SessionState::upsert(
            &request.owner_id,
            request.session_id.as_deref(),
            request.language.clone(),
            request.slot_updates.clone(),
            &request.reset_slots,
            &self.db,
        )
        .await?;
        let missing_slots = self.missing_slots(&session).await?;
        let retrieval_question = compose_retrieval_question(&request.question, &request.attachments);
        let mut settings = RetrievalSettings::get_current(&self.db).await?;
        if let Some(top_k) = request.top_k {
            settings.top_k = top_k;
        }
        if let Some(k_cite) = request.k_cite {
            settings.k_cite = k_cite;
        }

        let language_label = match &session.language {
            Language::En => "en",
            Language::Zh => "zh",
        };

        let mut citations: Vec<Citation> = Vec::new();
        let mut context_sections: Vec<String> = Vec::new();
        let mut top_score = 0.0f32;
        let mut retrieval_ms = 0u128;
        let mut rerank_ms = 0u128;

        if request.use_rag {
            let retrieve_started = Instant::now();
            let index = self.index_registry.get_or_create(&request.owner_id).await;
            let outcome = index
                .query(&self.embedder, &retrieval_question, settings.top_k, settings.alpha)
                .await;
            retrieval_ms = timings.record("retrieval_ms", retrieve_started);

            if outcome.results.is_empty() {
                self.metrics.increment_counter("empty_retrieval", 1).await;
                let body = no_match_body(&session.language);
                let assistant = Message::with_confidence(
                    session.id.clone(),
                    MessageRole::Assistant,
                    body.clone(),
                    None,
                    true,
                );
                self.persist_turn(&session.id, &request.question, assistant).await?;

                let _ = tx.send(StreamEvent::Citations(Vec::new())).await;
                let _ = tx.send(StreamEvent::Chunk(body.clone())).await;
                let response = QueryResponse {
                    session_id: session.id,
                    answer: body,
                    citations: Vec::new(),
                    missing_slots,
                    slot_errors: session.slot_errors,
                    diagnostics: Diagnostics {
                        retrieval_ms,
                        low_confidence: true,
                        end_to_end_ms: started.elapsed().as_millis(),
                        ..Default::default()
                    },
                };
                let _ = tx.send(StreamEvent::Completed(Box::new(response))).await;
                return Ok(());
            }

            let rerank_started = Instant::now();
            let candidates: Vec<RerankCandidate> = outcome
                .results
                .iter()
                .map(|r| RerankCandidate { chunk_id: r.chunk_id.clone(), text: r.text.clone() })
                .collect();
            let reranked = self.reranker.rerank(&retrieval_question, candidates, language_label).await;
            rerank_ms = timings.record("rerank_ms", rerank_started);

            let truncated: Vec<&RerankCandidate> = reranked.iter().take(settings.top_k).collect();
            let citation_candidates: Vec<&RerankCandidate> =
                truncated.iter().take(settings.k_cite).copied().collect();
            let by_id: std::collections::HashMap<&str, &crate::index::Retrieved> =
                outcome.results.iter().map(|r| (r.chunk_id.as_str(), r)).collect();

            for (n, candidate) in citation_candidates.iter().enumerate() {
                let Some(retrieved) = by_id.get(candidate.chunk_id.as_str()) else { continue };
                let doc = Document::get_by_id(&retrieved.meta.document_id, &self.db).await.ok();
                let source_name = doc.as_ref().map(|d| d.title.clone()).unwrap_or_default();
                let snippet = build_snippet(&retrieved.text, SNIPPET_MAX_CHARS);
                let highlights = find_highlights(&snippet, &retrieval_question);

                citations.push(Citation {
                    chunk_id: retrieved.chunk_id.clone(),
                    document_id: retrieved.meta.document_id.clone(),
                    score: retrieved.score,
                    snippet: snippet.clone(),
                    source_name,
                    url: None,
                    start_char: Some(retrieved.meta.char_start),
                    end_char: Some(retrieved.meta.char_end),
                    last_verified_at: doc.map(|d| d.updated_at).unwrap_or_else(chrono::Utc::now),
                    highlights,
                });
                context_sections.push(format!("[{}] {}", n + 1, snippet));
            }
            top_score = outcome.results.first().map(|r| r.score).unwrap_or(0.0);
        }

        let _ = tx.send(StreamEvent::Citations(citations.clone())).await;

        let (system_message, user_message) = compose_prompt(
            &session,
            &missing_slots,
            &context_sections,
            &request.question,
            request.explain_like_new,
        );

        let generation_started = Instant::now();
        let model = request.model.clone().unwrap_or_else(|| self.chat_model.clone());
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_message)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_message)
                    .build()?
                    .into(),
            ])
            .build()?;

        let mut upstream = self.openai_client.chat().create_stream(chat_request).await?;
        let mut full_answer = String::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = upstream.next() => {
                    match next {
                        Some(Ok(response)) => {
                            let Some(choice) = response.choices.first() else { continue };
                            let Some(delta) = choice.delta.content.clone() else { continue };
                            full_answer.push_str(&delta);
                            if tx.send(StreamEvent::Chunk(delta)).await.is_err() {
                                cancelled = true;
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "upstream chat stream errored mid-response");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        let generation_ms = timings.record("generation_ms", generation_started);

        if cancelled {
            let body = format!("{}[generation_stopped]", truncate_to_last_sentence(&full_answer));
            let assistant =
                Message::with_confidence(session.id.clone(), MessageRole::Assistant, body, None, true);
            self.persist_turn(&session.id, &request.question, assistant).await?;
            return Ok(());
        }

        let (final_answer, used_citations) = map_citations(&full_answer, &citations);
        let citation_coverage = if settings.k_cite == 0 {
            0.0
        } else {
            used_citations.len() as f32 / settings.k_cite as f32
        };
        let coverage_threshold = settings.coverage_threshold_for(language_label);
        let low_confidence = citation_coverage < coverage_threshold || top_score < LOW_CONFIDENCE_SCORE_THRESHOLD;
        let review_suggested = if low_confidence {
            self.previous_turn_was_low_confidence(&session.id, &request.owner_id).await?
        } else {
            false
        };

        let assistant = Message::with_confidence(
            session.id.clone(),
            MessageRole::Assistant,
            final_answer.clone(),
            Some(used_citations.clone()),
            low_confidence,
        );
        self.persist_turn(&session.id, &request.question, assistant).await?;
        self.metrics.record_phase("end_to_end_ms", started.elapsed().as_millis() as f64).await;

        let response = QueryResponse {
            session_id: session.id,
            answer: final_answer,
            citations: used_citations,
            missing_slots,
            slot_errors: session.slot_errors,
            diagnostics: Diagnostics {
                retrieval_ms,
                rerank_ms,
                generation_ms,
                end_to_end_ms: started.elapsed().as_millis(),
                citation_coverage,
                low_confidence,
                review_suggested,
            },
        };
        let _ = tx.send(StreamEvent::Completed(Box::new(response))).await;
        Ok(())
    }
}

fn phase_ms(timings: &PhaseTimings, name: &str) -> u128 {
    timings.samples.iter().find(|(n, _)| *n == name).map(|(_, ms)| *ms).unwrap_or(0)
}

/// Concatenates the question with bounded summaries of any attachments.
fn compose_retrieval_question(question: &str, attachments: &[Attachment]) -> String {
    let mut composed = question.to_string();
    for attachment in attachments {
        let summary = truncate_chars(&attachment.text, MAX_ATTACHMENT_SUMMARY_CHARS);
        composed.push('\n');
        composed.push_str(&summary);
    }
    composed
}

/// Truncates `text` at the last complete sentence boundary (`.`, `!`, `?`),
/// falling back to the full text if no boundary was reached yet.
fn truncate_to_last_sentence(text: &str) -> String {
    const DELIMS: [char; 3] = ['.', '!', '?'];
    match text.rfind(|c| DELIMS.contains(&c)) {
        Some(idx) => text[..=idx].to_string(),
        None => text.to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Approximates "the sentence around the matched span" at chunk-level
/// retrieval granularity: centers a sentence-boundary-aware window on the
/// chunk, bounded to `max_chars`.
fn build_snippet(chunk_text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = chunk_text.chars().collect();
    if chars.len() <= max_chars {
        return chunk_text.trim().to_string();
    }

    let center = chars.len() / 2;
    let half = max_chars / 2;
    let window_start = center.saturating_sub(half);
    let window_end = (window_start + max_chars).min(chars.len());
    let window_start = window_end.saturating_sub(max_chars);

    const DELIMS: [char; 4] = ['.', '!', '?', '\n'];
    let snippet_start = (0..window_start).rev().find(|&i| DELIMS.contains(&chars[i])).map(|i| i + 1).unwrap_or(window_start);
    let snippet_end = (window_end..chars.len()).find(|&i| DELIMS.contains(&chars[i])).map(|i| i + 1).unwrap_or(window_end);

    let candidate: String = chars[snippet_start..snippet_end].iter().collect();
    if candidate.chars().count() > max_chars * 2 {
        chars[window_start..window_end].iter().collect::<String>().trim().to_string()
    } else {
        candidate.trim().to_string()
    }
}

/// Longest-match-first, non-overlapping query-term spans inside `snippet`.
fn find_highlights(snippet: &str, query: &str) -> Vec<(usize, usize)> {
    let lower: Vec<char> = snippet.to_lowercase().chars().collect();
    let mut terms: Vec<Vec<char>> =
        query.split_whitespace().map(|w| w.to_lowercase().chars().collect()).collect();
    terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
    terms.dedup();

    let mut spans: Vec<(usize, usize)> = Vec::new();
    for term in &terms {
        if term.is_empty() || term.len() > lower.len() {
            continue;
        }
        for start in 0..=(lower.len() - term.len()) {
            let end = start + term.len();
            if lower[start..end] != term[..] {
                continue;
            }
            if spans.iter().any(|&(a, b)| start < b && a < end) {
                continue;
            }
            spans.push((start, end));
        }
    }
    spans.sort_by_key(|&(s, _)| s);
    spans
}

fn compose_prompt(
    session: &SessionState,
    missing_slots: &[String],
    context_sections: &[String],
    question: &str,
    explain_like_new: bool,
) -> (String, String) {
    let mut system = String::from(
        "You are a study-abroad advisor. Answer using only the numbered context \
         below, citing sources as [n]. If the context doesn't cover the question, say so plainly.",
    );
    if explain_like_new {
        system.push_str(" Explain as if the reader has never navigated a study-abroad application before: define jargon, avoid assumed context.");
    }
    if !session.slots.is_empty() {
        let slot_summary: Vec<String> = session
            .slots
            .iter()
            .map(|(name, value)| format!("{name}={value:?}"))
            .collect();
        system.push_str("\n\nKnown applicant details: ");
        system.push_str(&slot_summary.join(", "));
    }
    if !missing_slots.is_empty() {
        system.push_str("\n\nStill missing: ");
        system.push_str(&missing_slots.join(", "));
    }
    if !context_sections.is_empty() {
        system.push_str("\n\nContext:\n");
        system.push_str(&context_sections.join("\n\n"));
    }

    (system, question.to_string())
}

/// Scans the answer for `[n]` markers, drops any that don't resolve to a
/// citation candidate, and rewrites the surviving indices contiguously.
fn map_citations(answer: &str, candidates: &[Citation]) -> (String, Vec<Citation>) {
    if candidates.is_empty() {
        return (answer.to_string(), Vec::new());
    }

    let mut used_order: Vec<usize> = Vec::new();
    let mut result = String::with_capacity(answer.len());
    let bytes = answer.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close) = answer[i..].find(']') {
                let marker = &answer[i + 1..i + close];
                if let Ok(n) = marker.parse::<usize>() {
                    if n >= 1 && n <= candidates.len() {
                        if !used_order.contains(&(n - 1)) {
                            used_order.push(n - 1);
                        }
                        let new_index = used_order.iter().position(|&idx| idx == n - 1).unwrap() + 1;
                        result.push_str(&format!("[{new_index}]"));
                        i += close + 1;
                        continue;
                    }
                }
                // Unresolved marker: drop it entirely.
                i += close + 1;
                continue;
            }
        }
        let ch = answer[i..].chars().next().unwrap_or(' ');
        result.push(ch);
        i += ch.len_utf8();
    }

    let used_citations: Vec<Citation> = used_order.iter().map(|&idx| candidates[idx].clone()).collect();
    (result, used_citations)
}

fn no_match_body(language: &Language) -> String {
    match language {
        Language::En => {
            "I couldn't find anything in the indexed documents that answers this. \
             The corpus may not cover this topic yet, or nothing has been indexed for your account."
                .to_string()
        }
        Language::Zh => "我在已索引的文档中没有找到可以回答此问题的内容,该主题可能尚未收录。".to_string(),
    }
}

fn degraded_answer_body(language: &Language) -> String {
    match language {
        Language::En => {
            "I wasn't able to generate a complete answer right now. Please try again shortly.".to_string()
        }
        Language::Zh => "目前无法生成完整答案,请稍后重试。".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(id: &str) -> Citation {
        Citation {
            chunk_id: id.to_string(),
            document_id: "doc-1".to_string(),
            score: 0.9,
            snippet: "snippet".to_string(),
            source_name: "Visa Guide".to_string(),
            url: None,
            start_char: Some(0),
            end_char: Some(10),
            last_verified_at: chrono::Utc::now(),
            highlights: Vec::new(),
        }
    }

    #[test]
    fn compose_retrieval_question_truncates_long_attachments() {
        let attachments = vec![Attachment { text: "x".repeat(2_000) }];
        let composed = compose_retrieval_question("what visa do I need", &attachments);
        assert!(composed.len() < 2_000);
        assert!(composed.starts_with("what visa do I need"));
    }

    #[test]
    fn find_highlights_matches_longest_term_first_without_overlap() {
        let spans = find_highlights("student visa application deadline", "student visa");
        assert!(!spans.is_empty());
        for window in spans.windows(2) {
            assert!(window[0].1 <= window[1].0);
        }
    }

    #[test]
    fn build_snippet_returns_whole_text_when_already_short() {
        let text = "Students need an F-1 visa before departure.";
        assert_eq!(build_snippet(text, 280), text);
    }

    #[test]
    fn map_citations_drops_unresolved_markers_and_renumbers_contiguously() {
        let candidates = vec![citation("a"), citation("b"), citation("c")];
        let answer = "Apply early [2] and check the deadline [9] and fee [1].";
        let (rewritten, used) = map_citations(answer, &candidates);
        assert_eq!(rewritten, "Apply early [1] and check the deadline  and fee [2].");
        assert_eq!(used.len(), 2);
        assert_eq!(used[0].chunk_id, "b");
        assert_eq!(used[1].chunk_id, "a");
    }

    #[test]
    fn map_citations_with_no_candidates_returns_answer_unchanged() {
        let (rewritten, used) = map_citations("Some answer [1].", &[]);
        assert_eq!(rewritten, "Some answer [1].");
        assert!(used.is_empty());
    }
}
