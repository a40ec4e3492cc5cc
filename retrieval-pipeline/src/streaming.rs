//! Streaming bridge: wraps [`crate::orchestrator::QueryOrchestrator`]'s
//! streaming run in an mpsc channel so the SSE response layer (in
//! `api-router`) never touches the orchestrator directly. Client disconnect
//! is detected by the consuming stream being dropped, which drops the
//! channel receiver and, via `CancelOnDrop`, flips the cancellation token the
//! background task is watching at its two suspension points (the next
//! upstream token, and channel send readiness).

use std::sync::Arc;

use async_stream::stream;
use common::storage::types::message::Citation;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{QueryOrchestrator, QueryRequest, QueryResponse};

const CHANNEL_CAPACITY: usize = 32;

pub enum StreamEvent {
    /// Emitted once, before any `Chunk`.
    Citations(Vec<Citation>),
    Chunk(String),
    Completed(Box<QueryResponse>),
    Error(String),
}

struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub struct StreamingBridge {
    orchestrator: Arc<QueryOrchestrator>,
}

impl StreamingBridge {
    pub fn new(orchestrator: Arc<QueryOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn start(&self, request: QueryRequest) -> impl Stream<Item = StreamEvent> {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let orchestrator = self.orchestrator.clone();

        tokio::spawn(async move {
            orchestrator.answer_streaming(request, tx, task_cancel).await;
        });

        stream! {
            let _guard = CancelOnDrop(cancel);
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
    }
}
