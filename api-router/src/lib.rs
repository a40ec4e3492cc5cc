use api_state::ApiState;
use auth::authenticate;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use routes::{
    admin::{get_retrieval_tuning, patch_retrieval_tuning},
    chunks::get_chunk,
    index::{health as index_health, rebuild as index_rebuild},
    ingest::{ingest, ingest_upload},
    liveness::live,
    observability::{metrics, status},
    query::query,
    readiness::ready,
    session::{delete_session, get_session, list_slots, patch_session},
};

pub mod api_state;
pub mod auth;
pub mod error;
mod routes;

/// Router for API functionality, version 1.
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route("/ingest", post(ingest))
        .route(
            "/ingest-upload",
            post(ingest_upload).layer(DefaultBodyLimit::max(app_state.config.upload_max_bytes)),
        )
        .route("/query", post(query))
        .route("/index/health", get(index_health))
        .route("/index/rebuild", post(index_rebuild))
        .route("/chunks/{chunk_id}", get(get_chunk))
        .route("/slots", get(list_slots))
        .route(
            "/session/{session_id}",
            get(get_session).patch(patch_session).delete(delete_session),
        )
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route(
            "/admin/retrieval-tuning",
            get(get_retrieval_tuning).patch(patch_retrieval_tuning),
        )
        .route_layer(from_fn_with_state(app_state.clone(), authenticate));

    public.merge(protected)
}
