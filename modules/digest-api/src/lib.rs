//! HTTP control surface for the digest pipeline.

pub mod error;
pub mod rest;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use digest_pipeline::{DigestStore, Orchestrator, ReviewService, SourceAdmin};

pub struct AppState {
    pub store: Arc<dyn DigestStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub review: ReviewService,
    pub sources: SourceAdmin,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(|| async { "ok" }))
        // Digests
        .route("/api/digests", get(rest::digests::list))
        .route("/api/digests/run", post(rest::digests::run))
        .route("/api/digests/{id}", get(rest::digests::detail))
        .route("/api/digests/{id}/retry", post(rest::digests::retry))
        // Task drafts
        .route("/api/digests/{id}/task-drafts", get(rest::drafts::list_task_drafts))
        .route("/api/digests/{id}/task-drafts/approve", post(rest::drafts::bulk_approve))
        .route("/api/digests/{id}/task-drafts/reject", post(rest::drafts::bulk_reject))
        .route("/api/task-drafts/{id}/approve", post(rest::drafts::approve_task_draft))
        .route("/api/task-drafts/{id}/reject", post(rest::drafts::reject_task_draft))
        // SOP drafts
        .route("/api/digests/{id}/sop-drafts", get(rest::drafts::list_sop_drafts))
        .route("/api/sop-drafts/{id}", axum::routing::patch(rest::drafts::edit_sop_draft))
        .route("/api/sop-drafts/{id}/apply", post(rest::drafts::apply_sop_draft))
        .route("/api/sop-drafts/{id}/dismiss", post(rest::drafts::dismiss_sop_draft))
        // Sources
        .route("/api/sources", get(rest::sources::list).post(rest::sources::create))
        .route(
            "/api/sources/{id}",
            get(rest::sources::get)
                .put(rest::sources::update)
                .delete(rest::sources::delete),
        )
        .route("/api/sources/{id}/test", post(rest::sources::test))
        // Job history
        .route("/api/jobs", get(rest::jobs::list))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // method + path only
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
