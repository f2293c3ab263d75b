use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use digest_common::{Digest, DigestDetail, PageRequest, Paged};
use digest_pipeline::{Orchestrator, PreparedRun, RunOptions, RunOutcome, RunStart};

use super::PageQuery;
use crate::error::ApiResult;
use crate::AppState;

/// Drive a prepared run in the background; the caller polls the digest.
fn spawn_execution(orchestrator: Arc<Orchestrator>, prepared: PreparedRun) {
    tokio::spawn(async move {
        match orchestrator.execute(prepared).await {
            RunOutcome::Completed(digest) => {
                info!(digest_id = %digest.id, "Triggered digest completed")
            }
            RunOutcome::Failed(digest) => warn!(
                digest_id = %digest.id,
                error = digest.error_message.as_deref().unwrap_or_default(),
                "Triggered digest failed"
            ),
            RunOutcome::Skipped(_) => {}
        }
    });
}

pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(options): Json<RunOptions>,
) -> ApiResult<Response> {
    match state.orchestrator.begin_run(options, Utc::now()).await? {
        RunStart::Started(prepared) => {
            let digest = prepared.digest.clone();
            spawn_execution(state.orchestrator.clone(), prepared);
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "status": "started", "digest": digest })),
            )
                .into_response())
        }
        RunStart::Skipped(reason) => {
            Ok(Json(json!({ "status": "skipped", "skip": reason })).into_response())
        }
    }
}

pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let prepared = state.orchestrator.begin_retry(id).await?;
    let digest = prepared.digest.clone();
    spawn_execution(state.orchestrator.clone(), prepared);
    Ok((StatusCode::ACCEPTED, Json(digest)).into_response())
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> ApiResult<Json<Paged<Digest>>> {
    let page = PageRequest::new(q.page, q.per_page);
    Ok(Json(state.store.list_digests(page).await?))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DigestDetail>> {
    let digest = state.store.get_digest(id).await?;
    let recommendations = state.store.recommendations(id).await?;
    Ok(Json(DigestDetail {
        digest,
        recommendations,
    }))
}
