use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use digest_common::{SopDraft, SopDraftEdit, TaskDraft};
use digest_pipeline::{ApproveTask, BulkOutcome};

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApproveRequest {
    /// Draft ids to approve; all pending drafts of the digest when absent.
    #[serde(default)]
    pub ids: Option<Vec<Uuid>>,
    #[serde(flatten)]
    pub approve: ApproveTask,
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkRejectRequest {
    #[serde(default)]
    pub ids: Option<Vec<Uuid>>,
}

// --- Task drafts ---

pub async fn list_task_drafts(
    State(state): State<Arc<AppState>>,
    Path(digest_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TaskDraft>>> {
    Ok(Json(state.review.task_drafts(digest_id).await?))
}

pub async fn approve_task_draft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveTask>,
) -> ApiResult<Json<TaskDraft>> {
    Ok(Json(state.review.approve_task_draft(id, &body).await?))
}

pub async fn reject_task_draft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskDraft>> {
    Ok(Json(state.review.reject_task_draft(id).await?))
}

pub async fn bulk_approve(
    State(state): State<Arc<AppState>>,
    Path(digest_id): Path<Uuid>,
    Json(body): Json<BulkApproveRequest>,
) -> ApiResult<Json<BulkOutcome>> {
    let outcome = state
        .review
        .bulk_approve(digest_id, body.ids, &body.approve)
        .await?;
    Ok(Json(outcome))
}

pub async fn bulk_reject(
    State(state): State<Arc<AppState>>,
    Path(digest_id): Path<Uuid>,
    Json(body): Json<BulkRejectRequest>,
) -> ApiResult<Json<BulkOutcome>> {
    Ok(Json(state.review.bulk_reject(digest_id, body.ids).await?))
}

// --- SOP drafts ---

pub async fn list_sop_drafts(
    State(state): State<Arc<AppState>>,
    Path(digest_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SopDraft>>> {
    Ok(Json(state.review.sop_drafts(digest_id).await?))
}

pub async fn apply_sop_draft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SopDraft>> {
    Ok(Json(state.review.apply_sop_draft(id).await?))
}

pub async fn dismiss_sop_draft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SopDraft>> {
    Ok(Json(state.review.dismiss_sop_draft(id).await?))
}

pub async fn edit_sop_draft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(edit): Json<SopDraftEdit>,
) -> ApiResult<Json<SopDraft>> {
    Ok(Json(state.review.edit_sop_draft(id, &edit).await?))
}
