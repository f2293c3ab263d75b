use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Json,
};

use digest_common::JobRun;

use super::LimitQuery;
use crate::error::ApiResult;
use crate::AppState;

const DEFAULT_LIMIT: u32 = 20;

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<JobRun>>> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 100);
    Ok(Json(state.orchestrator.recent_runs(limit).await?))
}
