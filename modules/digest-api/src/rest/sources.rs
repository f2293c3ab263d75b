use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use digest_common::{NewSource, Source, SourcePatch};
use digest_pipeline::SourceTestReport;

use crate::error::ApiResult;
use crate::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Source>>> {
    Ok(Json(state.sources.list().await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Source>> {
    Ok(Json(state.sources.get(id).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewSource>,
) -> ApiResult<(StatusCode, Json<Source>)> {
    let source = state.sources.create(body).await?;
    Ok((StatusCode::CREATED, Json(source)))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<SourcePatch>,
) -> ApiResult<Json<Source>> {
    Ok(Json(state.sources.update(id, patch).await?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.sources.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Dry-run fetch; nothing is persisted.
pub async fn test(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SourceTestReport>> {
    Ok(Json(state.sources.test(id).await?))
}
