// Page content endpoints.
//
// Routes:
//   POST   /v1/pages/{page_id}/content                        create (201)
//   GET    /v1/pages/{page_id}/content                        fetch
//   PUT    /v1/pages/{page_id}/content                        replace
//   POST   /v1/pages/{page_id}/blocks                         append root block
//   PUT    /v1/pages/{page_id}/blocks/{block_id}              update block
//   DELETE /v1/pages/{page_id}/blocks/{block_id}?expected_version=N
//   GET    /v1/pages/{page_id}/history?limit=N
//   GET    /v1/pages/{page_id}/history/{version}
//   POST   /v1/pages/{page_id}/history/{version}/restore

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use wikidoc_common::types::{Block, HistoryEntry, PageContent};

use super::error::ApiError;
use super::extract::{Actor, ValidatedJson};
use super::{ApiState, ListResponse};
use crate::content::DEFAULT_HISTORY_RETENTION;

#[derive(Debug, Deserialize)]
pub struct CreateContentRequest {
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceContentRequest {
    blocks: Vec<Block>,
    expected_version: i64,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    block: Block,
    expected_version: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExpectedVersionRequest {
    expected_version: i64,
}

#[derive(Debug, Deserialize)]
pub struct ExpectedVersionQuery {
    expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ContentResponse {
    content: PageContent,
}

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route(
            "/v1/pages/{page_id}/content",
            get(get_content).post(create_content).put(replace_content),
        )
        .route("/v1/pages/{page_id}/blocks", post(add_block))
        .route("/v1/pages/{page_id}/blocks/{block_id}", put(update_block).delete(delete_block))
        .route("/v1/pages/{page_id}/history", get(history))
        .route("/v1/pages/{page_id}/history/{version}", get(version_snapshot))
        .route("/v1/pages/{page_id}/history/{version}/restore", post(restore_version))
}

async fn create_content(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(page_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<CreateContentRequest>,
) -> Result<(StatusCode, Json<ContentResponse>), ApiError> {
    let content = state.content.create_content(&page_id, payload.blocks, &actor)?;
    Ok((StatusCode::CREATED, Json(ContentResponse { content })))
}

async fn get_content(
    State(state): State<ApiState>,
    Path(page_id): Path<String>,
) -> Result<Json<ContentResponse>, ApiError> {
    let content = state.content.get_content(&page_id)?;
    Ok(Json(ContentResponse { content }))
}

async fn replace_content(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(page_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<ReplaceContentRequest>,
) -> Result<Json<ContentResponse>, ApiError> {
    let content = state.content.replace_content(
        &page_id,
        payload.blocks,
        payload.expected_version,
        &actor,
        payload.summary.as_deref(),
    )?;
    Ok(Json(ContentResponse { content }))
}

async fn add_block(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(page_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<BlockRequest>,
) -> Result<Json<ContentResponse>, ApiError> {
    let content =
        state.content.add_block(&page_id, payload.block, &actor, payload.expected_version)?;
    Ok(Json(ContentResponse { content }))
}

async fn update_block(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path((page_id, block_id)): Path<(String, String)>,
    ValidatedJson(payload): ValidatedJson<BlockRequest>,
) -> Result<Json<ContentResponse>, ApiError> {
    let content = state.content.update_block(
        &page_id,
        &block_id,
        payload.block,
        payload.expected_version,
        &actor,
    )?;
    Ok(Json(ContentResponse { content }))
}

async fn delete_block(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path((page_id, block_id)): Path<(String, String)>,
    Query(query): Query<ExpectedVersionQuery>,
) -> Result<Json<ContentResponse>, ApiError> {
    let expected_version = query
        .expected_version
        .ok_or_else(|| ApiError::bad_request("expected_version query parameter is required"))?;
    let content = state.content.delete_block(&page_id, &block_id, &actor, expected_version)?;
    Ok(Json(ContentResponse { content }))
}

async fn history(
    State(state): State<ApiState>,
    Path(page_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ListResponse<HistoryEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_RETENTION);
    let items = state.content.history(&page_id, limit)?;
    Ok(Json(ListResponse { items }))
}

async fn version_snapshot(
    State(state): State<ApiState>,
    Path((page_id, version)): Path<(String, i64)>,
) -> Result<Json<HistoryEntry>, ApiError> {
    Ok(Json(state.content.version_snapshot(&page_id, version)?))
}

async fn restore_version(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path((page_id, version)): Path<(String, i64)>,
    ValidatedJson(payload): ValidatedJson<ExpectedVersionRequest>,
) -> Result<Json<ContentResponse>, ApiError> {
    let content =
        state.content.restore_version(&page_id, version, &actor, payload.expected_version)?;
    Ok(Json(ContentResponse { content }))
}
