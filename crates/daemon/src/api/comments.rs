// Comment thread endpoints.
//
// Routes:
//   GET    /v1/pages/{page_id}/comments                       threads on a page
//   POST   /v1/pages/{page_id}/comments                       add comment or reply (201)
//   GET    /v1/pages/{page_id}/comments/unresolved            unresolved, flat
//   GET    /v1/pages/{page_id}/blocks/{block_id}/comments     threads on a block
//   PATCH  /v1/comments/{comment_id}                          edit (author only)
//   DELETE /v1/comments/{comment_id}                          delete (author only, 204)
//   POST   /v1/comments/{comment_id}/resolve                  resolve
//   DELETE /v1/comments/{comment_id}/resolve                  unresolve
//   GET    /v1/users/{user_id}/mentions                       comments mentioning a user

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use wikidoc_common::types::{BlockComment, CommentNode};

use super::error::ApiError;
use super::extract::{Actor, ValidatedJson};
use super::{ApiState, ListResponse};
use crate::comments::NewComment;

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    block_id: String,
    #[serde(default)]
    parent_id: Option<String>,
    content: String,
    #[serde(default)]
    mentions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    content: String,
}

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/v1/pages/{page_id}/comments", get(page_comments).post(add_comment))
        .route("/v1/pages/{page_id}/comments/unresolved", get(unresolved_comments))
        .route("/v1/pages/{page_id}/blocks/{block_id}/comments", get(block_comments))
        .route("/v1/comments/{comment_id}", patch(update_comment).delete(delete_comment))
        .route("/v1/comments/{comment_id}/resolve", post(resolve_comment).delete(unresolve_comment))
        .route("/v1/users/{user_id}/mentions", get(mentions))
}

async fn page_comments(
    State(state): State<ApiState>,
    Path(page_id): Path<String>,
) -> Result<Json<ListResponse<CommentNode>>, ApiError> {
    let items = state.comments.page_comments(&page_id)?;
    Ok(Json(ListResponse { items }))
}

async fn add_comment(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(page_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<AddCommentRequest>,
) -> Result<(StatusCode, Json<CommentNode>), ApiError> {
    if payload.block_id.trim().is_empty() {
        return Err(ApiError::bad_request("block_id must not be empty"));
    }

    let node = state.comments.add_comment(NewComment {
        page_id,
        block_id: payload.block_id,
        parent_id: payload.parent_id,
        content: payload.content,
        actor,
        mentions: payload.mentions,
    })?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn unresolved_comments(
    State(state): State<ApiState>,
    Path(page_id): Path<String>,
) -> Result<Json<ListResponse<BlockComment>>, ApiError> {
    let items = state.comments.unresolved_comments(&page_id)?;
    Ok(Json(ListResponse { items }))
}

async fn block_comments(
    State(state): State<ApiState>,
    Path((page_id, block_id)): Path<(String, String)>,
) -> Result<Json<ListResponse<CommentNode>>, ApiError> {
    let items = state.comments.block_comments(&page_id, &block_id)?;
    Ok(Json(ListResponse { items }))
}

async fn update_comment(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(comment_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<UpdateCommentRequest>,
) -> Result<Json<BlockComment>, ApiError> {
    Ok(Json(state.comments.update_comment(&comment_id, &payload.content, &actor)?))
}

async fn delete_comment(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(comment_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.comments.delete_comment(&comment_id, &actor)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resolve_comment(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(comment_id): Path<String>,
) -> Result<Json<BlockComment>, ApiError> {
    Ok(Json(state.comments.resolve_comment(&comment_id, &actor)?))
}

async fn unresolve_comment(
    State(state): State<ApiState>,
    Actor(_actor): Actor,
    Path(comment_id): Path<String>,
) -> Result<Json<BlockComment>, ApiError> {
    Ok(Json(state.comments.unresolve_comment(&comment_id)?))
}

async fn mentions(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<ListResponse<BlockComment>>, ApiError> {
    let items = state.comments.mentions_for(&user_id)?;
    Ok(Json(ListResponse { items }))
}
