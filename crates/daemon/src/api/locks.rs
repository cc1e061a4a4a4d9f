// Advisory edit lock endpoints.
//
// Routes:
//   POST   /v1/pages/{page_id}/lock                     acquire or renew
//   DELETE /v1/pages/{page_id}/lock?session_id=S        release
//   GET    /v1/pages/{page_id}/lock                     status

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use wikidoc_common::types::{LockAcquisition, LockStatus};

use super::error::ApiError;
use super::extract::{Actor, ValidatedJson};
use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct AcquireLockRequest {
    session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseLockQuery {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReleaseLockResponse {
    released: bool,
}

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/v1/pages/{page_id}/lock", get(lock_status).post(acquire_lock).delete(release_lock))
}

async fn acquire_lock(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(page_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<AcquireLockRequest>,
) -> Result<Json<LockAcquisition>, ApiError> {
    let session_id = required_session(Some(payload.session_id))?;
    Ok(Json(state.locks.acquire_lock(&page_id, &actor, &session_id)?))
}

async fn release_lock(
    State(state): State<ApiState>,
    Actor(actor): Actor,
    Path(page_id): Path<String>,
    Query(query): Query<ReleaseLockQuery>,
) -> Result<Json<ReleaseLockResponse>, ApiError> {
    let session_id = required_session(query.session_id)?;
    let released = state.locks.release_lock(&page_id, &actor, &session_id)?;
    Ok(Json(ReleaseLockResponse { released }))
}

async fn lock_status(
    State(state): State<ApiState>,
    Path(page_id): Path<String>,
) -> Result<Json<LockStatus>, ApiError> {
    Ok(Json(state.locks.lock_status(&page_id)?))
}

fn required_session(session_id: Option<String>) -> Result<String, ApiError> {
    session_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("session_id is required"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::api::test_support::{body_json, empty_request, json_request, test_app};

    #[tokio::test]
    async fn second_session_sees_incumbent_until_release() {
        let app = test_app();

        let first = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/pages/p1/lock",
                json!({ "session_id": "s1" }),
                Some("alice"),
            ))
            .await
            .expect("acquire should respond");
        assert_eq!(first.status(), StatusCode::OK);
        let body = body_json(first).await;
        assert_eq!(body["acquired"], true);
        assert_eq!(body["owned"], true);

        let second = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/pages/p1/lock",
                json!({ "session_id": "s2" }),
                Some("bob"),
            ))
            .await
            .expect("acquire should respond");
        assert_eq!(second.status(), StatusCode::OK);
        let body = body_json(second).await;
        assert_eq!(body["owned"], false);
        assert_eq!(body["lock"]["locked_by"], "alice");

        let foreign_release = app
            .clone()
            .oneshot(empty_request("DELETE", "/v1/pages/p1/lock?session_id=s2", Some("bob")))
            .await
            .expect("release should respond");
        assert_eq!(body_json(foreign_release).await["released"], false);

        let status = app
            .clone()
            .oneshot(empty_request("GET", "/v1/pages/p1/lock", None))
            .await
            .expect("status should respond");
        assert_eq!(body_json(status).await["state"], "locked");

        let own_release = app
            .clone()
            .oneshot(empty_request("DELETE", "/v1/pages/p1/lock?session_id=s1", Some("alice")))
            .await
            .expect("release should respond");
        assert_eq!(body_json(own_release).await["released"], true);

        let status = app
            .clone()
            .oneshot(empty_request("GET", "/v1/pages/p1/lock", None))
            .await
            .expect("status should respond");
        assert_eq!(body_json(status).await["state"], "unlocked");
    }

    #[tokio::test]
    async fn acquire_without_actor_or_session_is_rejected() {
        let app = test_app();

        let anonymous = app
            .clone()
            .oneshot(json_request("POST", "/v1/pages/p1/lock", json!({ "session_id": "s1" }), None))
            .await
            .expect("acquire should respond");
        assert_eq!(anonymous.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(anonymous).await["error"]["code"], "VALIDATION_FAILED");

        let blank_session = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/pages/p1/lock",
                json!({ "session_id": "  " }),
                Some("alice"),
            ))
            .await
            .expect("acquire should respond");
        assert_eq!(blank_session.status(), StatusCode::BAD_REQUEST);
    }
}
