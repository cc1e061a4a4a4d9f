// Outbox consumer endpoints.
//
// Routes:
//   GET  /v1/events/pending?limit=N    claim ready events (leases them as sent)
//   POST /v1/events/{id}/ack           delivery confirmed
//   POST /v1/events/{id}/nack          delivery failed, retry with backoff

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use wikidoc_common::error::CoreError;

use super::error::ApiError;
use super::{ApiState, ListResponse};
use crate::events::{OutboxEvent, OutboxQueue};

const DEFAULT_CLAIM_LIMIT: usize = 100;
const MAX_CLAIM_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TransitionResponse {
    id: i64,
    applied: bool,
}

pub(super) fn routes() -> Router<ApiState> {
    Router::new()
        .route("/v1/events/pending", get(pending_events))
        .route("/v1/events/{id}/ack", post(ack_event))
        .route("/v1/events/{id}/nack", post(nack_event))
}

async fn pending_events(
    State(state): State<ApiState>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<ListResponse<OutboxEvent>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_CLAIM_LIMIT).clamp(1, MAX_CLAIM_LIMIT);
    let now = (state.clock)();
    let items = with_outbox(&state, |queue| queue.claim_ready(now, limit))?;
    Ok(Json(ListResponse { items }))
}

async fn ack_event(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let applied = with_outbox(&state, |queue| queue.mark_acked(id))?;
    Ok(Json(TransitionResponse { id, applied }))
}

async fn nack_event(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let now = (state.clock)();
    let applied = with_outbox(&state, |queue| queue.mark_failed(id, now))?;
    Ok(Json(TransitionResponse { id, applied }))
}

fn with_outbox<T, F>(state: &ApiState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(OutboxQueue<'_>) -> anyhow::Result<T>,
{
    let db = state
        .db
        .lock()
        .map_err(|_| CoreError::Storage(anyhow::anyhow!("meta.db lock poisoned")))?;
    Ok(f(OutboxQueue::new(db.connection()))?)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::http::StatusCode;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::api::test_support::{
        body_json, empty_request, json_request, outbox_app, outbox_app_with_clock,
    };

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).single().expect("timestamp should be valid")
    }

    #[tokio::test]
    async fn committed_writes_are_claimable_once_and_ackable() {
        let app = outbox_app();
        app.clone()
            .oneshot(json_request(
                "POST",
                "/v1/pages/p1/content",
                json!({ "blocks": [] }),
                Some("alice"),
            ))
            .await
            .expect("create should respond");

        let pending = app
            .clone()
            .oneshot(empty_request("GET", "/v1/events/pending", None))
            .await
            .expect("pending should respond");
        assert_eq!(pending.status(), StatusCode::OK);
        let body = body_json(pending).await;
        let items = body["items"].as_array().expect("items array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["event_type"], "content_created");
        assert_eq!(items[0]["event"]["type"], "content_created");
        assert_eq!(items[0]["state"], "sent");
        let id = items[0]["id"].as_i64().expect("event id");

        let again = app
            .clone()
            .oneshot(empty_request("GET", "/v1/events/pending", None))
            .await
            .expect("pending should respond");
        assert_eq!(body_json(again).await["items"], json!([]));

        let acked = app
            .clone()
            .oneshot(empty_request("POST", &format!("/v1/events/{id}/ack"), None))
            .await
            .expect("ack should respond");
        assert_eq!(body_json(acked).await["applied"], true);
    }

    #[tokio::test]
    async fn nack_reschedules_a_sent_event() {
        let app = outbox_app();
        app.clone()
            .oneshot(json_request(
                "POST",
                "/v1/pages/p1/content",
                json!({ "blocks": [] }),
                Some("alice"),
            ))
            .await
            .expect("create should respond");
        let pending = app
            .clone()
            .oneshot(empty_request("GET", "/v1/events/pending?limit=1", None))
            .await
            .expect("pending should respond");
        let id = body_json(pending).await["items"][0]["id"].as_i64().expect("event id");

        let nacked = app
            .clone()
            .oneshot(empty_request("POST", &format!("/v1/events/{id}/nack"), None))
            .await
            .expect("nack should respond");
        assert_eq!(body_json(nacked).await["applied"], true);

        let unknown_state = app
            .clone()
            .oneshot(empty_request("POST", &format!("/v1/events/{id}/ack"), None))
            .await
            .expect("ack should respond");
        assert_eq!(body_json(unknown_state).await["applied"], false);
    }

    #[tokio::test]
    async fn unacked_claim_is_redelivered_once_its_lease_lapses() {
        let now = Arc::new(Mutex::new(ts(0)));
        let shared = Arc::clone(&now);
        let app = outbox_app_with_clock(Arc::new(move || *shared.lock().expect("clock lock")));
        app.clone()
            .oneshot(json_request(
                "POST",
                "/v1/pages/p1/content",
                json!({ "blocks": [] }),
                Some("alice"),
            ))
            .await
            .expect("create should respond");

        let first = app
            .clone()
            .oneshot(empty_request("GET", "/v1/events/pending", None))
            .await
            .expect("pending should respond");
        let first = body_json(first).await;
        assert_eq!(first["items"].as_array().map(Vec::len), Some(1));
        let id = first["items"][0]["id"].as_i64().expect("event id");

        *now.lock().expect("clock lock") = ts(0) + Duration::days(7);
        let redelivered = app
            .clone()
            .oneshot(empty_request("GET", "/v1/events/pending", None))
            .await
            .expect("pending should respond");
        let redelivered = body_json(redelivered).await;
        let items = redelivered["items"].as_array().expect("items array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], id);
        assert_eq!(items[0]["retry_count"], 1);

        let acked = app
            .clone()
            .oneshot(empty_request("POST", &format!("/v1/events/{id}/ack"), None))
            .await
            .expect("ack should respond");
        assert_eq!(body_json(acked).await["applied"], true);
    }
}
