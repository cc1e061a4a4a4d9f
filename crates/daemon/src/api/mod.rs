// HTTP surface for page content, edit locks, comments and the event outbox.

pub mod comments;
pub mod content;
pub mod error;
pub mod events;
pub mod extract;
pub mod locks;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::service::{Clock, CommentService, ContentService, LockService, PageService};
use crate::store::meta_db::MetaDb;

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ApiState {
    pub content: Arc<dyn ContentService>,
    pub locks: Arc<dyn LockService>,
    pub comments: Arc<dyn CommentService>,
    pub db: Arc<Mutex<MetaDb>>,
    pub clock: Clock,
}

impl ApiState {
    pub fn from_service(service: PageService) -> Self {
        let db = service.db();
        let clock = service.clock();
        let service = Arc::new(service);
        Self {
            content: service.clone(),
            locks: service.clone(),
            comments: service,
            db,
            clock,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(content::routes())
        .merge(locks::routes())
        .merge(comments::routes())
        .merge(events::routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_context_middleware))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}


#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::test_support::{empty_request, test_app};
    use super::REQUEST_ID_HEADER;

    #[tokio::test]
    async fn healthz_returns_ok_and_request_id() {
        let response = test_app()
            .oneshot(empty_request("GET", "/healthz", None))
            .await
            .expect("healthz should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn caller_request_id_is_echoed() {
        let mut request = empty_request("GET", "/healthz", None);
        request.headers_mut().insert(REQUEST_ID_HEADER, "req-42".parse().expect("header value"));

        let response = test_app().oneshot(request).await.expect("healthz should respond");
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()),
            Some("req-42")
        );
    }

    #[tokio::test]
    async fn unknown_page_content_is_not_found_envelope() {
        let response = test_app()
            .oneshot(empty_request("GET", "/v1/pages/missing/content", None))
            .await
            .expect("get should respond");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = super::test_support::body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["retryable"], false);
    }
}
