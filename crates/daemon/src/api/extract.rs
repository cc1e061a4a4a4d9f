// Request extractors that reject with the JSON error envelope.
//
// - `ValidatedJson<T>`: JSON body with VALIDATION_FAILED on any rejection.
// - `Actor`: caller identity from the `x-actor-id` header.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::error::ApiError;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// A JSON body extractor that returns a structured `ApiError` on failure.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, kind) = classify_json_rejection(&rejection);
                Err(ApiError::bad_request(message).with_details(json!({ "kind": kind })))
            }
        }
    }
}

fn classify_json_rejection(rejection: &JsonRejection) -> (String, &'static str) {
    match rejection {
        JsonRejection::JsonDataError(e) => (format!("invalid JSON payload: {e}"), "data_error"),
        JsonRejection::JsonSyntaxError(e) => (format!("malformed JSON: {e}"), "syntax_error"),
        JsonRejection::MissingJsonContentType(_) => {
            ("expected Content-Type: application/json".to_string(), "missing_content_type")
        }
        other => (format!("request body error: {other}"), "body_error"),
    }
}

/// Identity of the caller. Authentication happens upstream; this layer
/// only requires that some non-blank identity was forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Actor(value.to_string()))
            .ok_or_else(|| ApiError::bad_request(format!("missing `{ACTOR_HEADER}` header")))
    }
}
