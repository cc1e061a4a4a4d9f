use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::error;
use wikidoc_common::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    NotFound,
    AlreadyExists,
    VersionConflict,
    Forbidden,
    AlreadyResolved,
    IllegalState,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::Forbidden => "FORBIDDEN",
            Self::AlreadyResolved => "ALREADY_RESOLVED",
            Self::IllegalState => "ILLEGAL_STATE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists => StatusCode::CONFLICT,
            Self::VersionConflict => StatusCode::CONFLICT,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::AlreadyResolved => StatusCode::CONFLICT,
            Self::IllegalState => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the same request may succeed later (after a refetch for conflicts).
    pub const fn retryable(self) -> bool {
        matches!(self, Self::VersionConflict | Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ValidationFailed => "request validation failed",
            Self::NotFound => "requested resource not found",
            Self::AlreadyExists => "resource already exists",
            Self::VersionConflict => "content changed since the expected version",
            Self::Forbidden => "only the author may change this comment",
            Self::AlreadyResolved => "comment is already resolved",
            Self::IllegalState => "request violates a structural invariant",
            Self::InternalError => "internal server error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Value,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: json!({}) }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::NotFound { resource, id } => {
                Self::new(ErrorCode::NotFound, format!("{resource} `{id}` not found"))
                    .with_details(json!({ "resource": resource.to_string(), "id": id }))
            }
            CoreError::AlreadyExists { page_id } => Self::new(
                ErrorCode::AlreadyExists,
                format!("content for page `{page_id}` already exists"),
            ),
            CoreError::VersionConflict { page_id, expected, current } => Self::new(
                ErrorCode::VersionConflict,
                format!("page `{page_id}` is at version {current}, not {expected}"),
            )
            .with_details(json!({
                "page_id": page_id,
                "expected_version": expected,
                "current_version": current,
            })),
            CoreError::Forbidden { .. } => Self::from_code(ErrorCode::Forbidden),
            CoreError::AlreadyResolved { comment_id } => {
                Self::from_code(ErrorCode::AlreadyResolved)
                    .with_details(json!({ "comment_id": comment_id }))
            }
            CoreError::IllegalState(message) => Self::new(ErrorCode::IllegalState, message),
            CoreError::Storage(error) => {
                error!(error = ?error, "storage failure while handling request");
                Self::from_code(ErrorCode::InternalError)
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        CoreError::Storage(error).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "details": self.details,
                }
            })),
        )
            .into_response()
    }
}
