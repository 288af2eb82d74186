use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("bad page token: {0}")]
    BadToken(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("range too large: {0}")]
    RangeTooLarge(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire error body. `message` never carries backend detail for internal
/// failures; those log the detail and return a correlation id instead.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Error {
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "BadRequest",
            Error::BadToken(_) => "BadToken",
            Error::NotFound(_) => "NotFound",
            Error::RangeTooLarge(_) => "RangeTooLarge",
            Error::Unauthenticated => "Unauthenticated",
            Error::Unauthorized => "Unauthorized",
            Error::Conflict(_) => "Conflict",
            Error::Cancelled => "Cancelled",
            Error::Timeout => "Timeout",
            Error::Io(_) | Error::Internal(_) => "InternalError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::BadToken(_) | Error::RangeTooLarge(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Unauthorized => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Cancelled => StatusCode::BAD_REQUEST,
            Error::Timeout => StatusCode::REQUEST_TIMEOUT,
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Exit status for the command-line utilities: 1 for user errors,
    /// 2 for anything the user cannot fix by changing arguments.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::BadRequest(_)
            | Error::BadToken(_)
            | Error::NotFound(_)
            | Error::RangeTooLarge(_)
            | Error::Conflict(_) => 1,
            _ => 2,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = match &self {
            Error::Io(_) | Error::Internal(_) => {
                let correlation_id = new_correlation_id();
                tracing::error!(correlation_id = %correlation_id, error = %self, "internal error");
                ApiError {
                    error: self.error_type(),
                    message: "internal error".to_string(),
                    correlation_id: Some(correlation_id),
                }
            }
            _ => ApiError {
                error: self.error_type(),
                message: self.to_string(),
                correlation_id: None,
            },
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}

fn new_correlation_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let hasher = state.build_hasher();
    format!("{:016x}", hasher.finish())
}
