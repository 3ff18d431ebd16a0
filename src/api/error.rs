use crate::session::SessionError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid chunk index: {0}")]
    InvalidChunkIndex(String),

    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Session(e) => e.code(),
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::InvalidChunkIndex(_) => "INVALID_CHUNK_INDEX",
            ApiError::PayloadTooLarge(_) => "FILE_TOO_LARGE",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        status_for_code(self.code())
    }
}

/// HTTP status carried by each error code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "INVALID_DESTINATION" => StatusCode::FORBIDDEN,
        "INVALID_SIZE" | "INVALID_REQUEST" | "INVALID_CHUNK_INDEX" | "CHUNK_SIZE_MISMATCH" => {
            StatusCode::BAD_REQUEST
        }
        "UNKNOWN_SESSION" => StatusCode::NOT_FOUND,
        "INCOMPLETE_UPLOAD" => StatusCode::CONFLICT,
        "FILE_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
        "TOO_MANY_UPLOADS" => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code, error = %self, "Request failed");
        } else {
            tracing::debug!(code, error = %self, "Request rejected");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SessionError::InvalidDestination("x".into()), StatusCode::FORBIDDEN),
            (SessionError::InvalidSize("x".into()), StatusCode::BAD_REQUEST),
            (SessionError::UnknownSession("x".into()), StatusCode::NOT_FOUND),
            (
                SessionError::IncompleteUpload { missing: 1, total_chunks: 2 },
                StatusCode::CONFLICT,
            ),
            (
                SessionError::FileTooLarge { size: 2, max: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (SessionError::TooManyUploads(1), StatusCode::TOO_MANY_REQUESTS),
            (
                SessionError::DatabaseError("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(
            ApiError::PayloadTooLarge("x".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
