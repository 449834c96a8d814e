//! Error-to-HTTP response conversion.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use reelforge_common::{CacheError, Error, StreamError};
use serde_json::json;

/// Error returned by route handlers, rendered as `{status, message}`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    /// Known size for `Content-Range: bytes */total` on a 416.
    range_total: Option<u64>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            range_total: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let range_total = match &e {
            Error::Stream(StreamError::RangeNotSatisfiable { total }) => *total,
            _ => None,
        };
        Self {
            status,
            message: e.to_string(),
            range_total,
        }
    }
}

impl From<CacheError> for AppError {
    fn from(e: CacheError) -> Self {
        Error::from(e).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Server error in handler");
        }

        let body = json!({
            "status": self.status.as_u16(),
            "message": self.message,
        });
        let mut response = (self.status, axum::Json(body)).into_response();

        if self.status == StatusCode::RANGE_NOT_SATISFIABLE {
            if let Some(total) = self.range_total {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
            }
        }
        response
    }
}
