//! HTTP error wrapper.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use prismcast_core::Error;

/// Newtype so crate errors can flow out of handlers with `?`.
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, status = %status, "request rejected");
        }
        (status, self.0.to_string()).into_response()
    }
}
