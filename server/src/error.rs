//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orderflow_core::Error;
use serde::Serialize;

/// Application error for HTTP handlers: a status code plus a stable error
/// code and a user-facing message.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    const fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        Self { status, code, message }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(message) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", message)
            },
            Error::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            },
            Error::DuplicateKey => {
                Self::new(StatusCode::CONFLICT, "DUPLICATE_KEY", err.to_string())
            },
            // Insufficient stock is an internal failure of the order, not a
            // client mistake: the request was well-formed.
            Error::InsufficientStock { .. }
            | Error::Backend(_)
            | Error::Timeout(_)
            | Error::Fatal(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string())
            },
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "request failed"
            );
        }
        let body = ErrorResponse { code: self.code, message: self.message };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::domain::ProductId;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (Error::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound { what: "order", id: 9 }, StatusCode::NOT_FOUND),
            (Error::DuplicateKey, StatusCode::CONFLICT),
            (
                Error::InsufficientStock { product_id: ProductId::new(1) },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (Error::Backend("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }
}
