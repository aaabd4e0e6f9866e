/// HTTP error responses for the REST API
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::api::dto::ErrorResponse;
use crate::service::ServiceError;

/// An error rendered as a JSON `ErrorResponse` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status = match &e {
            ServiceError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            ServiceError::InvalidPathEscape(_)
            | ServiceError::NotADirectory(_)
            | ServiceError::IsADirectory(_)
            | ServiceError::TerminalClosed
            | ServiceError::TerminalWrite(_) => StatusCode::BAD_REQUEST,
            ServiceError::NoPortsAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %e, "Request failed");
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: true,
            message: self.message,
            code: Some(self.status.as_u16()),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_status_mapping() {
        let cases = [
            (ServiceError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::InvalidPathEscape("..".into()), StatusCode::BAD_REQUEST),
            (ServiceError::TerminalClosed, StatusCode::BAD_REQUEST),
            (
                ServiceError::NoPortsAvailable { start: 1, end: 2 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ServiceError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)),
                StatusCode::NOT_FOUND,
            ),
            (ServiceError::Task("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }
}
