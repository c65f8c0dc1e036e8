//! The error body every endpoint speaks, plus helpers for the common
//! status codes.
//!
//! Upstream error text never reaches a client: handlers log the detail and
//! answer with a generic message.

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "bad_request".to_string(),
            message: Some(message.into()),
        }),
    )
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not_found".to_string(),
            message: Some(message.into()),
        }),
    )
}

/// Primary data has not been polled yet; the client should retry shortly.
pub fn service_unavailable() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "data_not_ready".to_string(),
            message: Some("Upstream data has not been fetched yet".to_string()),
        }),
    )
}

pub fn internal_error() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal_error".to_string(),
            message: None,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_omitted_when_absent() {
        let (status, body) = internal_error();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json = serde_json::to_string(&body.0).unwrap();
        assert_eq!(json, r#"{"error":"internal_error"}"#);
    }

    #[test]
    fn test_bad_request_carries_message() {
        let (status, body) = bad_request("lat and lng are required");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0.message.as_deref(), Some("lat and lng are required"));
    }
}
