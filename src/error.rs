//! Error types and HTTP error response handling.
//!
//! This module defines the errors the HTTP API can return and how they are
//! converted into responses with appropriate status codes and JSON bodies.
//! Saga failures never surface here; they are recorded on the transfer.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::store::StoreError;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Store Errors**: Any failure of the transfer store
/// - **Resource Errors**: Requested transfer not found
/// - **Validation Errors**: Invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Transfer store operation failed (connection error, query error).
    ///
    /// Returns HTTP 500 and hides the details from the client.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No transfer with the requested reference.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Transfer not found")]
    TransferNotFound,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `TransferNotFound` → 404 Not Found
/// - `InvalidRequest` → 400 Bad Request
/// - `Store` → 500 Internal Server Error
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::TransferNotFound => {
                (StatusCode::NOT_FOUND, "transfer_not_found", self.to_string())
            }
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::Store(ref e) => {
                error!(error = %e, "Request failed on transfer store");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
