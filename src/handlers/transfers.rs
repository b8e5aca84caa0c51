//! Transfer HTTP handlers.
//!
//! This module implements the transfer API endpoints:
//! - POST /api/v1/transfers - Submit a transfer
//! - GET /api/v1/transfers/{reference} - Get transfer status
//! - GET /api/v1/accounts/{account_number}/transfers - List an account's transfers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;

use crate::{
    app::AppState,
    error::AppError,
    models::transfer::{SubmitTransferRequest, TransferResponse},
};

/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Submit a transfer.
///
/// # Request Body
///
/// ```json
/// {
///   "from_account_number": "ACC-1001",
///   "to_account_number": "ACC-2002",
///   "amount": "100.00",
///   "currency": "USD",
///   "idempotency_key": "invoice-789"
/// }
/// ```
///
/// The key may instead be sent as an `Idempotency-Key` header. When both are
/// present they must agree.
///
/// # Response
///
/// - 202 Accepted: new transfer, saga started in the background
/// - 200 OK: replay of an earlier submission with the same key; the body is
///   the original transfer in its current state
pub async fn submit_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<SubmitTransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let header_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| value.to_str().map(str::to_string))
        .transpose()
        .map_err(|_| AppError::InvalidRequest("Idempotency-Key header is not valid text".to_string()))?;

    match (&request.idempotency_key, header_key) {
        (Some(body_key), Some(header_key)) if *body_key != header_key => {
            return Err(AppError::InvalidRequest(
                "Idempotency-Key header and idempotency_key field differ".to_string(),
            ));
        }
        (None, Some(header_key)) => request.idempotency_key = Some(header_key),
        _ => {}
    }

    let submission = state.transfers.submit_and_start(request).await?;

    let status = if submission.replayed {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };

    Ok((status, Json(submission.transfer.into())))
}

/// Get a transfer by reference.
///
/// # Endpoint
///
/// `GET /api/v1/transfers/{reference}`
///
/// # Errors
///
/// - 404: No transfer with this reference
pub async fn get_transfer(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<TransferResponse>, AppError> {
    let transfer = state.transfers.get_transfer(&reference).await?;
    Ok(Json(transfer.into()))
}

/// Query parameters for listing an account's transfers.
#[derive(Debug, Deserialize)]
pub struct ListTransfersQuery {
    /// Page size, default 50, capped at 200
    pub limit: Option<i64>,
}

/// List transfers where the account is source or destination, newest first.
///
/// # Endpoint
///
/// `GET /api/v1/accounts/{account_number}/transfers?limit=20`
pub async fn list_account_transfers(
    State(state): State<AppState>,
    Path(account_number): Path<String>,
    Query(query): Query<ListTransfersQuery>,
) -> Result<Json<Vec<TransferResponse>>, AppError> {
    let transfers = state
        .transfers
        .list_account_transfers(&account_number, query.limit)
        .await?;

    Ok(Json(transfers.into_iter().map(Into::into).collect()))
}
