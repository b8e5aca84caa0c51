//! HTTP adapter for the ledger service.
//!
//! # Endpoints
//!
//! - `POST {base}/api/v1/accounts/{account}/debit`
//! - `POST {base}/api/v1/accounts/{account}/credit`
//! - `GET {base}/api/v1/accounts/{account}`
//!
//! Error bodies use the `{"error": {"code", "message"}}` shape; the `code`
//! of a 409/422 response is the rejection reason.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{LedgerApi, LedgerError};
use crate::models::ledger::{
    LedgerAccount, LedgerReceipt, PostingKind, PostingRequest, RejectionReason,
};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
}

/// Ledger client speaking JSON over HTTP.
#[derive(Clone)]
pub struct HttpLedgerApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpLedgerApi {
    /// `client` should carry no timeout of its own; the [`super::LedgerClient`]
    /// applies one per call.
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    fn account_url(&self, account_number: &str, suffix: &str) -> Result<Url, LedgerError> {
        let mut url = self
            .base_url
            .join("api/v1/accounts/")
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| LedgerError::Transport("ledger base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(account_number)
            .extend(suffix.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn post(
        &self,
        kind: PostingKind,
        request: &PostingRequest,
    ) -> Result<LedgerReceipt, LedgerError> {
        let url = self.account_url(&request.account_number, kind.as_str())?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<LedgerReceipt>()
                .await
                .map_err(|e| LedgerError::Decode(e.to_string()));
        }

        Err(classify_failure(status, response).await)
    }
}

/// Map a non-2xx posting response to a ledger error.
async fn classify_failure(status: StatusCode, response: reqwest::Response) -> LedgerError {
    if status.is_server_error() {
        return LedgerError::Server {
            status: status.as_u16(),
        };
    }
    if status == StatusCode::NOT_FOUND {
        return LedgerError::Rejected(RejectionReason::AccountNotFound);
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        return LedgerError::Server {
            status: status.as_u16(),
        };
    }

    match response.json::<ErrorBody>().await {
        Ok(body) => LedgerError::Rejected(RejectionReason::from_code(&body.error.code)),
        Err(_) => LedgerError::Rejected(RejectionReason::Other(format!("HTTP_{}", status.as_u16()))),
    }
}

#[async_trait]
impl LedgerApi for HttpLedgerApi {
    async fn debit(&self, request: &PostingRequest) -> Result<LedgerReceipt, LedgerError> {
        self.post(PostingKind::Debit, request).await
    }

    async fn credit(&self, request: &PostingRequest) -> Result<LedgerReceipt, LedgerError> {
        self.post(PostingKind::Credit, request).await
    }

    async fn get_account(&self, account_number: &str) -> Result<Option<LedgerAccount>, LedgerError> {
        let url = self.account_url(account_number, "")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LedgerError::Server {
                status: status.as_u16(),
            });
        }

        response
            .json::<LedgerAccount>()
            .await
            .map(Some)
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_urls() {
        let api = HttpLedgerApi::new(reqwest::Client::new(), "http://ledger:8080/internal").unwrap();

        assert_eq!(
            api.account_url("ACC 1", "debit").unwrap().as_str(),
            "http://ledger:8080/internal/api/v1/accounts/ACC%201/debit"
        );
        assert_eq!(
            api.account_url("ACC-1", "").unwrap().as_str(),
            "http://ledger:8080/internal/api/v1/accounts/ACC-1"
        );
    }
}
