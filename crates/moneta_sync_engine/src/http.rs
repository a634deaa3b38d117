//! HTTP implementation of the remote store.
//!
//! Speaks a PostgREST-style JSON API: bulk upserts keyed by `id` with
//! merge-duplicates conflict handling, and filtered reads scoped to the
//! owning principal.

use crate::config::SyncConfig;
use crate::remote::{RemoteError, RemoteResult, RemoteRow, RemoteStore};
use async_trait::async_trait;
use moneta_core::PrincipalId;
use parking_lot::RwLock;
use reqwest::{RequestBuilder, StatusCode};

/// Remote store client over HTTP.
///
/// The underlying client carries the request timeout from [`SyncConfig`];
/// without it a hung request would stall the whole sync cycle.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    bearer: RwLock<Option<String>>,
}

impl HttpRemote {
    /// Creates a client from the sync configuration.
    pub fn new(config: &SyncConfig) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| RemoteError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            bearer: RwLock::new(None),
        })
    }

    /// Installs the access token attached to subsequent requests.
    pub fn set_bearer_token(&self, token: impl Into<String>) {
        *self.bearer.write() = Some(token.into());
    }

    /// Removes the access token, e.g. on sign-out.
    pub fn clear_bearer_token(&self) {
        *self.bearer.write() = None;
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn apply_auth(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }
        if let Some(token) = self.bearer.read().clone() {
            request = request.bearer_auth(token);
        }
        request
    }
}

fn request_err(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

fn api_error(status: StatusCode, body: &str) -> RemoteError {
    let trimmed = body.trim();
    let message = if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    };
    RemoteError::Api {
        status: status.as_u16(),
        message,
    }
}

async fn check_status(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status, &body))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn upsert_batch(&self, table: &str, rows: &[RemoteRow]) -> RemoteResult<()> {
        let request = self
            .apply_auth(self.client.post(self.table_url(table)))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows);

        let response = request.send().await.map_err(request_err)?;
        check_status(response).await?;
        Ok(())
    }

    async fn query_updated_since(
        &self,
        table: &str,
        principal: &PrincipalId,
        since: Option<&str>,
    ) -> RemoteResult<Vec<RemoteRow>> {
        let mut params = vec![
            ("select".to_string(), "*".to_string()),
            (
                "principal_id".to_string(),
                format!("eq.{}", principal.as_str()),
            ),
            ("order".to_string(), "updated_at.asc".to_string()),
        ];
        if let Some(since) = since {
            params.push(("updated_at".to_string(), format!("gt.{since}")));
        }

        let request = self
            .apply_auth(self.client.get(self.table_url(table)))
            .query(&params);

        let response = request.send().await.map_err(request_err)?;
        let response = check_status(response).await?;
        response.json().await.map_err(request_err)
    }
}
