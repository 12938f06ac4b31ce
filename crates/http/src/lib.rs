//! # gridcalc-http
//!
//! HTTP client for running published sheets.
//!
//! A published sheet lives at a base URL. Running it POSTs the caller's
//! credentials plus any cell overrides to `{url}v0.1/json/` and reads the
//! recalculated sheet back from the API JSON response.
//!
//! [`HttpSheetClient`] implements [`RemoteSheets`], so a [`Calculator`] can
//! use it to serve `RUN_WORKSHEET` from its worker threads. Those threads
//! are plain OS threads, so the async request is driven through a tokio
//! runtime [`Handle`].
//!
//! [`Calculator`]: gridcalc_core::Calculator

use gridcalc_core::{CalcError, CalcResult, RemoteSheets, API_VERSION};
use gridcalc_primitives::{CellLocation, Value};
use gridcalc_sheet::{api_json_to_worksheet, SheetError, Worksheet};
use reqwest::Client;
use std::time::Duration;
use tokio::runtime::Handle;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to build HTTP client: {0}")]
    Build(String),
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("HTTP {status} - {reason}")]
    Status { status: u16, reason: String },
    #[error("invalid response: {0}")]
    Parse(#[from] SheetError),
}

impl From<HttpError> for CalcError {
    fn from(err: HttpError) -> Self {
        CalcError::remote(err.to_string())
    }
}

/// Client for published sheets.
#[derive(Debug, Clone)]
pub struct HttpSheetClient {
    client: Client,
    timeout: Duration,
    runtime: Handle,
}

impl HttpSheetClient {
    /// Construct a client bound to the current tokio runtime, with the
    /// default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Build`] when called outside a tokio runtime or if
    /// the underlying client cannot be built.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Like [`HttpSheetClient::new`] with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let runtime = Handle::try_current().map_err(|e| HttpError::Build(e.to_string()))?;
        Self::with_runtime(runtime, timeout)
    }

    /// Construct a client that drives its requests on `runtime`.
    pub fn with_runtime(runtime: Handle, timeout: Duration) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(timeout)
            // Disable system proxy lookup to avoid macOS system-configuration issues
            .no_proxy()
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            runtime,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the sheet published at `url` with `overrides` applied and return
    /// it as recalculated by its host.
    ///
    /// `deadline` caps the request timeout when it is shorter than the
    /// client's own.
    pub async fn fetch_worksheet(
        &self,
        url: &str,
        overrides: &[(CellLocation, Value)],
        api_key: Option<&str>,
        deadline: Option<Duration>,
    ) -> Result<Worksheet, HttpError> {
        let endpoint = api_url(url);
        let timeout = deadline.map_or(self.timeout, |left| left.min(self.timeout));
        tracing::debug!(
            "running {} with {} overrides (timeout {:?})",
            endpoint,
            overrides.len(),
            timeout
        );

        let response = self
            .client
            .post(&endpoint)
            .form(&form_fields(overrides, api_key))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| HttpError::Transport {
                url: endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.text().await.map_err(|e| HttpError::Transport {
            url: endpoint,
            message: e.to_string(),
        })?;
        Ok(api_json_to_worksheet(&body)?)
    }
}

impl RemoteSheets for HttpSheetClient {
    fn run_worksheet(
        &self,
        url: &str,
        overrides: &[(CellLocation, Value)],
        api_key: Option<&str>,
        timeout: Option<Duration>,
    ) -> CalcResult<Worksheet> {
        self.runtime
            .block_on(self.fetch_worksheet(url, overrides, api_key, timeout))
            .map_err(|e| {
                tracing::warn!("run_worksheet {} failed: {}", url, e);
                CalcError::from(e)
            })
    }
}

/// `{url}v0.1/json/`, with `url` normalized to end in `/`.
pub fn api_url(url: &str) -> String {
    let mut endpoint = url.to_string();
    if !endpoint.ends_with('/') {
        endpoint.push('/');
    }
    endpoint.push_str(&format!("v{API_VERSION}/json/"));
    endpoint
}

/// Form body: `api_key` first, then one `label=value` pair per override.
pub fn form_fields(overrides: &[(CellLocation, Value)], api_key: Option<&str>) -> Vec<(String, String)> {
    let mut fields = Vec::with_capacity(overrides.len() + 1);
    if let Some(key) = api_key {
        fields.push(("api_key".to_string(), key.to_string()));
    }
    fields.extend(
        overrides
            .iter()
            .map(|(location, value)| (location.label(), value.formatted())),
    );
    fields
}
