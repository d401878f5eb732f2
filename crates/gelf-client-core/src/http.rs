//! One-shot HTTP delivery of GELF records.
//!
//! Each record travels as an independent `POST` with its own timeout; there
//! is no retry and no shared connection state beyond `reqwest`'s pool. The
//! module also owns the error taxonomy the introspection surface reports
//! for this path.

use crate::failure::FailureReason;
use crate::record::GelfRecord;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Header carrying the access-layer key id when credentials are
/// configured.
pub const HEADER_ACCESS_ID: &str = "x-access-id";
/// Header carrying the access-layer secret when credentials are
/// configured.
pub const HEADER_ACCESS_SECRET: &str = "x-access-secret";

/// Longest error-body excerpt retained in failure records.
const BODY_PREVIEW_LIMIT: usize = 256;

/// Errors raised while assembling a delivery engine from its
/// configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The configured collector endpoint is not a valid URL.
    #[error("invalid collector endpoint `{url}`: {detail}")]
    InvalidEndpoint { url: String, detail: String },
    /// An access credential contains bytes that cannot travel in a header.
    #[error("access credential is not a valid header value")]
    Credentials,
    /// The underlying HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Errors produced while delivering one record over HTTP.
#[derive(Debug, Error)]
pub enum HttpError {
    /// No endpoint is configured; detected before any I/O.
    #[error("no collector endpoint configured")]
    NoEndpoint,
    /// The collector answered with a non-success status.
    #[error("collector returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// The request was cancelled by its own timer.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Transport-level issue (DNS, TLS, socket, etc.).
    #[error("transport error: {0}")]
    Transport(String),
    /// The record could not be rendered to JSON.
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HttpError {
    /// Maps this error onto the introspection taxonomy.
    pub fn reason(&self) -> FailureReason {
        match self {
            HttpError::NoEndpoint => FailureReason::NoEndpoint,
            HttpError::Status { .. } => FailureReason::HttpError,
            HttpError::Timeout(_) => FailureReason::Timeout,
            HttpError::Transport(_) => FailureReason::NetworkError,
            HttpError::Serialize(_) => FailureReason::Other,
        }
    }
}

/// One-shot transport wrapping a preconfigured `reqwest::Client`.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: Option<Url>,
    timeout: Duration,
}

impl HttpTransport {
    /// Builds the transport: parses the endpoint once and bakes the static
    /// headers (JSON content negotiation plus optional access credentials)
    /// into the client.
    pub(crate) fn new(
        endpoint: Option<&str>,
        timeout: Duration,
        access: Option<(&str, &str)>,
    ) -> Result<Self, SetupError> {
        let endpoint = match endpoint {
            Some(raw) => Some(Url::parse(raw).map_err(|err| SetupError::InvalidEndpoint {
                url: raw.to_string(),
                detail: err.to_string(),
            })?),
            None => None,
        };

        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        if let Some((access_id, access_secret)) = access {
            headers.insert(
                HEADER_ACCESS_ID,
                HeaderValue::from_str(access_id).map_err(|_| SetupError::Credentials)?,
            );
            headers.insert(
                HEADER_ACCESS_SECRET,
                HeaderValue::from_str(access_secret).map_err(|_| SetupError::Credentials)?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| SetupError::Client(err.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Returns the parsed endpoint, when one is configured.
    pub(crate) fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    /// Returns the endpoint as a string for failure records.
    pub(crate) fn endpoint_string(&self) -> Option<String> {
        self.endpoint.as_ref().map(Url::to_string)
    }

    /// Delivers one record: serialize, `POST`, classify. Success is any
    /// 2xx answer; everything else maps onto the failure taxonomy.
    pub(crate) async fn send(&self, record: &GelfRecord) -> Result<(), HttpError> {
        let Some(endpoint) = self.endpoint.as_ref() else {
            return Err(HttpError::NoEndpoint);
        };
        let body = serde_json::to_string(record)?;
        let response = self
            .client
            .post(endpoint.clone())
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|err| self.classify_send_error(err))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "record delivered");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(HttpError::Status {
            status: status.as_u16(),
            body: preview(&body),
        })
    }

    fn classify_send_error(&self, err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            HttpError::Timeout(self.timeout)
        } else {
            HttpError::Transport(err.to_string())
        }
    }
}

/// Truncates an error body so failure records stay small.
fn preview(body: &str) -> String {
    if body.chars().count() <= BODY_PREVIEW_LIMIT {
        return body.to_string();
    }
    let truncated: String = body.chars().take(BODY_PREVIEW_LIMIT).collect();
    format!("{truncated}...")
}
