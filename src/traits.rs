use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("Unexpected HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("Rate limited by {url} (HTTP {status})")]
    RateLimited { url: String, status: u16 },
    #[error("Request to {url} cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    /// Classifies a non-2xx status. 429 and 403 are treated as rate-limit signals.
    pub fn from_status(url: impl Into<String>, status: u16) -> Self {
        let url = url.into();
        match status {
            403 | 429 => FetchError::RateLimited { url, status },
            _ => FetchError::Status { url, status },
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Missing expected field: {0}")]
    MissingField(String),
    #[error("Failed to parse content: {0}")]
    Malformed(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single outbound request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub cancel: Option<CancellationToken>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout,
            cancel: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Performs the request. Non-2xx responses surface as `FetchError`.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Swaps the outbound network identity (e.g. a new anonymizing circuit).
#[async_trait]
pub trait IdentityRotator: Send + Sync {
    async fn rotate(&self) -> Result<(), FetchError>;
}
