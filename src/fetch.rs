//! Network collaborators: the reqwest-backed [`HttpFetcher`] and the Tor
//! control-port [`TorIdentityRotator`].

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::traits::{FetchError, FetchRequest, FetchResponse, IdentityRotator, PageFetcher};

pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: user_agent.into(),
        }
    }

    /// Set a custom HTTP client (e.g. one routed through a SOCKS proxy).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.as_str();
        let mut builder = self
            .client
            .get(url)
            .timeout(request.timeout)
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| classify(url, request, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(url, status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify(url, request, e))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn classify(url: &str, request: &FetchRequest, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            timeout_secs: request.timeout.as_secs(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        debug!(url = %request.url, "HTTP fetch starting");

        match request.cancel.clone() {
            Some(token) => tokio::select! {
                result = self.send(&request) => result,
                _ = token.cancelled() => Err(FetchError::Cancelled { url: request.url.clone() }),
            },
            None => self.send(&request).await,
        }
    }
}

/// Requests a fresh Tor circuit through the control port (`SIGNAL NEWNYM`).
///
/// The whole exchange is bounded by one timeout, so a control port that
/// accepts but never answers surfaces as `FetchError::Timeout`.
pub struct TorIdentityRotator {
    control_addr: String,
    password: Option<String>,
    timeout: Duration,
}

impl TorIdentityRotator {
    pub fn new(control_addr: impl Into<String>, password: Option<String>) -> Self {
        Self {
            control_addr: control_addr.into(),
            password,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn network_error(&self, message: impl Into<String>) -> FetchError {
        FetchError::Network {
            url: self.control_addr.clone(),
            message: message.into(),
        }
    }

    async fn command(
        &self,
        reader: &mut BufReader<TcpStream>,
        line: &str,
    ) -> Result<(), FetchError> {
        reader
            .get_mut()
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|e| self.network_error(e.to_string()))?;

        let mut reply = String::new();
        reader
            .read_line(&mut reply)
            .await
            .map_err(|e| self.network_error(e.to_string()))?;

        if reply.starts_with("250") {
            Ok(())
        } else {
            Err(self.network_error(format!("control port replied {:?}", reply.trim_end())))
        }
    }

    async fn exchange(&self) -> Result<(), FetchError> {
        let stream = TcpStream::connect(&self.control_addr)
            .await
            .map_err(|e| self.network_error(e.to_string()))?;
        let mut reader = BufReader::new(stream);

        let auth = match &self.password {
            Some(password) => format!("AUTHENTICATE \"{}\"", password.replace('"', "\\\"")),
            None => "AUTHENTICATE".to_string(),
        };
        self.command(&mut reader, &auth).await?;
        self.command(&mut reader, "SIGNAL NEWNYM").await?;

        // QUIT is a courtesy; the circuit change already took effect.
        if let Err(e) = self.command(&mut reader, "QUIT").await {
            warn!(error = %e, "Tor control QUIT failed");
        }

        info!(control = %self.control_addr, "Changed Tor identity");
        Ok(())
    }
}

#[async_trait]
impl IdentityRotator for TorIdentityRotator {
    async fn rotate(&self) -> Result<(), FetchError> {
        match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: self.control_addr.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}
