//! Transport seam between the dispatcher and the network.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// HTTP methods used by the bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    /// `GET` with a query string.
    Get,
    /// `POST` with a body.
    Post,
}

impl HttpMethod {
    /// Method token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL, query included.
    pub url: Url,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Body for `POST`.
    pub body: Option<String>,
}

impl HttpRequest {
    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { find_header(&self.headers, name) }
}

/// A received response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Body decoded as text.
    pub body: String,
}

impl HttpReply {
    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> { find_header(&self.headers, name) }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Failure to obtain any response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request to {url} failed: {message}")]
pub struct TransportError {
    /// Target URL.
    pub url: String,
    /// Whether the request timed out.
    pub is_timeout: bool,
    /// Whether the connection could not be established.
    pub is_connect: bool,
    /// Underlying error text.
    pub message: String,
}

impl TransportError {
    /// Build an error that is neither a timeout nor a connect failure.
    pub fn other(url: &Url, message: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            is_timeout: false,
            is_connect: false,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            url: err.url().map(ToString::to_string).unwrap_or_default(),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
            message: err.to_string(),
        }
    }
}

/// Sends requests to the service under test.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request, failing after `timeout`. Implementations never retry.
    async fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError>;
}

/// [`Transport`] over `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("wfs-verify/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self { Self { client } }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpReply, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url),
            HttpMethod::Post => self.client.post(request.url),
        }
        .timeout(timeout);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    value.to_str().unwrap_or_default().to_owned(),
                )
            })
            .collect();
        let body = response.text().await?;
        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }
}
