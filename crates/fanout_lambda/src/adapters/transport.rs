use std::time::Duration;

use futures::future::BoxFuture;

use crate::runtime::contract::Target;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReply {
    pub status_code: u16,
    pub body: String,
}

/// Transport-level failures. All of them are retryable for the leaf executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Http(String),
    Body(String),
    Timeout,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Http(message) => write!(f, "request failed: {message}"),
            TransportError::Body(message) => write!(f, "failed to read response body: {message}"),
            TransportError::Timeout => f.write_str("request timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

pub trait Transport: Send + Sync {
    fn fetch<'a>(&'a self, target: &'a Target) -> BoxFuture<'a, Result<FetchReply, TransportError>>;
}

/// Thin async HTTP client that issues one GET per target.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|error| TransportError::Http(format!("failed to build http client: {error}")))?;
        Ok(Self { client })
    }

    async fn get(&self, target: &Target) -> Result<FetchReply, TransportError> {
        let response = self
            .client
            .get(&target.url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| TransportError::Body(error.to_string()))?;
        Ok(FetchReply { status_code, body })
    }
}

impl Transport for ReqwestTransport {
    fn fetch<'a>(&'a self, target: &'a Target) -> BoxFuture<'a, Result<FetchReply, TransportError>> {
        Box::pin(self.get(target))
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(error.to_string())
    }
}
