use std::pin::Pin;

use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{StreamError, TransportError};

/// Response body as a stream of raw chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Body stream that yields nothing.
pub fn empty_body() -> ByteStream {
    Box::pin(futures::stream::empty::<Result<bytes::Bytes, TransportError>>())
}

/// One streaming chat request.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    /// Absolute URL, or a path resolved against `ClientConfig::base_url`.
    pub url: String,
    /// JSON request body.
    pub body: serde_json::Value,
}

impl StreamRequest {
    pub fn new(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            body,
        }
    }
}

/// What the transport got back before the body is read.
pub struct TransportResponse {
    pub status: u16,
    /// Body chunks; only read for success statuses.
    pub body: ByteStream,
    /// Body text of a non-success response, when it could be read.
    pub error_body: Option<String>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Source of SSE bytes. Implemented over HTTP by [`HttpTransport`]; tests use in-memory fakes.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    /// Issues the request and returns the status plus a body stream.
    async fn open(&self, request: &StreamRequest) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport that POSTs the JSON body and streams the response.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<TransportResponse, TransportError> {
        let url = self
            .config
            .resolve_url(&request.url)
            .map_err(|e| TransportError::Request(e.to_string()))?;
        debug!(%url, "opening event stream");

        let mut http_req = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.body);
        if let Some(timeout) = self.config.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.ok();
            return Ok(TransportResponse {
                status: status.as_u16(),
                body: empty_body(),
                error_body,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string())));
        Ok(TransportResponse {
            status: status.as_u16(),
            body: Box::pin(body),
            error_body: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        let response = |status| TransportResponse {
            status,
            body: empty_body(),
            error_body: None,
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(301).is_success());
        assert!(!response(401).is_success());
    }

    #[tokio::test]
    async fn relative_url_without_base_fails_before_sending() {
        let transport = HttpTransport::new(ClientConfig::new()).expect("transport");
        let err = transport
            .open(&StreamRequest::new("/chat", serde_json::json!({})))
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, TransportError::Request(msg) if msg.contains("base_url")));
    }

    #[tokio::test]
    async fn unreachable_host_is_request_error() {
        let transport = HttpTransport::new(
            ClientConfig::new().connect_timeout(std::time::Duration::from_millis(200)),
        )
        .expect("transport");
        let err = transport
            .open(&StreamRequest::new(
                "http://127.0.0.1:9/chat",
                serde_json::json!({"q": "hi"}),
            ))
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, TransportError::Request(_)));
    }
}
