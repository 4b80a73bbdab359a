// HTTP transport used on cache misses.
// Defines the transport seam and the default reqwest-backed implementation.

use async_trait::async_trait;
use reqwest::{
    Client, Method,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use thiserror::Error;

use super::types::{Headers, HttpRequest, HttpResponse, RequestBody};

const DEFAULT_USER_AGENT: &str = concat!("http-disk-cache/", env!("CARGO_PKG_VERSION"));

/// Transport-level failure: DNS, connect, timeout, or a malformed request.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Anything able to perform an HTTP request on behalf of the cache.
///
/// Implementations own connection pooling, TLS, and timeouts. Any response
/// they obtain, whatever its status, counts as a success.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default transport built on a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self { client })
    }

    /// Wrap a preconfigured client (proxies, TLS roots, default timeouts).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(pairs)) => builder.form(pairs),
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes.clone()),
            None => builder,
        };
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(classify)?;

        Ok(HttpResponse::new(status, headers, body.to_vec()).with_url(final_url))
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err)
    } else {
        TransportError::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestOptions;

    #[test]
    fn test_user_agent_names_crate() {
        assert!(DEFAULT_USER_AGENT.starts_with("http-disk-cache/"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let transport = ReqwestTransport::new().unwrap();
        // Port 9 (discard) on loopback is closed on any sane test machine.
        let options = RequestOptions::new().timeout(std::time::Duration::from_secs(5));
        let request = HttpRequest::new("GET", "http://127.0.0.1:9/", &options).unwrap();

        let result = transport.send(&request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timeout_keeps_underlying_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept the connection and never answer.
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let transport = ReqwestTransport::new().unwrap();
        let options = RequestOptions::new().timeout(std::time::Duration::from_millis(200));
        let url = format!("http://{}/slow", addr);
        let request = HttpRequest::new("GET", &url, &options).unwrap();

        let err = transport.send(&request).await.unwrap_err();
        assert!(matches!(&err, TransportError::Timeout(source) if source.is_timeout()));
        assert!(std::error::Error::source(&err).is_some());
    }
}
