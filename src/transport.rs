//! Network transport to the origin server

use crate::error::{ProxyError, Result};
use crate::models::{InterceptedRequest, ProxyResponse};
use async_trait::async_trait;
use http::{header, HeaderMap, Method};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Sends requests to the network
///
/// Any HTTP status is a successful send; only an unreachable origin (or a
/// timeout) is an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &InterceptedRequest) -> Result<ProxyResponse>;
}

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// [`Transport`] over a pooled reqwest client
pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    /// Create a transport with the given connect and overall request timeouts
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ProxyError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpTransport { http_client })
    }

    fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            forwarded.append(name.clone(), value.clone());
        }
        forwarded
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &InterceptedRequest) -> Result<ProxyResponse> {
        debug!("Sending {} {}", request.method, request.url);

        let mut builder = self
            .http_client
            .request(request.method.clone(), &request.url)
            .headers(Self::forwardable_headers(&request.headers));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            ProxyError::TransportFailure(format!("{} {}: {}", request.method, request.url, e))
        })?;

        let status = response.status();
        let mut headers = Self::forwardable_headers(response.headers());
        // A HEAD answer has no body to measure, so the origin's length stands
        if request.method == Method::HEAD {
            if let Some(length) = response.headers().get(header::CONTENT_LENGTH) {
                headers.insert(header::CONTENT_LENGTH, length.clone());
            }
        }

        let body = response.bytes().await.map_err(|e| {
            ProxyError::TransportFailure(format!(
                "Failed to read body of {} {}: {}",
                request.method, request.url, e
            ))
        })?;

        debug!("{} {} -> {} ({} bytes)", request.method, request.url, status, body.len());

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}
