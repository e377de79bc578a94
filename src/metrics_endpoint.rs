//! Metrics HTTP Endpoint
//!
//! Serves the proxy's Prometheus registry on a separate port:
//! - `/metrics` text exposition format
//! - `/health` liveness probe
//! - `/` index page

use crate::metrics::ProxyMetrics;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<ProxyMetrics>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    pub fn new(metrics: Arc<ProxyMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Bind and serve until the process exits
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = Arc::clone(&metrics);
                    async move { handle_request(req, metrics).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<ProxyMetrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(&metrics),
        "/health" => text_response(StatusCode::OK, "application/json", r#"{"status":"healthy"}"#),
        "/" => text_response(StatusCode::OK, "text/html; charset=utf-8", INDEX_PAGE),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found"),
    };
    Ok(response)
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Offline Proxy Metrics</title></head>
<body>
    <h1>Offline Proxy Metrics Endpoint</h1>
    <ul>
        <li><a href="/metrics">/metrics</a> - Prometheus format metrics</li>
        <li><a href="/health">/health</a> - Health check endpoint</li>
    </ul>
</body>
</html>"#;

/// Encode the registry in Prometheus text format
fn encode_metrics(metrics: &ProxyMetrics) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&metrics.registry().gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

fn metrics_response(metrics: &ProxyMetrics) -> Response<Full<Bytes>> {
    match encode_metrics(metrics) {
        Ok(body) => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            body,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "metrics unavailable")
        }
    }
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}
