//! Integration tests for the metrics endpoint
//!
//! These tests verify that the metrics HTTP endpoint exposes the proxy's
//! collectors in Prometheus format.

use offline_proxy::{MetricsEndpoint, ProxyMetrics};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

async fn free_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn fetch(metrics: Arc<ProxyMetrics>, path: &str) -> (u16, String) {
    let addr = free_addr().await;
    let endpoint = MetricsEndpoint::new(metrics, addr);
    let handle = tokio::spawn(async move { endpoint.start().await });

    tokio::time::sleep(Duration::from_millis(200)).await;

    let url = format!("http://{}{}", addr, path);
    let response = timeout(Duration::from_secs(2), reqwest::get(&url))
        .await
        .expect("metrics endpoint timed out")
        .expect("metrics endpoint unreachable");
    let status = response.status().as_u16();
    let body = response.text().await.unwrap();

    handle.abort();
    (status, body)
}

#[tokio::test]
async fn test_metrics_endpoint_serves_metrics() {
    let metrics = Arc::new(ProxyMetrics::new().unwrap());
    metrics.record_request("write");
    metrics.record_request("static");
    metrics.record_request("static");
    metrics.record_cache_hit();
    metrics.record_cache_miss();
    metrics.record_fallback();
    metrics.record_range_response(1000);
    metrics.record_replay_outcome("replayed");

    let (status, body) = fetch(metrics, "/metrics").await;

    assert_eq!(status, 200);
    assert!(body.contains("# HELP"));
    assert!(body.contains("# TYPE"));
    assert!(body.contains(r#"offline_proxy_requests_total{route="static"} 2"#));
    assert!(body.contains(r#"offline_proxy_requests_total{route="write"} 1"#));
    assert!(body.contains(r#"offline_proxy_cache_events_total{event="miss"} 1"#));
    assert!(body.contains("offline_proxy_fallbacks_total 1"));
    assert!(body.contains(r#"offline_proxy_range_responses_total{status="206"} 1"#));
    assert!(body.contains("offline_proxy_chunk_bytes_served_total 1000"));
    assert!(body.contains(r#"offline_proxy_replay_outcomes_total{outcome="replayed"} 1"#));
}

#[tokio::test]
async fn test_metrics_endpoint_health_check() {
    let metrics = Arc::new(ProxyMetrics::new().unwrap());
    let (status, body) = fetch(metrics, "/health").await;

    assert_eq!(status, 200);
    assert!(body.contains("healthy"));
}

#[tokio::test]
async fn test_metrics_endpoint_unknown_path() {
    let metrics = Arc::new(ProxyMetrics::new().unwrap());
    let (status, _) = fetch(metrics, "/nope").await;

    assert_eq!(status, 404);
}
