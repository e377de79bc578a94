//! Integration tests for cache-first static resources
//!
//! These tests verify:
//! - Stored responses are served again without touching the network
//! - The bypass header always goes to the network
//! - An unreachable origin yields the fallback response
//! - Every matching rule fires, including secondary fetches
//! - The precache manifest is all-or-nothing

use http::{Method, StatusCode};
use offline_proxy::reconnect::ReconnectTrigger;
use offline_proxy::static_cache::FALLBACK_HEADER;
use offline_proxy::store::MemoryStore;
use offline_proxy::transport::{HttpTransport, Transport};
use offline_proxy::{CacheRule, InterceptedRequest, ProxyConfig, ProxyMetrics, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct NoopTrigger;

impl ReconnectTrigger for NoopTrigger {
    fn register(&self, _tag: &str) {}
}

fn router(config: ProxyConfig) -> Router {
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::new(Duration::from_millis(300), Duration::from_secs(5)).unwrap());
    Router::from_config(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
        transport,
        Arc::new(NoopTrigger),
        Arc::new(ProxyMetrics::new().unwrap()),
    )
    .unwrap()
}

fn config(origin: &str, rules: Vec<CacheRule>) -> ProxyConfig {
    ProxyConfig {
        origin_url: origin.to_string(),
        cache_rules: rules,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_stored_response_is_served_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app.js"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/javascript")
                .set_body_string("console.log('hi')"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = router(config(&server.uri(), vec![CacheRule::store("GET", "*.js")]));
    let request = InterceptedRequest::get(format!("{}/app.js", server.uri()));

    let first = router.respond(&request).await;
    let second = router.respond(&request).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body, "console.log('hi')");
    assert_eq!(second.header("content-type"), Some("application/javascript"));

    let stats = router.metrics().get_stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_stores, 1);
}

#[tokio::test]
async fn test_unmatched_and_failed_responses_are_not_stored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.js"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(2)
        .mount(&server)
        .await;

    let router = router(config(&server.uri(), vec![CacheRule::store("GET", "*.js")]));

    for _ in 0..2 {
        let missing = router
            .respond(&InterceptedRequest::get(format!("{}/missing.js", server.uri())))
            .await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let page = router
            .respond(&InterceptedRequest::get(format!("{}/page.html", server.uri())))
            .await;
        assert_eq!(page.status, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_bypass_header_skips_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(3)
        .mount(&server)
        .await;

    let router = router(config(&server.uri(), vec![CacheRule::store("GET", "*.json")]));
    let url = format!("{}/config.json", server.uri());

    router.respond(&InterceptedRequest::get(&url)).await;
    for _ in 0..2 {
        let bypassed = InterceptedRequest::get(&url).with_header("x-cache-bypass", "1");
        let response = router.respond(&bypassed).await;
        assert_eq!(response.status, StatusCode::OK);
    }
    assert_eq!(router.metrics().get_stats().cache_hits, 0);
}

#[tokio::test]
async fn test_head_reports_origin_length() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/download.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .insert_header("Content-Length", "12345"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let router = router(config(&server.uri(), vec![CacheRule::store("HEAD", "*.bin")]));
    let request = InterceptedRequest::new(Method::HEAD, format!("{}/download.bin", server.uri()));

    // Once from the origin, once from the cache
    for _ in 0..2 {
        let response = router.respond(&request).await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
        assert_eq!(response.header("content-length"), Some("12345"));
    }
    assert_eq!(router.metrics().get_stats().cache_hits, 1);
}

#[tokio::test]
async fn test_unreachable_origin_serves_fallback() {
    let router = router(ProxyConfig {
        origin_url: "http://127.0.0.1:9".to_string(),
        fallback_body: "You are offline".to_string(),
        ..Default::default()
    });

    let response = router
        .respond(&InterceptedRequest::get("http://127.0.0.1:9/index.html"))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, "You are offline");
    assert_eq!(response.header(FALLBACK_HEADER), Some("1"));
    assert_eq!(router.metrics().get_stats().fallbacks, 1);

    let options = router
        .respond(&InterceptedRequest::new(Method::OPTIONS, "http://127.0.0.1:9/api"))
        .await;
    assert_eq!(options.header(FALLBACK_HEADER), Some("1"));
}

#[tokio::test]
async fn test_every_matching_rule_fires() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/playlist"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "title": "one"},
            {"id": 2, "title": "two"},
            {"title": "no id"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    for id in [1, 2] {
        Mock::given(method("GET"))
            .and(path(format!("/media/{}.json", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": id})))
            .expect(1)
            .mount(&server)
            .await;
    }

    let router = router(config(
        &server.uri(),
        vec![
            CacheRule::store("GET", "*/api/playlist"),
            CacheRule::secondary_fetch("GET", "*/api/playlist", "/media/{id}.json"),
            CacheRule::store("get", "*/media/*.json"),
        ],
    ));

    let playlist = InterceptedRequest::get(format!("{}/api/playlist", server.uri()));
    let response = router.respond(&playlist).await;
    assert_eq!(response.status, StatusCode::OK);

    // Everything is cached now; none of these reach the origin again
    router.respond(&playlist).await;
    for id in [1, 2] {
        let media = router
            .respond(&InterceptedRequest::get(format!("{}/media/{}.json", server.uri(), id)))
            .await;
        assert_eq!(media.status, StatusCode::OK);
    }

    let stats = router.metrics().get_stats();
    assert_eq!(stats.cache_stores, 3);
    assert_eq!(stats.cache_hits, 3);
}

#[tokio::test]
async fn test_precache_populates_cache() {
    let server = MockServer::start().await;
    for asset in ["/", "/app.js", "/style.css"] {
        Mock::given(method("GET"))
            .and(path(asset))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("asset {}", asset)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let router = router(ProxyConfig {
        origin_url: server.uri(),
        precache: vec!["/".to_string(), "/app.js".to_string(), "/style.css".to_string()],
        ..Default::default()
    });

    let report = router.startup().await.unwrap();
    assert_eq!(report.precached, 3);

    let cached = router
        .respond(&InterceptedRequest::get(format!("{}/style.css", server.uri())))
        .await;
    assert_eq!(cached.body, "asset /style.css");
}

#[tokio::test]
async fn test_failed_precache_caches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/app.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("app"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.css"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let router = router(ProxyConfig {
        origin_url: server.uri(),
        precache: vec!["/app.js".to_string(), "/gone.css".to_string()],
        ..Default::default()
    });

    assert!(router.startup().await.is_err());

    let app = InterceptedRequest::get(format!("{}/app.js", server.uri()));
    assert!(router.static_cache().lookup(&app).await.is_none());
}
