//! Request router
//!
//! Classifies every intercepted request and dispatches it:
//! - POST/PUT/DELETE → network-first write path backed by the replay queue
//! - GET of a large object → chunk store
//! - other GET/HEAD/OPTIONS → static cache manager
//! - anything else → default network handling

use crate::chunk_store::{ChunkOutcome, ChunkStore};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use crate::models::{glob_match, InterceptedRequest, ProxyResponse};
use crate::replay_queue::{DrainReport, ReplayQueue};
use crate::reconnect::ReconnectTrigger;
use crate::response_cache::{MemoryResponseCache, ResponseCache};
use crate::static_cache::{StaticCacheManager, StaticCacheSettings};
use crate::store::DurableStore;
use crate::transport::Transport;
use http::{header, Method, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Header carrying the queue id of a write that could not reach the origin
pub const REPLAY_QUEUED_HEADER: &str = "x-replay-queued";

/// Path a request takes through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Write,
    LargeObject,
    Static,
    Passthrough,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Write => "write",
            Route::LargeObject => "large_object",
            Route::Static => "static",
            Route::Passthrough => "passthrough",
        }
    }
}

/// Result of routing one request
#[derive(Debug)]
pub enum Handled {
    Response(ProxyResponse),
    /// Let default network handling answer the request unmodified
    FallThrough,
}

/// Summary of the startup sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub restored_objects: usize,
    pub queued_writes: usize,
    pub precached: usize,
    pub drain: DrainReport,
}

/// Entry point for intercepted requests
pub struct Router {
    static_cache: Arc<StaticCacheManager>,
    chunk_store: Arc<ChunkStore>,
    replay_queue: Arc<ReplayQueue>,
    transport: Arc<dyn Transport>,
    metrics: Arc<ProxyMetrics>,
    large_object_patterns: Vec<String>,
    large_object_content_types: Vec<String>,
    precache: Vec<String>,
}

impl Router {
    /// Wire the router and its components from configuration
    ///
    /// `objects` and `queue` are the two durable namespaces.
    pub fn from_config(
        config: &ProxyConfig,
        objects: Arc<dyn DurableStore>,
        queue: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        trigger: Arc<dyn ReconnectTrigger>,
        metrics: Arc<ProxyMetrics>,
    ) -> Result<Self> {
        let cache: Arc<dyn ResponseCache> = Arc::new(MemoryResponseCache::with_max_size(
            config.cache_ttl(),
            config.cache_max_bytes,
        ));

        let replay_queue = Arc::new(ReplayQueue::new(
            queue,
            Arc::clone(&transport),
            trigger,
            Arc::clone(&metrics),
            config.sync_tag.clone(),
        ));

        let chunk_store = Arc::new(ChunkStore::new(
            objects,
            Arc::clone(&transport),
            Arc::clone(&metrics),
            config.chunk_size,
        ));

        let static_cache = Arc::new(StaticCacheManager::new(
            cache,
            Arc::clone(&transport),
            Arc::clone(&replay_queue),
            Arc::clone(&metrics),
            StaticCacheSettings {
                rules: config.cache_rules.clone(),
                bypass_header: config.bypass_header.to_ascii_lowercase(),
                fallback_body: config.fallback_body.clone(),
                ignore_query: config.ignore_query,
                max_secondary_depth: config.max_secondary_depth,
            },
        ));

        let precache = config
            .precache
            .iter()
            .map(|entry| config.origin_url_for(entry))
            .collect::<Result<Vec<_>>>()?;

        Ok(Router {
            static_cache,
            chunk_store,
            replay_queue,
            transport,
            metrics,
            large_object_patterns: config.large_object_patterns.clone(),
            large_object_content_types: config.large_object_content_types.clone(),
            precache,
        })
    }

    pub fn chunk_store(&self) -> &Arc<ChunkStore> {
        &self.chunk_store
    }

    pub fn replay_queue(&self) -> &Arc<ReplayQueue> {
        &self.replay_queue
    }

    pub fn static_cache(&self) -> &Arc<StaticCacheManager> {
        &self.static_cache
    }

    pub fn metrics(&self) -> &Arc<ProxyMetrics> {
        &self.metrics
    }

    /// Whether a request addresses a large object, by path pattern or Accept type
    pub fn is_large_object(&self, request: &InterceptedRequest) -> bool {
        let path = request.path();
        if self
            .large_object_patterns
            .iter()
            .any(|pattern| glob_match(pattern, &path))
        {
            return true;
        }

        match request.header(header::ACCEPT.as_str()) {
            Some(accept) => {
                let accept = accept.trim_start().to_ascii_lowercase();
                self.large_object_content_types
                    .iter()
                    .any(|prefix| accept.starts_with(&prefix.to_ascii_lowercase()))
            }
            None => false,
        }
    }

    /// Decide which path a request takes
    pub fn classify(&self, request: &InterceptedRequest) -> Route {
        let method = &request.method;
        if *method == Method::POST || *method == Method::PUT || *method == Method::DELETE {
            Route::Write
        } else if *method == Method::GET && self.is_large_object(request) {
            Route::LargeObject
        } else if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
            Route::Static
        } else {
            Route::Passthrough
        }
    }

    /// Handle an intercepted request
    pub async fn handle(&self, request: &InterceptedRequest) -> Handled {
        let route = self.classify(request);
        self.handle_as(route, request).await
    }

    /// Handle a request whose route is already known
    pub async fn handle_as(&self, route: Route, request: &InterceptedRequest) -> Handled {
        let started = Instant::now();
        debug!("{} {} routed to {}", request.method, request.url, route.as_str());
        self.metrics.record_request(route.as_str());

        let handled = match route {
            Route::Write => Handled::Response(self.handle_write(request).await),
            Route::LargeObject => match self.chunk_store.handle(request).await {
                Ok(ChunkOutcome::Served(response)) => Handled::Response(response),
                Ok(ChunkOutcome::FallThrough) => Handled::FallThrough,
                Err(e) => {
                    warn!("Chunk store failed for {}: {}", request.url, e);
                    Handled::FallThrough
                }
            },
            Route::Static => Handled::Response(self.static_cache.handle(request).await),
            Route::Passthrough => Handled::FallThrough,
        };

        self.metrics.record_request_duration(started.elapsed());
        handled
    }

    /// Network-first write
    ///
    /// - status < 500: returned as-is, queued writes get another chance
    /// - status >= 500: queued for replay, origin response returned
    /// - unreachable: queued for replay, 502 returned
    async fn handle_write(&self, request: &InterceptedRequest) -> ProxyResponse {
        match self.transport.send(request).await {
            Ok(response) if !response.is_server_error() => {
                self.replay_queue.schedule_drain();
                response
            }
            Ok(response) => {
                warn!(
                    "{} {} failed with {}, queueing for replay",
                    request.method, request.url, response.status
                );
                if let Err(e) = self.replay_queue.enqueue(request).await {
                    error!("Failed to queue {} {}: {}", request.method, request.url, e);
                }
                response
            }
            Err(e) => {
                warn!("{} {} unreachable: {}, queueing for replay", request.method, request.url, e);
                let response = error_response(&e);
                match self.replay_queue.enqueue(request).await {
                    Ok(id) => response.with_header(REPLAY_QUEUED_HEADER, &id.to_string()),
                    Err(qe) => {
                        error!("Failed to queue {} {}: {}", request.method, request.url, qe);
                        response
                    }
                }
            }
        }
    }

    /// Handle a request and resolve fall-through with a plain network send
    pub async fn respond(&self, request: &InterceptedRequest) -> ProxyResponse {
        match self.handle(request).await {
            Handled::Response(response) => response,
            Handled::FallThrough => match self.transport.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Passthrough of {} failed: {}", request.url, e);
                    error_response(&e)
                }
            },
        }
    }

    /// Startup sequence: rebuild state, precache, replay leftovers
    ///
    /// A failed precache aborts startup; every other step only logs.
    pub async fn startup(&self) -> Result<StartupReport> {
        let mut report = StartupReport::default();

        match self.chunk_store.restore().await {
            Ok(restored) => report.restored_objects = restored,
            Err(e) => error!("Failed to restore large objects: {}", e),
        }

        match self.replay_queue.restore().await {
            Ok(queued) => report.queued_writes = queued,
            Err(e) => error!("Failed to read replay queue: {}", e),
        }

        report.precached = self.static_cache.precache(&self.precache).await?;

        match self.replay_queue.drain().await {
            Ok(drain) => report.drain = drain,
            Err(e) => error!("Initial drain failed: {}", e),
        }

        info!(
            "Startup complete: {} objects restored, {} writes queued, {} resources precached",
            report.restored_objects, report.queued_writes, report.precached
        );
        Ok(report)
    }
}

/// Plain-text answer for a request that could not be completed
fn error_response(error: &ProxyError) -> ProxyResponse {
    let status = StatusCode::from_u16(error.to_http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    ProxyResponse::new(status, error.to_string())
        .with_header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::{ProbeBackoff, ReconnectMonitor};
    use crate::store::MemoryStore;
    use crate::transport::HttpTransport;
    use std::time::Duration;

    fn router(config: &ProxyConfig) -> Router {
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(Duration::from_millis(200), Duration::from_secs(2)).unwrap());
        let monitor = Arc::new(ReconnectMonitor::new(
            Arc::clone(&transport),
            config.origin_url.clone(),
            ProbeBackoff::new(Duration::from_millis(10), Duration::from_millis(10)),
        ));
        Router::from_config(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            transport,
            monitor,
            Arc::new(ProxyMetrics::new().unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_classify_by_method() {
        let router = router(&ProxyConfig::default());
        let url = "http://origin/api/items";

        for method in [Method::POST, Method::PUT, Method::DELETE] {
            assert_eq!(router.classify(&InterceptedRequest::new(method, url)), Route::Write);
        }
        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            assert_eq!(router.classify(&InterceptedRequest::new(method, url)), Route::Static);
        }
        assert_eq!(
            router.classify(&InterceptedRequest::new(Method::PATCH, url)),
            Route::Passthrough
        );
    }

    #[test]
    fn test_classify_large_objects() {
        let router = router(&ProxyConfig::default());

        let by_extension = InterceptedRequest::get("http://origin/media/intro.mp4?t=3");
        assert_eq!(router.classify(&by_extension), Route::LargeObject);

        let by_accept = InterceptedRequest::get("http://origin/stream/42")
            .with_header(header::ACCEPT, "video/webm");
        assert_eq!(router.classify(&by_accept), Route::LargeObject);

        let head = InterceptedRequest::new(Method::HEAD, "http://origin/media/intro.mp4");
        assert_eq!(router.classify(&head), Route::Static);

        let page = InterceptedRequest::get("http://origin/index.html")
            .with_header(header::ACCEPT, "text/html");
        assert_eq!(router.classify(&page), Route::Static);
    }

    #[tokio::test]
    async fn test_passthrough_falls_through() {
        let router = router(&ProxyConfig::default());
        let request = InterceptedRequest::new(Method::PATCH, "http://origin/api/items/1");
        assert!(matches!(router.handle(&request).await, Handled::FallThrough));
        assert_eq!(router.metrics().get_stats().passthrough_requests, 1);
    }

    #[test]
    fn test_error_response_status() {
        let unreachable = error_response(&ProxyError::TransportFailure("refused".into()));
        assert_eq!(unreachable.status, StatusCode::BAD_GATEWAY);
        assert_eq!(unreachable.header("content-type"), Some("text/plain; charset=utf-8"));

        let rejected = error_response(&ProxyError::from_http_status(409, "conflict"));
        assert_eq!(rejected.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unreachable_passthrough_is_bad_gateway() {
        let router = router(&ProxyConfig {
            origin_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        });
        let request = InterceptedRequest::new(Method::PATCH, "http://127.0.0.1:9/api/items/1");
        let response = router.respond(&request).await;
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert!(!response.body.is_empty());
    }
}
