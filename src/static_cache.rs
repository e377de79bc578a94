//! Cache-aside handling for ordinary resources
//!
//! Reads are answered from the response cache when possible and otherwise
//! forwarded to the origin. Successful origin responses run through the
//! ordered rule table, where every matching rule fires. An unreachable origin
//! never surfaces as an error: the caller gets the fallback response instead.

use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use crate::models::{CacheAction, CacheRule, InterceptedRequest, ProxyResponse, RequestKey};
use crate::replay_queue::ReplayQueue;
use crate::response_cache::ResponseCache;
use crate::transport::Transport;
use bytes::Bytes;
use http::{header, StatusCode};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Header marking a response as the offline fallback
pub const FALLBACK_HEADER: &str = "x-offline-fallback";

type BoxedResponse<'a> = Pin<Box<dyn Future<Output = ProxyResponse> + Send + 'a>>;

/// Settings of the static cache path
#[derive(Debug, Clone)]
pub struct StaticCacheSettings {
    pub rules: Vec<CacheRule>,
    pub bypass_header: String,
    pub fallback_body: String,
    pub ignore_query: bool,
    pub max_secondary_depth: usize,
}

impl Default for StaticCacheSettings {
    fn default() -> Self {
        StaticCacheSettings {
            rules: Vec::new(),
            bypass_header: "x-cache-bypass".to_string(),
            fallback_body: "fallback".to_string(),
            ignore_query: false,
            max_secondary_depth: 3,
        }
    }
}

/// Cache-first manager for GET/HEAD/OPTIONS resources
pub struct StaticCacheManager {
    cache: Arc<dyn ResponseCache>,
    transport: Arc<dyn Transport>,
    replay_queue: Arc<ReplayQueue>,
    metrics: Arc<ProxyMetrics>,
    settings: StaticCacheSettings,
}

impl StaticCacheManager {
    pub fn new(
        cache: Arc<dyn ResponseCache>,
        transport: Arc<dyn Transport>,
        replay_queue: Arc<ReplayQueue>,
        metrics: Arc<ProxyMetrics>,
        settings: StaticCacheSettings,
    ) -> Self {
        StaticCacheManager {
            cache,
            transport,
            replay_queue,
            metrics,
            settings,
        }
    }

    pub fn cache_key(&self, request: &InterceptedRequest) -> RequestKey {
        RequestKey::from_request(request, self.settings.ignore_query)
    }

    /// Look a request up in the cache; cache errors count as a miss
    pub async fn lookup(&self, request: &InterceptedRequest) -> Option<ProxyResponse> {
        let key = self.cache_key(request);
        match self.cache.lookup(&key).await {
            Ok(Some(response)) => {
                debug!("Cache hit: {}", key);
                self.metrics.record_cache_hit();
                Some(response)
            }
            Ok(None) => {
                debug!("Cache miss: {}", key);
                self.metrics.record_cache_miss();
                None
            }
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", key, e);
                self.metrics.record_cache_error();
                None
            }
        }
    }

    /// Answer a read request; never fails
    pub async fn handle(&self, request: &InterceptedRequest) -> ProxyResponse {
        self.handle_at_depth(request, 0).await
    }

    fn is_bypassed(&self, request: &InterceptedRequest) -> bool {
        request.headers.contains_key(self.settings.bypass_header.as_str())
    }

    fn handle_at_depth<'a>(&'a self, request: &'a InterceptedRequest, depth: usize) -> BoxedResponse<'a> {
        Box::pin(async move {
            if self.is_bypassed(request) {
                debug!("Cache bypassed for {}", request.url);
            } else if let Some(cached) = self.lookup(request).await {
                return cached;
            }

            let response = match self.transport.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Serving fallback for {} {}: {}", request.method, request.url, e);
                    self.metrics.record_fallback();
                    return self.fallback_response();
                }
            };

            if response.is_success() {
                self.apply_rules(request, &response, depth).await;
                self.replay_queue.schedule_drain();
            }
            response
        })
    }

    /// Last-resort response served when the origin is unreachable
    pub fn fallback_response(&self) -> ProxyResponse {
        ProxyResponse::new(
            StatusCode::OK,
            Bytes::from(self.settings.fallback_body.clone()),
        )
        .with_header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .with_header(FALLBACK_HEADER, "1")
    }

    /// Fire every rule matching the request, in table order
    async fn apply_rules(&self, request: &InterceptedRequest, response: &ProxyResponse, depth: usize) {
        for rule in &self.settings.rules {
            if !rule.matches(&request.method, &request.url) {
                continue;
            }

            match &rule.action {
                CacheAction::StoreResponse => self.store(request, response).await,
                CacheAction::SecondaryFetch { url_template } => {
                    self.secondary_fetch(request, response, url_template, depth).await
                }
            }
        }
    }

    /// Best-effort store; failures are logged and swallowed
    async fn store(&self, request: &InterceptedRequest, response: &ProxyResponse) {
        let key = self.cache_key(request);
        match self.cache.put(&key, response).await {
            Ok(()) => {
                debug!("Stored {} in cache", key);
                self.metrics.record_cache_store();
            }
            Err(e) => {
                warn!("Failed to cache {}: {}", key, e);
                self.metrics.record_cache_error();
            }
        }
    }

    async fn secondary_fetch(
        &self,
        request: &InterceptedRequest,
        response: &ProxyResponse,
        url_template: &str,
        depth: usize,
    ) {
        if depth >= self.settings.max_secondary_depth {
            debug!(
                "Secondary fetch depth {} reached at {}, skipping",
                depth, request.url
            );
            return;
        }

        let body: Value = match serde_json::from_slice(&response.body) {
            Ok(body) => body,
            Err(e) => {
                debug!("Response of {} is not JSON, skipping secondary fetch: {}", request.url, e);
                return;
            }
        };

        for target in derive_urls(url_template, &body, &request.url) {
            debug!("Secondary fetch {} (from {})", target, request.url);
            let secondary = InterceptedRequest::get(target);
            let result = self.handle_at_depth(&secondary, depth + 1).await;
            debug!("Secondary fetch {} -> {}", secondary.url, result.status);
        }
    }

    /// Fetch every manifest URL and cache them all, or none
    ///
    /// Returns the number of cached responses.
    pub async fn precache(&self, urls: &[String]) -> Result<usize> {
        let mut fetched = Vec::with_capacity(urls.len());
        for url in urls {
            let request = InterceptedRequest::get(url.clone());
            let response = self.transport.send(&request).await?;
            if !response.is_success() {
                return Err(ProxyError::from_http_status(
                    response.status.as_u16(),
                    format!("precache of {}", url),
                ));
            }
            fetched.push((self.cache_key(&request), response));
        }

        for (key, response) in &fetched {
            self.cache.put(key, response).await?;
        }

        info!("Precached {} resources", fetched.len());
        Ok(fetched.len())
    }
}

/// Expand `template` for every object in `body`
///
/// An object body yields one URL, an array body one URL per object element.
/// Elements missing a referenced field are skipped. Relative results are
/// resolved against `base_url`.
pub fn derive_urls(template: &str, body: &Value, base_url: &str) -> Vec<String> {
    let objects: Vec<&Map<String, Value>> = match body {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    };

    objects
        .into_iter()
        .filter_map(|fields| match expand_template(template, fields) {
            Some(expanded) => Some(expanded),
            None => {
                debug!("Template {} references a missing field", template);
                None
            }
        })
        .filter_map(|expanded| resolve_url(base_url, &expanded))
        .collect()
}

/// Replace `{field}` placeholders with top-level scalar fields
fn expand_template(template: &str, fields: &Map<String, Value>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Some(out);
        };

        let name = &after[..close];
        let value = match fields.get(name)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        out.push_str(&value);
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Some(out)
}

fn resolve_url(base_url: &str, target: &str) -> Option<String> {
    match reqwest::Url::parse(base_url).and_then(|base| base.join(target)) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            debug!("Cannot resolve {} against {}: {}", target, base_url, e);
            None
        }
    }
}
