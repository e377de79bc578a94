//! Configuration management for the offline proxy

use crate::error::{ProxyError, Result};
use crate::models::CacheRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the offline proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the proxy listens on (default: "0.0.0.0:8080")
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Base URL of the origin server; request paths are appended to it
    #[serde(default = "default_origin_url")]
    pub origin_url: String,

    /// Size of each large-object chunk in bytes (default: 10MB)
    /// Valid range: 64KB to 64MB
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// URL path patterns routed to the chunk store (glob, `*` wildcard)
    #[serde(default = "default_large_object_patterns")]
    pub large_object_patterns: Vec<String>,

    /// Accept header prefixes routed to the chunk store
    #[serde(default = "default_large_object_content_types")]
    pub large_object_content_types: Vec<String>,

    /// Ordered cache rule table; every matching rule fires
    #[serde(default)]
    pub cache_rules: Vec<CacheRule>,

    /// URLs (paths or absolute) that must be cached before serving traffic
    #[serde(default)]
    pub precache: Vec<String>,

    /// Request header whose presence skips the cache lookup
    #[serde(default = "default_bypass_header")]
    pub bypass_header: String,

    /// Body of the last-resort response served when the origin is unreachable
    #[serde(default = "default_fallback_body")]
    pub fallback_body: String,

    /// Ignore the query string when building cache keys (default: false)
    #[serde(default)]
    pub ignore_query: bool,

    /// Maximum nesting of secondary fetches (default: 3)
    #[serde(default = "default_max_secondary_depth")]
    pub max_secondary_depth: usize,

    /// Response cache TTL in seconds (default: 86400 = 1 day)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,

    /// Response cache size limit in bytes (default: 256MB)
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: usize,

    /// Directory of the durable stores; empty keeps everything in memory
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Tag registered with the reconnect trigger
    #[serde(default = "default_sync_tag")]
    pub sync_tag: String,

    /// Base interval of the reconnect probe backoff in milliseconds
    #[serde(default = "default_reconnect_probe_interval_ms")]
    pub reconnect_probe_interval_ms: u64,

    /// Upper bound of the reconnect probe backoff in milliseconds
    #[serde(default = "default_reconnect_probe_max_ms")]
    pub reconnect_probe_max_ms: u64,

    /// Origin connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Origin request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Metrics endpoint configuration (optional)
    #[serde(default)]
    pub metrics_endpoint: Option<MetricsEndpointConfig>,
}

/// Configuration for the metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEndpointConfig {
    /// Whether to enable the metrics endpoint (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Address to bind the metrics endpoint to (default: "127.0.0.1:9090")
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

// Default value functions for serde
fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_origin_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_chunk_size() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_large_object_patterns() -> Vec<String> {
    vec!["*.mp4".to_string()]
}

fn default_large_object_content_types() -> Vec<String> {
    vec!["video/".to_string()]
}

fn default_bypass_header() -> String {
    "x-cache-bypass".to_string()
}

fn default_fallback_body() -> String {
    "fallback".to_string()
}

fn default_max_secondary_depth() -> usize {
    3
}

fn default_cache_ttl() -> u64 {
    86400 // 1 day
}

fn default_cache_max_bytes() -> usize {
    256 * 1024 * 1024 // 256MB
}

fn default_storage_dir() -> String {
    "/var/lib/offline-proxy".to_string()
}

fn default_sync_tag() -> String {
    "replay-queue".to_string()
}

fn default_reconnect_probe_interval_ms() -> u64 {
    1000
}

fn default_reconnect_probe_max_ms() -> u64 {
    60_000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    300_000
}

fn default_metrics_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen_address: default_listen_address(),
            origin_url: default_origin_url(),
            chunk_size: default_chunk_size(),
            large_object_patterns: default_large_object_patterns(),
            large_object_content_types: default_large_object_content_types(),
            cache_rules: Vec::new(),
            precache: Vec::new(),
            bypass_header: default_bypass_header(),
            fallback_body: default_fallback_body(),
            ignore_query: false,
            max_secondary_depth: default_max_secondary_depth(),
            cache_ttl: default_cache_ttl(),
            cache_max_bytes: default_cache_max_bytes(),
            storage_dir: default_storage_dir(),
            sync_tag: default_sync_tag(),
            reconnect_probe_interval_ms: default_reconnect_probe_interval_ms(),
            reconnect_probe_max_ms: default_reconnect_probe_max_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            metrics_endpoint: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(ProxyConfig)` if loading and validation succeed
    /// * `Err(ProxyError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ProxyConfig = serde_yaml::from_str(content).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - chunk_size must be between 64KB and 64MB
    /// - origin_url must be an absolute http(s) URL
    /// - sync_tag must not be empty
    /// - cache_ttl must be > 0
    /// - every cache rule needs a method and a pattern
    pub fn validate(&self) -> Result<()> {
        const MIN_CHUNK_SIZE: u64 = 64 * 1024; // 64KB
        const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024; // 64MB

        if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ProxyError::ConfigError(format!(
                "chunk_size must be between {}KB and {}MB, got {} bytes",
                MIN_CHUNK_SIZE / 1024,
                MAX_CHUNK_SIZE / (1024 * 1024),
                self.chunk_size
            )));
        }

        let origin = reqwest::Url::parse(&self.origin_url).map_err(|e| {
            ProxyError::ConfigError(format!("Invalid origin_url '{}': {}", self.origin_url, e))
        })?;
        if origin.scheme() != "http" && origin.scheme() != "https" {
            return Err(ProxyError::ConfigError(format!(
                "origin_url must use http or https, got '{}'",
                origin.scheme()
            )));
        }
        if origin.host_str().is_none() {
            return Err(ProxyError::ConfigError(
                "origin_url must include a host".to_string(),
            ));
        }

        if self.sync_tag.trim().is_empty() {
            return Err(ProxyError::ConfigError(
                "sync_tag must not be empty".to_string(),
            ));
        }

        if self.cache_ttl == 0 {
            return Err(ProxyError::ConfigError(
                "cache_ttl must be greater than 0".to_string(),
            ));
        }

        if self.bypass_header.trim().is_empty() {
            return Err(ProxyError::ConfigError(
                "bypass_header must not be empty".to_string(),
            ));
        }

        for (index, rule) in self.cache_rules.iter().enumerate() {
            if rule.pattern.is_empty() || rule.method.is_empty() {
                return Err(ProxyError::ConfigError(format!(
                    "cache_rules[{}] must have a method and a pattern",
                    index
                )));
            }
        }

        if self.reconnect_probe_interval_ms == 0
            || self.reconnect_probe_interval_ms > self.reconnect_probe_max_ms
        {
            return Err(ProxyError::ConfigError(format!(
                "reconnect_probe_interval_ms must be in 1..={}, got {}",
                self.reconnect_probe_max_ms, self.reconnect_probe_interval_ms
            )));
        }

        Ok(())
    }

    /// Resolve a request path (or an absolute URL) against the origin
    pub fn origin_url_for(&self, path_or_url: &str) -> Result<String> {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            return Ok(path_or_url.to_string());
        }

        let base = reqwest::Url::parse(&self.origin_url).map_err(|e| {
            ProxyError::ConfigError(format!("Invalid origin_url '{}': {}", self.origin_url, e))
        })?;
        let joined = base
            .join(path_or_url)
            .map_err(|e| ProxyError::ParseError(format!("Invalid path '{}': {}", path_or_url, e)))?;
        Ok(joined.to_string())
    }

    /// Directory of the durable stores, `None` when stores live in memory
    pub fn storage_path(&self) -> Option<PathBuf> {
        if self.storage_dir.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.storage_dir))
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}
