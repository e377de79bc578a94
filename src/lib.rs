//! Offline-first caching proxy
//!
//! A Pingora-based proxy that keeps an application usable while its origin
//! server is unreachable. Every intercepted request is routed to one of three
//! strategies:
//!
//! - **Writes** (POST/PUT/DELETE) go network-first. Writes that cannot be
//!   delivered are persisted and replayed in id order once the origin answers
//!   again.
//! - **Large objects** (video and other media) are downloaded once in the
//!   background, split into fixed-size chunks and served from storage as
//!   `206 Partial Content` responses to Range requests.
//! - **Static resources** are served cache-first, with an ordered rule table
//!   deciding what gets stored and which related URLs get prefetched.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use offline_proxy::{ProxyConfig, Router};
//! use offline_proxy::reconnect::{ProbeBackoff, ReconnectMonitor};
//! use offline_proxy::store::open_namespaces;
//! use offline_proxy::transport::{HttpTransport, Transport};
//! use offline_proxy::ProxyMetrics;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let config = ProxyConfig::from_file("offline_proxy.yaml")?;
//! let (objects, queue) = open_namespaces(config.storage_path().as_deref()).await?;
//! let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
//!     config.connect_timeout(),
//!     config.request_timeout(),
//! )?);
//! let monitor = Arc::new(ReconnectMonitor::new(
//!     Arc::clone(&transport),
//!     config.origin_url.clone(),
//!     ProbeBackoff::new(Duration::from_secs(1), Duration::from_secs(60)),
//! ));
//! let metrics = Arc::new(ProxyMetrics::new()?);
//!
//! let router = Router::from_config(&config, objects, queue, transport, monitor, metrics)?;
//! let report = router.startup().await?;
//! println!("{} writes waiting for replay", report.drain.remaining());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`OfflineGateway`]: Pingora `ProxyHttp` front end
//! - [`Router`]: classifies requests and owns the components below
//! - [`StaticCacheManager`]: cache-first reads, rule table, fallback body
//! - [`ChunkStore`]: background acquisition and ranged reads of large objects
//! - [`ReplayQueue`]: durable queue of failed writes
//! - [`ReconnectMonitor`]: probes the origin and signals reconnects
//! - [`DurableStore`]: key-value persistence (file-backed or in-memory)
//! - [`ProxyMetrics`]: Prometheus collectors, served by [`MetricsEndpoint`]
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! origin_url: "http://origin.example.com"
//! chunk_size: 10485760
//! large_object_patterns: ["*.mp4", "/media/*"]
//! cache_rules:
//!   - method: GET
//!     pattern: "/api/playlist"
//!     action: store_response
//! storage_dir: "/var/lib/offline-proxy"
//! ```
//!
//! See [`ProxyConfig`] for every option.

pub mod chunk_store;
pub mod chunking;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod reconnect;
pub mod replay_queue;
pub mod response_cache;
pub mod router;
pub mod static_cache;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use chunk_store::{ChunkOutcome, ChunkStore};
pub use config::{MetricsEndpointConfig, ProxyConfig};
pub use error::{ProxyError, Result};
pub use gateway::{OfflineGateway, OriginTarget};
pub use metrics::{MetricsSnapshot, ProxyMetrics};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{
    ByteRange, CacheAction, CacheRule, DownloadState, InterceptedRequest, LargeObjectRecord,
    ProxyResponse, QueuedBody, QueuedWriteRequest, RequestKey,
};
pub use reconnect::{ReconnectHandler, ReconnectMonitor, ReconnectTrigger};
pub use replay_queue::{DrainReport, ReplayOutcome, ReplayQueue};
pub use response_cache::{MemoryResponseCache, ResponseCache};
pub use router::{Handled, Route, Router, StartupReport};
pub use static_cache::StaticCacheManager;
pub use store::DurableStore;
pub use transport::{HttpTransport, Transport};
