//! Offline Proxy Server
//!
//! Loads configuration, sets up logging, rebuilds persisted state and starts
//! the Pingora HTTP proxy service.
//!
//! # Usage
//! ```bash
//! # Start with default config (offline_proxy.yaml)
//! offline-proxy
//!
//! # Start with custom config
//! offline-proxy /path/to/config.yaml
//! ```

use anyhow::Context;
use offline_proxy::reconnect::ProbeBackoff;
use offline_proxy::store::open_namespaces;
use offline_proxy::{
    HttpTransport, MetricsEndpoint, OfflineGateway, ProxyConfig, ProxyMetrics, ReconnectHandler,
    ReconnectMonitor, ReconnectTrigger, Router, Transport,
};
use pingora::prelude::*;
use pingora::proxy::http_proxy_service;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Offline Proxy Server");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "offline_proxy.yaml".to_string());

    info!("Loading configuration from: {}", config_path);

    let config = match ProxyConfig::from_file(&config_path) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            info!("  - Listen address: {}", cfg.listen_address);
            info!("  - Origin: {}", cfg.origin_url);
            info!("  - Chunk size: {} bytes ({} KB)", cfg.chunk_size, cfg.chunk_size / 1024);
            info!("  - Large object patterns: {:?}", cfg.large_object_patterns);
            info!("  - Cache rules: {}", cfg.cache_rules.len());
            info!("  - Precache manifest: {} entries", cfg.precache.len());
            match cfg.storage_path() {
                Some(path) => info!("  - Storage: {}", path.display()),
                None => info!("  - Storage: in memory"),
            }
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Please ensure the configuration file exists and is valid");
            std::process::exit(1);
        }
    };

    // Pingora drives its own runtimes; background work gets a separate one
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("offline-proxy-bg")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start background runtime: {}", e);
            std::process::exit(1);
        }
    };

    let router = match runtime.block_on(bootstrap(&config)) {
        Ok(router) => router,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = serve(&config, router) {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

/// Build every component, run the startup sequence and spawn background tasks
async fn bootstrap(config: &ProxyConfig) -> anyhow::Result<Arc<Router>> {
    let (objects, queue) = open_namespaces(config.storage_path().as_deref())
        .await
        .context("opening durable stores")?;

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(config.connect_timeout(), config.request_timeout())
            .context("building HTTP client")?,
    );

    let monitor = Arc::new(ReconnectMonitor::new(
        Arc::clone(&transport),
        config.origin_url.clone(),
        ProbeBackoff::new(
            Duration::from_millis(config.reconnect_probe_interval_ms),
            Duration::from_millis(config.reconnect_probe_max_ms),
        ),
    ));

    let metrics = Arc::new(ProxyMetrics::new().context("registering metrics")?);

    let router = Arc::new(
        Router::from_config(
            config,
            objects,
            queue,
            transport,
            Arc::clone(&monitor) as Arc<dyn ReconnectTrigger>,
            Arc::clone(&metrics),
        )
        .context("wiring router")?,
    );

    let report = router.startup().await.context("startup sequence")?;
    if report.drain.remaining() > 0 {
        warn!("{} queued writes still waiting for the origin", report.drain.remaining());
    }

    let handler: Arc<dyn ReconnectHandler> = Arc::clone(router.replay_queue()) as Arc<dyn ReconnectHandler>;
    tokio::spawn(monitor.run(handler));

    if let Some(endpoint) = config.metrics_endpoint.as_ref().filter(|m| m.enabled) {
        let addr: SocketAddr = endpoint
            .address
            .parse()
            .with_context(|| format!("invalid metrics address {}", endpoint.address))?;
        let server = MetricsEndpoint::new(Arc::clone(&metrics), addr);
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Metrics endpoint error: {}", e);
            }
        });
    }

    Ok(router)
}

fn serve(config: &ProxyConfig, router: Arc<Router>) -> anyhow::Result<()> {
    let gateway = OfflineGateway::from_config(router, config).context("resolving origin")?;

    let mut my_server = Server::new(None).context("creating Pingora server")?;
    my_server.bootstrap();

    let mut proxy_service = http_proxy_service(&my_server.configuration, gateway);
    proxy_service.add_tcp(&config.listen_address);
    my_server.add_service(proxy_service);

    info!("Offline proxy listening on {}", config.listen_address);
    my_server.run_forever();
}
