//! Reconnect signalling
//!
//! Components that need another chance once the origin is reachable again
//! register a tag with a [`ReconnectTrigger`]. The [`ReconnectMonitor`]
//! probes the origin with exponential backoff while tags are pending and
//! hands each tag to a [`ReconnectHandler`] once a probe gets any response.

use crate::models::InterceptedRequest;
use crate::transport::Transport;
use async_trait::async_trait;
use http::Method;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info};

/// Registers interest in a future reconnect signal
pub trait ReconnectTrigger: Send + Sync {
    fn register(&self, tag: &str);
}

/// Receives reconnect signals
#[async_trait]
pub trait ReconnectHandler: Send + Sync {
    async fn on_reconnect(&self, tag: &str);
}

/// Exponential backoff between reconnect probes
#[derive(Debug, Clone)]
pub struct ProbeBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ProbeBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        ProbeBackoff { base, max }
    }

    /// Delay before probe number `attempt` (base, 2x base, 4x base, ... capped)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// [`ReconnectTrigger`] that probes the origin until it answers
pub struct ReconnectMonitor {
    transport: Arc<dyn Transport>,
    probe_url: String,
    backoff: ProbeBackoff,
    pending: Mutex<BTreeSet<String>>,
    wake: Notify,
}

impl ReconnectMonitor {
    pub fn new(transport: Arc<dyn Transport>, probe_url: impl Into<String>, backoff: ProbeBackoff) -> Self {
        ReconnectMonitor {
            transport,
            probe_url: probe_url.into(),
            backoff,
            pending: Mutex::new(BTreeSet::new()),
            wake: Notify::new(),
        }
    }

    /// Tags waiting for a reconnect
    pub fn pending_tags(&self) -> Vec<String> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.iter().cloned().collect()
    }

    fn take_pending(&self) -> Vec<String> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending).into_iter().collect()
    }

    /// One HEAD request against the origin; any HTTP response counts as online
    pub async fn probe(&self) -> bool {
        let request = InterceptedRequest::new(Method::HEAD, self.probe_url.clone());
        match self.transport.send(&request).await {
            Ok(response) => {
                debug!("Reconnect probe answered with {}", response.status);
                true
            }
            Err(e) => {
                debug!("Reconnect probe failed: {}", e);
                false
            }
        }
    }

    /// Probe loop; runs until the process exits
    pub async fn run(self: Arc<Self>, handler: Arc<dyn ReconnectHandler>) {
        info!("Reconnect monitor probing {}", self.probe_url);

        loop {
            if self.pending_tags().is_empty() {
                self.wake.notified().await;
                continue;
            }

            let mut attempt = 0;
            loop {
                sleep(self.backoff.delay(attempt)).await;
                if self.probe().await {
                    break;
                }
                attempt = attempt.saturating_add(1);
            }

            let tags = self.take_pending();
            info!("Origin reachable again, signalling {} tag(s)", tags.len());
            for tag in tags {
                handler.on_reconnect(&tag).await;
            }
        }
    }
}

impl ReconnectTrigger for ReconnectMonitor {
    fn register(&self, tag: &str) {
        let newly_added = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(tag.to_string())
        };
        if newly_added {
            debug!("Registered reconnect tag {}", tag);
        }
        self.wake.notify_one();
    }
}
